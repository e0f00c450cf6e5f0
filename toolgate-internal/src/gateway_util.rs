use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Json, Request};
use object_store::ObjectStore;
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::authz::Gatekeeper;
use crate::captcha::CaptchaVerifier;
use crate::config::Config;
use crate::error::{Error, ErrorDetails};
use crate::rate_limit::FixedWindowLimiter;
use crate::redis_client::RedisClient;
use crate::retention::{RedisSubmissionIndex, RetentionSweeper, SubmissionIndex};
use crate::session::SessionStore;
use crate::spend::SpendTracker;
use crate::tool::{HttpToolRunner, ToolRunner};

/// State for the API
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub http_client: Client,
    pub redis: Arc<RedisClient>,
    pub session_store: Arc<SessionStore>,
    pub captcha_verifier: Arc<CaptchaVerifier>,
    pub spend_tracker: Arc<SpendTracker>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub artifact_store: Arc<dyn ObjectStore>,
    pub submission_index: Arc<dyn SubmissionIndex>,
    pub sweeper: Arc<RetentionSweeper>,
    pub tool_runner: Arc<dyn ToolRunner>,
}
pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    /// Wire up every component from a validated config. Connectivity
    /// problems (Redis unreachable, bad store URL) surface here, at startup.
    pub async fn new(config: Arc<Config>) -> Result<Self, Error> {
        let http_client = setup_http_client()?;
        let redis = Arc::new(RedisClient::new(&config.redis_url).await?);

        let session_store = Arc::new(SessionStore::new(redis.clone()));
        let rate_limiter = Arc::new(FixedWindowLimiter::new(redis.clone()));
        let spend_tracker = Arc::new(SpendTracker::new(
            redis.clone(),
            config.monthly_budget_usd,
            config.contact_email.clone(),
        ));
        let gatekeeper = Arc::new(Gatekeeper::new(
            session_store.clone(),
            rate_limiter,
            spend_tracker.clone(),
        ));

        let captcha_verifier = Arc::new(CaptchaVerifier::new(
            http_client.clone(),
            config.captcha_verify_url.clone(),
            config.captcha_secret.clone(),
        ));

        let artifact_store = setup_artifact_store(&config.artifact_store_url)?;
        let submission_index: Arc<dyn SubmissionIndex> =
            Arc::new(RedisSubmissionIndex::new(redis.clone()));
        let sweeper = Arc::new(RetentionSweeper::new(
            submission_index.clone(),
            artifact_store.clone(),
        ));

        let tool_runner: Arc<dyn ToolRunner> = Arc::new(HttpToolRunner::new(
            http_client.clone(),
            config.tool_backend_url.clone(),
        ));

        Ok(Self {
            config,
            http_client,
            redis,
            session_store,
            captcha_verifier,
            spend_tracker,
            gatekeeper,
            artifact_store,
            submission_index,
            sweeper,
            tool_runner,
        })
    }

    /// Swap in a different tool backend, mainly for tests and local runs.
    pub fn with_tool_runner(mut self, tool_runner: Arc<dyn ToolRunner>) -> Self {
        self.tool_runner = tool_runner;
        self
    }
}

pub fn setup_artifact_store(url: &Url) -> Result<Arc<dyn ObjectStore>, Error> {
    let (store, _) = object_store::parse_url(url).map_err(|e| {
        Error::new(ErrorDetails::AppState {
            message: format!("Failed to create object store for `{url}`: {e}"),
        })
    })?;
    Ok(Arc::from(store))
}

// High enough for a slow LLM-backed tool run, low enough that a hung
// backend cannot pin connections for long.
pub const DEFAULT_HTTP_CLIENT_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(5 * 60);

pub fn setup_http_client() -> Result<Client, Error> {
    Client::builder()
        .timeout(DEFAULT_HTTP_CLIENT_TIMEOUT)
        .build()
        .map_err(|e| {
            Error::new(ErrorDetails::AppState {
                message: format!("Failed to build HTTP client: {e}"),
            })
        })
}

/// Custom Axum extractor that validates the JSON body and deserializes it
/// into a custom type, reporting failures in the standard error body shape.
pub struct StructuredJson<T>(pub T);

impl<S, T> FromRequest<S> for StructuredJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: Send + Sync + DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            Error::new(ErrorDetails::JsonRequest {
                message: e.body_text(),
            })
        })?;
        Ok(StructuredJson(value))
    }
}
