use std::fmt::Display;
use std::io::ErrorKind;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tokio::signal;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use toolgate_internal::authz::tool_gate;
use toolgate_internal::config::Config;
use toolgate_internal::endpoints;
use toolgate_internal::gateway_util::AppStateData;
use toolgate_internal::observability::{self, LogFormat};

const TOOLGATE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Sets the log format used for all gateway logs.
    #[arg(long)]
    #[arg(value_enum)]
    #[clap(default_value_t = LogFormat::default())]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    // Set up logs immediately, so that we can use `tracing`.
    observability::setup_observability(args.log_format).expect_pretty("Failed to set up logs");

    tracing::info!("Starting Toolgate {TOOLGATE_VERSION}");

    let config = Arc::new(Config::from_env().expect_pretty("Failed to load configuration"));
    let bind_address = config.bind_address;

    let app_state = AppStateData::new(config)
        .await
        .expect_pretty("Failed to initialize AppState");

    // Tool routes sit behind the full authorization pipeline; everything
    // else is public or internal-only.
    let tool_routes = Router::new()
        .route("/v1/tools/{tool}", post(endpoints::tools::tool_handler))
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            tool_gate,
        ));

    let public_routes = Router::new()
        .route("/session", post(endpoints::session::create_session_handler))
        .route(
            "/session/captcha",
            post(endpoints::session::verify_captcha_handler),
        )
        .route("/status", get(endpoints::status::status_handler))
        .route("/health", get(endpoints::status::health_handler));

    // Hit by the deployment's scheduler, never exposed through the public
    // ingress.
    let internal_routes = Router::new()
        .route(
            "/internal/retention/sweep",
            post(endpoints::retention::sweep_handler),
        )
        .route(
            "/internal/retention/status",
            get(endpoints::retention::retention_status_handler),
        );

    let router = Router::new()
        .merge(tool_routes)
        .merge(public_routes)
        .merge(internal_routes)
        .fallback(endpoints::fallback::handle_404)
        // Request/response lines go to the logs; failed requests log at
        // DEBUG since our own error-logging code already covers them.
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::DEBUG)))
        .with_state(app_state);

    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            tracing::error!(
                "Failed to bind to socket address {bind_address}: {e}. Tip: Ensure no other process is using port {} or try a different port.",
                bind_address.port()
            );
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Failed to bind to socket address {bind_address}: {e}");
            std::process::exit(1);
        }
    };
    // This will give us the chosen port if the user specified a port of 0
    let actual_bind_address = listener
        .local_addr()
        .expect_pretty("Failed to get bind address from listener");

    tracing::info!("Toolgate is listening on {actual_bind_address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect_pretty("Failed to start server");
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect_pretty("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect_pretty("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        }
    };
}

/// ┌──────────────────────────────────────────────────────────────────────────┐
/// │                           MAIN.RS ESCAPE HATCH                           │
/// └──────────────────────────────────────────────────────────────────────────┘
///
/// We don't allow panic, escape, unwrap, or similar methods in the codebase,
/// except for the private `expect_pretty` method, which is to be used only in
/// main.rs during initialization. After initialization, we expect all code to
/// handle errors gracefully.
///
/// We use `expect_pretty` for better DX when handling errors in main.rs.
/// `expect_pretty` will print an error message and exit with a status code of 1.
trait ExpectPretty<T> {
    fn expect_pretty(self, msg: &str) -> T;
}

impl<T, E: Display> ExpectPretty<T> for Result<T, E> {
    fn expect_pretty(self, msg: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("{msg}: {err}");
                std::process::exit(1);
            }
        }
    }
}
