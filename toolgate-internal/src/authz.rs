use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

use crate::error::{Error, ErrorDetails};
use crate::gateway_util::AppStateData;
use crate::rate_limit::{FixedWindowLimiter, RateLimitDecision};
use crate::session::{hash_ip, parse_session_cookie, Session, SessionStore};
use crate::spend::{month_key, SpendTracker};
use crate::tool::is_known_tool;

/// Session lookup seam for the pipeline.
#[async_trait]
pub trait SessionGate: Send + Sync {
    async fn fetch(&self, session_id: &str) -> Result<Option<Session>, Error>;
}

/// Rate limit seam for the pipeline.
#[async_trait]
pub trait RateLimitGate: Send + Sync {
    async fn check_and_consume(
        &self,
        session_id: &str,
        ip_hashed: &str,
        scope: &str,
    ) -> Result<RateLimitDecision, Error>;
}

/// Spend cap seam for the pipeline.
#[async_trait]
pub trait SpendGate: Send + Sync {
    async fn enforce(&self, month_key: &str) -> Result<(), Error>;
}

#[async_trait]
impl SessionGate for SessionStore {
    async fn fetch(&self, session_id: &str) -> Result<Option<Session>, Error> {
        self.get_session(session_id).await
    }
}

#[async_trait]
impl RateLimitGate for FixedWindowLimiter {
    async fn check_and_consume(
        &self,
        session_id: &str,
        ip_hashed: &str,
        scope: &str,
    ) -> Result<RateLimitDecision, Error> {
        FixedWindowLimiter::check_and_consume(self, session_id, ip_hashed, scope).await
    }
}

#[async_trait]
impl SpendGate for SpendTracker {
    async fn enforce(&self, month_key: &str) -> Result<(), Error> {
        SpendTracker::enforce(self, month_key).await
    }
}

/// Per-call opt-outs for internal/administrative callers. Each flag removes
/// exactly one check and leaves the others untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthorizeOptions {
    pub skip_rate_limit: bool,
    pub skip_spend_cap: bool,
}

/// Proof that a request cleared the pipeline, carried in request extensions.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub session_id: String,
}

/// The ordered gate every tool endpoint passes before doing expensive work.
///
/// Checks short-circuit: after a failing step, later gates are never
/// invoked. Denials come back as typed errors; a gate's system failure
/// (store unreachable) propagates as-is and is never reshaped into a
/// denial.
pub struct Gatekeeper {
    sessions: Arc<dyn SessionGate>,
    rate_limiter: Arc<dyn RateLimitGate>,
    spend: Arc<dyn SpendGate>,
}

impl Gatekeeper {
    pub fn new(
        sessions: Arc<dyn SessionGate>,
        rate_limiter: Arc<dyn RateLimitGate>,
        spend: Arc<dyn SpendGate>,
    ) -> Self {
        Self {
            sessions,
            rate_limiter,
            spend,
        }
    }

    pub async fn authorize(
        &self,
        session_id: Option<&str>,
        ip_hashed: &str,
        scope: &str,
        opts: AuthorizeOptions,
    ) -> Result<AuthContext, Error> {
        let session_id = session_id.ok_or_else(|| Error::new(ErrorDetails::NoSession))?;

        let session = self
            .sessions
            .fetch(session_id)
            .await?
            .ok_or_else(|| Error::new(ErrorDetails::SessionExpired))?;
        if session.is_expired(Utc::now()) {
            return Err(Error::new(ErrorDetails::SessionExpired));
        }

        if session.captcha_passed_at.is_none() {
            return Err(Error::new(ErrorDetails::CaptchaRequired));
        }

        if !opts.skip_rate_limit {
            match self
                .rate_limiter
                .check_and_consume(session_id, ip_hashed, scope)
                .await?
            {
                RateLimitDecision::Allow { .. } => {}
                RateLimitDecision::Deny { retry_after_ms } => {
                    return Err(Error::new(ErrorDetails::RateLimitExceeded { retry_after_ms }));
                }
            }
        }

        if !opts.skip_spend_cap {
            self.spend.enforce(&month_key(Utc::now())).await?;
        }

        Ok(AuthContext {
            session_id: session_id.to_string(),
        })
    }
}

/// Best-effort client IP for hashing: first hop of `X-Forwarded-For`,
/// falling back to `X-Real-IP`. Behind the expected proxy setup one of the
/// two is always present.
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            return value.trim().to_string();
        }
    }
    "unknown".to_string()
}

/// Rate-limit scope for a tool route, e.g. `/v1/tools/fit` -> `tool:fit`.
///
/// Unknown tool names 404 here, before any gate runs, so requests for
/// bogus tool paths never consume from a rate-limit window.
pub fn tool_scope_for_path(path: &str) -> Result<String, Error> {
    let tool = path.rsplit('/').next().unwrap_or("");
    if !is_known_tool(tool) {
        return Err(Error::new(ErrorDetails::UnknownTool {
            tool: tool.to_string(),
        }));
    }
    Ok(format!("tool:{tool}"))
}

/// Middleware applied to every tool route: runs the pipeline and stashes the
/// authorization context for the handler.
pub async fn tool_gate(
    State(state): State<AppStateData>,
    mut request: Request,
    next: Next,
) -> Result<Response, Error> {
    let scope = tool_scope_for_path(request.uri().path())?;

    let session_id = request
        .headers()
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_session_cookie)
        .map(str::to_owned);

    let ip_hashed = hash_ip(&client_ip(request.headers()));

    let context = state
        .gatekeeper
        .authorize(
            session_id.as_deref(),
            &ip_hashed,
            &scope,
            AuthorizeOptions::default(),
        )
        .await?;

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSessions {
        session: Option<Session>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionGate for FakeSessions {
        async fn fetch(&self, _session_id: &str) -> Result<Option<Session>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.session.clone())
        }
    }

    struct FailingSessions;

    #[async_trait]
    impl SessionGate for FailingSessions {
        async fn fetch(&self, _session_id: &str) -> Result<Option<Session>, Error> {
            Err(Error::new_without_logging(ErrorDetails::Storage {
                message: "redis down".to_string(),
            }))
        }
    }

    struct FakeRateLimiter {
        decision: fn() -> RateLimitDecision,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateLimitGate for FakeRateLimiter {
        async fn check_and_consume(
            &self,
            _session_id: &str,
            _ip_hashed: &str,
            _scope: &str,
        ) -> Result<RateLimitDecision, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.decision)())
        }
    }

    struct FakeSpend {
        over_budget: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpendGate for FakeSpend {
        async fn enforce(&self, _month_key: &str) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.over_budget {
                Err(Error::new_without_logging(ErrorDetails::SpendCapExceeded {
                    contact_email: "owner@example.com".to_string(),
                }))
            } else {
                Ok(())
            }
        }
    }

    fn live_session(captcha: bool) -> Session {
        let now = Utc::now();
        Session {
            id: "s-1".to_string(),
            created_at: now,
            expires_at: now + Duration::days(7),
            ip_hashed: hash_ip("192.0.2.1"),
            captcha_passed_at: captcha.then_some(now),
        }
    }

    struct Harness {
        sessions: Arc<FakeSessions>,
        rate_limiter: Arc<FakeRateLimiter>,
        spend: Arc<FakeSpend>,
        gatekeeper: Gatekeeper,
    }

    fn harness(
        session: Option<Session>,
        decision: fn() -> RateLimitDecision,
        over_budget: bool,
    ) -> Harness {
        let sessions = Arc::new(FakeSessions {
            session,
            calls: AtomicUsize::new(0),
        });
        let rate_limiter = Arc::new(FakeRateLimiter {
            decision,
            calls: AtomicUsize::new(0),
        });
        let spend = Arc::new(FakeSpend {
            over_budget,
            calls: AtomicUsize::new(0),
        });
        let gatekeeper = Gatekeeper::new(
            sessions.clone(),
            rate_limiter.clone(),
            spend.clone(),
        );
        Harness {
            sessions,
            rate_limiter,
            spend,
            gatekeeper,
        }
    }

    fn allow() -> RateLimitDecision {
        RateLimitDecision::Allow { count: 1 }
    }

    fn deny() -> RateLimitDecision {
        RateLimitDecision::Deny {
            retry_after_ms: 30_000,
        }
    }

    #[tokio::test]
    async fn test_no_session_short_circuits_everything() {
        let h = harness(Some(live_session(true)), allow, false);
        let err = h
            .gatekeeper
            .authorize(None, "ip", "tool:fit", AuthorizeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_SESSION");
        assert_eq!(h.sessions.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.rate_limiter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.spend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_expired() {
        let h = harness(None, allow, false);
        let err = h
            .gatekeeper
            .authorize(Some("s-1"), "ip", "tool:fit", AuthorizeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_EXPIRED");
        assert_eq!(h.rate_limiter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_session_denied_before_rate_limit() {
        let mut session = live_session(true);
        session.expires_at = Utc::now() - Duration::hours(1);
        let h = harness(Some(session), allow, false);
        let err = h
            .gatekeeper
            .authorize(Some("s-1"), "ip", "tool:fit", AuthorizeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_EXPIRED");
        assert_eq!(h.rate_limiter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.spend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_captcha_gate_runs_before_rate_limit() {
        let h = harness(Some(live_session(false)), allow, false);
        let err = h
            .gatekeeper
            .authorize(Some("s-1"), "ip", "tool:fit", AuthorizeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CAPTCHA_REQUIRED");
        assert_eq!(h.rate_limiter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.spend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_denial_short_circuits_spend() {
        let h = harness(Some(live_session(true)), deny, false);
        let err = h
            .gatekeeper
            .authorize(Some("s-1"), "ip", "tool:fit", AuthorizeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(
            err.get_owned_details(),
            ErrorDetails::RateLimitExceeded {
                retry_after_ms: 30_000
            }
        );
        assert_eq!(h.spend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_spend_cap_denial() {
        let h = harness(Some(live_session(true)), allow, true);
        let err = h
            .gatekeeper
            .authorize(Some("s-1"), "ip", "tool:fit", AuthorizeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SPEND_CAP_EXCEEDED");
        assert_eq!(h.rate_limiter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_pass_returns_context() {
        let h = harness(Some(live_session(true)), allow, false);
        let context = h
            .gatekeeper
            .authorize(Some("s-1"), "ip", "tool:fit", AuthorizeOptions::default())
            .await
            .unwrap();
        assert_eq!(context.session_id, "s-1");
        assert_eq!(h.rate_limiter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.spend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skip_rate_limit_only_removes_that_gate() {
        let h = harness(Some(live_session(true)), deny, false);
        let context = h
            .gatekeeper
            .authorize(
                Some("s-1"),
                "ip",
                "tool:fit",
                AuthorizeOptions {
                    skip_rate_limit: true,
                    skip_spend_cap: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(context.session_id, "s-1");
        assert_eq!(h.rate_limiter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.spend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skip_spend_cap_only_removes_that_gate() {
        let h = harness(Some(live_session(true)), allow, true);
        let context = h
            .gatekeeper
            .authorize(
                Some("s-1"),
                "ip",
                "tool:fit",
                AuthorizeOptions {
                    skip_rate_limit: false,
                    skip_spend_cap: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(context.session_id, "s-1");
        assert_eq!(h.rate_limiter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.spend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_denial() {
        let gatekeeper = Gatekeeper::new(
            Arc::new(FailingSessions),
            Arc::new(FakeRateLimiter {
                decision: allow,
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FakeSpend {
                over_budget: false,
                calls: AtomicUsize::new(0),
            }),
        );
        let err = gatekeeper
            .authorize(Some("s-1"), "ip", "tool:fit", AuthorizeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert!(!err.is_denial());
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1".parse().unwrap(),
        );
        headers.insert("x-real-ip", "10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.7");

        let mut real_only = HeaderMap::new();
        real_only.insert("x-real-ip", "198.51.100.9".parse().unwrap());
        assert_eq!(client_ip(&real_only), "198.51.100.9");

        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_tool_scope_for_path() {
        assert_eq!(tool_scope_for_path("/v1/tools/fit").unwrap(), "tool:fit");
        assert_eq!(
            tool_scope_for_path("/v1/tools/interview").unwrap(),
            "tool:interview"
        );

        let err = tool_scope_for_path("/v1/tools/garbage").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_tool_never_charges_the_limiter() {
        let h = harness(Some(live_session(true)), allow, false);
        // Scope resolution runs before any gate, so a bogus tool name 404s
        // without the pipeline ever seeing the request.
        match tool_scope_for_path("/v1/tools/garbage") {
            Ok(scope) => {
                h.gatekeeper
                    .authorize(Some("s-1"), "ip", &scope, AuthorizeOptions::default())
                    .await
                    .unwrap();
                panic!("unknown tool must not reach the pipeline");
            }
            Err(err) => assert_eq!(err.code(), "NOT_FOUND"),
        }
        assert_eq!(h.sessions.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.rate_limiter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.spend.calls.load(Ordering::SeqCst), 0);
    }
}
