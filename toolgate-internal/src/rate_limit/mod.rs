pub mod limiter;

pub use limiter::FixedWindowLimiter;

use sha2::{Digest, Sha256};

/// Requests allowed per key within one window.
pub const MAX_REQUESTS: u32 = 10;
/// Fixed window length: 10 minutes.
pub const WINDOW_DURATION_MS: u64 = 600_000;

const WINDOW_KEY_PREFIX: &str = "rl:";

/// Result of a rate limit check
#[derive(Debug, PartialEq)]
pub enum RateLimitDecision {
    Allow { count: u32 },
    Deny { retry_after_ms: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow { .. })
    }
}

/// Derive the counter key for a `(session, ip, scope)` triple.
///
/// One-way hashed so the key is bounded, safe as a store key, and reveals
/// nothing about the session id if the counter namespace leaks.
pub fn derive_window_key(session_id: &str, ip_hashed: &str, scope: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(ip_hashed.as_bytes());
    hasher.update(b"\n");
    hasher.update(scope.as_bytes());
    let digest = hasher.finalize();
    format!("{WINDOW_KEY_PREFIX}{}", hex::encode(&digest[..20]))
}

/// One fixed window per `(session, scope)` pair, as stored in Redis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowRecord {
    pub count: u32,
    pub window_start_ms: u64,
    pub expires_at_ms: u64,
}

impl WindowRecord {
    fn fresh(now_ms: u64) -> Self {
        Self {
            count: 1,
            window_start_ms: now_ms,
            expires_at_ms: now_ms + WINDOW_DURATION_MS,
        }
    }

    /// The check-and-consume state transition.
    ///
    /// This mirrors the Lua script in `limiter.rs` exactly; the script is
    /// what runs in production (atomically, inside Redis), this is the
    /// reference for unit tests. Fixed-window caveat: a visitor can land up
    /// to 2x MAX_REQUESTS across a window boundary; accepted tradeoff.
    pub fn apply(record: Option<WindowRecord>, now_ms: u64) -> (WindowRecord, RateLimitDecision) {
        match record {
            None => {
                let fresh = WindowRecord::fresh(now_ms);
                (fresh, RateLimitDecision::Allow { count: 1 })
            }
            Some(record) if now_ms >= record.expires_at_ms => {
                let fresh = WindowRecord::fresh(now_ms);
                (fresh, RateLimitDecision::Allow { count: 1 })
            }
            Some(mut record) if record.count < MAX_REQUESTS => {
                record.count += 1;
                let count = record.count;
                (record, RateLimitDecision::Allow { count })
            }
            Some(record) => {
                let retry_after_ms = record.expires_at_ms - now_ms;
                (record, RateLimitDecision::Deny { retry_after_ms })
            }
        }
    }
}
