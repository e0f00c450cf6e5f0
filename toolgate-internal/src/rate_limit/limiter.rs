use std::sync::Arc;

use chrono::Utc;
use redis::Script;

use crate::error::{Error, ErrorDetails};
use crate::rate_limit::{derive_window_key, RateLimitDecision, MAX_REQUESTS, WINDOW_DURATION_MS};
use crate::redis_client::RedisClient;

/// Fixed-window request counter backed by Redis.
///
/// The whole read-modify-write runs inside a single Lua script, so two
/// concurrent requests on the same key can never both observe count=9 and
/// both slip past the ceiling: Redis executes scripts serially per node.
pub struct FixedWindowLimiter {
    redis: Arc<RedisClient>,
    check_and_consume_script: Script,
}

impl FixedWindowLimiter {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        // Keep in sync with `WindowRecord::apply`.
        let check_and_consume_script = Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local window_ms = tonumber(ARGV[2])
            local max_requests = tonumber(ARGV[3])

            local expires_at = tonumber(redis.call('HGET', key, 'expires_at'))
            if (not expires_at) or now >= expires_at then
                redis.call('HSET', key,
                    'count', 1,
                    'window_start', now,
                    'expires_at', now + window_ms)
                redis.call('PEXPIRE', key, window_ms)
                return {1, 1, now + window_ms}
            end

            local count = tonumber(redis.call('HGET', key, 'count')) or 0
            if count < max_requests then
                count = redis.call('HINCRBY', key, 'count', 1)
                return {1, count, expires_at}
            end

            return {0, count, expires_at}
            "#,
        );
        Self {
            redis,
            check_and_consume_script,
        }
    }

    /// Consume one request from the window for `(session, ip, scope)`,
    /// or report how long the visitor must wait.
    pub async fn check_and_consume(
        &self,
        session_id: &str,
        ip_hashed: &str,
        scope: &str,
    ) -> Result<RateLimitDecision, Error> {
        let key = derive_window_key(session_id, ip_hashed, scope);
        let now_ms = epoch_ms();

        let mut conn = self.redis.get_connection();
        let result: Vec<i64> = self
            .check_and_consume_script
            .key(&key)
            .arg(now_ms)
            .arg(WINDOW_DURATION_MS)
            .arg(MAX_REQUESTS)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Storage {
                    message: format!("Rate limit check failed: {e}"),
                })
            })?;

        let decision = parse_script_result(&result, now_ms)?;
        if let RateLimitDecision::Deny { retry_after_ms } = &decision {
            tracing::info!(scope, retry_after_ms, "Rate limit exceeded");
        }
        Ok(decision)
    }
}

fn epoch_ms() -> u64 {
    // Timestamps before 1970 do not occur on a running host
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

fn parse_script_result(result: &[i64], now_ms: u64) -> Result<RateLimitDecision, Error> {
    let [allowed, count, expires_at] = result else {
        return Err(Error::new(ErrorDetails::InternalError {
            message: format!(
                "Rate limit script returned {} values, expected 3",
                result.len()
            ),
        }));
    };

    if *allowed == 1 {
        Ok(RateLimitDecision::Allow {
            count: u32::try_from(*count).unwrap_or(0),
        })
    } else {
        let expires_at_ms = u64::try_from(*expires_at).unwrap_or(now_ms);
        Ok(RateLimitDecision::Deny {
            // Clamp to at least 1ms so retryAfterMs stays in (0, window]
            retry_after_ms: expires_at_ms.saturating_sub(now_ms).max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allow() {
        let decision = parse_script_result(&[1, 3, 1_600_000], 1_000_000).unwrap();
        assert_eq!(decision, RateLimitDecision::Allow { count: 3 });
    }

    #[test]
    fn test_parse_deny_computes_retry_after() {
        let decision = parse_script_result(&[0, 10, 1_600_000], 1_000_000).unwrap();
        assert_eq!(
            decision,
            RateLimitDecision::Deny {
                retry_after_ms: 600_000
            }
        );
    }

    #[test]
    fn test_parse_deny_clamps_to_positive() {
        // Window expired between the script run and parsing; still report >0
        let decision = parse_script_result(&[0, 10, 1_000_000], 1_000_000).unwrap();
        assert_eq!(decision, RateLimitDecision::Deny { retry_after_ms: 1 });
    }

    #[test]
    fn test_parse_rejects_malformed_reply() {
        assert!(parse_script_result(&[1], 0).is_err());
    }
}
