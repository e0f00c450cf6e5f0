use std::sync::Arc;

use chrono::Utc;
use redis::Script;

use crate::error::{Error, ErrorDetails};
use crate::redis_client::RedisClient;
use crate::spend::estimate_cost;

const SPEND_KEY_PREFIX: &str = "spend:";

/// Tracks and caps estimated LLM spend per calendar month.
///
/// `enforce` runs before the LLM call and `record_usage` after it, so
/// concurrent in-flight calls can all pass the pre-check before any usage
/// lands; the budget can be overshot by up to (in-flight calls x per-call
/// cost). Accepted tradeoff against serializing all tool traffic.
pub struct SpendTracker {
    redis: Arc<RedisClient>,
    monthly_budget_usd: f64,
    contact_email: String,
    read_script: Script,
    add_script: Script,
}

impl SpendTracker {
    pub fn new(redis: Arc<RedisClient>, monthly_budget_usd: f64, contact_email: String) -> Self {
        // Both scripts create the month record lazily with zero usage, so a
        // fresh month never races between "check" and "create".
        let read_script = Script::new(
            r#"
            local key = KEYS[1]
            if redis.call('EXISTS', key) == 0 then
                redis.call('HSET', key,
                    'usd_budget', ARGV[1],
                    'usd_used_estimated', '0',
                    'updated_at', ARGV[2])
            end
            return redis.call('HGET', key, 'usd_used_estimated')
            "#,
        );
        let add_script = Script::new(
            r#"
            local key = KEYS[1]
            if redis.call('EXISTS', key) == 0 then
                redis.call('HSET', key,
                    'usd_budget', ARGV[2],
                    'usd_used_estimated', '0')
            end
            local used = redis.call('HINCRBYFLOAT', key, 'usd_used_estimated', ARGV[1])
            redis.call('HSET', key, 'updated_at', ARGV[3])
            return used
            "#,
        );
        Self {
            redis,
            monthly_budget_usd,
            contact_email,
            read_script,
            add_script,
        }
    }

    /// Deny if the month's estimated spend has reached the budget.
    ///
    /// The denial carries only a contact address; the numbers stay
    /// server-side.
    pub async fn enforce(&self, month_key: &str) -> Result<(), Error> {
        let mut conn = self.redis.get_connection();
        let used: String = self
            .read_script
            .key(format!("{SPEND_KEY_PREFIX}{month_key}"))
            .arg(self.monthly_budget_usd)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Storage {
                    message: format!("Spend cap check failed: {e}"),
                })
            })?;

        let used: f64 = used.parse().map_err(|_| {
            Error::new(ErrorDetails::Storage {
                message: format!("Spend record for {month_key} holds a non-numeric value"),
            })
        })?;

        if cap_reached(used, self.monthly_budget_usd) {
            tracing::warn!(month = month_key, "Monthly spend cap reached");
            return Err(Error::new(ErrorDetails::SpendCapExceeded {
                contact_email: self.contact_email.clone(),
            }));
        }
        Ok(())
    }

    /// Post the actual token usage of a completed LLM call.
    ///
    /// The add is a single HINCRBYFLOAT inside the script, so the running
    /// estimate is monotonically non-decreasing even under concurrent calls.
    /// Returns the new month total.
    pub async fn record_usage(
        &self,
        month_key: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<f64, Error> {
        let cost = estimate_cost(input_tokens, output_tokens);
        let mut conn = self.redis.get_connection();
        let used: String = self
            .add_script
            .key(format!("{SPEND_KEY_PREFIX}{month_key}"))
            .arg(cost)
            .arg(self.monthly_budget_usd)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Storage {
                    message: format!("Failed to record usage: {e}"),
                })
            })?;

        let used: f64 = used.parse().unwrap_or(f64::MAX);
        tracing::debug!(
            month = month_key,
            input_tokens,
            output_tokens,
            cost_usd = cost,
            total_usd = used,
            "Recorded LLM usage"
        );
        Ok(used)
    }
}

/// The cap decision `enforce` applies to the month's running estimate.
///
/// Inclusive: a month that lands exactly on the budget finishes the call
/// that got it there, and the next check denies.
fn cap_reached(used: f64, budget: f64) -> bool {
    used >= budget
}
