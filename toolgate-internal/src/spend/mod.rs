pub mod tracker;

pub use tracker::SpendTracker;

use chrono::{DateTime, Datelike, Utc};

/// Floor applied to every billable call, so bookkeeping never records a
/// zero-cost inference.
pub const MIN_COST_PER_CALL_USD: f64 = 0.01;
/// Estimated provider price per 1K input tokens.
pub const RATE_IN_USD_PER_1K: f64 = 0.003;
/// Estimated provider price per 1K output tokens.
pub const RATE_OUT_USD_PER_1K: f64 = 0.015;

/// Key for the current calendar month's spend record, `YYYY-MM`.
pub fn month_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

/// Conservative token estimate for budgeting: one token per 4 UTF-8 bytes,
/// rounded up. Zero for empty input, at least one otherwise.
pub fn estimate_tokens(text: &str) -> u64 {
    let bytes = text.len() as u64;
    bytes.div_ceil(4)
}

/// Estimated USD cost of one LLM call, never below the per-call floor.
pub fn estimate_cost(input_tokens: u64, output_tokens: u64) -> f64 {
    let metered = (input_tokens as f64 / 1000.0) * RATE_IN_USD_PER_1K
        + (output_tokens as f64 / 1000.0) * RATE_OUT_USD_PER_1K;
    metered.max(MIN_COST_PER_CALL_USD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_month_key_format() {
        let march = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(month_key(march), "2026-03");
        let december = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(month_key(december), "2025-12");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(10_000)), 2500);
        // Multi-byte characters count by UTF-8 bytes, not chars
        assert_eq!(estimate_tokens("日本語"), 3);
    }

    #[test]
    fn test_cost_floor_applies_near_zero() {
        assert_eq!(estimate_cost(0, 0), MIN_COST_PER_CALL_USD);
        assert_eq!(estimate_cost(1, 1), MIN_COST_PER_CALL_USD);
    }

    #[test]
    fn test_cost_scales_with_tokens() {
        let cost = estimate_cost(10_000, 2_000);
        let expected = 10.0 * RATE_IN_USD_PER_1K + 2.0 * RATE_OUT_USD_PER_1K;
        assert!((cost - expected).abs() < 1e-12);
        assert!(cost > MIN_COST_PER_CALL_USD);
    }
}
