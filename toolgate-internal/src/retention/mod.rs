use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};

pub mod index;
pub mod sweeper;

pub use index::{IndexEntry, RedisSubmissionIndex, SubmissionIndex};
pub use sweeper::RetentionSweeper;

/// How long a submission and its artifacts are kept.
pub const RETENTION_DAYS: i64 = 90;

/// Expired records fetched from the index per page.
pub const QUERY_BATCH_SIZE: usize = 100;

/// Ceiling on deletions per sweep; the next run picks up the rest.
pub const MAX_DELETIONS_PER_RUN: usize = 100;

/// Root under which all submission artifacts live. Deletes outside this
/// prefix are refused unconditionally.
pub const ARTIFACT_ROOT: &str = "submissions/";

/// One visitor submission tracked for retention.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SubmissionRecord {
    pub id: String,
    pub tool: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub artifact_prefix: String,
}

impl SubmissionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a single sweep. Failed records are listed by id only; their
/// error text stays in the logs.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRunSummary {
    pub expired_found: usize,
    pub deleted_count: usize,
    pub failed_count: usize,
    pub failed_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Read-only counterpart to a sweep.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionStatus {
    pub expired_count: usize,
    pub checked_at: DateTime<Utc>,
}

/// Accepts exactly `submissions/{id}/` where `{id}` is a non-empty run of
/// `[A-Za-z0-9_-]`. Anything else, including traversal segments, is refused
/// before a delete is attempted.
pub fn validate_artifact_prefix(prefix: &str) -> Result<(), Error> {
    let invalid = || {
        Error::new(ErrorDetails::InternalError {
            message: format!("refusing to delete under invalid artifact prefix {prefix:?}"),
        })
    };

    let id = prefix
        .strip_prefix(ARTIFACT_ROOT)
        .and_then(|rest| rest.strip_suffix('/'))
        .ok_or_else(invalid)?;
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid());
    }
    Ok(())
}

/// Canonical artifact prefix for a submission id.
pub fn artifact_prefix_for(id: &str) -> String {
    format!("{ARTIFACT_ROOT}{id}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_prefixes() {
        validate_artifact_prefix("submissions/abc123/").unwrap();
        validate_artifact_prefix("submissions/a-b_c/").unwrap();
        validate_artifact_prefix(&artifact_prefix_for("0f9e8d7c")).unwrap();
    }

    #[test]
    fn test_rejects_traversal() {
        assert!(validate_artifact_prefix("submissions/../secrets/").is_err());
        assert!(validate_artifact_prefix("submissions/a/../b/").is_err());
        assert!(validate_artifact_prefix("submissions/./x/").is_err());
    }

    #[test]
    fn test_rejects_wrong_root_and_shape() {
        assert!(validate_artifact_prefix("sessions/abc/").is_err());
        assert!(validate_artifact_prefix("submissions/").is_err());
        assert!(validate_artifact_prefix("submissions//").is_err());
        assert!(validate_artifact_prefix("submissions/abc").is_err());
        assert!(validate_artifact_prefix("/submissions/abc/").is_err());
        assert!(validate_artifact_prefix("").is_err());
    }

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        let record = SubmissionRecord {
            id: "x".to_string(),
            tool: "fit".to_string(),
            created_at: now - chrono::Duration::days(91),
            expires_at: now - chrono::Duration::days(1),
            artifact_prefix: artifact_prefix_for("x"),
        };
        assert!(record.is_expired(now));
        assert!(!record.is_expired(now - chrono::Duration::days(2)));
    }
}
