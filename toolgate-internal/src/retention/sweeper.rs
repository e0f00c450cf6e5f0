use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use crate::error::{Error, ErrorDetails};

use super::{
    validate_artifact_prefix, RetentionRunSummary, RetentionStatus, SubmissionIndex,
    SubmissionRecord, MAX_DELETIONS_PER_RUN, QUERY_BATCH_SIZE,
};

/// Deletes expired submissions: artifacts first, then the index record.
///
/// Each run is bounded and restartable. A record whose artifacts were
/// deleted but whose index entry survived (crash in between) is picked up
/// again by the next run and completes trivially, so retries and concurrent
/// runs are safe.
pub struct RetentionSweeper {
    index: Arc<dyn SubmissionIndex>,
    artifact_store: Arc<dyn ObjectStore>,
    batch_size: usize,
    max_deletions: usize,
}

impl RetentionSweeper {
    pub fn new(index: Arc<dyn SubmissionIndex>, artifact_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            index,
            artifact_store,
            batch_size: QUERY_BATCH_SIZE,
            max_deletions: MAX_DELETIONS_PER_RUN,
        }
    }

    pub fn with_limits(mut self, batch_size: usize, max_deletions: usize) -> Self {
        self.batch_size = batch_size;
        self.max_deletions = max_deletions;
        self
    }

    /// Run one bounded sweep. Per-record failures are logged and counted but
    /// do not abort the run; only a failing index query does.
    pub async fn sweep(&self) -> Result<RetentionRunSummary, Error> {
        let started_at = Utc::now();
        let mut deleted_count = 0usize;
        let mut failed_ids: Vec<String> = Vec::new();
        let mut expired_found = 0usize;

        while expired_found < self.max_deletions {
            let limit = self.batch_size.min(self.max_deletions - expired_found);
            // Offset past records that already failed this run, otherwise a
            // sticky failure would pin the pager to the same page forever.
            let page = self
                .index
                .expired_page(started_at, failed_ids.len(), limit)
                .await?;
            if page.is_empty() {
                break;
            }
            for entry in &page {
                expired_found += 1;
                let outcome = match &entry.record {
                    Some(record) => self.sweep_one(record).await,
                    // Index entry with no document: a partially completed
                    // earlier sweep. Finish the job and keep the run going.
                    None => {
                        tracing::debug!(
                            submission_id = %entry.id,
                            "Removing stale expiry-index entry"
                        );
                        self.index.remove(&entry.id).await
                    }
                };
                match outcome {
                    Ok(()) => deleted_count += 1,
                    Err(e) => {
                        tracing::warn!(
                            submission_id = %entry.id,
                            error = %e,
                            "Failed to sweep submission; will retry next run"
                        );
                        failed_ids.push(entry.id.clone());
                    }
                }
            }
        }

        let finished_at = Utc::now();
        let summary = RetentionRunSummary {
            expired_found,
            deleted_count,
            failed_count: failed_ids.len(),
            failed_ids,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        };
        tracing::info!(
            expired_found = summary.expired_found,
            deleted_count = summary.deleted_count,
            failed_count = summary.failed_count,
            duration_ms = summary.duration_ms,
            "Retention sweep finished"
        );
        Ok(summary)
    }

    /// Read-only view of the backlog, for the status endpoint.
    pub async fn status(&self) -> Result<RetentionStatus, Error> {
        let now = Utc::now();
        Ok(RetentionStatus {
            expired_count: self.index.count_expired(now).await?,
            checked_at: now,
        })
    }

    async fn sweep_one(&self, record: &SubmissionRecord) -> Result<(), Error> {
        // Validation happens before any delete is issued.
        validate_artifact_prefix(&record.artifact_prefix)?;

        let prefix = ObjectPath::from(record.artifact_prefix.as_str());
        let locations: Vec<ObjectPath> = self
            .artifact_store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(|e| store_error(&record.artifact_prefix, e))?;

        // Zero objects is success: artifacts may never have been written or
        // were deleted by an earlier partial run.
        for location in &locations {
            self.artifact_store
                .delete(location)
                .await
                .map_err(|e| store_error(&record.artifact_prefix, e))?;
        }

        self.index.remove(&record.id).await?;
        tracing::debug!(
            submission_id = %record.id,
            objects_deleted = locations.len(),
            "Swept submission"
        );
        Ok(())
    }
}

fn store_error(prefix: &str, e: object_store::Error) -> Error {
    Error::new(ErrorDetails::Storage {
        message: format!("Object store error under {prefix}: {e}"),
    })
}
