use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

use crate::error::{Error, ErrorDetails};
use crate::redis_client::RedisClient;

use super::SubmissionRecord;

const SUBMISSION_KEY_PREFIX: &str = "submission:";
const EXPIRY_INDEX_KEY: &str = "submissions:by_expiry";

/// One expiry-index member. The id is always present; the record document
/// may already be gone if an earlier sweep deleted it but crashed before
/// removing the index entry.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub id: String,
    pub record: Option<SubmissionRecord>,
}

/// Query/delete surface of the submission index as the sweeper sees it.
#[async_trait]
pub trait SubmissionIndex: Send + Sync {
    /// Insert (or overwrite) a record and index it by expiry time.
    async fn insert(&self, record: &SubmissionRecord) -> Result<(), Error>;

    /// One page of index entries expired as of `now`, ordered by expiry.
    /// `offset` lets a caller step past entries it has already tried. An
    /// empty page means no expired entries remain past `offset`; stale
    /// entries still fill the page, so callers can tell "exhausted" from
    /// "this page held nothing sweepable".
    async fn expired_page(
        &self,
        now: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<IndexEntry>, Error>;

    /// How many records are currently expired.
    async fn count_expired(&self, now: DateTime<Utc>) -> Result<usize, Error>;

    /// Remove a record and its expiry-index entry. Removing an id that is
    /// already gone succeeds.
    async fn remove(&self, id: &str) -> Result<(), Error>;
}

/// Submission index backed by a JSON document per record plus a sorted set
/// scored by expiry epoch-millis.
pub struct RedisSubmissionIndex {
    redis: Arc<RedisClient>,
}

impl RedisSubmissionIndex {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SubmissionIndex for RedisSubmissionIndex {
    async fn insert(&self, record: &SubmissionRecord) -> Result<(), Error> {
        let json = serde_json::to_string(record).map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Failed to serialize submission record: {e}"),
            })
        })?;
        let mut conn = self.redis.get_connection();
        let _: () = redis::pipe()
            .set(format!("{SUBMISSION_KEY_PREFIX}{}", record.id), json)
            .zadd(
                EXPIRY_INDEX_KEY,
                &record.id,
                record.expires_at.timestamp_millis(),
            )
            .query_async(&mut conn)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn expired_page(
        &self,
        now: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<IndexEntry>, Error> {
        let mut conn = self.redis.get_connection();
        let ids: Vec<String> = conn
            .zrangebyscore_limit(
                EXPIRY_INDEX_KEY,
                "-inf",
                now.timestamp_millis(),
                offset as isize,
                limit as isize,
            )
            .await
            .map_err(storage_error)?;

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<String> = conn
                .get(format!("{SUBMISSION_KEY_PREFIX}{id}"))
                .await
                .map_err(storage_error)?;
            let record = match raw {
                Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
                    Error::new(ErrorDetails::Storage {
                        message: format!("Failed to parse submission record {id}: {e}"),
                    })
                })?),
                None => None,
            };
            entries.push(IndexEntry { id, record });
        }
        Ok(entries)
    }

    async fn count_expired(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        let mut conn = self.redis.get_connection();
        let count: usize = conn
            .zcount(EXPIRY_INDEX_KEY, "-inf", now.timestamp_millis())
            .await
            .map_err(storage_error)?;
        Ok(count)
    }

    async fn remove(&self, id: &str) -> Result<(), Error> {
        let mut conn = self.redis.get_connection();
        let _: () = redis::pipe()
            .del(format!("{SUBMISSION_KEY_PREFIX}{id}"))
            .zrem(EXPIRY_INDEX_KEY, id)
            .query_async(&mut conn)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

fn storage_error(e: redis::RedisError) -> Error {
    Error::new(ErrorDetails::Storage {
        message: format!("Redis error: {e}"),
    })
}
