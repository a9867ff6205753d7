//! Redis-backed job store.
//!
//! Required when submission and workers run in separate processes: every
//! process sees the same records, and TTL enforcement is delegated to Redis
//! key expiry (`SET .. EX`). Uses a connection manager, so individual
//! connection drops are reconnected transparently.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use reportd_domain::BatchJob;

use crate::error::{StorageError, StorageResult};
use crate::traits::JobStore;

const KEY_PREFIX: &str = "reportd:job:";

/// Redis implementation of [`JobStore`].
#[derive(Clone)]
pub struct RedisJobStore {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl std::fmt::Debug for RedisJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobStore")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

fn connection_error(err: redis::RedisError) -> StorageError {
    StorageError::ConnectionError {
        message: err.to_string(),
    }
}

fn job_key(job_id: &str) -> String {
    format!("{KEY_PREFIX}{job_id}")
}

impl RedisJobStore {
    /// Connects to Redis at `url` and stores records with the given TTL.
    pub async fn connect(url: &str, ttl: Duration) -> StorageResult<Self> {
        let client = redis::Client::open(url).map_err(connection_error)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(connection_error)?;
        Ok(Self {
            conn,
            // EX 0 is invalid; a sub-second TTL rounds up to one second.
            ttl_secs: ttl.as_secs().max(1),
        })
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn put(&self, job: &BatchJob) -> StorageResult<()> {
        let payload = serde_json::to_string(job).map_err(StorageError::serialization)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(job_key(&job.id), payload, self.ttl_secs)
            .await
            .map_err(connection_error)
    }

    async fn get(&self, job_id: &str) -> StorageResult<BatchJob> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(job_key(job_id)).await.map_err(connection_error)?;
        let raw = raw.ok_or_else(|| StorageError::JobNotFound {
            job_id: job_id.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(StorageError::serialization)
    }

    async fn delete(&self, job_id: &str) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(job_key(job_id))
            .await
            .map_err(connection_error)
    }
}
