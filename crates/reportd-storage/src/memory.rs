//! In-memory job store.
//!
//! Valid for single-process deployments where submission and workers share
//! one process. Records carry an expiry instant; expired records are purged
//! lazily on read, so no background reaper is needed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reportd_domain::BatchJob;

use crate::error::{StorageError, StorageResult};
use crate::traits::JobStore;

struct StoredJob {
    job: BatchJob,
    expires_at: Instant,
}

/// In-memory implementation of [`JobStore`].
///
/// Uses DashMap for thread-safe concurrent access without an outer lock.
pub struct MemoryJobStore {
    jobs: DashMap<String, StoredJob>,
    ttl: Duration,
}

impl std::fmt::Debug for MemoryJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryJobStore")
            .field("ttl", &self.ttl)
            .field("len", &self.jobs.len())
            .finish()
    }
}

impl MemoryJobStore {
    /// Creates a new in-memory store whose records expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            ttl,
        }
    }

    /// Creates a new in-memory store wrapped in Arc.
    pub fn new_shared(ttl: Duration) -> Arc<Self> {
        Arc::new(Self::new(ttl))
    }

    /// Number of unexpired records currently held.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.jobs
            .iter()
            .filter(|entry| entry.value().expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, job: &BatchJob) -> StorageResult<()> {
        self.jobs.insert(
            job.id.clone(),
            StoredJob {
                job: job.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, job_id: &str) -> StorageResult<BatchJob> {
        if let Some(entry) = self.jobs.get(job_id) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.job.clone());
            }
        }
        // Expired records read as absent; drop the entry on the way out.
        self.jobs
            .remove_if(job_id, |_, stored| stored.expires_at <= Instant::now());
        Err(StorageError::JobNotFound {
            job_id: job_id.to_string(),
        })
    }

    async fn delete(&self, job_id: &str) -> StorageResult<()> {
        self.jobs.remove(job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(id: &str) -> BatchJob {
        BatchJob::new(
            id,
            "https://example.com/dtj/api/plan",
            "POST",
            Some(1161),
            vec![json!({"date": "2025-01-01"})],
            None,
        )
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryJobStore::new(Duration::from_secs(60));
        store.put(&job("job-1")).await.unwrap();

        let fetched = store.get("job-1").await.unwrap();
        assert_eq!(fetched.id, "job-1");
        assert_eq!(fetched.source_id, Some(1161));
    }

    #[tokio::test]
    async fn test_get_unknown_id_fails() {
        let store = MemoryJobStore::new(Duration::from_secs(60));
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::JobNotFound { job_id } if job_id == "missing"));
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_absent() {
        let store = MemoryJobStore::new(Duration::from_millis(30));
        store.put(&job("job-1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let err = store.get("job-1").await.unwrap_err();
        assert!(matches!(err, StorageError::JobNotFound { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_refreshes_ttl() {
        let store = MemoryJobStore::new(Duration::from_millis(80));
        store.put(&job("job-1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        // Re-storing resets the clock.
        store.put(&job("job-1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get("job-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryJobStore::new(Duration::from_secs(60));
        store.put(&job("job-1")).await.unwrap();

        store.delete("job-1").await.unwrap();
        store.delete("job-1").await.unwrap();
        assert!(store.get("job-1").await.is_err());
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_record() {
        let store = MemoryJobStore::new(Duration::from_secs(60));
        let mut record = job("job-1");
        store.put(&record).await.unwrap();

        record.mark_running();
        store.put(&record).await.unwrap();

        let fetched = store.get("job-1").await.unwrap();
        assert_eq!(fetched.status, reportd_domain::JobStatus::Running);
    }
}
