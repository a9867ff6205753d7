//! Job store abstraction.

use async_trait::async_trait;
use reportd_domain::BatchJob;

use crate::error::StorageResult;

/// Persistence for batch job records with TTL semantics.
///
/// Implementations must guarantee:
/// - `put` upserts the record and refreshes its TTL.
/// - `get` returns [`StorageError::JobNotFound`] for ids that were never
///   stored or whose TTL has elapsed. A stale or empty record is never
///   returned.
/// - `delete` is idempotent.
///
/// The orchestrator treats the store as the single source of truth for job
/// state; workers re-read records rather than trusting in-process copies.
///
/// [`StorageError::JobNotFound`]: crate::error::StorageError::JobNotFound
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Upserts a job record and refreshes its TTL.
    async fn put(&self, job: &BatchJob) -> StorageResult<()>;

    /// Fetches a job record by id.
    async fn get(&self, job_id: &str) -> StorageResult<BatchJob>;

    /// Removes a job record. Succeeds whether or not the id exists.
    async fn delete(&self, job_id: &str) -> StorageResult<()>;
}
