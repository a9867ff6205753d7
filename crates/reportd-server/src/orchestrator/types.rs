//! Data types for batch job submission and queries.

use reportd_domain::allowlist::AllowlistValidator;
use reportd_domain::{
    AllowlistError, BatchItemResult, BatchJob, JobStatus, ResultFileRef,
};
use reportd_storage::StorageError;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::upstream::UpstreamError;

/// A batch submission: one upstream endpoint, many parameter sets.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    /// Endpoint designator: relative path against the configured base URL,
    /// or an absolute URL subject to the allowlist. When absent, the base
    /// URL itself is the destination.
    pub endpoint: Option<String>,
    /// HTTP method for the upstream calls. Defaults to POST.
    pub method: Option<String>,
    /// Caller-provided source identifier, passed through opaquely.
    pub source_id: Option<i64>,
    /// Ordered parameter sets; one upstream call each.
    pub params: Vec<Value>,
    /// Opaque caller metadata stored on the job record.
    pub metadata: Option<Value>,
}

impl SubmitRequest {
    /// Method to use for the upstream calls.
    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or("POST")
    }

    /// Sum of the `"limit"` fields declared on the parameter sets.
    ///
    /// Only declared limits count toward the record ceiling; parameter sets
    /// without one contribute nothing.
    pub fn declared_record_total(&self) -> u64 {
        self.params
            .iter()
            .filter_map(|p| p.get("limit").and_then(Value::as_u64))
            .sum()
    }
}

/// Point-in-time view of a job, as returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: String,
    pub status: JobStatus,
    pub source_id: Option<i64>,
    pub total_items: usize,
    pub completed_items: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Inline item results; present only for terminal jobs whose payload
    /// stayed under the offload threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<BatchItemResult>>,
    /// Summary of the file-backed payload when results were offloaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_file: Option<ResultFileRef>,
    /// Orchestration-level failure diagnostic (status Failed only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobView {
    pub(crate) fn from_job(job: &BatchJob) -> Self {
        let results = if job.status.is_terminal() && job.result_file.is_none() {
            Some(job.results.clone())
        } else {
            None
        };
        Self {
            id: job.id.clone(),
            status: job.status,
            source_id: job.source_id,
            total_items: job.total_items(),
            completed_items: job.completed_items(),
            created_at: job.created_at,
            completed_at: job.completed_at,
            results,
            result_file: job.result_file.clone(),
            error: job.error.clone(),
        }
    }
}

/// Errors surfaced by batch submission, queries, and the filter read path.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The submission carries no parameter sets.
    #[error("batch submission cannot be empty")]
    EmptyBatch,

    /// Too many parameter sets in one submission.
    #[error("batch size {count} exceeds maximum allowed {max}")]
    TooManyItems { count: usize, max: usize },

    /// The declared expected-row total exceeds the configured ceiling.
    #[error("declared record total {declared} exceeds maximum allowed {max}")]
    RecordLimitExceeded { declared: u64, max: u64 },

    /// No endpoint given and no base URL configured to fall back to.
    #[error("no endpoint given and no upstream base URL configured")]
    MissingEndpoint,

    /// The endpoint was rejected by the allowlist validator.
    #[error("endpoint denied: {0}")]
    Denied(#[from] AllowlistError),

    /// The submission queue is saturated.
    #[error("job queue is full")]
    QueueFull,

    /// Unknown or expired job id.
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Job store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Upstream failure on the filter-value read path.
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Resolves an optional endpoint designator through the validator.
///
/// An absent designator falls back to the configured base URL; with no base
/// configured either, the submission is rejected.
pub(crate) fn resolve_endpoint(
    validator: &AllowlistValidator,
    designator: Option<&str>,
) -> Result<Url, BatchError> {
    match designator.map(str::trim).filter(|s| !s.is_empty()) {
        Some(designator) => Ok(validator.resolve(designator)?),
        None => match validator.base_url() {
            Some(_) => Ok(validator.resolve("")?),
            None => Err(BatchError::MissingEndpoint),
        },
    }
}
