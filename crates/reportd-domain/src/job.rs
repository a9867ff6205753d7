//! Batch job record and status management.
//!
//! A [`BatchJob`] tracks one submission: the resolved upstream endpoint, the
//! ordered parameter sets, and one [`BatchItemResult`] per dispatched item.
//! Status transitions go through methods, never direct field writes, so the
//! Queued → Running → terminal progression stays monotonic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job status.
///
/// Transitions are monotonic: `Queued → Running → {Completed, Failed,
/// Cancelled}`. Terminal states absorb all further transition attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and waiting for a worker.
    Queued,
    /// A worker has started dispatching items.
    Running,
    /// Every item holds a recorded outcome.
    Completed,
    /// Orchestration-level failure before or during execution
    /// (store unreachable, serialization failure). Item failures
    /// never produce this status.
    Failed,
    /// A cancellation request was observed.
    Cancelled,
}

impl JobStatus {
    /// Returns true for Completed, Failed, and Cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Classification of a failed upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// The per-call timeout elapsed.
    Timeout,
    /// The connection could not be established or broke mid-call.
    Connection,
    /// The upstream answered with a non-success status code.
    Status { code: u16 },
}

/// Outcome of one item within a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// The upstream call succeeded; `data` is the response payload,
    /// passed through untouched.
    Success { data: Value },
    /// The upstream call failed. Captured on the item, never escalated
    /// to job-level failure.
    Error {
        error: UpstreamErrorKind,
        message: String,
    },
    /// The item was never dispatched because a cancellation request
    /// was observed first.
    Cancelled,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success { .. })
    }
}

/// Result of one item, permanently bound to its input position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    /// Index of the originating parameter set.
    pub index: usize,
    pub outcome: ItemOutcome,
    pub completed_at: DateTime<Utc>,
}

impl BatchItemResult {
    pub fn new(index: usize, outcome: ItemOutcome) -> Self {
        Self {
            index,
            outcome,
            completed_at: Utc::now(),
        }
    }
}

/// Reference to a file-backed consolidated result payload.
///
/// Present on a job record exactly when the serialized results exceeded the
/// inline threshold; the payload itself never lives on the record then.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFileRef {
    /// File name within the results directory (`<job_id>.json`).
    pub file: String,
    /// Number of item results in the file.
    pub item_count: usize,
    /// Serialized payload size in bytes.
    pub byte_size: u64,
}

/// Batch job record: single source of truth for one submission.
///
/// Mutated only by the orchestrator; stored and re-read through the
/// `JobStore` trait, so every field round-trips through serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    /// Unique, opaque identifier (uuid v4).
    pub id: String,
    /// Resolved absolute upstream URL.
    pub endpoint: String,
    /// HTTP method for the upstream calls.
    pub method: String,
    /// Caller-provided source identifier, passed through opaquely.
    pub source_id: Option<i64>,
    /// Ordered parameter sets; fixed at acceptance, one upstream call each.
    pub params: Vec<Value>,
    /// Opaque caller metadata.
    pub metadata: Option<Value>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Recorded item outcomes, in input order. Cleared when the
    /// consolidated payload is offloaded to a file.
    pub results: Vec<BatchItemResult>,
    /// Set exactly when results were offloaded; see [`ResultFileRef`].
    pub result_file: Option<ResultFileRef>,
    /// Orchestration-level failure diagnostic (status Failed only).
    pub error: Option<String>,
}

impl BatchJob {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        source_id: Option<i64>,
        params: Vec<Value>,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            source_id,
            params,
            metadata,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            results: Vec::new(),
            result_file: None,
            error: None,
        }
    }

    /// Number of parameter sets (fixed at acceptance).
    pub fn total_items(&self) -> usize {
        self.params.len()
    }

    /// Number of items with a recorded outcome so far.
    pub fn completed_items(&self) -> usize {
        if let Some(file_ref) = &self.result_file {
            file_ref.item_count
        } else {
            self.results.len()
        }
    }

    /// Transition Queued → Running. Returns false (and leaves the record
    /// untouched) for any other starting status.
    pub fn mark_running(&mut self) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Running;
        true
    }

    /// Transition to Completed. No-op when already terminal.
    pub fn mark_completed(&mut self) -> bool {
        self.transition_terminal(JobStatus::Completed)
    }

    /// Transition to Failed with a diagnostic cause. No-op when already
    /// terminal.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if self.transition_terminal(JobStatus::Failed) {
            self.error = Some(error.into());
            true
        } else {
            false
        }
    }

    /// Transition to Cancelled. No-op when already terminal.
    pub fn mark_cancelled(&mut self) -> bool {
        self.transition_terminal(JobStatus::Cancelled)
    }

    fn transition_terminal(&mut self, target: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = target;
        self.completed_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> BatchJob {
        BatchJob::new(
            "job-1",
            "https://example.com/dtj/api/plan",
            "POST",
            Some(1161),
            vec![json!({"date": "2025-01-01"}), json!({"date": "2026-01-01"})],
            None,
        )
    }

    #[test]
    fn new_job_starts_queued() {
        let job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.total_items(), 2);
        assert_eq!(job.completed_items(), 0);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn normal_transition_chain() {
        let mut job = job();
        assert!(job.mark_running());
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.mark_completed());
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn terminal_states_absorb_transitions() {
        let mut job = job();
        job.mark_running();
        job.mark_cancelled();
        assert_eq!(job.status, JobStatus::Cancelled);

        // No transition out of a terminal state.
        assert!(!job.mark_running());
        assert!(!job.mark_completed());
        assert!(!job.mark_failed("late failure"));
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.error.is_none());
    }

    #[test]
    fn running_requires_queued() {
        let mut job = job();
        job.mark_running();
        assert!(!job.mark_running());

        let mut cancelled = self::job();
        cancelled.mark_cancelled();
        assert!(!cancelled.mark_running());
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[test]
    fn failed_records_diagnostic() {
        let mut job = job();
        job.mark_running();
        assert!(job.mark_failed("backing store unreachable"));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("backing store unreachable"));
    }

    #[test]
    fn job_record_roundtrips_through_serde() {
        let mut job = job();
        job.mark_running();
        job.results.push(BatchItemResult::new(
            0,
            ItemOutcome::Success {
                data: json!({"records": [{"value": 1}]}),
            },
        ));
        job.results.push(BatchItemResult::new(
            1,
            ItemOutcome::Error {
                error: UpstreamErrorKind::Status { code: 502 },
                message: "bad gateway".to_string(),
            },
        ));
        job.mark_completed();

        let raw = serde_json::to_string(&job).unwrap();
        let restored: BatchJob = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored.status, JobStatus::Completed);
        assert_eq!(restored.results, job.results);
        assert_eq!(restored.source_id, Some(1161));
    }

    #[test]
    fn completed_items_uses_file_ref_when_offloaded() {
        let mut job = job();
        job.result_file = Some(ResultFileRef {
            file: "job-1.json".to_string(),
            item_count: 2,
            byte_size: 4096,
        });
        assert_eq!(job.completed_items(), 2);
    }
}
