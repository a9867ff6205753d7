//! Batch job orchestration.
//!
//! A submission is validated and resolved through the allowlist validator,
//! written to the job store as Queued, and pushed onto a bounded queue. A
//! fixed pool of workers drains the queue; within a job, items dispatch
//! concurrently up to a separate cap, each bounded by the upstream per-call
//! timeout. Item failures are recorded at their input index and never abort
//! siblings or the job.
//!
//! Cancellation is cooperative: queued jobs are marked Cancelled directly,
//! running jobs observe their token between item dispatches. There are no
//! retries; resubmission is the caller's concern.

mod engine;
mod types;

pub use engine::BatchOrchestrator;
pub use types::{BatchError, JobView, SubmitRequest};

pub(crate) use types::resolve_endpoint;
