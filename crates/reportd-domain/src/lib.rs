//! reportd-domain: Core domain model for batch report fetching
//!
//! This crate provides the domain layer for reportd, including:
//! - BatchJob record and its status state machine
//! - AllowlistValidator for remote-endpoint safety
//! - FilterCache for resolved filter value sets
//! - Domain error types
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               reportd-domain                │
//! ├─────────────────────────────────────────────┤
//! │  job.rs       - BatchJob + status machine   │
//! │  allowlist.rs - remote endpoint validation  │
//! │  cache/       - filter value cache (LRU+TTL)│
//! │  error.rs     - domain error types          │
//! └─────────────────────────────────────────────┘
//! ```

pub mod allowlist;
pub mod cache;
pub mod error;
pub mod job;

// Re-export commonly used types
pub use allowlist::{AllowlistEntry, AllowlistValidator};
pub use cache::{FilterCache, FilterCacheConfig, FilterQuerySignature};
pub use error::AllowlistError;
pub use job::{BatchItemResult, BatchJob, ItemOutcome, JobStatus, ResultFileRef, UpstreamErrorKind};
