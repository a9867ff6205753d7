//! reportd-server: Batch orchestration and upstream access
//!
//! This crate contains the service layer including:
//! - Batch orchestrator with a fixed worker pool
//! - Upstream report client behind the ReportFetcher seam
//! - Filter value resolution through the domain cache
//! - Configuration management and logging setup
//! - Application wiring from configuration to running components
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               reportd-server                │
//! ├─────────────────────────────────────────────┤
//! │  app.rs           - Application wiring      │
//! │  config.rs        - Configuration           │
//! │  observability.rs - Logging + metrics       │
//! │  upstream.rs      - ReportFetcher / reqwest │
//! │  filters.rs       - Filter value lookups    │
//! │  orchestrator/    - Batch job pipeline      │
//! │    engine.rs      - Worker pool + execution │
//! │    types.rs       - Requests, views, errors │
//! └─────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod config;
pub mod filters;
pub mod observability;
pub mod orchestrator;
pub mod upstream;

// Re-exports for convenience
pub use app::{App, BootstrapError};
pub use config::{ConfigLoadError, ReportdConfig};
pub use filters::{FilterValueQuery, FilterValueService};
pub use orchestrator::{BatchError, BatchOrchestrator, JobView, SubmitRequest};
pub use upstream::{extract_records, ReportFetcher, UpstreamClient, UpstreamError};
