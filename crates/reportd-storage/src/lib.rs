//! reportd-storage: Persistence layer for batch report jobs
//!
//! This crate provides the storage layer for reportd, including:
//! - The `JobStore` trait with TTL semantics
//! - `MemoryJobStore` for single-process deployments
//! - `RedisJobStore` for multi-process deployments
//! - `ResultFileManager` for file-backed consolidated results
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              reportd-storage                │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs  - JobStore trait (put/get/del)  │
//! │  memory.rs  - DashMap store, lazy expiry    │
//! │  redis.rs   - Redis store, SET .. EX ttl    │
//! │  results.rs - result file offload + sweep   │
//! │  error.rs   - storage error types           │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod redis;
pub mod results;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryJobStore;
pub use redis::RedisJobStore;
pub use results::ResultFileManager;
pub use traits::JobStore;
