//! Application wiring.
//!
//! Builds every component from a validated [`ReportdConfig`] and hands back
//! the running orchestrator plus the filter read path. The job store backend
//! is selected here: a configured `storage.redis_url` picks the Redis store,
//! otherwise jobs live in process memory.

use std::sync::Arc;

use reportd_domain::allowlist::AllowlistValidator;
use reportd_domain::{AllowlistError, FilterCache, FilterCacheConfig};
use reportd_storage::{JobStore, MemoryJobStore, RedisJobStore, ResultFileManager, StorageError};
use thiserror::Error;
use tracing::info;

use crate::config::ReportdConfig;
use crate::filters::FilterValueService;
use crate::orchestrator::BatchOrchestrator;
use crate::upstream::{ReportFetcher, UpstreamClient, UpstreamError};

/// Failure while assembling the application from its configuration.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The upstream base URL or allowlist could not be parsed.
    #[error("invalid upstream configuration: {0}")]
    Allowlist(#[from] AllowlistError),

    /// The job store or results directory could not be prepared.
    #[error("storage setup failed: {0}")]
    Storage(#[from] StorageError),

    /// The upstream HTTP client could not be built.
    #[error("upstream client setup failed: {0}")]
    Upstream(#[from] UpstreamError),
}

/// The assembled service: batch pipeline plus filter read path.
#[derive(Debug)]
pub struct App {
    pub orchestrator: Arc<BatchOrchestrator>,
    pub filters: FilterValueService,
}

impl App {
    /// Builds and starts every component described by the configuration.
    ///
    /// The configuration is expected to have passed `validate()` already;
    /// `ReportdConfig::load` and `from_env` guarantee that.
    pub async fn build(config: &ReportdConfig) -> Result<Self, BootstrapError> {
        let validator = AllowlistValidator::from_config(
            config.upstream.base_url.as_deref(),
            config.upstream.allowlist.as_deref(),
        )?;

        let store: Arc<dyn JobStore> = match config.storage.redis_url.as_deref() {
            Some(url) => {
                info!("using redis job store");
                Arc::new(RedisJobStore::connect(url, config.batch.job_ttl()).await?)
            }
            None => {
                info!("using in-memory job store");
                Arc::new(MemoryJobStore::new(config.batch.job_ttl()))
            }
        };

        let files = Arc::new(
            ResultFileManager::new(&config.batch.results_dir, config.batch.results_ttl()).await?,
        );

        let fetcher: Arc<dyn ReportFetcher> =
            Arc::new(UpstreamClient::new(config.upstream.timeout())?);

        let cache = Arc::new(FilterCache::new(
            FilterCacheConfig::default()
                .with_max_entries(config.cache.max_entries)
                .with_ttl(config.cache.ttl()),
        ));

        let orchestrator = BatchOrchestrator::start(
            config.batch.clone(),
            validator.clone(),
            store,
            Arc::clone(&fetcher),
            files,
        )
        .await;
        let filters = FilterValueService::new(cache, fetcher, validator);

        Ok(Self {
            orchestrator,
            filters,
        })
    }

    /// Stops the worker pool and background tasks.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
