//! Filter value resolution.
//!
//! Report filters (dropdowns, pickers) need the set of permissible values
//! for a field, resolved by querying the upstream service. This read path
//! sits beside the batch pipeline: same validator, same fetcher seam, plus
//! the domain [`FilterCache`] keyed by the query signature so repeated
//! lookups within the TTL skip the upstream round trip.

use std::sync::Arc;

use reportd_domain::allowlist::AllowlistValidator;
use reportd_domain::{FilterCache, FilterQuerySignature};
use serde_json::Value;
use tracing::debug;

use crate::orchestrator::BatchError;
use crate::upstream::{extract_records, ReportFetcher};

/// One filter value lookup.
#[derive(Debug, Clone, Default)]
pub struct FilterValueQuery {
    /// Endpoint designator, same rules as batch submission.
    pub endpoint: Option<String>,
    pub template_id: Option<Value>,
    pub body: Option<Value>,
    pub params: Option<Value>,
    pub joins: Option<Value>,
}

impl FilterValueQuery {
    fn signature(&self) -> FilterQuerySignature<'_> {
        FilterQuerySignature {
            template_id: self.template_id.as_ref(),
            body: self.body.as_ref(),
            params: self.params.as_ref(),
            joins: self.joins.as_ref(),
        }
    }

    /// The upstream request body, mirroring the signature parts.
    fn payload(&self) -> Value {
        let mut payload = serde_json::Map::new();
        if let Some(v) = &self.template_id {
            payload.insert("templateId".to_string(), v.clone());
        }
        if let Some(v) = &self.body {
            payload.insert("body".to_string(), v.clone());
        }
        if let Some(v) = &self.params {
            payload.insert("params".to_string(), v.clone());
        }
        if let Some(v) = &self.joins {
            payload.insert("joins".to_string(), v.clone());
        }
        Value::Object(payload)
    }
}

/// Resolves filter value sets through the cache.
pub struct FilterValueService {
    cache: Arc<FilterCache>,
    fetcher: Arc<dyn ReportFetcher>,
    validator: AllowlistValidator,
}

impl std::fmt::Debug for FilterValueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterValueService")
            .field("cache", &self.cache)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl FilterValueService {
    pub fn new(
        cache: Arc<FilterCache>,
        fetcher: Arc<dyn ReportFetcher>,
        validator: AllowlistValidator,
    ) -> Self {
        Self {
            cache,
            fetcher,
            validator,
        }
    }

    /// Returns the permissible values for a filter query, from cache when
    /// fresh, otherwise from upstream.
    pub async fn resolve(&self, query: &FilterValueQuery) -> Result<Vec<Value>, BatchError> {
        let key = query.signature().key();
        if let Some(values) = self.cache.get(&key).await {
            return Ok(values);
        }

        let url =
            crate::orchestrator::resolve_endpoint(&self.validator, query.endpoint.as_deref())?;
        let response = self.fetcher.fetch(&url, "POST", &query.payload()).await?;
        let records = extract_records(&response);
        debug!(key = %key, values = records.len(), "resolved filter values upstream");

        self.cache.put(key, records.clone()).await;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamError;
    use async_trait::async_trait;
    use reportd_domain::FilterCacheConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReportFetcher for CountingFetcher {
        async fn fetch(
            &self,
            _url: &Url,
            _method: &str,
            _params: &Value,
        ) -> Result<Value, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"result": {"records": [{"value": "east"}, {"value": "west"}]}}))
        }
    }

    fn service() -> (FilterValueService, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let validator = AllowlistValidator::from_config(
            Some("https://reports.example.com"),
            None,
        )
        .unwrap();
        let service = FilterValueService::new(
            Arc::new(FilterCache::new(FilterCacheConfig::default())),
            fetcher.clone() as Arc<dyn ReportFetcher>,
            validator,
        );
        (service, fetcher)
    }

    fn region_query() -> FilterValueQuery {
        FilterValueQuery {
            endpoint: Some("/dtj/api/filters".to_string()),
            template_id: Some(json!(42)),
            params: Some(json!({"sourceId": 1161})),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_unwraps_envelope_and_caches() {
        let (service, fetcher) = service();

        let values = service.resolve(&region_query()).await.unwrap();
        assert_eq!(values, vec![json!({"value": "east"}), json!({"value": "west"})]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // A repeated lookup within the TTL is served from cache.
        let again = service.resolve(&region_query()).await.unwrap();
        assert_eq!(again, values);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_signatures_do_not_share_entries() {
        let (service, fetcher) = service();

        service.resolve(&region_query()).await.unwrap();
        let mut other = region_query();
        other.params = Some(json!({"sourceId": 9999}));
        service.resolve(&other).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolve_rejects_denied_endpoints() {
        let (service, fetcher) = service();
        let mut query = region_query();
        query.endpoint = Some("http://localhost/filters".to_string());

        let err = service.resolve(&query).await.unwrap_err();

        assert!(matches!(err, BatchError::Denied(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
