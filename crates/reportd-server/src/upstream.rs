//! Upstream report service client.
//!
//! The orchestrator dispatches every batch item through the [`ReportFetcher`]
//! trait, so tests substitute fakes without any network plumbing.
//! [`UpstreamClient`] is the production implementation on top of reqwest.
//!
//! Method handling follows the upstream service's conventions: GET sends the
//! parameter set as query pairs, any other method posts it as the JSON body.

use std::time::Duration;

use async_trait::async_trait;
use reportd_domain::UpstreamErrorKind;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Failure of a single upstream call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The per-call timeout elapsed.
    #[error("upstream request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The connection failed or the response body could not be read.
    #[error("upstream connection failed: {message}")]
    Connection { message: String },

    /// The upstream answered with a non-success status.
    #[error("upstream returned status {code}")]
    Status { code: u16 },
}

impl UpstreamError {
    /// Classification recorded on the item outcome.
    pub fn kind(&self) -> UpstreamErrorKind {
        match self {
            UpstreamError::Timeout { .. } => UpstreamErrorKind::Timeout,
            UpstreamError::Connection { .. } => UpstreamErrorKind::Connection,
            UpstreamError::Status { code } => UpstreamErrorKind::Status { code: *code },
        }
    }
}

/// One upstream call per batch item.
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    /// Fetches one report with the given parameter set.
    async fn fetch(&self, url: &Url, method: &str, params: &Value)
        -> Result<Value, UpstreamError>;
}

/// reqwest-backed [`ReportFetcher`] with a per-call timeout.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Connection {
                message: e.to_string(),
            })?;
        Ok(Self { client, timeout })
    }

    fn map_send_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            UpstreamError::Connection {
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl ReportFetcher for UpstreamClient {
    async fn fetch(
        &self,
        url: &Url,
        method: &str,
        params: &Value,
    ) -> Result<Value, UpstreamError> {
        let request = if method.eq_ignore_ascii_case("GET") {
            self.client.get(url.clone()).query(&query_pairs(params))
        } else {
            self.client.post(url.clone()).json(params)
        };

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                code: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| self.map_send_error(e))
    }
}

/// Flattens a parameter set into query pairs for GET calls.
///
/// Scalar values keep their natural string form; nested values are sent as
/// their JSON text.
pub(crate) fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = params else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), rendered)
        })
        .collect()
}

/// Unwraps the upstream response envelope into its record list.
///
/// Checks `result` first, then `data`; each may hold either a bare array or
/// an object with a `records` array. A bare top-level array passes through.
/// Anything else yields an empty list.
pub fn extract_records(payload: &Value) -> Vec<Value> {
    fn records_of(value: &Value) -> Option<Vec<Value>> {
        match value {
            Value::Array(items) => Some(items.clone()),
            Value::Object(map) => match map.get("records") {
                Some(Value::Array(items)) => Some(items.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    if let Some(records) = payload.get("result").and_then(records_of) {
        return records;
    }
    if let Some(records) = payload.get("data").and_then(records_of) {
        return records;
    }
    records_of(payload).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_records_from_result_envelope() {
        let payload = json!({"result": {"records": [{"id": 1}, {"id": 2}]}});
        assert_eq!(extract_records(&payload), vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[test]
    fn test_extract_records_from_bare_result_array() {
        let payload = json!({"result": [{"id": 1}]});
        assert_eq!(extract_records(&payload), vec![json!({"id": 1})]);
    }

    #[test]
    fn test_extract_records_falls_back_to_data() {
        let payload = json!({"data": {"records": [{"id": 3}]}});
        assert_eq!(extract_records(&payload), vec![json!({"id": 3})]);

        let payload = json!({"data": [{"id": 4}]});
        assert_eq!(extract_records(&payload), vec![json!({"id": 4})]);
    }

    #[test]
    fn test_extract_records_accepts_top_level_array() {
        let payload = json!([{"id": 5}]);
        assert_eq!(extract_records(&payload), vec![json!({"id": 5})]);
    }

    #[test]
    fn test_extract_records_defaults_to_empty() {
        assert!(extract_records(&json!({"status": "ok"})).is_empty());
        assert!(extract_records(&json!("plain string")).is_empty());
        assert!(extract_records(&json!({"result": {"count": 0}})).is_empty());
    }

    #[test]
    fn test_query_pairs_render_scalars_naturally() {
        let params = json!({
            "sourceId": 1161,
            "date": "2025-01-01",
            "active": true,
            "skip": null,
            "nested": {"a": 1}
        });
        let mut pairs = query_pairs(&params);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("active".to_string(), "true".to_string()),
                ("date".to_string(), "2025-01-01".to_string()),
                ("nested".to_string(), "{\"a\":1}".to_string()),
                ("sourceId".to_string(), "1161".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_pairs_for_non_object_params_are_empty() {
        assert!(query_pairs(&json!([1, 2, 3])).is_empty());
        assert!(query_pairs(&json!(null)).is_empty());
    }

    #[test]
    fn test_upstream_client_builds_with_timeout() {
        let client = UpstreamClient::new(Duration::from_secs(30)).unwrap();
        assert_eq!(client.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            UpstreamError::Timeout { timeout_secs: 30 }.kind(),
            UpstreamErrorKind::Timeout
        );
        assert_eq!(
            UpstreamError::Status { code: 502 }.kind(),
            UpstreamErrorKind::Status { code: 502 }
        );
        assert_eq!(
            UpstreamError::Connection {
                message: "refused".to_string()
            }
            .kind(),
            UpstreamErrorKind::Connection
        );
    }
}
