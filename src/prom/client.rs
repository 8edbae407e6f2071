//! HTTP transport for Prometheus-compatible backends: `/api/v1/query`,
//! `/api/v1/query_range` and `/api/v1/labels`. Parses the response envelope
//! into labeled series; the metric service normalizes labels downstream.

use crate::errors::PromError;
use crate::model::{Sample, Series};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Authentication for the backend. The caller wires tokens; the scan core
/// never mints credentials itself.
#[derive(Debug, Clone, Default)]
pub enum PromAuth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer(String),
}

/// One raw series with its full label set. Owner-lookup queries read labels
/// other than `pod` / `container`, so the label map is kept intact here.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSeries {
    pub labels: HashMap<String, String>,
    pub samples: Vec<Sample>,
}

impl LabeledSeries {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Normalize to the standard `pod` / `container` label names; the
    /// managed dialects may still carry `pod_name` / `container_name` when
    /// a query bypassed the label_replace wrapping.
    pub fn into_series(self) -> Series {
        let pod = self
            .labels
            .get("pod")
            .or_else(|| self.labels.get("pod_name"))
            .cloned()
            .unwrap_or_default();
        let container = self
            .labels
            .get("container")
            .or_else(|| self.labels.get("container_name"))
            .cloned()
            .unwrap_or_default();
        Series {
            pod,
            container,
            samples: self.samples,
        }
    }
}

/// Executes already-built queries. The metric service depends on this seam
/// rather than on the HTTP client so tests can substitute a fake backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// `GET /api/v1/query_range`; timestamps and step in seconds.
    async fn range_query(
        &self,
        query: &str,
        start: f64,
        end: f64,
        step: f64,
    ) -> Result<Vec<LabeledSeries>, PromError>;

    /// `GET /api/v1/query` at one evaluation timestamp.
    async fn instant_query(&self, query: &str, at: f64)
        -> Result<Vec<LabeledSeries>, PromError>;
}

pub struct PromHttpClient {
    base_url: String,
    http: reqwest::Client,
    auth: PromAuth,
    headers: Vec<(String, String)>,
}

impl PromHttpClient {
    pub fn new(
        url: &str,
        auth: PromAuth,
        timeout: Duration,
        headers: Vec<(String, String)>,
    ) -> Result<Self, PromError> {
        let base_url = url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(PromError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            http,
            auth,
            headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn decorate(&self, req: RequestBuilder) -> RequestBuilder {
        let req = match &self.auth {
            PromAuth::None => req,
            PromAuth::Basic { username, password } => req.basic_auth(username, Some(password)),
            PromAuth::Bearer(token) => req.bearer_auth(token),
        };
        self.headers
            .iter()
            .fold(req, |r, (k, v)| r.header(k.as_str(), v.as_str()))
    }

    /// Cheap connectivity probe against `/api/v1/labels`.
    pub async fn check_connection(&self) -> Result<(), PromError> {
        let url = format!("{}/api/v1/labels", self.base_url);
        let resp = self.decorate(self.http.get(&url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PromError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn fetch(
        &self,
        url: String,
        params: Vec<(&str, String)>,
    ) -> Result<Vec<LabeledSeries>, PromError> {
        let resp = self
            .decorate(self.http.get(&url).query(&params))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PromError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body: PromResponse = resp
            .json()
            .await
            .map_err(|e| PromError::Parse(e.to_string()))?;
        if body.status != "success" {
            return Err(PromError::QueryFailed(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(parse_series(body.data.result.unwrap_or_default()))
    }
}

#[async_trait]
impl QueryExecutor for PromHttpClient {
    async fn range_query(
        &self,
        query: &str,
        start: f64,
        end: f64,
        step: f64,
    ) -> Result<Vec<LabeledSeries>, PromError> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        self.fetch(
            url,
            vec![
                ("query", query.to_string()),
                ("start", format!("{}", start)),
                ("end", format!("{}", end)),
                ("step", format!("{}", step)),
            ],
        )
        .await
    }

    async fn instant_query(
        &self,
        query: &str,
        at: f64,
    ) -> Result<Vec<LabeledSeries>, PromError> {
        let url = format!("{}/api/v1/query", self.base_url);
        self.fetch(
            url,
            vec![("query", query.to_string()), ("time", format!("{}", at))],
        )
        .await
    }
}

// Prometheus API response envelope.

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    data: PromData,
}

#[derive(Debug, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Option<Vec<PromResult>>,
}

#[derive(Debug, Deserialize)]
struct PromResult {
    metric: HashMap<String, String>,
    /// Instant queries.
    #[serde(default)]
    value: Option<(f64, String)>,
    /// Range queries.
    #[serde(default)]
    values: Option<Vec<(f64, String)>>,
}

fn parse_series(results: Vec<PromResult>) -> Vec<LabeledSeries> {
    let mut out = Vec::with_capacity(results.len());
    for r in results {
        let mut samples: Vec<Sample> = Vec::new();
        if let Some(values) = r.values {
            for (ts, v) in values {
                if let Ok(value) = v.parse::<f64>() {
                    if value.is_finite() {
                        samples.push(Sample { timestamp: ts, value });
                    }
                }
            }
        } else if let Some((ts, v)) = r.value {
            if let Ok(value) = v.parse::<f64>() {
                if value.is_finite() {
                    samples.push(Sample { timestamp: ts, value });
                }
            }
        }
        out.push(LabeledSeries {
            labels: r.metric,
            samples,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_url() {
        let err =
            PromHttpClient::new("prometheus:9090", PromAuth::None, Duration::from_secs(5), vec![]);
        assert!(matches!(err, Err(PromError::InvalidUrl(_))));
    }

    #[test]
    fn test_parse_and_normalize_gcp_labels() {
        let raw = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {
                        "metric": {"pod_name": "api-1", "container_name": "api"},
                        "values": [[1700000000, "0.5"], [1700000075, "0.6"], [1700000150, "NaN"]]
                    },
                    {
                        "metric": {"pod": "api-2", "container": "api"},
                        "value": [1700000000, "12.0"]
                    }
                ]
            }
        }"#;
        let body: PromResponse = serde_json::from_str(raw).unwrap();
        let parsed = parse_series(body.data.result.unwrap());
        assert_eq!(parsed.len(), 2);

        let first = parsed[0].clone().into_series();
        assert_eq!(first.pod, "api-1");
        assert_eq!(first.container, "api");
        assert_eq!(first.samples.len(), 2);

        let second = parsed[1].clone().into_series();
        assert_eq!(second.pod, "api-2");
        assert_eq!(second.samples[0].value, 12.0);
    }

    #[test]
    fn test_owner_labels_preserved() {
        let raw = r#"{
            "status": "success",
            "data": {
                "result": [
                    {
                        "metric": {"replicaset": "api-6d4f", "owner_name": "api", "owner_kind": "Deployment"},
                        "value": [1700000000, "1"]
                    }
                ]
            }
        }"#;
        let body: PromResponse = serde_json::from_str(raw).unwrap();
        let parsed = parse_series(body.data.result.unwrap());
        assert_eq!(parsed[0].label("replicaset"), Some("api-6d4f"));
    }
}
