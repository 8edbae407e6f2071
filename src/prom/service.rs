//! Metric acquisition against a Prometheus-compatible backend: bounded
//! concurrency, retry with exponential backoff and jitter, and transparent
//! splitting of ranges the backend rejects as too large.

use crate::config::{RetryConfig, ScanConfig};
use crate::errors::{PromError, ScanError};
use crate::model::{MetricBundle, MetricKind, Series};
use crate::prom::client::{LabeledSeries, QueryExecutor};
use crate::prom::dialect::{PromDialect, Selector};
use futures::future::{join_all, BoxFuture, FutureExt};
use log::{debug, warn};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Dialect selection: an explicit override wins, otherwise the URL decides.
pub fn resolve_dialect(
    prometheus_url: &str,
    anthos: bool,
    dialect_override: Option<PromDialect>,
) -> PromDialect {
    dialect_override.unwrap_or_else(|| PromDialect::detect(prometheus_url, anthos))
}

pub struct MetricService {
    executor: Arc<dyn QueryExecutor>,
    dialect: PromDialect,
    semaphore: Arc<Semaphore>,
    retry: RetryConfig,
    cluster_label: Option<(String, String)>,
    history: Duration,
    step: Duration,
}

impl MetricService {
    pub fn new(executor: Arc<dyn QueryExecutor>, dialect: PromDialect, cfg: &ScanConfig) -> Self {
        Self {
            executor,
            dialect,
            semaphore: Arc::new(Semaphore::new(cfg.prom_max_concurrency.max(1))),
            retry: cfg.retry.clone(),
            cluster_label: cfg.cluster_label.clone(),
            history: cfg.history(),
            step: cfg.step(),
        }
    }

    pub fn dialect(&self) -> PromDialect {
        self.dialect
    }

    pub fn cluster_label(&self) -> Option<(&str, &str)> {
        self.cluster_label
            .as_ref()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16));
        let jitter = rand::thread_rng().gen_range(0..=base / 2 + 1);
        Duration::from_millis(exp + jitter).min(self.retry.max_delay)
    }

    /// One attempt against the executor under the backend semaphore.
    async fn attempt(
        &self,
        query: &str,
        range: Option<(f64, f64, f64)>,
        at: f64,
    ) -> Result<Vec<LabeledSeries>, PromError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore never closed");
        match range {
            Some((start, end, step)) => self.executor.range_query(query, start, end, step).await,
            None => self.executor.instant_query(query, at).await,
        }
    }

    async fn with_retry(
        &self,
        query: &str,
        range: Option<(f64, f64, f64)>,
        at: f64,
    ) -> Result<Vec<LabeledSeries>, PromError> {
        let mut attempt = 0;
        loop {
            match self.attempt(query, range, at).await {
                Ok(series) => return Ok(series),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        "transient backend failure (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        self.retry.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Range query that splits the window in halves when the backend
    /// truncates or rejects it by size, merging samples by (pod, container).
    /// A non-retryable error in either half fails the whole call.
    pub fn range_query<'a>(
        &'a self,
        query: &'a str,
        start: f64,
        end: f64,
        step: f64,
    ) -> BoxFuture<'a, Result<Vec<Series>, PromError>> {
        async move {
            match self.with_retry(query, Some((start, end, step)), end).await {
                Ok(series) => Ok(series.into_iter().map(LabeledSeries::into_series).collect()),
                Err(e) if e.is_range_too_large() && end - start > 2.0 * step => {
                    let mid = (start + end) / 2.0;
                    debug!("range rejected as too large, splitting [{start}, {end}] at {mid}");
                    let left = self.range_query(query, start, mid, step).await?;
                    let right = self.range_query(query, mid, end, step).await?;
                    Ok(merge_series(left, right))
                }
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    /// One-shot instant query, normalized to standard labels.
    pub async fn instant_query(&self, query: &str, at: f64) -> Result<Vec<Series>, PromError> {
        Ok(self
            .with_retry(query, None, at)
            .await?
            .into_iter()
            .map(LabeledSeries::into_series)
            .collect())
    }

    /// Instant query keeping the raw label sets (owner lookups).
    pub async fn instant_query_raw(
        &self,
        query: &str,
        at: f64,
    ) -> Result<Vec<LabeledSeries>, PromError> {
        self.with_retry(query, None, at).await
    }

    /// Fetch one metric kind for a container slot. A dialect that cannot
    /// express the kind yields an empty series set; the bundle records the
    /// warning, never an error that aborts the scan.
    pub async fn fetch_kind(
        &self,
        kind: MetricKind,
        sel: &Selector<'_>,
        now: f64,
    ) -> Result<Vec<Series>, PromError> {
        let spec = match self.dialect.query(kind, sel, self.history, self.step) {
            Some(spec) => spec,
            None => return Ok(Vec::new()),
        };
        if spec.range {
            let start = now - self.history.as_secs_f64();
            self.range_query(&spec.promql, start, now, self.step.as_secs_f64())
                .await
        } else {
            self.instant_query(&spec.promql, now).await
        }
    }

    /// Build the metric bundle for one container slot: all kinds fetched
    /// concurrently inside the worker, merged atomically. Backend failures
    /// leave the kind empty with a warning; auth failures surface so the
    /// runner can abort the cluster.
    pub async fn collect_bundle(
        &self,
        cluster: &str,
        sel: &Selector<'_>,
        kinds: &[MetricKind],
        now: f64,
    ) -> Result<MetricBundle, ScanError> {
        let fetches = kinds
            .iter()
            .map(|kind| async move { (*kind, self.fetch_kind(*kind, sel, now).await) });
        let mut bundle = MetricBundle::new();
        for kind in kinds {
            if self
                .dialect
                .query(*kind, sel, self.history, self.step)
                .is_none()
            {
                bundle
                    .warnings
                    .push(ScanError::UnsupportedMetric(*kind).to_string());
            } else if *kind == MetricKind::OomKilledMemory
                && !self.dialect.has_kube_state_metrics()
            {
                bundle
                    .warnings
                    .push(format!("{kind}: inferred from restart counts on this backend"));
            }
        }
        for (kind, outcome) in join_all(fetches).await {
            match outcome {
                Ok(series) => {
                    bundle.insert(kind, series);
                }
                Err(e) if e.is_auth() => {
                    return Err(ScanError::from_prom(cluster, e));
                }
                Err(e) => {
                    warn!(
                        "metric {kind} unavailable for {}/{}: {e}",
                        sel.namespace, sel.container
                    );
                    bundle.warnings.push(format!("{kind}: {e}"));
                    bundle.insert(kind, Vec::new());
                }
            }
        }
        Ok(bundle)
    }

    /// Raw series of a kube-state-metrics owner lookup
    /// (`kube_replicaset_owner`, `kube_job_owner`, `kube_pod_owner`, ...).
    /// Returns `None` when the dialect has no such series, so the
    /// discoverer falls back to the live API.
    pub async fn owner_series(
        &self,
        metric: &str,
        namespace: &str,
        owner_kind: &str,
        owner_names_regex: &str,
        now: f64,
    ) -> Result<Option<Vec<LabeledSeries>>, PromError> {
        let query = match self.dialect.owner_query(
            metric,
            namespace,
            owner_kind,
            owner_names_regex,
            self.history,
            self.cluster_label(),
        ) {
            Some(q) => q,
            None => return Ok(None),
        };
        Ok(Some(self.instant_query_raw(&query, now).await?))
    }

    /// Names of currently-running pods per kube_pod_status_phase, when the
    /// dialect can ask.
    pub async fn running_pods(
        &self,
        namespace: &str,
        pod_regex: &str,
        now: f64,
    ) -> Result<Option<HashSet<String>>, PromError> {
        let query = match self
            .dialect
            .pod_running_query(namespace, pod_regex, self.cluster_label())
        {
            Some(q) => q,
            None => return Ok(None),
        };
        let series = self.instant_query_raw(&query, now).await?;
        Ok(Some(
            series
                .iter()
                .filter_map(|s| s.label("pod").map(str::to_string))
                .collect(),
        ))
    }
}

/// Merge two halves of a split range by (pod, container), keeping samples
/// in timestamp order and dropping duplicates on the boundary.
fn merge_series(left: Vec<Series>, right: Vec<Series>) -> Vec<Series> {
    let mut merged: HashMap<(String, String), Series> = HashMap::new();
    for series in left.into_iter().chain(right) {
        let key = (series.pod.clone(), series.container.clone());
        match merged.get_mut(&key) {
            Some(existing) => existing.samples.extend(series.samples),
            None => {
                merged.insert(key, series);
            }
        }
    }
    let mut out: Vec<Series> = merged.into_values().collect();
    for series in &mut out {
        series
            .samples
            .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        series.samples.dedup_by(|a, b| a.timestamp == b.timestamp);
    }
    out.sort_by(|a, b| (&a.pod, &a.container).cmp(&(&b.pod, &b.container)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sample;
    use crate::prom::client::MockQueryExecutor;
    use tokio_test::{assert_err, assert_ok};

    fn series(pod: &str, samples: &[(f64, f64)]) -> Series {
        Series {
            pod: pod.to_string(),
            container: "app".to_string(),
            samples: samples
                .iter()
                .map(|(t, v)| Sample { timestamp: *t, value: *v })
                .collect(),
        }
    }

    fn labeled(pod: &str, samples: &[(f64, f64)]) -> LabeledSeries {
        let mut labels = HashMap::new();
        labels.insert("pod".to_string(), pod.to_string());
        labels.insert("container".to_string(), "app".to_string());
        LabeledSeries {
            labels,
            samples: samples
                .iter()
                .map(|(t, v)| Sample { timestamp: *t, value: *v })
                .collect(),
        }
    }

    fn test_config() -> ScanConfig {
        let mut cfg = ScanConfig::default();
        cfg.retry.base_delay = Duration::from_millis(1);
        cfg
    }

    #[test]
    fn test_merge_series_sorts_and_dedups() {
        let left = vec![series("a", &[(1.0, 10.0), (2.0, 11.0)])];
        let right = vec![
            series("a", &[(2.0, 11.0), (3.0, 12.0)]),
            series("b", &[(1.0, 5.0)]),
        ];
        let merged = merge_series(left, right);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged[0].samples,
            vec![
                Sample { timestamp: 1.0, value: 10.0 },
                Sample { timestamp: 2.0, value: 11.0 },
                Sample { timestamp: 3.0, value: 12.0 },
            ]
        );
        assert_eq!(merged[1].pod, "b");
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let mut exec = MockQueryExecutor::new();
        let mut calls = 0;
        exec.expect_instant_query().times(3).returning(move |_, _| {
            calls += 1;
            if calls < 3 {
                Err(PromError::Status { status: 429, body: String::new() })
            } else {
                Ok(vec![])
            }
        });
        let service = MetricService::new(Arc::new(exec), PromDialect::Standard, &test_config());
        assert_ok!(service.instant_query("up", 0.0).await);
    }

    #[tokio::test]
    async fn test_retry_bounded_by_max_attempts() {
        let mut exec = MockQueryExecutor::new();
        exec.expect_instant_query()
            .times(3)
            .returning(|_, _| Err(PromError::Status { status: 503, body: String::new() }));
        let service = MetricService::new(Arc::new(exec), PromDialect::Standard, &test_config());
        assert_err!(service.instant_query("up", 0.0).await);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let mut exec = MockQueryExecutor::new();
        exec.expect_instant_query()
            .times(1)
            .returning(|_, _| Err(PromError::Status { status: 404, body: String::new() }));
        let service = MetricService::new(Arc::new(exec), PromDialect::Standard, &test_config());
        assert!(service.instant_query("up", 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_range_split_merges_halves() {
        let mut exec = MockQueryExecutor::new();
        exec.expect_range_query().returning(|_, start, end, _| {
            if end - start > 1000.0 {
                Err(PromError::RangeTooLarge("too many samples".to_string()))
            } else {
                Ok(vec![labeled("a", &[(start, 1.0), (end, 2.0)])])
            }
        });
        let service = MetricService::new(Arc::new(exec), PromDialect::Standard, &test_config());
        let out = service.range_query("q", 0.0, 2000.0, 75.0).await.unwrap();
        assert_eq!(out.len(), 1);
        // Two halves of [0, 2000] merged; boundary sample deduped.
        assert_eq!(
            out[0]
                .samples
                .iter()
                .map(|s| s.timestamp)
                .collect::<Vec<_>>(),
            vec![0.0, 1000.0, 2000.0]
        );
    }

    #[tokio::test]
    async fn test_owner_lookup_unavailable_on_managed_dialect() {
        let exec = MockQueryExecutor::new();
        let service = MetricService::new(Arc::new(exec), PromDialect::GcpManaged, &test_config());
        let found = service
            .owner_series("kube_pod_owner", "ns", "ReplicaSet", "a|b", 0.0)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_owner_lookup_returns_labeled_series() {
        let mut exec = MockQueryExecutor::new();
        exec.expect_instant_query().returning(|_, _| {
            let mut labels = HashMap::new();
            labels.insert("replicaset".to_string(), "api-6d4f".to_string());
            labels.insert("owner_name".to_string(), "api".to_string());
            Ok(vec![LabeledSeries { labels, samples: vec![] }])
        });
        let service = MetricService::new(Arc::new(exec), PromDialect::Standard, &test_config());
        let series = service
            .owner_series("kube_replicaset_owner", "ns", "Deployment", "api", 0.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(series[0].label("replicaset"), Some("api-6d4f"));
        assert_eq!(series[0].label("owner_name"), Some("api"));
    }
}
