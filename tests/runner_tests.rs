//! Pipeline behavior with a stubbed workload source and metric backend.

use async_trait::async_trait;
use kuberight::config::ScanConfig;
use kuberight::discovery::WorkloadSource;
use kuberight::errors::{PromError, ScanError};
use kuberight::model::{
    ContainerSpec, PodRef, ResourceAllocations, RowState, Sample, Workload, WorkloadId,
    WorkloadKind,
};
use kuberight::prom::client::{LabeledSeries, QueryExecutor};
use kuberight::prom::dialect::PromDialect;
use kuberight::prom::service::MetricService;
use kuberight::scan::{ClusterTarget, ScanRunner};
use kuberight::strategy::simple::SimpleStrategy;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MIB: f64 = 1024.0 * 1024.0;

fn workload(cluster: &str, name: &str, containers: &[&str], pods: &[&str]) -> Workload {
    Workload {
        id: WorkloadId {
            cluster: cluster.to_string(),
            namespace: "shop".to_string(),
            kind: WorkloadKind::Deployment,
            name: name.to_string(),
        },
        pods: pods
            .iter()
            .map(|p| PodRef {
                name: p.to_string(),
                running: true,
                deleted: false,
            })
            .collect(),
        containers: containers
            .iter()
            .map(|c| ContainerSpec {
                name: c.to_string(),
                current: ResourceAllocations::default(),
            })
            .collect(),
        hpa: None,
        warnings: vec![],
    }
}

struct StaticSource {
    workloads: Vec<Workload>,
}

#[async_trait]
impl WorkloadSource for StaticSource {
    async fn discover(
        &self,
        tx: mpsc::Sender<Workload>,
        _cancel: CancellationToken,
    ) -> Result<(), ScanError> {
        for w in &self.workloads {
            if tx.send(w.clone()).await.is_err() {
                return Err(ScanError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Simulates a kube list rejected with 403.
struct DeniedSource;

#[async_trait]
impl WorkloadSource for DeniedSource {
    async fn discover(
        &self,
        _tx: mpsc::Sender<Workload>,
        _cancel: CancellationToken,
    ) -> Result<(), ScanError> {
        Err(ScanError::Auth {
            cluster: "denied".to_string(),
            message: "deployments.apps is forbidden".to_string(),
        })
    }
}

/// Answers every instant query with a scalar picked by query shape. The
/// first `fail_429` calls return HTTP 429.
struct StubBackend {
    percentile_cpu: f64,
    cpu_points: f64,
    max_memory: f64,
    memory_points: f64,
    oom: f64,
    fail_429: AtomicUsize,
    instant_calls: AtomicUsize,
}

impl StubBackend {
    fn healthy() -> Self {
        Self {
            percentile_cpu: 0.185,
            cpu_points: 250.0,
            max_memory: 700.0 * MIB,
            memory_points: 250.0,
            oom: 0.0,
            fail_429: AtomicUsize::new(0),
            instant_calls: AtomicUsize::new(0),
        }
    }

    fn series(&self, value: f64) -> Vec<LabeledSeries> {
        let mut labels = HashMap::new();
        labels.insert("pod".to_string(), "web-1".to_string());
        labels.insert("container".to_string(), "app".to_string());
        vec![LabeledSeries {
            labels,
            samples: vec![Sample { timestamp: 0.0, value }],
        }]
    }
}

#[async_trait]
impl QueryExecutor for StubBackend {
    async fn range_query(
        &self,
        _query: &str,
        _start: f64,
        _end: f64,
        _step: f64,
    ) -> Result<Vec<LabeledSeries>, PromError> {
        Ok(Vec::new())
    }

    async fn instant_query(
        &self,
        query: &str,
        _at: f64,
    ) -> Result<Vec<LabeledSeries>, PromError> {
        self.instant_calls.fetch_add(1, Ordering::SeqCst);
        loop {
            let remaining = self.fail_429.load(Ordering::SeqCst);
            if remaining == 0 {
                break;
            }
            if self
                .fail_429
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(PromError::Status {
                    status: 429,
                    body: "rate limited".to_string(),
                });
            }
        }
        let value = if query.contains("last_terminated_reason") {
            self.oom
        } else if query.contains("quantile_over_time") {
            self.percentile_cpu
        } else if query.contains("count_over_time")
            && query.contains("container_cpu_usage_seconds_total")
        {
            self.cpu_points
        } else if query.contains("count_over_time") {
            self.memory_points
        } else {
            self.max_memory
        };
        Ok(self.series(value))
    }
}

fn test_config() -> ScanConfig {
    let mut cfg = ScanConfig::default();
    cfg.retry.base_delay = Duration::from_millis(1);
    cfg
}

fn target(name: &str, source: Arc<dyn WorkloadSource>, backend: Arc<StubBackend>) -> ClusterTarget {
    ClusterTarget {
        name: name.to_string(),
        source,
        metrics: Arc::new(MetricService::new(
            backend,
            PromDialect::Standard,
            &test_config(),
        )),
    }
}

fn runner(clusters: Vec<ClusterTarget>) -> ScanRunner {
    ScanRunner::new(
        clusters,
        Arc::new(SimpleStrategy::new(Default::default())),
        test_config(),
    )
}

#[tokio::test]
async fn every_container_slot_appears_exactly_once() {
    let source = Arc::new(StaticSource {
        workloads: vec![
            workload("prod", "web", &["app", "sidecar"], &["web-1"]),
            workload("prod", "api", &["app"], &["api-1"]),
        ],
    });
    let backend = Arc::new(StubBackend::healthy());
    let report = runner(vec![target("prod", source, backend)])
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.results.len(), 3);
    let keys: HashSet<String> = report
        .results
        .iter()
        .map(|r| format!("{}/{}", r.workload, r.container))
        .collect();
    assert_eq!(keys.len(), 3, "duplicate slot emitted");
    assert!(report.results.iter().all(|r| r.state == RowState::Ok));
    assert!(!report.failed());
}

#[tokio::test]
async fn workload_without_pods_is_reported_undefined() {
    let source = Arc::new(StaticSource {
        workloads: vec![workload("prod", "orphan", &["app"], &[])],
    });
    let backend = Arc::new(StubBackend::healthy());
    let report = runner(vec![target("prod", source, Arc::clone(&backend))])
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.results.len(), 1);
    let row = &report.results[0];
    assert_eq!(row.state, RowState::Undefined);
    assert!(row.recommendation.is_undefined());
    // No pods means no metric traffic for the slot.
    assert_eq!(backend.instant_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_429s_are_retried_within_bounds() {
    let source = Arc::new(StaticSource {
        workloads: vec![workload("prod", "web", &["app"], &["web-1"])],
    });
    let backend = Arc::new(StubBackend {
        fail_429: AtomicUsize::new(2),
        ..StubBackend::healthy()
    });
    let report = runner(vec![target("prod", source, Arc::clone(&backend))])
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].state, RowState::Ok);
    // Five metric kinds for the simple strategy plus exactly two retries.
    assert_eq!(backend.instant_calls.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn one_denied_cluster_does_not_fail_the_run() {
    let good = Arc::new(StaticSource {
        workloads: vec![workload("prod", "web", &["app"], &["web-1"])],
    });
    let report = runner(vec![
        target("denied", Arc::new(DeniedSource), Arc::new(StubBackend::healthy())),
        target("prod", good, Arc::new(StubBackend::healthy())),
    ])
    .run(CancellationToken::new())
    .await;

    assert_eq!(report.clusters_scanned, 1);
    assert_eq!(report.cluster_failures.len(), 1);
    assert_eq!(report.cluster_failures[0].cluster, "denied");
    assert!(report
        .cluster_failures[0]
        .error
        .contains("forbidden"));
    assert_eq!(report.results.len(), 1);
    assert!(!report.failed(), "a partial run exits zero");
}

#[tokio::test]
async fn run_fails_when_every_cluster_fails() {
    let report = runner(vec![
        target("a", Arc::new(DeniedSource), Arc::new(StubBackend::healthy())),
        target("b", Arc::new(DeniedSource), Arc::new(StubBackend::healthy())),
    ])
    .run(CancellationToken::new())
    .await;

    assert_eq!(report.clusters_scanned, 0);
    assert_eq!(report.cluster_failures.len(), 2);
    assert!(report.failed());
}

#[tokio::test]
async fn cancelled_run_is_marked_failed() {
    let source = Arc::new(StaticSource {
        workloads: vec![workload("prod", "web", &["app"], &["web-1"])],
    });
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = runner(vec![target("prod", source, Arc::new(StubBackend::healthy()))])
        .run(cancel)
        .await;

    assert!(report.cancelled);
    assert!(report.failed());
}

#[tokio::test]
async fn scan_is_idempotent_against_a_frozen_backend() {
    let mk_report = || async {
        let source = Arc::new(StaticSource {
            workloads: vec![
                workload("prod", "web", &["app"], &["web-1"]),
                workload("prod", "api", &["app"], &["api-1"]),
            ],
        });
        runner(vec![target("prod", source, Arc::new(StubBackend::healthy()))])
            .run(CancellationToken::new())
            .await
    };
    let first = mk_report().await;
    let second = mk_report().await;

    let flatten = |r: &kuberight::model::ScanReport| {
        r.sorted_results()
            .iter()
            .map(|row| {
                (
                    row.workload.clone(),
                    row.container.clone(),
                    row.recommendation,
                    row.state,
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(flatten(&first), flatten(&second));
}
