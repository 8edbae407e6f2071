//! The scan pipeline: workload discovery feeds a bounded channel, a worker
//! pool of `max_workers` processes container slots, each worker fetches its
//! metric kinds concurrently and hands the completed bundle to the
//! strategy. Results land in one append-only sink. A failed slot never
//! stops the pipeline; a failed cluster never stops the other clusters.

use crate::config::ScanConfig;
use crate::discovery::WorkloadSource;
use crate::errors::ScanError;
use crate::model::{
    ClusterFailure, ContainerSpec, ScanReport, ScanResult, Workload,
};
use crate::prom::dialect::Selector;
use crate::prom::service::MetricService;
use crate::strategy::{Strategy, StrategyContext};
use chrono::Utc;
use futures::StreamExt;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One cluster to scan: its workload source and its metric backend.
pub struct ClusterTarget {
    pub name: String,
    pub source: Arc<dyn WorkloadSource>,
    pub metrics: Arc<MetricService>,
}

pub struct ScanRunner {
    clusters: Vec<ClusterTarget>,
    strategy: Arc<dyn Strategy>,
    config: ScanConfig,
}

impl ScanRunner {
    pub fn new(
        clusters: Vec<ClusterTarget>,
        strategy: Arc<dyn Strategy>,
        config: ScanConfig,
    ) -> Self {
        Self {
            clusters,
            strategy,
            config,
        }
    }

    /// Run the full scan. Always returns a report; the caller maps
    /// `report.failed()` to the process exit code.
    pub async fn run(&self, cancel: CancellationToken) -> ScanReport {
        let sink: Arc<Mutex<Vec<ScanResult>>> = Arc::new(Mutex::new(Vec::new()));
        let mut failures: Vec<ClusterFailure> = Vec::new();
        let mut scanned = 0usize;
        let mut cancelled = false;

        for cluster in &self.clusters {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            info!("scanning cluster {} with strategy {}", cluster.name, self.strategy.name());
            match self.scan_cluster(cluster, &sink, &cancel).await {
                Ok(()) => scanned += 1,
                Err(ScanError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    error!("cluster {} failed: {e}", cluster.name);
                    failures.push(ClusterFailure {
                        cluster: cluster.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let results = match Arc::try_unwrap(sink) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().await.drain(..).collect(),
        };
        ScanReport {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            results,
            cluster_failures: failures,
            clusters_scanned: scanned,
            cancelled,
        }
    }

    async fn scan_cluster(
        &self,
        cluster: &ClusterTarget,
        sink: &Arc<Mutex<Vec<ScanResult>>>,
        cancel: &CancellationToken,
    ) -> Result<(), ScanError> {
        // A cluster-fatal error cancels this child token so the cluster's
        // pipeline drains without touching the other clusters.
        let cluster_cancel = cancel.child_token();
        let fatal: Arc<Mutex<Option<ScanError>>> = Arc::new(Mutex::new(None));

        let (tx, rx) = mpsc::channel::<Workload>(self.config.max_workers.max(1) * 2);
        let source = Arc::clone(&cluster.source);
        let discovery_cancel = cluster_cancel.clone();
        let discovery =
            tokio::spawn(async move { source.discover(tx, discovery_cancel).await });

        let workloads =
            futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|w| (w, rx)) });
        let slots = workloads.flat_map(|workload| {
            let shared = Arc::new(workload);
            futures::stream::iter(
                shared
                    .containers
                    .clone()
                    .into_iter()
                    .map(move |container| (Arc::clone(&shared), container))
                    .collect::<Vec<_>>(),
            )
        });

        slots
            .for_each_concurrent(self.config.max_workers.max(1), |(workload, container)| {
                let fatal = Arc::clone(&fatal);
                let sink = Arc::clone(sink);
                let cluster_cancel = cluster_cancel.clone();
                async move {
                    if cluster_cancel.is_cancelled() {
                        return;
                    }
                    match self.process_slot(cluster, &workload, &container).await {
                        Ok(result) => sink.lock().await.push(result),
                        Err(e) => {
                            // Auth and cancellation doom the cluster; the
                            // remaining slots drain without work.
                            let mut slot = fatal.lock().await;
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            cluster_cancel.cancel();
                        }
                    }
                }
            })
            .await;

        let discovery_outcome = discovery
            .await
            .map_err(|e| ScanError::Strategy(format!("discovery task panicked: {e}")))?;

        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        if let Some(e) = fatal.lock().await.take() {
            return Err(e);
        }
        match discovery_outcome {
            Err(ScanError::Cancelled) if !cancel.is_cancelled() => {
                // The channel closed early because the worker side stopped;
                // the fatal slot above carries the real cause when present.
                Ok(())
            }
            other => other,
        }
    }

    async fn process_slot(
        &self,
        cluster: &ClusterTarget,
        workload: &Workload,
        container: &ContainerSpec,
    ) -> Result<ScanResult, ScanError> {
        let id = workload.id.clone();

        // A workload with no known pods is reported but never recommended.
        if workload.pods.is_empty() {
            let mut result = ScanResult::undefined(
                id,
                container.name.clone(),
                "no pods found within the history window",
            );
            result.current = container.current;
            return Ok(result);
        }

        let pod_regex = workload.pod_selector_regex();
        let sel = Selector {
            namespace: &workload.id.namespace,
            pod_regex: &pod_regex,
            container: &container.name,
            cluster_label: cluster.metrics.cluster_label(),
        };
        let kinds = self.strategy.required_metrics();
        let now = Utc::now().timestamp() as f64;

        let bundle = match cluster
            .metrics
            .collect_bundle(&cluster.name, &sel, &kinds, now)
            .await
        {
            Ok(bundle) => bundle,
            Err(e) if e.is_cluster_fatal() => return Err(e),
            Err(e) => {
                warn!("slot {}/{} failed: {e}", id, container.name);
                let mut result =
                    ScanResult::undefined(id, container.name.clone(), &e.to_string());
                result.current = container.current;
                return Ok(result);
            }
        };

        let ctx = StrategyContext {
            current: container.current,
            hpa: workload.hpa.clone(),
            warnings: workload.warnings.clone(),
            cpu_min_millicores: self.config.cpu_min_millicores,
            memory_min_bytes: self.config.memory_min_bytes(),
            points_required: self.config.points_required,
            allow_hpa: self.config.allow_hpa,
            use_oomkill_data: self.config.use_oomkill_data,
            history: self.config.history(),
        };

        let mut result = match self.strategy.recommend(&bundle, &ctx).await {
            Ok(rec) => ScanResult {
                workload: id,
                container: container.name.clone(),
                current: container.current,
                recommendation: rec.allocations,
                state: rec.state,
                info: rec.info,
            },
            Err(e) => {
                warn!("strategy failed on {}/{}: {e}", workload.id, container.name);
                let mut r = ScanResult::undefined(id, container.name.clone(), &e.to_string());
                r.current = container.current;
                r
            }
        };

        let mut notes: Vec<String> = workload.warnings.clone();
        notes.extend(bundle.warnings.iter().cloned());
        if !notes.is_empty() {
            result
                .info
                .entry("warnings".to_string())
                .or_insert_with(|| notes.join("; "));
        }
        Ok(result)
    }
}
