//! Workload discovery: enumerates eligible workloads and their pods from
//! the Kubernetes API and, when the backend dialect allows, from
//! kube-state-metrics history. Emits a finite, non-restartable stream of
//! read-only workloads into the runner's channel.

pub mod owners;

use crate::config::ScanConfig;
use crate::errors::{PromError, ScanError};
use crate::k8s::K8sClient;
use crate::model::{
    ContainerSpec, HpaDescriptor, PodRef, ResourceAllocations, Workload, WorkloadId, WorkloadKind,
};
use crate::prom::service::MetricService;
use crate::utils::resource_quantity::{parse_cpu_str, parse_memory_str};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PodSpec;
use kube::api::{DynamicObject, ListParams};
use log::{debug, info, warn};
use owners::{list_paged, OwnerResolver, PodIndex};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Filter predicate handed to the discoverer.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    /// Namespace globs or regexes; empty selects all namespaces.
    pub namespaces: Vec<String>,
    /// Workload kinds to include; empty selects all kinds.
    pub kinds: Vec<WorkloadKind>,
    /// Label selector passed through to workload listing.
    pub selector: Option<String>,
    pub allow_hpa: bool,
}

impl DiscoveryFilter {
    pub fn wants(&self, kind: WorkloadKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    fn list_params(&self) -> ListParams {
        match &self.selector {
            Some(sel) => ListParams::default().labels(sel),
            None => ListParams::default(),
        }
    }
}

/// Translate a namespace pattern to an anchored regex. Namespace names are
/// DNS-1123 labels, so anything outside [a-z0-9-*?] marks the pattern as a
/// raw regex; otherwise glob wildcards are translated.
fn namespace_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let is_glob = pattern
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '*' | '?'));
    let body = if is_glob {
        regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".")
    } else {
        pattern.to_string()
    };
    Regex::new(&format!("^(?:{})$", body))
}

/// Produces the workload stream. The runner depends on this seam so tests
/// can feed synthetic workloads without a cluster.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn discover(
        &self,
        tx: mpsc::Sender<Workload>,
        cancel: CancellationToken,
    ) -> Result<(), ScanError>;
}

pub struct Discoverer {
    cluster: String,
    kube: K8sClient,
    metrics: Arc<MetricService>,
    config: ScanConfig,
    filter: DiscoveryFilter,
}

impl Discoverer {
    pub fn new(
        cluster: String,
        kube: K8sClient,
        metrics: Arc<MetricService>,
        config: ScanConfig,
        filter: DiscoveryFilter,
    ) -> Self {
        Self {
            cluster,
            kube,
            metrics,
            config,
            filter,
        }
    }

    fn map_kube_err(&self, e: kube::Error) -> ScanError {
        if let kube::Error::Api(resp) = &e {
            if resp.code == 401 || resp.code == 403 {
                return ScanError::Auth {
                    cluster: self.cluster.clone(),
                    message: resp.message.clone(),
                };
            }
        }
        ScanError::Kube(e)
    }

    fn map_prom_err(&self, e: PromError) -> ScanError {
        ScanError::from_prom(&self.cluster, e)
    }

    async fn resolve_namespaces(&self) -> Result<Vec<String>, ScanError> {
        if self.filter.namespaces.is_empty() {
            let list = self
                .kube
                .namespaces()
                .list(&ListParams::default())
                .await
                .map_err(|e| self.map_kube_err(e))?;
            return Ok(list
                .items
                .into_iter()
                .filter_map(|ns| ns.metadata.name)
                .collect());
        }

        // All-literal patterns need no cluster-scope namespace listing.
        let literal = self
            .filter
            .namespaces
            .iter()
            .all(|p| p.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
        if literal {
            return Ok(self.filter.namespaces.clone());
        }

        let patterns: Vec<Regex> = self
            .filter
            .namespaces
            .iter()
            .filter_map(|p| match namespace_pattern(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("ignoring invalid namespace pattern {p:?}: {e}");
                    None
                }
            })
            .collect();
        let list = self
            .kube
            .namespaces()
            .list(&ListParams::default())
            .await
            .map_err(|e| self.map_kube_err(e))?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .filter(|name| patterns.iter().any(|re| re.is_match(name)))
            .collect())
    }

    async fn hpa_index(
        &self,
        namespace: &str,
    ) -> Result<HashMap<(String, String), HpaDescriptor>, ScanError> {
        let hpas = list_paged(
            &self.kube.horizontal_pod_autoscalers(Some(namespace)),
            &ListParams::default(),
            self.config.list_batch_size,
            self.config.max_list_batches,
        )
        .await
        .map_err(|e| self.map_kube_err(e))?;

        let mut index = HashMap::new();
        for hpa in hpas {
            if let Some(desc) = hpa_descriptor(&hpa) {
                index.insert((desc.target_kind.clone(), desc.target_name.clone()), desc);
            }
        }
        Ok(index)
    }

    fn assemble(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: String,
        containers: Vec<ContainerSpec>,
        pods: Vec<PodRef>,
        hpa: Option<HpaDescriptor>,
        mut warnings: Vec<String>,
    ) -> Workload {
        if pods.is_empty() {
            warnings.push("no pods found within the history window".to_string());
        }
        if hpa.is_some() && !self.filter.allow_hpa {
            warnings.push("HPA targets this workload; recommendations suppressed for the targeted resources".to_string());
        }
        Workload {
            id: WorkloadId {
                cluster: self.cluster.clone(),
                namespace: namespace.to_string(),
                kind,
                name,
            },
            pods,
            containers,
            hpa,
            warnings,
        }
    }

    /// Resolve pods for owners, degrading to live pods with a warning when
    /// the backend misbehaves short of an auth failure.
    async fn pods_or_warn(
        &self,
        resolver: &OwnerResolver<'_>,
        owner_kind: &str,
        owners: &[String],
        index: &PodIndex,
        warnings: &mut Vec<String>,
    ) -> Result<HashMap<String, Vec<PodRef>>, ScanError> {
        match resolver.pods_of(owner_kind, owners, index).await {
            Ok(map) => Ok(map),
            Err(e) if e.is_auth() => Err(self.map_prom_err(e)),
            Err(e) => {
                warn!("pod lookup failed for {owner_kind} owners: {e}");
                warnings.push(format!("pod lookup degraded to live API: {e}"));
                let mut out = HashMap::new();
                for owner in owners {
                    let one: HashSet<String> = [owner.clone()].into_iter().collect();
                    out.insert(owner.clone(), index.owned_by(owner_kind, &one));
                }
                Ok(out)
            }
        }
    }

    async fn emit(
        &self,
        tx: &mpsc::Sender<Workload>,
        seen: &mut HashSet<WorkloadId>,
        workload: Workload,
    ) -> Result<(), ScanError> {
        if !seen.insert(workload.id.clone()) {
            debug!("skipping duplicate workload {}", workload.id);
            return Ok(());
        }
        tx.send(workload).await.map_err(|_| ScanError::Cancelled)
    }
}

#[async_trait]
impl WorkloadSource for Discoverer {
    async fn discover(
        &self,
        tx: mpsc::Sender<Workload>,
        cancel: CancellationToken,
    ) -> Result<(), ScanError> {
        let now = Utc::now().timestamp() as f64;
        let namespaces = self.resolve_namespaces().await?;
        info!(
            "discovering workloads in {} namespace(s) on cluster {}",
            namespaces.len(),
            self.cluster
        );
        let mut seen: HashSet<WorkloadId> = HashSet::new();

        for namespace in &namespaces {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let pods = list_paged(
                &self.kube.pods(Some(namespace)),
                &ListParams::default(),
                self.config.list_batch_size,
                self.config.max_list_batches,
            )
            .await
            .map_err(|e| self.map_kube_err(e))?;
            let index = PodIndex::from_pods(&pods);
            let hpas = self.hpa_index(namespace).await?;
            let resolver = OwnerResolver {
                kube: &self.kube,
                metrics: &self.metrics,
                namespace,
                owner_batch_size: self.config.owner_batch_size,
                now,
            };

            self.discover_replica_set_kinds(&tx, &mut seen, namespace, &resolver, &index, &hpas)
                .await?;
            self.discover_direct_kinds(&tx, &mut seen, namespace, &resolver, &index, &hpas)
                .await?;
            self.discover_jobs(&tx, &mut seen, namespace, &resolver, &index)
                .await?;
            self.discover_cron_jobs(&tx, &mut seen, namespace, &resolver, &index, &hpas)
                .await?;
        }
        Ok(())
    }
}

type HpaIndex = HashMap<(String, String), HpaDescriptor>;

impl Discoverer {
    /// Deployment / Rollout / DeploymentConfig: controller -> intermediate
    /// ReplicaSets or ReplicationControllers -> pods.
    async fn discover_replica_set_kinds(
        &self,
        tx: &mpsc::Sender<Workload>,
        seen: &mut HashSet<WorkloadId>,
        namespace: &str,
        resolver: &OwnerResolver<'_>,
        index: &PodIndex,
        hpas: &HpaIndex,
    ) -> Result<(), ScanError> {
        let lp = self.filter.list_params();

        if self.filter.wants(WorkloadKind::Deployment) {
            let deps = list_paged(
                &self.kube.deployments(Some(namespace)),
                &lp,
                self.config.list_batch_size,
                self.config.max_list_batches,
            )
            .await
            .map_err(|e| self.map_kube_err(e))?;
            let mut items: Vec<(String, Vec<ContainerSpec>)> = Vec::new();
            for d in &deps {
                let Some(name) = d.metadata.name.clone() else { continue };
                let containers = d
                    .spec
                    .as_ref()
                    .and_then(|s| s.template.spec.as_ref())
                    .map(containers_from_pod_spec)
                    .unwrap_or_default();
                items.push((name, containers));
            }
            self.emit_via_intermediate(
                tx, seen, namespace, resolver, index, hpas,
                WorkloadKind::Deployment, "Deployment", "ReplicaSet", items,
            )
            .await?;
        }

        if self.filter.wants(WorkloadKind::Rollout) {
            if let Some(rollouts) = self
                .list_dynamic(self.kube.rollouts(Some(namespace)), namespace, "Rollout")
                .await?
            {
                let items = dynamic_items(&rollouts, &["spec", "template", "spec", "containers"]);
                self.emit_via_intermediate(
                    tx, seen, namespace, resolver, index, hpas,
                    WorkloadKind::Rollout, "Rollout", "ReplicaSet", items,
                )
                .await?;
            }
        }

        if self.filter.wants(WorkloadKind::DeploymentConfig) {
            if let Some(dcs) = self
                .list_dynamic(
                    self.kube.deployment_configs(Some(namespace)),
                    namespace,
                    "DeploymentConfig",
                )
                .await?
            {
                let items = dynamic_items(&dcs, &["spec", "template", "spec", "containers"]);
                self.emit_via_intermediate(
                    tx, seen, namespace, resolver, index, hpas,
                    WorkloadKind::DeploymentConfig, "DeploymentConfig", "ReplicationController",
                    items,
                )
                .await?;
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit_via_intermediate(
        &self,
        tx: &mpsc::Sender<Workload>,
        seen: &mut HashSet<WorkloadId>,
        namespace: &str,
        resolver: &OwnerResolver<'_>,
        index: &PodIndex,
        hpas: &HpaIndex,
        kind: WorkloadKind,
        owner_kind: &str,
        intermediate_kind: &str,
        items: Vec<(String, Vec<ContainerSpec>)>,
    ) -> Result<(), ScanError> {
        if items.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = items.iter().map(|(n, _)| n.clone()).collect();
        let mut shared_warnings: Vec<String> = Vec::new();

        let owned = match intermediate_kind {
            "ReplicationController" => resolver.replication_controllers_of(&names).await,
            _ => resolver.replica_sets_of(owner_kind, &names).await,
        };
        let owned = match owned {
            Ok(map) => map,
            Err(e) if e.is_auth() => return Err(self.map_prom_err(e)),
            Err(e) => {
                warn!("{intermediate_kind} lookup failed: {e}");
                shared_warnings.push(format!("{intermediate_kind} lookup degraded: {e}"));
                HashMap::new()
            }
        };

        let mut intermediates: Vec<String> = owned.values().flatten().cloned().collect();
        intermediates.sort();
        intermediates.dedup();
        let pods_map = self
            .pods_or_warn(resolver, intermediate_kind, &intermediates, index, &mut shared_warnings)
            .await?;

        for (name, containers) in items {
            let pods: Vec<PodRef> = owned
                .get(&name)
                .into_iter()
                .flatten()
                .filter_map(|im| pods_map.get(im))
                .flatten()
                .cloned()
                .collect();
            let hpa = hpas.get(&(owner_kind.to_string(), name.clone())).cloned();
            let workload = self.assemble(
                namespace,
                kind,
                name,
                containers,
                pods,
                hpa,
                shared_warnings.clone(),
            );
            self.emit(tx, seen, workload).await?;
        }
        Ok(())
    }

    /// StatefulSet / DaemonSet / StrimziPodSet own their pods directly.
    async fn discover_direct_kinds(
        &self,
        tx: &mpsc::Sender<Workload>,
        seen: &mut HashSet<WorkloadId>,
        namespace: &str,
        resolver: &OwnerResolver<'_>,
        index: &PodIndex,
        hpas: &HpaIndex,
    ) -> Result<(), ScanError> {
        let lp = self.filter.list_params();
        let mut groups: Vec<(WorkloadKind, &str, Vec<(String, Vec<ContainerSpec>)>)> = Vec::new();

        if self.filter.wants(WorkloadKind::StatefulSet) {
            let sts = list_paged(
                &self.kube.stateful_sets(Some(namespace)),
                &lp,
                self.config.list_batch_size,
                self.config.max_list_batches,
            )
            .await
            .map_err(|e| self.map_kube_err(e))?;
            let items = sts
                .iter()
                .filter_map(|s| {
                    let name = s.metadata.name.clone()?;
                    let containers = s
                        .spec
                        .as_ref()
                        .and_then(|sp| sp.template.spec.as_ref())
                        .map(containers_from_pod_spec)
                        .unwrap_or_default();
                    Some((name, containers))
                })
                .collect();
            groups.push((WorkloadKind::StatefulSet, "StatefulSet", items));
        }

        if self.filter.wants(WorkloadKind::DaemonSet) {
            let ds = list_paged(
                &self.kube.daemon_sets(Some(namespace)),
                &lp,
                self.config.list_batch_size,
                self.config.max_list_batches,
            )
            .await
            .map_err(|e| self.map_kube_err(e))?;
            let items = ds
                .iter()
                .filter_map(|d| {
                    let name = d.metadata.name.clone()?;
                    let containers = d
                        .spec
                        .as_ref()
                        .and_then(|sp| sp.template.spec.as_ref())
                        .map(containers_from_pod_spec)
                        .unwrap_or_default();
                    Some((name, containers))
                })
                .collect();
            groups.push((WorkloadKind::DaemonSet, "DaemonSet", items));
        }

        if self.filter.wants(WorkloadKind::StrimziPodSet) {
            if let Some(sps) = self
                .list_dynamic(
                    self.kube.strimzi_pod_sets(Some(namespace)),
                    namespace,
                    "StrimziPodSet",
                )
                .await?
            {
                // StrimziPodSet inlines full pod definitions under spec.pods.
                let items = dynamic_items(&sps, &["spec", "pods", "0", "spec", "containers"]);
                groups.push((WorkloadKind::StrimziPodSet, "StrimziPodSet", items));
            }
        }

        for (kind, owner_kind, items) in groups {
            if items.is_empty() {
                continue;
            }
            let names: Vec<String> = items.iter().map(|(n, _)| n.clone()).collect();
            let mut shared_warnings = Vec::new();
            let pods_map = self
                .pods_or_warn(resolver, owner_kind, &names, index, &mut shared_warnings)
                .await?;
            for (name, containers) in items {
                let pods = pods_map.get(&name).cloned().unwrap_or_default();
                let hpa = hpas.get(&(owner_kind.to_string(), name.clone())).cloned();
                let workload = self.assemble(
                    namespace,
                    kind,
                    name,
                    containers,
                    pods,
                    hpa,
                    shared_warnings.clone(),
                );
                self.emit(tx, seen, workload).await?;
            }
        }
        Ok(())
    }

    /// Jobs, standalone or grouped by the configured label key set. Jobs
    /// spawned by CronJobs belong to the CronJob workload instead.
    async fn discover_jobs(
        &self,
        tx: &mpsc::Sender<Workload>,
        seen: &mut HashSet<WorkloadId>,
        namespace: &str,
        resolver: &OwnerResolver<'_>,
        index: &PodIndex,
    ) -> Result<(), ScanError> {
        let grouping =
            !self.config.job_grouping_labels.is_empty() && self.filter.wants(WorkloadKind::GroupedJob);
        if !self.filter.wants(WorkloadKind::Job) && !grouping {
            return Ok(());
        }

        let jobs = list_paged(
            &self.kube.jobs(Some(namespace)),
            &self.filter.list_params(),
            self.config.list_batch_size,
            self.config.max_list_batches,
        )
        .await
        .map_err(|e| self.map_kube_err(e))?;

        let standalone: Vec<&Job> = jobs
            .iter()
            .filter(|j| {
                !j.metadata
                    .owner_references
                    .as_ref()
                    .map(|refs| refs.iter().any(|r| r.kind == "CronJob"))
                    .unwrap_or(false)
            })
            .collect();

        let mut grouped: BTreeMap<String, Vec<&Job>> = BTreeMap::new();
        let mut singles: Vec<&Job> = Vec::new();
        for job in standalone {
            match group_key(job, &self.config.job_grouping_labels) {
                Some(key) if grouping => grouped.entry(key).or_default().push(job),
                _ => singles.push(job),
            }
        }

        if self.filter.wants(WorkloadKind::Job) {
            let items: Vec<(String, Vec<ContainerSpec>)> = singles
                .iter()
                .filter_map(|j| {
                    let name = j.metadata.name.clone()?;
                    Some((name, job_containers(j)))
                })
                .collect();
            if !items.is_empty() {
                let names: Vec<String> = items.iter().map(|(n, _)| n.clone()).collect();
                let mut shared_warnings = Vec::new();
                let pods_map = self
                    .pods_or_warn(resolver, "Job", &names, index, &mut shared_warnings)
                    .await?;
                for (name, containers) in items {
                    let pods = pods_map.get(&name).cloned().unwrap_or_default();
                    let workload = self.assemble(
                        namespace,
                        WorkloadKind::Job,
                        name,
                        containers,
                        pods,
                        None,
                        shared_warnings.clone(),
                    );
                    self.emit(tx, seen, workload).await?;
                }
            }
        }

        if grouping {
            for (group_name, members) in grouped {
                let member_names: Vec<String> = members
                    .iter()
                    .filter_map(|j| j.metadata.name.clone())
                    .collect();
                let containers = members.first().map(|j| job_containers(j)).unwrap_or_default();
                let mut shared_warnings = Vec::new();
                if members
                    .iter()
                    .any(|j| job_containers(j).len() != containers.len())
                {
                    shared_warnings
                        .push("grouped jobs declare differing container sets".to_string());
                }
                let pods_map = self
                    .pods_or_warn(resolver, "Job", &member_names, index, &mut shared_warnings)
                    .await?;
                let pods: Vec<PodRef> = member_names
                    .iter()
                    .filter_map(|n| pods_map.get(n))
                    .flatten()
                    .cloned()
                    .collect();
                let workload = self.assemble(
                    namespace,
                    WorkloadKind::GroupedJob,
                    group_name,
                    containers,
                    pods,
                    None,
                    shared_warnings,
                );
                self.emit(tx, seen, workload).await?;
            }
        }

        Ok(())
    }

    /// CronJob -> Jobs -> pods.
    async fn discover_cron_jobs(
        &self,
        tx: &mpsc::Sender<Workload>,
        seen: &mut HashSet<WorkloadId>,
        namespace: &str,
        resolver: &OwnerResolver<'_>,
        index: &PodIndex,
        hpas: &HpaIndex,
    ) -> Result<(), ScanError> {
        if !self.filter.wants(WorkloadKind::CronJob) {
            return Ok(());
        }
        let cron_jobs = list_paged(
            &self.kube.cron_jobs(Some(namespace)),
            &self.filter.list_params(),
            self.config.list_batch_size,
            self.config.max_list_batches,
        )
        .await
        .map_err(|e| self.map_kube_err(e))?;
        if cron_jobs.is_empty() {
            return Ok(());
        }

        let mut items: Vec<(String, Vec<ContainerSpec>)> = Vec::new();
        for cj in &cron_jobs {
            let Some(name) = cj.metadata.name.clone() else { continue };
            let containers = cj
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref())
                .and_then(|js| js.template.spec.as_ref())
                .map(containers_from_pod_spec)
                .unwrap_or_default();
            items.push((name, containers));
        }

        let names: Vec<String> = items.iter().map(|(n, _)| n.clone()).collect();
        let mut shared_warnings = Vec::new();
        let jobs_map = match resolver.jobs_of(&names).await {
            Ok(map) => map,
            Err(e) if e.is_auth() => return Err(self.map_prom_err(e)),
            Err(e) => {
                warn!("job lookup for CronJobs failed: {e}");
                shared_warnings.push(format!("job lookup degraded: {e}"));
                HashMap::new()
            }
        };
        let mut all_jobs: Vec<String> = jobs_map.values().flatten().cloned().collect();
        all_jobs.sort();
        all_jobs.dedup();
        let pods_map = self
            .pods_or_warn(resolver, "Job", &all_jobs, index, &mut shared_warnings)
            .await?;

        for (name, containers) in items {
            let pods: Vec<PodRef> = jobs_map
                .get(&name)
                .into_iter()
                .flatten()
                .filter_map(|j| pods_map.get(j))
                .flatten()
                .cloned()
                .collect();
            let hpa = hpas.get(&("CronJob".to_string(), name.clone())).cloned();
            let workload = self.assemble(
                namespace,
                WorkloadKind::CronJob,
                name,
                containers,
                pods,
                hpa,
                shared_warnings.clone(),
            );
            self.emit(tx, seen, workload).await?;
        }
        Ok(())
    }

    /// List a CRD-backed kind; absent CRDs are skipped, not errors.
    async fn list_dynamic(
        &self,
        api: kube::Api<DynamicObject>,
        namespace: &str,
        kind: &str,
    ) -> Result<Option<Vec<DynamicObject>>, ScanError> {
        match list_paged(
            &api,
            &self.filter.list_params(),
            self.config.list_batch_size,
            self.config.max_list_batches,
        )
        .await
        {
            Ok(items) => Ok(Some(items)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!("{kind} API not served in {namespace}; skipping");
                Ok(None)
            }
            Err(e) => Err(self.map_kube_err(e)),
        }
    }
}

/// Declared container specs out of a typed pod template.
fn containers_from_pod_spec(spec: &PodSpec) -> Vec<ContainerSpec> {
    spec.containers
        .iter()
        .map(|c| {
            let requests = c.resources.as_ref().and_then(|r| r.requests.as_ref());
            let limits = c.resources.as_ref().and_then(|r| r.limits.as_ref());
            ContainerSpec {
                name: c.name.clone(),
                current: ResourceAllocations {
                    cpu_request_millis: requests
                        .and_then(|r| r.get("cpu"))
                        .and_then(|q| parse_cpu_str(&q.0)),
                    cpu_limit_millis: limits
                        .and_then(|l| l.get("cpu"))
                        .and_then(|q| parse_cpu_str(&q.0)),
                    memory_request_bytes: requests
                        .and_then(|r| r.get("memory"))
                        .and_then(|q| parse_memory_str(&q.0)),
                    memory_limit_bytes: limits
                        .and_then(|l| l.get("memory"))
                        .and_then(|q| parse_memory_str(&q.0)),
                },
            }
        })
        .collect()
}

fn job_containers(job: &Job) -> Vec<ContainerSpec> {
    job.spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(containers_from_pod_spec)
        .unwrap_or_default()
}

/// Group identity for a Job: the ordered (key, value) pairs of the
/// configured grouping labels. Jobs missing any configured key stay
/// individual workloads.
fn group_key(job: &Job, grouping_labels: &[String]) -> Option<String> {
    if grouping_labels.is_empty() {
        return None;
    }
    let labels = job.metadata.labels.as_ref()?;
    let mut parts = Vec::with_capacity(grouping_labels.len());
    for key in grouping_labels {
        let value = labels.get(key)?;
        parts.push(format!("{}={}", key, value));
    }
    Some(parts.join(","))
}

/// (name, containers) pairs out of dynamic objects, walking the given JSON
/// path to the container array.
fn dynamic_items(
    objects: &[DynamicObject],
    container_path: &[&str],
) -> Vec<(String, Vec<ContainerSpec>)> {
    objects
        .iter()
        .filter_map(|obj| {
            let name = obj.metadata.name.clone()?;
            let mut node = &obj.data;
            for seg in container_path {
                node = match seg.parse::<usize>() {
                    Ok(i) => node.get(i)?,
                    Err(_) => node.get(seg)?,
                };
            }
            Some((name, containers_from_json(node)))
        })
        .collect()
}

fn containers_from_json(containers: &serde_json::Value) -> Vec<ContainerSpec> {
    let Some(list) = containers.as_array() else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|c| {
            let name = c.get("name")?.as_str()?.to_string();
            let get = |section: &str, resource: &str| -> Option<String> {
                c.get("resources")?
                    .get(section)?
                    .get(resource)?
                    .as_str()
                    .map(str::to_string)
            };
            Some(ContainerSpec {
                name,
                current: ResourceAllocations {
                    cpu_request_millis: get("requests", "cpu")
                        .as_deref()
                        .and_then(parse_cpu_str),
                    cpu_limit_millis: get("limits", "cpu").as_deref().and_then(parse_cpu_str),
                    memory_request_bytes: get("requests", "memory")
                        .as_deref()
                        .and_then(parse_memory_str),
                    memory_limit_bytes: get("limits", "memory")
                        .as_deref()
                        .and_then(parse_memory_str),
                },
            })
        })
        .collect()
}

fn hpa_descriptor(hpa: &HorizontalPodAutoscaler) -> Option<HpaDescriptor> {
    let name = hpa.metadata.name.clone()?;
    let spec = hpa.spec.as_ref()?;
    let (mut targets_cpu, mut targets_memory) = (false, false);
    match &spec.metrics {
        Some(metrics) => {
            for m in metrics {
                let resource_name = m
                    .resource
                    .as_ref()
                    .map(|r| r.name.as_str())
                    .or_else(|| m.container_resource.as_ref().map(|r| r.name.as_str()));
                match resource_name {
                    Some("cpu") => targets_cpu = true,
                    Some("memory") => targets_memory = true,
                    _ => {}
                }
            }
        }
        // No metrics configured means the default CPU utilization target.
        None => targets_cpu = true,
    }
    Some(HpaDescriptor {
        name,
        target_kind: spec.scale_target_ref.kind.clone(),
        target_name: spec.scale_target_ref.name.clone(),
        min_replicas: spec.min_replicas,
        max_replicas: spec.max_replicas,
        targets_cpu,
        targets_memory,
    })
}
