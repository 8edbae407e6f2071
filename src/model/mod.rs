use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Controller kinds eligible for right-sizing. `GroupedJob` is synthesized
/// by the discoverer from Jobs sharing the configured grouping labels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Rollout,
    DeploymentConfig,
    StrimziPodSet,
    GroupedJob,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 9] = [
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::DaemonSet,
        WorkloadKind::Job,
        WorkloadKind::CronJob,
        WorkloadKind::Rollout,
        WorkloadKind::DeploymentConfig,
        WorkloadKind::StrimziPodSet,
        WorkloadKind::GroupedJob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Job => "Job",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::Rollout => "Rollout",
            WorkloadKind::DeploymentConfig => "DeploymentConfig",
            WorkloadKind::StrimziPodSet => "StrimziPodSet",
            WorkloadKind::GroupedJob => "GroupedJob",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deployment" | "deployments" => Ok(WorkloadKind::Deployment),
            "statefulset" | "statefulsets" => Ok(WorkloadKind::StatefulSet),
            "daemonset" | "daemonsets" => Ok(WorkloadKind::DaemonSet),
            "job" | "jobs" => Ok(WorkloadKind::Job),
            "cronjob" | "cronjobs" => Ok(WorkloadKind::CronJob),
            "rollout" | "rollouts" => Ok(WorkloadKind::Rollout),
            "deploymentconfig" | "deploymentconfigs" => Ok(WorkloadKind::DeploymentConfig),
            "strimzipodset" | "strimzipodsets" => Ok(WorkloadKind::StrimziPodSet),
            "groupedjob" | "groupedjobs" => Ok(WorkloadKind::GroupedJob),
            _ => Err(format!("Unknown workload kind: {}", s)),
        }
    }
}

/// Identity tuple of a workload: `(cluster, namespace, kind, name)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadId {
    pub cluster: String,
    pub namespace: String,
    pub kind: WorkloadKind,
    pub name: String,
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.cluster, self.namespace, self.kind, self.name
        )
    }
}

/// A pod owned by a workload. Holds the name only, never a back-pointer to
/// the owning workload; name maps live in the discoverer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
    pub running: bool,
    /// Seen only in historical owner data, no longer alive in the cluster.
    pub deleted: bool,
}

/// Requests and limits for one container, each possibly undefined.
/// CPU is millicores, memory is bytes; integers only at the output boundary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceAllocations {
    pub cpu_request_millis: Option<i64>,
    pub cpu_limit_millis: Option<i64>,
    pub memory_request_bytes: Option<i64>,
    pub memory_limit_bytes: Option<i64>,
}

impl ResourceAllocations {
    pub fn is_undefined(&self) -> bool {
        self.cpu_request_millis.is_none()
            && self.cpu_limit_millis.is_none()
            && self.memory_request_bytes.is_none()
            && self.memory_limit_bytes.is_none()
    }
}

/// Declared container spec inside a workload's pod template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub current: ResourceAllocations,
}

/// HorizontalPodAutoscaler bound to a workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HpaDescriptor {
    pub name: String,
    pub target_kind: String,
    pub target_name: String,
    pub min_replicas: Option<i32>,
    pub max_replicas: i32,
    pub targets_cpu: bool,
    pub targets_memory: bool,
}

/// One workload discovered on a cluster, read-only after discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    pub pods: Vec<PodRef>,
    pub containers: Vec<ContainerSpec>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hpa: Option<HpaDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

impl Workload {
    /// Regex alternation over the pod names, for metric selectors.
    pub fn pod_selector_regex(&self) -> String {
        self.pods
            .iter()
            .map(|p| regex::escape(&p.name))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// One `(timestamp_seconds, value)` sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

/// One series returned by the metric backend, labels already normalized to
/// the standard `pod` / `container` names.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub pod: String,
    pub container: String,
    pub samples: Vec<Sample>,
}

impl Series {
    /// Scalar view of the series: the value of its single sample, if any.
    pub fn scalar(&self) -> Option<f64> {
        self.samples.last().map(|s| s.value)
    }
}

/// The fixed catalog of metric kinds a strategy can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Rate of CPU seconds per pod over the history window, one sample per step.
    CpuUsage,
    /// The p-th percentile of CPU usage over the window, one scalar per pod.
    PercentileCpu(u8),
    /// Count of CPU samples per pod.
    CpuPoints,
    /// Working-set bytes per pod, one sample per step.
    Memory,
    /// Scalar max of working-set bytes over the window, per pod.
    MaxMemory,
    /// Count of memory samples per pod.
    MemoryPoints,
    /// Memory limit at the most recent OOM-kill in the window, or 0 if none.
    /// Inferred from limit x restart count on backends without OOM signals.
    OomKilledMemory,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::CpuUsage => write!(f, "cpu_usage"),
            MetricKind::PercentileCpu(p) => write!(f, "percentile_cpu_{}", p),
            MetricKind::CpuPoints => write!(f, "cpu_points"),
            MetricKind::Memory => write!(f, "memory"),
            MetricKind::MaxMemory => write!(f, "max_memory"),
            MetricKind::MemoryPoints => write!(f, "memory_points"),
            MetricKind::OomKilledMemory => write!(f, "oom_killed_memory"),
        }
    }
}

/// Metric series for one container slot, keyed by kind. Built by the metric
/// service, consumed whole by the strategy.
#[derive(Debug, Clone, Default)]
pub struct MetricBundle {
    series: HashMap<MetricKind, Vec<Series>>,
    pub warnings: Vec<String>,
}

impl MetricBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: MetricKind, series: Vec<Series>) {
        self.series.insert(kind, series);
    }

    pub fn get(&self, kind: MetricKind) -> &[Series] {
        self.series.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total sample count across all series of a kind. For the point-count
    /// kinds the backend already returns counts, so this sums the scalars.
    pub fn point_count(&self, kind: MetricKind) -> usize {
        self.get(kind)
            .iter()
            .filter_map(Series::scalar)
            .map(|v| v.max(0.0) as usize)
            .sum()
    }

    /// Max over all pods of the series scalar value.
    pub fn max_scalar(&self, kind: MetricKind) -> Option<f64> {
        self.get(kind)
            .iter()
            .filter_map(Series::scalar)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }
}

/// Row state carried by every report row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RowState {
    Ok,
    Clamped,
    Undefined,
    Ineligible,
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowState::Ok => write!(f, "ok"),
            RowState::Clamped => write!(f, "clamped"),
            RowState::Undefined => write!(f, "undefined"),
            RowState::Ineligible => write!(f, "ineligible"),
        }
    }
}

/// The recommendation for one container slot, appended once, never revised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub workload: WorkloadId,
    pub container: String,
    pub current: ResourceAllocations,
    pub recommendation: ResourceAllocations,
    pub state: RowState,
    /// Free-form notes keyed by resource ("cpu", "memory", "general").
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub info: HashMap<String, String>,
}

impl ScanResult {
    pub fn undefined(workload: WorkloadId, container: String, reason: &str) -> Self {
        let mut info = HashMap::new();
        info.insert("general".to_string(), reason.to_string());
        Self {
            workload,
            container,
            current: ResourceAllocations::default(),
            recommendation: ResourceAllocations::default(),
            state: RowState::Undefined,
            info,
        }
    }
}

/// A cluster that could not be scanned at all (auth failure, unreachable
/// backend). Other clusters continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterFailure {
    pub cluster: String,
    pub error: String,
}

/// Output of one scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<ScanResult>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cluster_failures: Vec<ClusterFailure>,
    pub clusters_scanned: usize,
    pub cancelled: bool,
}

impl ScanReport {
    /// Non-zero exit is warranted only when no cluster succeeded or the
    /// run was cancelled.
    pub fn failed(&self) -> bool {
        self.cancelled || (self.clusters_scanned == 0 && !self.cluster_failures.is_empty())
    }

    /// Rows sorted by (cluster, namespace, kind, name, container); the
    /// runner itself guarantees no ordering.
    pub fn sorted_results(&self) -> Vec<&ScanResult> {
        let mut rows: Vec<&ScanResult> = self.results.iter().collect();
        rows.sort_by(|a, b| {
            (&a.workload, &a.container).cmp(&(&b.workload, &b.container))
        });
        rows
    }
}
