//! Backend-specific PromQL generation. Pure string building; the active
//! dialect is the only state and no I/O happens here.

use crate::config::promql_duration;
use crate::model::MetricKind;
use std::time::Duration;

/// Query-language dialect of the metric backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromDialect {
    /// Vanilla Prometheus with cAdvisor and kube-state-metrics names.
    Standard,
    /// Google Managed Prometheus (`kubernetes.io/container/...` metrics).
    GcpManaged,
    /// Anthos-managed collection (`kubernetes.io/anthos/container/...`).
    Anthos,
}

impl PromDialect {
    /// Pick the dialect from the backend URL. Managed Prometheus is served
    /// from monitoring.googleapis.com; `anthos` further switches the
    /// metric-name prefix.
    pub fn detect(prometheus_url: &str, anthos: bool) -> Self {
        if prometheus_url.contains("monitoring.googleapis.com") {
            if anthos {
                PromDialect::Anthos
            } else {
                PromDialect::GcpManaged
            }
        } else {
            PromDialect::Standard
        }
    }

    /// Whether kube-state-metrics owner/phase series can be queried. The
    /// managed dialects expose container metrics only.
    pub fn has_kube_state_metrics(&self) -> bool {
        matches!(self, PromDialect::Standard)
    }

    fn metric_prefix(&self) -> &'static str {
        match self {
            PromDialect::Standard => "",
            PromDialect::GcpManaged => "kubernetes.io/container/",
            PromDialect::Anthos => "kubernetes.io/anthos/container/",
        }
    }

    fn cpu_metric(&self) -> String {
        match self {
            PromDialect::Standard => "container_cpu_usage_seconds_total".to_string(),
            _ => format!("{}cpu/core_usage_time", self.metric_prefix()),
        }
    }

    fn memory_metric(&self) -> String {
        match self {
            PromDialect::Standard => "container_memory_working_set_bytes".to_string(),
            _ => format!("{}memory/used_bytes", self.metric_prefix()),
        }
    }

    fn memory_limit_metric(&self) -> String {
        match self {
            PromDialect::Standard => "kube_pod_container_resource_limits".to_string(),
            _ => format!("{}memory/limit_bytes", self.metric_prefix()),
        }
    }

    fn restart_metric(&self) -> String {
        // Standard has a real OOM signal and never uses restart inference.
        format!("{}restart_count", self.metric_prefix())
    }

    fn by_labels(&self) -> &'static str {
        match self {
            PromDialect::Standard => "container, pod, job",
            _ => "container_name, pod_name, job",
        }
    }
}

/// Container-slot selector the builder turns into a matcher set.
#[derive(Debug, Clone)]
pub struct Selector<'a> {
    pub namespace: &'a str,
    pub pod_regex: &'a str,
    pub container: &'a str,
    pub cluster_label: Option<(&'a str, &'a str)>,
}

/// A built query plus whether it should go through the range endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub promql: String,
    pub range: bool,
}

impl QuerySpec {
    fn instant(promql: String) -> Self {
        Self { promql, range: false }
    }

    fn ranged(promql: String) -> Self {
        Self { promql, range: true }
    }
}

/// Standard-syntax matcher body: `namespace="ns", pod=~"re", container="c"`,
/// with any extra matchers first and the cluster label appended last. The
/// comma sits inside the braces, never doubled.
fn standard_matchers(sel: &Selector<'_>, extra: &[(&str, &str)]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (k, v) in extra {
        parts.push(format!("{}=\"{}\"", k, v));
    }
    parts.push(format!("namespace=\"{}\"", sel.namespace));
    parts.push(format!("pod=~\"{}\"", sel.pod_regex));
    parts.push(format!("container=\"{}\"", sel.container));
    if let Some((key, value)) = sel.cluster_label {
        parts.push(format!("{}=\"{}\"", key, value));
    }
    parts.join(", ")
}

/// UTF-8 braced selector used by the managed dialects, with the mandatory
/// `monitored_resource` matcher and the GCP label names.
fn gcp_selector(metric: &str, sel: &Selector<'_>) -> String {
    let mut parts: Vec<String> = vec![
        format!("\"__name__\"=\"{}\"", metric),
        "\"monitored_resource\"=\"k8s_container\"".to_string(),
        format!("\"namespace_name\"=\"{}\"", sel.namespace),
        format!("\"pod_name\"=~\"{}\"", sel.pod_regex),
        format!("\"container_name\"=\"{}\"", sel.container),
    ];
    if let Some((key, value)) = sel.cluster_label {
        parts.push(format!("\"{}\"=\"{}\"", key, value));
    }
    format!("{{{}}}", parts.join(","))
}

/// Rename the GCP label names back to `pod` / `container` so downstream
/// code only ever sees the standard labels.
fn wrap_gcp_labels(expr: String) -> String {
    format!(
        "label_replace(label_replace({}, \"pod\", \"$1\", \"pod_name\", \"(.+)\"), \"container\", \"$1\", \"container_name\", \"(.+)\")",
        expr
    )
}

impl PromDialect {
    /// Build the query for a metric kind against one container slot.
    /// Returns `None` when the dialect cannot express the kind; the caller
    /// records a warning and treats the series set as empty.
    pub fn query(
        &self,
        kind: MetricKind,
        sel: &Selector<'_>,
        history: Duration,
        step: Duration,
    ) -> Option<QuerySpec> {
        let h = promql_duration(history);
        let s = promql_duration(step);
        let by = self.by_labels();

        let spec = match self {
            PromDialect::Standard => {
                let m = standard_matchers(sel, &[]);
                let cpu_rate = format!(
                    "max by ({by}) (rate({}{{{m}}}[{s}]))",
                    self.cpu_metric()
                );
                match kind {
                    MetricKind::CpuUsage => QuerySpec::ranged(cpu_rate),
                    MetricKind::PercentileCpu(p) => QuerySpec::instant(format!(
                        "quantile_over_time({:.2}, {cpu_rate}[{h}:{s}])",
                        f64::from(p) / 100.0
                    )),
                    MetricKind::CpuPoints => QuerySpec::instant(format!(
                        "count_over_time(max by ({by}) ({}{{{m}}})[{h}:{s}])",
                        self.cpu_metric()
                    )),
                    MetricKind::Memory => QuerySpec::ranged(format!(
                        "max by ({by}) ({}{{{m}}})",
                        self.memory_metric()
                    )),
                    MetricKind::MaxMemory => QuerySpec::instant(format!(
                        "max_over_time(max by ({by}) ({}{{{m}}})[{h}:{s}])",
                        self.memory_metric()
                    )),
                    MetricKind::MemoryPoints => QuerySpec::instant(format!(
                        "count_over_time(max by ({by}) ({}{{{m}}})[{h}:{s}])",
                        self.memory_metric()
                    )),
                    MetricKind::OomKilledMemory => {
                        let oom = standard_matchers(sel, &[("reason", "OOMKilled")]);
                        let limit = standard_matchers(sel, &[("resource", "memory")]);
                        QuerySpec::instant(format!(
                            "max_over_time(kube_pod_container_status_last_terminated_reason{{{oom}}}[{h}]) \
                             * on(pod, container) group_left() \
                             max by ({by}) ({}{{{limit}}})",
                            self.memory_limit_metric()
                        ))
                    }
                }
            }
            PromDialect::GcpManaged | PromDialect::Anthos => {
                let cpu_sel = gcp_selector(&self.cpu_metric(), sel);
                let mem_sel = gcp_selector(&self.memory_metric(), sel);
                let cpu_rate = format!("max by ({by}) (rate({cpu_sel}[{s}]))");
                let inner = match kind {
                    MetricKind::CpuUsage => QuerySpec::ranged(cpu_rate),
                    MetricKind::PercentileCpu(p) => QuerySpec::instant(format!(
                        "quantile_over_time({:.2}, {cpu_rate}[{h}:{s}])",
                        f64::from(p) / 100.0
                    )),
                    MetricKind::CpuPoints => QuerySpec::instant(format!(
                        "count_over_time(max by ({by}) ({cpu_sel})[{h}:{s}])"
                    )),
                    MetricKind::Memory => {
                        QuerySpec::ranged(format!("max by ({by}) ({mem_sel})"))
                    }
                    MetricKind::MaxMemory => QuerySpec::instant(format!(
                        "max_over_time(max by ({by}) ({mem_sel})[{h}:{s}])"
                    )),
                    MetricKind::MemoryPoints => QuerySpec::instant(format!(
                        "count_over_time(max by ({by}) ({mem_sel})[{h}:{s}])"
                    )),
                    // No OOM signal on the managed dialects. Inferred from
                    // limit x restart count; any restart under a high limit
                    // reads as an OOM event.
                    MetricKind::OomKilledMemory => {
                        let limit_sel = gcp_selector(&self.memory_limit_metric(), sel);
                        let restart_sel = gcp_selector(&self.restart_metric(), sel);
                        QuerySpec::instant(format!(
                            "max_over_time((max by ({by}) ({limit_sel}) \
                             * on({by}) group_left() \
                             max by ({by}) ({restart_sel}))[{h}:{s}])"
                        ))
                    }
                };
                QuerySpec {
                    promql: wrap_gcp_labels(inner.promql),
                    range: inner.range,
                }
            }
        };
        Some(spec)
    }

    /// kube-state-metrics owner lookup over the history window, so pods of
    /// recently-deleted owners are still found. Standard dialect only.
    pub fn pod_owners_query(
        &self,
        namespace: &str,
        owner_kind: &str,
        owner_names_regex: &str,
        history: Duration,
        cluster_label: Option<(&str, &str)>,
    ) -> Option<String> {
        self.owner_query(
            "kube_pod_owner",
            namespace,
            owner_kind,
            owner_names_regex,
            history,
            cluster_label,
        )
    }

    /// Owner lookup for intermediate controllers: `kube_replicaset_owner`,
    /// `kube_replicationcontroller_owner`, `kube_job_owner`.
    pub fn owner_query(
        &self,
        metric: &str,
        namespace: &str,
        owner_kind: &str,
        owner_names_regex: &str,
        history: Duration,
        cluster_label: Option<(&str, &str)>,
    ) -> Option<String> {
        if !self.has_kube_state_metrics() {
            return None;
        }
        let mut matchers = format!(
            "namespace=\"{}\", owner_kind=\"{}\", owner_name=~\"{}\"",
            namespace, owner_kind, owner_names_regex
        );
        if let Some((key, value)) = cluster_label {
            matchers.push_str(&format!(", {}=\"{}\"", key, value));
        }
        Some(format!(
            "last_over_time({}{{{}}}[{}])",
            metric,
            matchers,
            promql_duration(history)
        ))
    }

    /// Flags currently-running pods. Standard dialect only.
    pub fn pod_running_query(
        &self,
        namespace: &str,
        pod_regex: &str,
        cluster_label: Option<(&str, &str)>,
    ) -> Option<String> {
        if !self.has_kube_state_metrics() {
            return None;
        }
        let mut matchers = format!(
            "phase=\"Running\", namespace=\"{}\", pod=~\"{}\"",
            namespace, pod_regex
        );
        if let Some((key, value)) = cluster_label {
            matchers.push_str(&format!(", {}=\"{}\"", key, value));
        }
        Some(format!("kube_pod_status_phase{{{}}} == 1", matchers))
    }
}
