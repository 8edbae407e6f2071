use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(author, version, about = "Kubernetes container right-sizing tool", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan workloads and recommend container resources from usage history
    Scan(ScanArgs),
}

#[derive(clap::Args)]
pub struct ScanArgs {
    /// Cluster name for the report (default: from kubeconfig or "default")
    #[arg(long = "cluster-name", value_name = "NAME")]
    pub cluster_name: Option<String>,

    /// Namespace glob or regex; repeatable. When unset, all namespaces are scanned.
    #[arg(short, long = "namespace", value_name = "PATTERN")]
    pub namespaces: Vec<String>,

    /// Workload kinds to include (deployment, statefulset, ...); repeatable. Default: all.
    #[arg(long = "kind", value_name = "KIND")]
    pub kinds: Vec<String>,

    /// Label selector applied when listing workloads
    #[arg(short = 'l', long, value_name = "SELECTOR")]
    pub selector: Option<String>,

    /// Include workloads targeted by an HPA instead of marking them ineligible
    #[arg(long = "allow-hpa")]
    pub allow_hpa: bool,

    /// Ignore OOM-kill history when sizing memory
    #[arg(long = "no-oomkill-data")]
    pub no_oomkill_data: bool,

    /// Prometheus-compatible base URL (required)
    #[arg(long = "prometheus-url", value_name = "URL")]
    pub prometheus_url: String,

    /// Bearer token for the Prometheus backend
    #[arg(long = "prometheus-token", value_name = "TOKEN")]
    pub prometheus_token: Option<String>,

    /// Extra header for Prometheus requests as "Name: value"; repeatable
    #[arg(long = "prometheus-header", value_name = "HEADER")]
    pub prometheus_headers: Vec<String>,

    /// Force the query dialect instead of auto-detecting from the URL
    #[arg(long = "prometheus-dialect", value_enum)]
    pub prometheus_dialect: Option<DialectArg>,

    /// Treat a Google managed backend as Anthos-managed collection
    #[arg(long)]
    pub anthos: bool,

    /// Label key identifying this cluster when one Prometheus serves several
    #[arg(long = "cluster-label-key", value_name = "KEY", requires = "cluster_label_value")]
    pub cluster_label_key: Option<String>,

    /// Label value identifying this cluster
    #[arg(long = "cluster-label-value", value_name = "VALUE", requires = "cluster_label_key")]
    pub cluster_label_value: Option<String>,

    /// Lookback window in hours
    #[arg(long = "history-duration", value_name = "HOURS", default_value_t = 336.0)]
    pub history_duration_hours: f64,

    /// Range-query step in minutes
    #[arg(long = "timeframe-duration", value_name = "MINUTES", default_value_t = 1.25)]
    pub timeframe_duration_minutes: f64,

    /// Minimum sample count per resource before a recommendation is made
    #[arg(long = "points-required", value_name = "N", default_value_t = 100)]
    pub points_required: usize,

    /// Concurrent container slots in flight
    #[arg(long = "max-workers", value_name = "N", default_value_t = 10)]
    pub max_workers: usize,

    /// Floor for CPU requests, in millicores
    #[arg(long = "cpu-min", value_name = "MILLICORES", default_value_t = 10)]
    pub cpu_min_millicores: i64,

    /// Floor for memory requests, in MiB
    #[arg(long = "memory-min", value_name = "MIB", default_value_t = 100)]
    pub memory_min_mib: i64,

    /// Owner-name lookups batched per Prometheus query
    #[arg(long = "owner-batch-size", value_name = "N", default_value_t = 200)]
    pub owner_batch_size: usize,

    /// Group Jobs sharing these label keys into one workload; repeatable
    #[arg(long = "job-group-label", value_name = "KEY")]
    pub job_group_labels: Vec<String>,

    /// Recommendation strategy
    #[arg(short, long, value_enum, default_value = "simple")]
    pub strategy: StrategyArg,

    /// Percentile for the Simple strategy's CPU request
    #[arg(long = "cpu-percentile", value_name = "P", default_value_t = 95)]
    pub cpu_percentile: u8,

    /// Memory headroom over the observed max, percent
    #[arg(long = "memory-buffer", value_name = "PCT", default_value_t = 15.0)]
    pub memory_buffer_percentage: f64,

    /// Memory headroom over an OOM-killed limit, percent
    #[arg(long = "oom-memory-buffer", value_name = "PCT", default_value_t = 25.0)]
    pub oom_memory_buffer_percentage: f64,

    /// Percentile for the Simple-Limit strategy's CPU request
    #[arg(long = "cpu-request-percentile", value_name = "P", default_value_t = 66)]
    pub cpu_request_percentile: u8,

    /// Percentile for the Simple-Limit strategy's CPU limit
    #[arg(long = "cpu-limit-percentile", value_name = "P", default_value_t = 96)]
    pub cpu_limit_percentile: u8,

    /// LLM endpoint for the AI strategy (required with --strategy ai)
    #[arg(long = "ai-endpoint", value_name = "URL")]
    pub ai_endpoint: Option<String>,

    /// Per-request timeout for the LLM endpoint, seconds
    #[arg(long = "ai-timeout", value_name = "SECONDS", default_value_t = 60)]
    pub ai_timeout_seconds: u64,

    /// Output file path; stdout when unset
    #[arg(short, long)]
    pub output: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: ReportFormat,

    /// Kubernetes config file path
    #[arg(short, long)]
    pub config_file: Option<String>,

    /// Impersonate this user for Kubernetes API calls
    #[arg(long = "as-user", value_name = "USER")]
    pub as_user: Option<String>,

    /// Impersonate these groups for Kubernetes API calls; repeatable
    #[arg(long = "as-group", value_name = "GROUP")]
    pub as_groups: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum, Debug, Default)]
#[value(rename_all = "kebab-case")]
pub enum ReportFormat {
    #[default]
    Table,
    Json,
    Yaml,
    Csv,
}

#[derive(Clone, Copy, ValueEnum, Debug, Default)]
#[value(rename_all = "kebab-case")]
pub enum StrategyArg {
    #[default]
    Simple,
    SimpleLimit,
    Ai,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
#[value(rename_all = "kebab-case")]
pub enum DialectArg {
    Standard,
    Gcp,
    Anthos,
}
