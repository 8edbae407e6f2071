//! Scan configuration. Every knob the pipeline consumes lives here and is
//! passed down explicitly; there is no process-wide settings object.

use std::time::Duration;

pub const DEFAULT_HISTORY_DURATION_HOURS: f64 = 336.0;
pub const DEFAULT_TIMEFRAME_DURATION_MINUTES: f64 = 1.25;
pub const DEFAULT_POINTS_REQUIRED: usize = 100;
pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_CPU_MIN_MILLICORES: i64 = 10;
pub const DEFAULT_MEMORY_MIN_MIB: i64 = 100;
pub const DEFAULT_OWNER_BATCH_SIZE: usize = 200;
pub const DEFAULT_LIST_BATCH_SIZE: u32 = 500;
pub const DEFAULT_MAX_LIST_BATCHES: usize = 50;
pub const DEFAULT_PROM_MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Retry policy for transient backend failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Parameters of the Simple strategy.
#[derive(Debug, Clone)]
pub struct SimpleSettings {
    /// Percentile used for the CPU request.
    pub cpu_percentile: u8,
    pub memory_buffer_percentage: f64,
    pub oom_memory_buffer_percentage: f64,
}

impl Default for SimpleSettings {
    fn default() -> Self {
        Self {
            cpu_percentile: 95,
            memory_buffer_percentage: 15.0,
            oom_memory_buffer_percentage: 25.0,
        }
    }
}

/// Parameters of the Simple-Limit strategy (request and limit percentiles).
#[derive(Debug, Clone)]
pub struct SimpleLimitSettings {
    pub cpu_request_percentile: u8,
    pub cpu_limit_percentile: u8,
    pub memory_buffer_percentage: f64,
    pub oom_memory_buffer_percentage: f64,
}

impl Default for SimpleLimitSettings {
    fn default() -> Self {
        Self {
            cpu_request_percentile: 66,
            cpu_limit_percentile: 96,
            memory_buffer_percentage: 15.0,
            oom_memory_buffer_percentage: 25.0,
        }
    }
}

/// Parameters of the AI-assisted strategy. The endpoint receives one JSON
/// POST per container slot; auth is wired by the caller.
#[derive(Debug, Clone)]
pub struct AiSettings {
    pub endpoint: String,
    pub timeout: Duration,
    /// Deviation from the Simple baseline above which a warning is attached.
    pub deviation_warn_fraction: f64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: Duration::from_secs(60),
            deviation_warn_fraction: 0.5,
        }
    }
}

/// Configuration consumed by the scan pipeline.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub history_duration_hours: f64,
    pub timeframe_duration_minutes: f64,
    pub points_required: usize,
    pub max_workers: usize,
    pub cpu_min_millicores: i64,
    pub memory_min_mib: i64,
    pub allow_hpa: bool,
    pub use_oomkill_data: bool,
    /// (key, value) matcher appended to every metric selector when one
    /// Prometheus serves multiple clusters.
    pub cluster_label: Option<(String, String)>,
    /// Labels whose shared values group Jobs into one GroupedJob workload.
    /// Empty disables grouping.
    pub job_grouping_labels: Vec<String>,
    pub owner_batch_size: usize,
    pub list_batch_size: u32,
    /// Circuit breaker against runaway `continue` pagination.
    pub max_list_batches: usize,
    pub prom_max_concurrency: usize,
    pub retry: RetryConfig,
    pub simple: SimpleSettings,
    pub simple_limit: SimpleLimitSettings,
    pub ai: AiSettings,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            history_duration_hours: DEFAULT_HISTORY_DURATION_HOURS,
            timeframe_duration_minutes: DEFAULT_TIMEFRAME_DURATION_MINUTES,
            points_required: DEFAULT_POINTS_REQUIRED,
            max_workers: DEFAULT_MAX_WORKERS,
            cpu_min_millicores: DEFAULT_CPU_MIN_MILLICORES,
            memory_min_mib: DEFAULT_MEMORY_MIN_MIB,
            allow_hpa: false,
            use_oomkill_data: true,
            cluster_label: None,
            job_grouping_labels: Vec::new(),
            owner_batch_size: DEFAULT_OWNER_BATCH_SIZE,
            list_batch_size: DEFAULT_LIST_BATCH_SIZE,
            max_list_batches: DEFAULT_MAX_LIST_BATCHES,
            prom_max_concurrency: DEFAULT_PROM_MAX_CONCURRENCY,
            retry: RetryConfig::default(),
            simple: SimpleSettings::default(),
            simple_limit: SimpleLimitSettings::default(),
            ai: AiSettings::default(),
        }
    }
}

impl ScanConfig {
    /// The lookback interval used for all queries during one scan.
    pub fn history(&self) -> Duration {
        Duration::from_secs_f64(self.history_duration_hours * 3600.0)
    }

    /// Range-query resampling granularity (default 75s).
    pub fn step(&self) -> Duration {
        Duration::from_secs_f64(self.timeframe_duration_minutes * 60.0)
    }

    pub fn memory_min_bytes(&self) -> i64 {
        self.memory_min_mib * 1024 * 1024
    }
}

/// Formats a duration the way PromQL expects it, in whole seconds.
pub fn promql_duration(d: Duration) -> String {
    format!("{}s", d.as_secs().max(1))
}
