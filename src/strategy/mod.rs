//! Recommendation strategies. A strategy sees one container slot's metric
//! bundle plus its context and produces the recommendation; nothing else in
//! the pipeline interprets metric values.

pub mod ai;
pub mod simple;

use crate::errors::ScanError;
use crate::model::{
    HpaDescriptor, MetricBundle, MetricKind, ResourceAllocations, RowState,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Everything a strategy may consult besides the bundle itself.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub current: ResourceAllocations,
    pub hpa: Option<HpaDescriptor>,
    /// Warnings accumulated during discovery.
    pub warnings: Vec<String>,
    pub cpu_min_millicores: i64,
    pub memory_min_bytes: i64,
    pub points_required: usize,
    pub allow_hpa: bool,
    pub use_oomkill_data: bool,
    pub history: Duration,
}

impl StrategyContext {
    /// Whether an HPA suppresses recommendations for the given resource.
    pub fn hpa_blocks(&self, resource: &str) -> bool {
        if self.allow_hpa {
            return false;
        }
        match (&self.hpa, resource) {
            (Some(hpa), "cpu") => hpa.targets_cpu,
            (Some(hpa), "memory") => hpa.targets_memory,
            _ => false,
        }
    }
}

/// What a strategy hands back for one slot.
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub allocations: ResourceAllocations,
    pub state: RowState,
    pub info: HashMap<String, String>,
}

impl Recommendation {
    pub fn undefined(reason: &str) -> Self {
        let mut info = HashMap::new();
        info.insert("general".to_string(), reason.to_string());
        Self {
            allocations: ResourceAllocations::default(),
            state: RowState::Undefined,
            info,
        }
    }
}

/// A pluggable recommendation policy. Implementations must be pure with
/// respect to their inputs: identical bundle and context, identical output.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Metric kinds the runner must fetch before calling `recommend`.
    fn required_metrics(&self) -> Vec<MetricKind>;

    async fn recommend(
        &self,
        bundle: &MetricBundle,
        ctx: &StrategyContext,
    ) -> Result<Recommendation, ScanError>;
}

/// Convert cores to the output boundary's integer millicores.
pub(crate) fn cores_to_millis(cores: f64) -> i64 {
    (cores * 1000.0).round() as i64
}

/// Convert bytes (carried as f64 through the math) to integer bytes.
pub(crate) fn to_bytes(value: f64) -> i64 {
    value.round() as i64
}
