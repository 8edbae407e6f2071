//! The Simple and Simple-Limit strategies: percentile CPU, buffered max
//! memory, OOM-kill override.

use super::{cores_to_millis, to_bytes, Recommendation, Strategy, StrategyContext};
use crate::config::{SimpleLimitSettings, SimpleSettings};
use crate::errors::ScanError;
use crate::model::{MetricBundle, MetricKind, ResourceAllocations, RowState};
use async_trait::async_trait;
use std::collections::HashMap;

pub struct SimpleStrategy {
    settings: SimpleSettings,
}

impl SimpleStrategy {
    pub fn new(settings: SimpleSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Strategy for SimpleStrategy {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn required_metrics(&self) -> Vec<MetricKind> {
        vec![
            MetricKind::PercentileCpu(self.settings.cpu_percentile),
            MetricKind::CpuPoints,
            MetricKind::MaxMemory,
            MetricKind::MemoryPoints,
            MetricKind::OomKilledMemory,
        ]
    }

    async fn recommend(
        &self,
        bundle: &MetricBundle,
        ctx: &StrategyContext,
    ) -> Result<Recommendation, ScanError> {
        Ok(recommend_simple(
            bundle,
            ctx,
            self.settings.cpu_percentile,
            None,
            self.settings.memory_buffer_percentage,
            self.settings.oom_memory_buffer_percentage,
        ))
    }
}

pub struct SimpleLimitStrategy {
    settings: SimpleLimitSettings,
}

impl SimpleLimitStrategy {
    pub fn new(settings: SimpleLimitSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Strategy for SimpleLimitStrategy {
    fn name(&self) -> &'static str {
        "simple-limit"
    }

    fn required_metrics(&self) -> Vec<MetricKind> {
        vec![
            MetricKind::PercentileCpu(self.settings.cpu_request_percentile),
            MetricKind::PercentileCpu(self.settings.cpu_limit_percentile),
            MetricKind::CpuPoints,
            MetricKind::MaxMemory,
            MetricKind::MemoryPoints,
            MetricKind::OomKilledMemory,
        ]
    }

    async fn recommend(
        &self,
        bundle: &MetricBundle,
        ctx: &StrategyContext,
    ) -> Result<Recommendation, ScanError> {
        Ok(recommend_simple(
            bundle,
            ctx,
            self.settings.cpu_request_percentile,
            Some(self.settings.cpu_limit_percentile),
            self.settings.memory_buffer_percentage,
            self.settings.oom_memory_buffer_percentage,
        ))
    }
}

/// Shared core of both simple variants. CPU request is the configured
/// percentile across pods floored at cpu_min; memory is buffered max across
/// pods, replaced by the buffered OOM limit when an OOM-kill was seen.
pub(crate) fn recommend_simple(
    bundle: &MetricBundle,
    ctx: &StrategyContext,
    cpu_request_percentile: u8,
    cpu_limit_percentile: Option<u8>,
    memory_buffer_percentage: f64,
    oom_memory_buffer_percentage: f64,
) -> Recommendation {
    let mut info: HashMap<String, String> = HashMap::new();
    let mut allocations = ResourceAllocations::default();
    let mut clamped = false;
    let mut ineligible = false;

    // CPU
    if ctx.hpa_blocks("cpu") {
        ineligible = true;
        info.insert(
            "cpu".to_string(),
            "HPA targets CPU; recommendation suppressed".to_string(),
        );
    } else if bundle.point_count(MetricKind::CpuPoints) < ctx.points_required {
        info.insert(
            "cpu".to_string(),
            format!(
                "not enough data: {} of {} CPU points",
                bundle.point_count(MetricKind::CpuPoints),
                ctx.points_required
            ),
        );
    } else if let Some(p_cores) = bundle.max_scalar(MetricKind::PercentileCpu(cpu_request_percentile))
    {
        let mut request = cores_to_millis(p_cores);
        if request < ctx.cpu_min_millicores {
            request = ctx.cpu_min_millicores;
            clamped = true;
            info.insert(
                "cpu".to_string(),
                format!("raised to the configured minimum of {}m", ctx.cpu_min_millicores),
            );
        }
        allocations.cpu_request_millis = Some(request);
        if let Some(p_lim) = cpu_limit_percentile {
            if let Some(lim_cores) = bundle.max_scalar(MetricKind::PercentileCpu(p_lim)) {
                let limit = cores_to_millis(lim_cores).max(request);
                allocations.cpu_limit_millis = Some(limit);
            }
        }
    } else {
        info.insert("cpu".to_string(), "no CPU usage series returned".to_string());
    }

    // Memory
    if ctx.hpa_blocks("memory") {
        ineligible = true;
        info.insert(
            "memory".to_string(),
            "HPA targets memory; recommendation suppressed".to_string(),
        );
    } else if bundle.point_count(MetricKind::MemoryPoints) < ctx.points_required {
        info.insert(
            "memory".to_string(),
            format!(
                "not enough data: {} of {} memory points",
                bundle.point_count(MetricKind::MemoryPoints),
                ctx.points_required
            ),
        );
    } else {
        let oom_bytes = if ctx.use_oomkill_data {
            bundle
                .max_scalar(MetricKind::OomKilledMemory)
                .filter(|v| *v > 0.0)
        } else {
            None
        };
        let value = match oom_bytes {
            Some(oom) => {
                info.insert(
                    "memory".to_string(),
                    "OOM-kill observed in the history window; sized from the terminated limit"
                        .to_string(),
                );
                Some(oom * (1.0 + oom_memory_buffer_percentage / 100.0))
            }
            None => bundle
                .max_scalar(MetricKind::MaxMemory)
                .map(|max| max * (1.0 + memory_buffer_percentage / 100.0)),
        };
        match value {
            Some(bytes) => {
                let mut request = to_bytes(bytes);
                if request < ctx.memory_min_bytes {
                    request = ctx.memory_min_bytes;
                    clamped = true;
                    info.insert(
                        "memory".to_string(),
                        format!(
                            "raised to the configured minimum of {}Mi",
                            ctx.memory_min_bytes / (1024 * 1024)
                        ),
                    );
                }
                allocations.memory_request_bytes = Some(request);
                allocations.memory_limit_bytes = Some(request);
            }
            None => {
                info.insert(
                    "memory".to_string(),
                    "no memory usage series returned".to_string(),
                );
            }
        }
    }

    let state = if ineligible {
        RowState::Ineligible
    } else if allocations.cpu_request_millis.is_none() && allocations.memory_request_bytes.is_none()
    {
        RowState::Undefined
    } else if clamped {
        RowState::Clamped
    } else {
        RowState::Ok
    };

    Recommendation {
        allocations,
        state,
        info,
    }
}
