//! AI-assisted strategy: summarizes the bundle into per-pod statistics,
//! asks an external LLM endpoint for sizing, and sanity-checks the answer
//! against the Simple baseline. The endpoint and auth are caller
//! configuration; one JSON POST per container slot.

use super::simple::recommend_simple;
use super::{cores_to_millis, to_bytes, Recommendation, Strategy, StrategyContext};
use crate::config::{AiSettings, SimpleSettings};
use crate::errors::ScanError;
use crate::model::{MetricBundle, MetricKind, ResourceAllocations, RowState, Series};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CPU_CLAMP_CORES: (f64, f64) = (0.01, 16.0);
const MEM_CLAMP_BYTES: (f64, f64) = (100.0 * 1024.0 * 1024.0, 64.0 * 1024.0 * 1024.0 * 1024.0);

/// Summary statistics for one pod's series, shipped in the prompt.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SummaryStats {
    pub pod: String,
    pub samples: usize,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    /// Linear trend of value over time, per second.
    pub slope: f64,
    /// Samples above mean + 2 stddev.
    pub spike_count: usize,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

pub fn summarize(series: &Series) -> SummaryStats {
    let values: Vec<f64> = series.samples.iter().map(|s| s.value).collect();
    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let mean = if n > 0 { values.iter().sum::<f64>() / n as f64 } else { 0.0 };
    let variance = if n > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };
    let stddev = variance.sqrt();

    // Least-squares slope of value against timestamp.
    let slope = if n > 1 {
        let t_mean = series.samples.iter().map(|s| s.timestamp).sum::<f64>() / n as f64;
        let num: f64 = series
            .samples
            .iter()
            .map(|s| (s.timestamp - t_mean) * (s.value - mean))
            .sum();
        let den: f64 = series
            .samples
            .iter()
            .map(|s| (s.timestamp - t_mean).powi(2))
            .sum();
        if den > 0.0 { num / den } else { 0.0 }
    } else {
        0.0
    };

    let threshold = mean + 2.0 * stddev;
    let spike_count = if stddev > 0.0 {
        values.iter().filter(|v| **v > threshold).count()
    } else {
        0
    };

    SummaryStats {
        pod: series.pod.clone(),
        samples: n,
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        max: sorted.last().copied().unwrap_or(0.0),
        mean,
        stddev,
        slope,
        spike_count,
    }
}

/// The JSON object the endpoint must answer with. CPU in cores, memory in
/// bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmAnswer {
    pub cpu_request: f64,
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    pub mem_request: f64,
    pub mem_limit: f64,
    pub confidence_0_100: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Outbound LLM call, injected so tests can stub the endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LlmAnswer, ScanError>;
}

/// Plain JSON-POST client: `{"prompt": ...}` out, an `LlmAnswer` object back.
pub struct HttpLlmClient {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(settings: &AiSettings) -> Result<Self, ScanError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ScanError::Strategy(e.to_string()))?;
        Ok(Self {
            endpoint: settings.endpoint.clone(),
            http,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<LlmAnswer, ScanError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| ScanError::Strategy(format!("LLM request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ScanError::Strategy(format!(
                "LLM endpoint returned HTTP {}",
                resp.status()
            )));
        }
        resp.json::<LlmAnswer>()
            .await
            .map_err(|e| ScanError::Strategy(format!("LLM answer malformed: {e}")))
    }
}

pub struct AiStrategy {
    llm: Arc<dyn LlmClient>,
    settings: AiSettings,
    baseline: SimpleSettings,
}

impl AiStrategy {
    pub fn new(llm: Arc<dyn LlmClient>, settings: AiSettings, baseline: SimpleSettings) -> Self {
        Self {
            llm,
            settings,
            baseline,
        }
    }

    fn build_prompt(&self, bundle: &MetricBundle, ctx: &StrategyContext) -> String {
        let cpu_stats: Vec<SummaryStats> =
            bundle.get(MetricKind::CpuUsage).iter().map(summarize).collect();
        let mem_stats: Vec<SummaryStats> =
            bundle.get(MetricKind::Memory).iter().map(summarize).collect();
        serde_json::json!({
            "task": "Recommend Kubernetes container resources. Answer with a JSON object \
                     {cpu_request, cpu_limit|null, mem_request, mem_limit, confidence_0_100, reasoning}; \
                     CPU in cores, memory in bytes.",
            "history_hours": ctx.history.as_secs() / 3600,
            "current": ctx.current,
            "cpu_usage_cores": cpu_stats,
            "memory_bytes": mem_stats,
        })
        .to_string()
    }
}

#[async_trait]
impl Strategy for AiStrategy {
    fn name(&self) -> &'static str {
        "ai"
    }

    fn required_metrics(&self) -> Vec<MetricKind> {
        vec![
            MetricKind::CpuUsage,
            MetricKind::Memory,
            MetricKind::PercentileCpu(self.baseline.cpu_percentile),
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
        let baseline = recommend_simple(
            bundle,
            ctx,
            self.baseline.cpu_percentile,
            None,
            self.baseline.memory_buffer_percentage,
            self.baseline.oom_memory_buffer_percentage,
        );
        // The shared eligibility rules (data sufficiency, HPA policy) come
        // out of the baseline; an undefined or ineligible slot never
        // reaches the endpoint.
        if matches!(baseline.state, RowState::Undefined | RowState::Ineligible) {
            return Ok(baseline);
        }

        let prompt = self.build_prompt(bundle, ctx);
        let answer = match self.llm.complete(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("LLM call failed, falling back to simple baseline: {e}");
                let mut rec = baseline;
                rec.info.insert(
                    "general".to_string(),
                    format!("AI endpoint unavailable, simple baseline used: {e}"),
                );
                return Ok(rec);
            }
        };

        let mut info = baseline.info.clone();
        let mut clamped = false;
        let mut clamp_cpu = |v: f64| -> f64 {
            let c = v.clamp(CPU_CLAMP_CORES.0, CPU_CLAMP_CORES.1);
            if c != v {
                clamped = true;
            }
            c
        };
        let cpu_request = clamp_cpu(answer.cpu_request);
        let cpu_limit = answer.cpu_limit.map(&mut clamp_cpu).map(|c| c.max(cpu_request));

        let mut clamp_mem = |v: f64| -> f64 {
            let c = v.clamp(MEM_CLAMP_BYTES.0, MEM_CLAMP_BYTES.1);
            if c != v {
                clamped = true;
            }
            c
        };
        let mem_request = clamp_mem(answer.mem_request);
        let mem_limit = clamp_mem(answer.mem_limit).max(mem_request);

        if clamped {
            info.insert(
                "general".to_string(),
                "AI answer clamped to the allowed resource range".to_string(),
            );
        }

        // Large deviation from the deterministic baseline is worth a
        // warning, but the operator decides whether to trust the AI value.
        let deviates = |ai: f64, base: Option<i64>, scale: f64| -> bool {
            base.map(|b| {
                let b = b as f64 * scale;
                b > 0.0 && ((ai - b) / b).abs() > self.settings.deviation_warn_fraction
            })
            .unwrap_or(false)
        };
        if deviates(cpu_request, baseline.allocations.cpu_request_millis, 0.001)
            || deviates(mem_request, baseline.allocations.memory_request_bytes, 1.0)
        {
            info.insert(
                "deviation".to_string(),
                format!(
                    "AI answer deviates more than {:.0}% from the simple baseline",
                    self.settings.deviation_warn_fraction * 100.0
                ),
            );
        }

        info.insert(
            "confidence".to_string(),
            format!("{:.0}", answer.confidence_0_100.clamp(0.0, 100.0)),
        );
        if !answer.reasoning.is_empty() {
            info.insert("reasoning".to_string(), answer.reasoning);
        }

        Ok(Recommendation {
            allocations: ResourceAllocations {
                cpu_request_millis: Some(cores_to_millis(cpu_request)),
                cpu_limit_millis: cpu_limit.map(cores_to_millis),
                memory_request_bytes: Some(to_bytes(mem_request)),
                memory_limit_bytes: Some(to_bytes(mem_limit)),
            },
            state: if clamped { RowState::Clamped } else { RowState::Ok },
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Sample, Series};
    use std::time::Duration;

    const MIB: f64 = 1024.0 * 1024.0;

    fn usage_series(values: &[f64]) -> Series {
        Series {
            pod: "pod-a".to_string(),
            container: "app".to_string(),
            samples: values
                .iter()
                .enumerate()
                .map(|(i, v)| Sample { timestamp: i as f64 * 75.0, value: *v })
                .collect(),
        }
    }

    fn scalar_series(value: f64) -> Series {
        Series {
            pod: "pod-a".to_string(),
            container: "app".to_string(),
            samples: vec![Sample { timestamp: 0.0, value }],
        }
    }

    fn full_bundle() -> MetricBundle {
        let mut b = MetricBundle::new();
        b.insert(MetricKind::CpuUsage, vec![usage_series(&[0.1, 0.1, 0.12, 0.15, 0.2])]);
        b.insert(
            MetricKind::Memory,
            vec![usage_series(&[500.0 * MIB, 500.0 * MIB, 700.0 * MIB, 600.0 * MIB])],
        );
        b.insert(MetricKind::PercentileCpu(95), vec![scalar_series(0.185)]);
        b.insert(MetricKind::CpuPoints, vec![scalar_series(200.0)]);
        b.insert(MetricKind::MaxMemory, vec![scalar_series(700.0 * MIB)]);
        b.insert(MetricKind::MemoryPoints, vec![scalar_series(200.0)]);
        b.insert(MetricKind::OomKilledMemory, vec![scalar_series(0.0)]);
        b
    }

    fn ctx() -> StrategyContext {
        StrategyContext {
            current: ResourceAllocations::default(),
            hpa: None,
            warnings: vec![],
            cpu_min_millicores: 10,
            memory_min_bytes: 100 * 1024 * 1024,
            points_required: 100,
            allow_hpa: false,
            use_oomkill_data: true,
            history: Duration::from_secs(336 * 3600),
        }
    }

    #[test]
    fn test_summarize_stats() {
        let s = usage_series(&[1.0, 2.0, 3.0, 4.0, 100.0]);
        let stats = summarize(&s);
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.p50, 3.0);
        assert!((stats.mean - 22.0).abs() < 1e-9);
        assert!(stats.slope > 0.0);
        assert_eq!(stats.spike_count, 0);
    }

    #[tokio::test]
    async fn test_ai_answer_clamped_and_flagged() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete().returning(|_| {
            Ok(LlmAnswer {
                cpu_request: 64.0, // beyond the 16-core ceiling
                cpu_limit: None,
                mem_request: 1.0, // below the 100 MiB floor
                mem_limit: 1.0,
                confidence_0_100: 80.0,
                reasoning: "scale up".to_string(),
            })
        });
        let strategy = AiStrategy::new(
            Arc::new(llm),
            AiSettings::default(),
            SimpleSettings::default(),
        );
        let rec = strategy.recommend(&full_bundle(), &ctx()).await.unwrap();
        assert_eq!(rec.allocations.cpu_request_millis, Some(16_000));
        assert_eq!(rec.allocations.memory_request_bytes, Some(100 * 1024 * 1024));
        assert_eq!(rec.state, RowState::Clamped);
        assert!(rec.info.contains_key("deviation"));
    }

    #[tokio::test]
    async fn test_ai_failure_falls_back_to_baseline() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete()
            .returning(|_| Err(ScanError::Strategy("timeout".to_string())));
        let strategy = AiStrategy::new(
            Arc::new(llm),
            AiSettings::default(),
            SimpleSettings::default(),
        );
        let rec = strategy.recommend(&full_bundle(), &ctx()).await.unwrap();
        assert_eq!(rec.allocations.cpu_request_millis, Some(185));
        assert!(rec
            .info
            .get("general")
            .map(|v| v.contains("baseline"))
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn test_ai_skips_endpoint_when_ineligible() {
        let mut llm = MockLlmClient::new();
        llm.expect_complete().never();
        let strategy = AiStrategy::new(
            Arc::new(llm),
            AiSettings::default(),
            SimpleSettings::default(),
        );
        let mut bundle = full_bundle();
        bundle.insert(MetricKind::CpuPoints, vec![scalar_series(5.0)]);
        bundle.insert(MetricKind::MemoryPoints, vec![scalar_series(5.0)]);
        let rec = strategy.recommend(&bundle, &ctx()).await.unwrap();
        assert_eq!(rec.state, RowState::Undefined);
    }
}
