//! Latency span tracking against the per-step budgets in the spec's
//! concurrency model: context fetch, rule evaluation, ML inference,
//! decision combination, and store read/write.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    ContextFetch,
    RulesEval,
    MlInference,
    DecisionCombine,
    StoreRead,
    StoreWrite,
    CacheRead,
    CacheWrite,
    TotalAssessment,
}

impl SpanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanType::ContextFetch => "context_fetch",
            SpanType::RulesEval => "rules_eval",
            SpanType::MlInference => "ml_inference",
            SpanType::DecisionCombine => "decision_combine",
            SpanType::StoreRead => "store_read",
            SpanType::StoreWrite => "store_write",
            SpanType::CacheRead => "cache_read",
            SpanType::CacheWrite => "cache_write",
            SpanType::TotalAssessment => "total_assessment",
        }
    }

    /// Advisory budget from §4.5 / §6, in microseconds. `None` has no budget.
    pub fn budget_us(&self) -> Option<u64> {
        match self {
            SpanType::ContextFetch => Some(60_000),
            SpanType::RulesEval => Some(10_000),
            SpanType::MlInference => Some(50_000),
            SpanType::DecisionCombine => Some(5_000),
            SpanType::StoreRead => Some(60_000),
            SpanType::StoreWrite => Some(80_000),
            SpanType::CacheRead => Some(5_000),
            SpanType::CacheWrite => Some(5_000),
            SpanType::TotalAssessment => Some(250_000),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySpan {
    pub span_type: SpanType,
    pub duration_us: u64,
    pub timestamp: i64,
}

pub struct SpanBuilder {
    span_type: SpanType,
    start: std::time::Instant,
}

impl SpanBuilder {
    pub fn start(span_type: SpanType) -> Self {
        Self {
            span_type,
            start: std::time::Instant::now(),
        }
    }

    pub fn finish(self) -> LatencySpan {
        let duration_us = self.start.elapsed().as_micros() as u64;
        if let Some(budget) = self.span_type.budget_us() {
            if duration_us > budget {
                tracing::warn!(
                    span = self.span_type.as_str(),
                    duration_us,
                    budget_us = budget,
                    "span exceeded advisory budget"
                );
            }
        }
        LatencySpan {
            span_type: self.span_type,
            duration_us,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn finish_and_record(self) -> u64 {
        let span = self.finish();
        let duration = span.duration_us;
        global_registry().record(span);
        duration
    }
}

/// Convenience macro for timing a block and recording it against a span budget.
#[macro_export]
macro_rules! measure_latency {
    ($span_type:expr, $block:expr) => {{
        let _span = $crate::latency::SpanBuilder::start($span_type);
        let result = $block;
        _span.finish_and_record();
        result
    }};
}

/// Logarithmic-bucket latency histogram, enough resolution for p50/p90/p95/p99.
const BUCKET_BOUNDS_US: &[u64] = &[
    100, 200, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000, 200_000, 500_000,
    1_000_000, 2_000_000, 5_000_000,
];

#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: Vec<u64>,
    count: u64,
    sum_us: u64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: vec![0; BUCKET_BOUNDS_US.len() + 1],
            count: 0,
            sum_us: 0,
        }
    }

    pub fn record(&mut self, duration_us: u64) {
        self.count += 1;
        self.sum_us = self.sum_us.saturating_add(duration_us);
        let idx = BUCKET_BOUNDS_US
            .iter()
            .position(|&bound| duration_us <= bound)
            .unwrap_or(BUCKET_BOUNDS_US.len());
        self.buckets[idx] += 1;
    }

    pub fn percentile(&self, p: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let target = ((p / 100.0) * self.count as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.buckets.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return BUCKET_BOUNDS_US.get(i).copied().unwrap_or(
                    BUCKET_BOUNDS_US.last().copied().unwrap_or(0) * 2,
                );
            }
        }
        BUCKET_BOUNDS_US.last().copied().unwrap_or(0)
    }

    pub fn p50(&self) -> u64 {
        self.percentile(50.0)
    }
    pub fn p95(&self) -> u64 {
        self.percentile(95.0)
    }
    pub fn p99(&self) -> u64 {
        self.percentile(99.0)
    }
    pub fn count(&self) -> u64 {
        self.count
    }
    pub fn mean_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_us as f64 / self.count as f64
        }
    }
}

/// Registry of per-span histograms, read by `/metrics` and the admin surface.
pub struct LatencyRegistry {
    histograms: RwLock<std::collections::HashMap<&'static str, LatencyHistogram>>,
}

impl LatencyRegistry {
    fn new() -> Self {
        Self {
            histograms: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn record(&self, span: LatencySpan) {
        let mut histograms = self.histograms.write();
        histograms
            .entry(span.span_type.as_str())
            .or_insert_with(LatencyHistogram::new)
            .record(span.duration_us);
    }

    pub fn snapshot(&self) -> Vec<(String, u64, u64, u64, u64)> {
        self.histograms
            .read()
            .iter()
            .map(|(name, h)| (name.to_string(), h.count(), h.p50(), h.p95(), h.p99()))
            .collect()
    }
}

static REGISTRY: OnceLock<LatencyRegistry> = OnceLock::new();

pub fn global_registry() -> &'static LatencyRegistry {
    REGISTRY.get_or_init(LatencyRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_percentiles_monotone() {
        let mut h = LatencyHistogram::new();
        for us in [100u64, 500, 1000, 2000, 5000, 10000, 50000, 100000] {
            h.record(us);
        }
        assert!(h.p50() <= h.p95());
        assert!(h.p95() <= h.p99());
        assert_eq!(h.count(), 8);
    }

    #[test]
    fn test_empty_histogram_percentile_is_zero() {
        let h = LatencyHistogram::new();
        assert_eq!(h.p50(), 0);
        assert_eq!(h.p95(), 0);
    }

    #[test]
    fn test_span_budgets_match_spec() {
        assert_eq!(SpanType::ContextFetch.budget_us(), Some(60_000));
        assert_eq!(SpanType::RulesEval.budget_us(), Some(10_000));
        assert_eq!(SpanType::MlInference.budget_us(), Some(50_000));
        assert_eq!(SpanType::DecisionCombine.budget_us(), Some(5_000));
        assert_eq!(SpanType::TotalAssessment.budget_us(), Some(250_000));
    }
}
