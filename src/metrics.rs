//! Online metrics aggregation. `record()` is safe to call from many
//! in-flight request tasks; `snapshot()` returns a consistent point-in-time
//! copy at any moment during or after the run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::types::{EndpointId, RequestOutcome};

/// Latencies are recorded at millisecond resolution; anything over a minute
/// is saturated into the top bucket.
const HISTOGRAM_MAX_MS: u64 = 60_000;

struct Accumulator {
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    avg_latency_ms: f64,
    min_latency_ms: u64,
    max_latency_ms: u64,
    latencies: Histogram<u64>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            avg_latency_ms: 0.0,
            min_latency_ms: 0,
            max_latency_ms: 0,
            latencies: Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_MS, 3).unwrap(),
        }
    }

    fn record(&mut self, latency_ms: u64, success: bool) {
        self.total_requests += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }

        // running mean, updated incrementally so record() stays O(1)
        let n = self.total_requests as f64;
        self.avg_latency_ms += (latency_ms as f64 - self.avg_latency_ms) / n;

        if self.total_requests == 1 || latency_ms < self.min_latency_ms {
            self.min_latency_ms = latency_ms;
        }
        if latency_ms > self.max_latency_ms {
            self.max_latency_ms = latency_ms;
        }
        self.latencies
            .record(latency_ms.clamp(1, HISTOGRAM_MAX_MS))
            .ok();
    }

    fn percentile(&self, q: f64) -> u64 {
        self.latencies.value_at_percentile(q)
    }

    fn error_rate_pct(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.failure_count as f64 / self.total_requests as f64) * 100.0
        }
    }
}

struct RecorderInner {
    global: Accumulator,
    status_codes: HashMap<u16, u64>,
    errors: HashMap<String, u64>,
    per_endpoint: HashMap<EndpointId, Accumulator>,
    outcomes: Vec<RequestOutcome>,
    finalized_elapsed: Option<Duration>,
}

pub struct MetricsRecorder {
    started_at: Instant,
    inner: Mutex<RecorderInner>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            inner: Mutex::new(RecorderInner {
                global: Accumulator::new(),
                status_codes: HashMap::new(),
                errors: HashMap::new(),
                per_endpoint: HashMap::new(),
                outcomes: Vec::new(),
                finalized_elapsed: None,
            }),
        }
    }

    pub fn record(&self, outcome: RequestOutcome) {
        let mut inner = self.inner.lock().unwrap();
        inner.global.record(outcome.latency_ms, outcome.success);
        inner
            .per_endpoint
            .entry(outcome.endpoint.clone())
            .or_insert_with(Accumulator::new)
            .record(outcome.latency_ms, outcome.success);
        if let Some(code) = outcome.status_code {
            *inner.status_codes.entry(code).or_insert(0) += 1;
        }
        if let Some(kind) = outcome.error_kind {
            *inner.errors.entry(kind.to_string()).or_insert(0) += 1;
        }
        inner.outcomes.push(outcome);
    }

    /// Consistent point-in-time copy of the aggregated metrics. Percentiles
    /// are computed here rather than on the record path.
    pub fn snapshot(&self) -> RunSnapshot {
        let inner = self.inner.lock().unwrap();
        let elapsed = inner
            .finalized_elapsed
            .unwrap_or_else(|| self.started_at.elapsed());
        let elapsed_secs = elapsed.as_secs_f64();

        let requests_per_second = if elapsed_secs > 0.0 {
            inner.global.total_requests as f64 / elapsed_secs
        } else {
            0.0
        };

        let per_endpoint = inner
            .per_endpoint
            .iter()
            .map(|(id, acc)| (id.to_string(), EndpointMetrics::from_accumulator(acc)))
            .collect();

        RunSnapshot {
            total_requests: inner.global.total_requests,
            success_count: inner.global.success_count,
            failure_count: inner.global.failure_count,
            error_rate_pct: inner.global.error_rate_pct(),
            avg_latency_ms: inner.global.avg_latency_ms,
            p50_latency_ms: inner.global.percentile(50.0),
            p90_latency_ms: inner.global.percentile(90.0),
            p99_latency_ms: inner.global.percentile(99.0),
            min_latency_ms: inner.global.min_latency_ms,
            max_latency_ms: inner.global.max_latency_ms,
            requests_per_second,
            status_code_histogram: inner.status_codes.clone(),
            error_distribution: inner.errors.clone(),
            per_endpoint,
        }
    }

    /// Freezes elapsed time at the moment the run reaches a terminal state,
    /// so later snapshots stop diluting requests-per-second.
    pub fn finalize(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.finalized_elapsed.is_none() {
            inner.finalized_elapsed = Some(self.started_at.elapsed());
        }
    }

    /// Copy of every raw outcome recorded so far, in completion order.
    pub fn outcomes(&self) -> Vec<RequestOutcome> {
        self.inner.lock().unwrap().outcomes.clone()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable, point-in-time copy of aggregated run metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    #[serde(rename = "successCount")]
    pub success_count: u64,
    #[serde(rename = "failureCount")]
    pub failure_count: u64,
    #[serde(rename = "errorRatePct")]
    pub error_rate_pct: f64,
    #[serde(rename = "avgLatencyMs")]
    pub avg_latency_ms: f64,
    #[serde(rename = "p50LatencyMs")]
    pub p50_latency_ms: u64,
    #[serde(rename = "p90LatencyMs")]
    pub p90_latency_ms: u64,
    #[serde(rename = "p99LatencyMs")]
    pub p99_latency_ms: u64,
    #[serde(rename = "minLatencyMs")]
    pub min_latency_ms: u64,
    #[serde(rename = "maxLatencyMs")]
    pub max_latency_ms: u64,
    #[serde(rename = "requestsPerSecond")]
    pub requests_per_second: f64,
    #[serde(rename = "statusCodeHistogram")]
    pub status_code_histogram: HashMap<u16, u64>,
    #[serde(rename = "errorDistribution")]
    pub error_distribution: HashMap<String, u64>,
    #[serde(rename = "perEndpoint")]
    pub per_endpoint: BTreeMap<String, EndpointMetrics>,
}

/// Global aggregates partitioned by `(method, path)`.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointMetrics {
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    #[serde(rename = "successCount")]
    pub success_count: u64,
    #[serde(rename = "failureCount")]
    pub failure_count: u64,
    #[serde(rename = "errorRatePct")]
    pub error_rate_pct: f64,
    #[serde(rename = "avgLatencyMs")]
    pub avg_latency_ms: f64,
    #[serde(rename = "p50LatencyMs")]
    pub p50_latency_ms: u64,
    #[serde(rename = "p90LatencyMs")]
    pub p90_latency_ms: u64,
    #[serde(rename = "p99LatencyMs")]
    pub p99_latency_ms: u64,
    #[serde(rename = "minLatencyMs")]
    pub min_latency_ms: u64,
    #[serde(rename = "maxLatencyMs")]
    pub max_latency_ms: u64,
}

impl EndpointMetrics {
    fn from_accumulator(acc: &Accumulator) -> Self {
        Self {
            total_requests: acc.total_requests,
            success_count: acc.success_count,
            failure_count: acc.failure_count,
            error_rate_pct: acc.error_rate_pct(),
            avg_latency_ms: acc.avg_latency_ms,
            p50_latency_ms: acc.percentile(50.0),
            p90_latency_ms: acc.percentile(90.0),
            p99_latency_ms: acc.percentile(99.0),
            min_latency_ms: acc.min_latency_ms,
            max_latency_ms: acc.max_latency_ms,
        }
    }
}
