//! Per-service health tracking with latency percentiles
//!
//! Keeps cumulative success/failure counts, consecutive-failure streaks and
//! a bounded latency histogram for every upstream service the engine talks
//! to. The circuit breaker decides routing; this registry answers "how has
//! this service been doing lately" for status surfaces and logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Consecutive failures before a service is labelled unhealthy.
const UNHEALTHY_AFTER: u64 = 3;

/// Samples kept per service for percentile calculation.
const HISTOGRAM_CAPACITY: usize = 1000;

/// Coarse health classification for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLabel {
    /// Operating normally
    Healthy,
    /// Recent trouble, still serving
    Degraded,
    /// Persistently failing
    Unhealthy,
}

impl HealthLabel {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health snapshot for one service.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Service name
    pub service: String,
    /// Derived label
    pub label: HealthLabel,
    /// Total successful calls
    pub success_count: u64,
    /// Total failed calls
    pub failure_count: u64,
    /// Current consecutive-failure streak
    pub consecutive_failures: u64,
    /// Last successful call
    pub last_success_at: Option<DateTime<Utc>>,
    /// Last failed call
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Median latency in milliseconds
    pub latency_p50_ms: Option<u64>,
    /// 95th percentile latency in milliseconds
    pub latency_p95_ms: Option<u64>,
    /// 99th percentile latency in milliseconds
    pub latency_p99_ms: Option<u64>,
}

struct ServiceHealth {
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    last_success_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    latencies: RwLock<LatencyHistogram>,
}

impl ServiceHealth {
    fn new() -> Self {
        Self {
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_success_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            latencies: RwLock::new(LatencyHistogram::new(HISTOGRAM_CAPACITY)),
        }
    }

    fn label(&self) -> HealthLabel {
        match self.consecutive_failures.load(Ordering::Relaxed) {
            0 => HealthLabel::Healthy,
            n if n < UNHEALTHY_AFTER => HealthLabel::Degraded,
            _ => HealthLabel::Unhealthy,
        }
    }
}

/// Registry of per-service health trackers.
pub struct HealthRegistry {
    services: DashMap<String, ServiceHealth>,
}

impl HealthRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Record a successful call with its latency.
    pub fn record_success(&self, service: &str, latency: Duration) {
        let entry = self.services.entry(service.to_string()).or_insert_with(ServiceHealth::new);
        let was_unhealthy = entry.label() == HealthLabel::Unhealthy;

        entry.success_count.fetch_add(1, Ordering::Relaxed);
        entry.consecutive_failures.store(0, Ordering::Relaxed);
        entry.last_success_ms.store(epoch_millis(), Ordering::Relaxed);
        entry.latencies.write().record(latency);

        if was_unhealthy {
            info!(service, "service recovered");
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, service: &str) {
        let entry = self.services.entry(service.to_string()).or_insert_with(ServiceHealth::new);

        entry.failure_count.fetch_add(1, Ordering::Relaxed);
        let streak = entry.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        entry.last_failure_ms.store(epoch_millis(), Ordering::Relaxed);

        if streak == UNHEALTHY_AFTER {
            warn!(service, consecutive_failures = streak, "service marked unhealthy");
        }
    }

    /// Health report for one service. Unknown services report healthy with
    /// zero counts.
    #[must_use]
    pub fn report(&self, service: &str) -> HealthReport {
        self.services.get(service).map_or_else(
            || HealthReport {
                service: service.to_string(),
                label: HealthLabel::Healthy,
                success_count: 0,
                failure_count: 0,
                consecutive_failures: 0,
                last_success_at: None,
                last_failure_at: None,
                latency_p50_ms: None,
                latency_p95_ms: None,
                latency_p99_ms: None,
            },
            |entry| Self::build_report(service, &entry),
        )
    }

    /// Reports for every tracked service.
    #[must_use]
    pub fn reports(&self) -> Vec<HealthReport> {
        self.services
            .iter()
            .map(|entry| Self::build_report(entry.key(), entry.value()))
            .collect()
    }

    fn build_report(service: &str, entry: &ServiceHealth) -> HealthReport {
        let latencies = entry.latencies.read();
        HealthReport {
            service: service.to_string(),
            label: entry.label(),
            success_count: entry.success_count.load(Ordering::Relaxed),
            failure_count: entry.failure_count.load(Ordering::Relaxed),
            consecutive_failures: entry.consecutive_failures.load(Ordering::Relaxed),
            last_success_at: timestamp(entry.last_success_ms.load(Ordering::Relaxed)),
            last_failure_at: timestamp(entry.last_failure_ms.load(Ordering::Relaxed)),
            latency_p50_ms: latencies.percentile(0.50),
            latency_p95_ms: latencies.percentile(0.95),
            latency_p99_ms: latencies.percentile(0.99),
        }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn timestamp(ms: u64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(ms as i64)
}

/// Bounded ring of latency samples in milliseconds.
struct LatencyHistogram {
    samples: std::collections::VecDeque<u64>,
    capacity: usize,
}

impl LatencyHistogram {
    fn new(capacity: usize) -> Self {
        Self {
            samples: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, latency: Duration) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency.as_millis() as u64);
    }

    fn percentile(&self, p: f64) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64) * p).floor() as usize;
        Some(sorted[index.min(sorted.len() - 1)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_follows_consecutive_failures() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.report("svc").label, HealthLabel::Healthy);

        registry.record_failure("svc");
        assert_eq!(registry.report("svc").label, HealthLabel::Degraded);

        registry.record_failure("svc");
        registry.record_failure("svc");
        assert_eq!(registry.report("svc").label, HealthLabel::Unhealthy);
    }

    #[test]
    fn success_clears_the_streak() {
        let registry = HealthRegistry::new();
        registry.record_failure("svc");
        registry.record_failure("svc");
        registry.record_failure("svc");
        assert_eq!(registry.report("svc").label, HealthLabel::Unhealthy);

        registry.record_success("svc", Duration::from_millis(30));
        let report = registry.report("svc");
        assert_eq!(report.label, HealthLabel::Healthy);
        assert_eq!(report.consecutive_failures, 0);
        assert_eq!(report.failure_count, 3);
    }

    #[test]
    fn report_carries_counts_and_percentiles() {
        let registry = HealthRegistry::new();
        registry.record_success("svc", Duration::from_millis(50));
        registry.record_success("svc", Duration::from_millis(100));
        registry.record_failure("svc");

        let report = registry.report("svc");
        assert_eq!(report.success_count, 2);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.consecutive_failures, 1);
        assert!(report.last_success_at.is_some());
        assert!(report.last_failure_at.is_some());
        assert!(report.latency_p50_ms.is_some());
    }

    #[test]
    fn histogram_keeps_the_newest_samples() {
        let mut histogram = LatencyHistogram::new(5);
        for i in 1..=10 {
            histogram.record(Duration::from_millis(i * 10));
        }
        assert_eq!(histogram.samples.len(), 5);

        // Only 60..=100 remain.
        let p50 = histogram.percentile(0.50).unwrap();
        assert!((70..=90).contains(&p50));
    }

    #[test]
    fn percentiles_on_small_sample_sets() {
        let mut histogram = LatencyHistogram::new(10);
        for ms in [10, 20, 30, 40, 50] {
            histogram.record(Duration::from_millis(ms));
        }
        assert_eq!(histogram.percentile(0.50), Some(30));
        assert!(histogram.percentile(0.95).unwrap() >= 45);
    }
}
