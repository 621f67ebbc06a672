//! Metric streams consumed by the failure detector
//!
//! Four append-only streams: error events, health-check results, latency
//! samples and circuit-breaker transitions. The [`MetricsReader`] port
//! abstracts where they live; [`MetricsRecorder`] is the bounded
//! in-memory implementation fed by the resilience engine, also usable
//! from JSON snapshots for offline analysis.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::breaker::{CircuitState, StateChange};
use crate::error::Result;
use crate::health::HealthLabel;

/// Events kept per stream before the oldest are dropped.
const STREAM_CAPACITY: usize = 10_000;

/// One failed upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Service that failed
    pub service: String,
    /// Raw error message
    pub message: String,
    /// When the failure happened
    pub at: DateTime<Utc>,
}

/// Whether a health check targets one of our own services or an external
/// dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// A service we operate
    Internal,
    /// An external dependency
    Dependency,
}

/// One health-check observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Checked service
    pub service: String,
    /// Internal service or external dependency
    pub kind: ServiceKind,
    /// Reported status
    pub status: HealthLabel,
    /// Optional detail from the checker
    pub message: Option<String>,
    /// When the check ran
    pub at: DateTime<Utc>,
}

/// One latency measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySample {
    /// Measured service
    pub service: String,
    /// Wall-clock latency in milliseconds
    pub millis: u64,
    /// When the call completed
    pub at: DateTime<Utc>,
}

/// One circuit-breaker transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerEvent {
    /// Service whose circuit transitioned
    pub service: String,
    /// State before
    pub from: CircuitState,
    /// State after
    pub to: CircuitState,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

impl From<StateChange> for BreakerEvent {
    fn from(change: StateChange) -> Self {
        Self {
            service: change.service,
            from: change.from,
            to: change.to,
            at: change.at,
        }
    }
}

/// Read access to the four metric streams.
#[async_trait]
pub trait MetricsReader: Send + Sync {
    /// Error events at or after `since`.
    async fn errors_since(&self, since: DateTime<Utc>) -> Result<Vec<ErrorEvent>>;
    /// Health-check results at or after `since`.
    async fn health_checks_since(&self, since: DateTime<Utc>) -> Result<Vec<HealthCheckResult>>;
    /// Latency samples at or after `since`.
    async fn latencies_since(&self, since: DateTime<Utc>) -> Result<Vec<LatencySample>>;
    /// Breaker transitions at or after `since`.
    async fn breaker_events_since(&self, since: DateTime<Utc>) -> Result<Vec<BreakerEvent>>;
}

/// Serializable dump of all four streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Error events, oldest first
    #[serde(default)]
    pub errors: Vec<ErrorEvent>,
    /// Health-check results, oldest first
    #[serde(default)]
    pub health_checks: Vec<HealthCheckResult>,
    /// Latency samples, oldest first
    #[serde(default)]
    pub latencies: Vec<LatencySample>,
    /// Breaker transitions, oldest first
    #[serde(default)]
    pub breaker_events: Vec<BreakerEvent>,
}

impl MetricsSnapshot {
    /// Shift every timestamp so the newest event lands at the current
    /// instant. Lets a captured snapshot be re-analyzed later without the
    /// rolling window aging it out.
    pub fn rebase_to_now(&mut self) {
        let newest = self
            .errors
            .iter()
            .map(|e| e.at)
            .chain(self.health_checks.iter().map(|h| h.at))
            .chain(self.latencies.iter().map(|l| l.at))
            .chain(self.breaker_events.iter().map(|b| b.at))
            .max();
        let Some(newest) = newest else { return };
        let shift = Utc::now() - newest;
        for event in &mut self.errors {
            event.at += shift;
        }
        for check in &mut self.health_checks {
            check.at += shift;
        }
        for sample in &mut self.latencies {
            sample.at += shift;
        }
        for event in &mut self.breaker_events {
            event.at += shift;
        }
    }
}

/// Bounded in-memory metric store.
///
/// Appends are lock-per-stream; when a stream reaches capacity the oldest
/// events fall off the front.
pub struct MetricsRecorder {
    errors: RwLock<VecDeque<ErrorEvent>>,
    health_checks: RwLock<VecDeque<HealthCheckResult>>,
    latencies: RwLock<VecDeque<LatencySample>>,
    breaker_events: RwLock<VecDeque<BreakerEvent>>,
}

impl MetricsRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            errors: RwLock::new(VecDeque::new()),
            health_checks: RwLock::new(VecDeque::new()),
            latencies: RwLock::new(VecDeque::new()),
            breaker_events: RwLock::new(VecDeque::new()),
        }
    }

    /// Create a recorder pre-seeded from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: MetricsSnapshot) -> Self {
        let recorder = Self::new();
        for event in snapshot.errors {
            push_bounded(&recorder.errors, event);
        }
        for check in snapshot.health_checks {
            push_bounded(&recorder.health_checks, check);
        }
        for sample in snapshot.latencies {
            push_bounded(&recorder.latencies, sample);
        }
        for event in snapshot.breaker_events {
            push_bounded(&recorder.breaker_events, event);
        }
        recorder
    }

    /// Record a failed call.
    pub fn record_error(&self, service: &str, message: &str) {
        push_bounded(
            &self.errors,
            ErrorEvent {
                service: service.to_string(),
                message: message.to_string(),
                at: Utc::now(),
            },
        );
    }

    /// Record a health-check observation.
    pub fn record_health_check(
        &self,
        service: &str,
        kind: ServiceKind,
        status: HealthLabel,
        message: Option<String>,
    ) {
        push_bounded(
            &self.health_checks,
            HealthCheckResult {
                service: service.to_string(),
                kind,
                status,
                message,
                at: Utc::now(),
            },
        );
    }

    /// Record a call latency.
    pub fn record_latency(&self, service: &str, latency: Duration) {
        push_bounded(
            &self.latencies,
            LatencySample {
                service: service.to_string(),
                millis: latency.as_millis() as u64,
                at: Utc::now(),
            },
        );
    }

    /// Record a circuit-breaker transition.
    pub fn record_breaker_event(&self, change: StateChange) {
        push_bounded(&self.breaker_events, BreakerEvent::from(change));
    }

    /// Dump all streams.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            errors: self.errors.read().iter().cloned().collect(),
            health_checks: self.health_checks.read().iter().cloned().collect(),
            latencies: self.latencies.read().iter().cloned().collect(),
            breaker_events: self.breaker_events.read().iter().cloned().collect(),
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(stream: &RwLock<VecDeque<T>>, event: T) {
    let mut stream = stream.write();
    if stream.len() >= STREAM_CAPACITY {
        stream.pop_front();
    }
    stream.push_back(event);
}

fn filter_since<T: Clone>(
    stream: &RwLock<VecDeque<T>>,
    since: DateTime<Utc>,
    at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    stream
        .read()
        .iter()
        .filter(|event| at(event) >= since)
        .cloned()
        .collect()
}

#[async_trait]
impl MetricsReader for MetricsRecorder {
    async fn errors_since(&self, since: DateTime<Utc>) -> Result<Vec<ErrorEvent>> {
        Ok(filter_since(&self.errors, since, |e| e.at))
    }

    async fn health_checks_since(&self, since: DateTime<Utc>) -> Result<Vec<HealthCheckResult>> {
        Ok(filter_since(&self.health_checks, since, |h| h.at))
    }

    async fn latencies_since(&self, since: DateTime<Utc>) -> Result<Vec<LatencySample>> {
        Ok(filter_since(&self.latencies, since, |l| l.at))
    }

    async fn breaker_events_since(&self, since: DateTime<Utc>) -> Result<Vec<BreakerEvent>> {
        Ok(filter_since(&self.breaker_events, since, |b| b.at))
    }
}

/// Timestamp shifted `seconds` into the past, for building fixtures.
#[cfg(test)]
pub(crate) fn seconds_ago(seconds: i64) -> DateTime<Utc> {
    Utc::now() - chrono::TimeDelta::seconds(seconds)
}
