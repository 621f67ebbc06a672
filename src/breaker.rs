//! Per-service circuit breaker
//!
//! One authoritative record per upstream service, created lazily on its
//! first failure and only ever transitioned, never deleted. All mutation of
//! a record happens under its `DashMap` entry guard, so concurrent
//! success/failure reporters for the same service serialize instead of
//! losing counter updates.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::BreakerConfig;
use crate::health::HealthLabel;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through to the upstream
    #[default]
    Closed,
    /// Calls short-circuit directly to fallback
    Open,
    /// One probe call is allowed through to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit state captured at a point in time, carried in retry contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// State at capture time
    pub state: CircuitState,
    /// Failures inside the rolling window at capture time
    pub failure_count: u32,
}

/// A state transition performed by a breaker operation.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    /// Service whose circuit transitioned
    pub service: String,
    /// State before the operation
    pub from: CircuitState,
    /// State after the operation
    pub to: CircuitState,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Status snapshot for one service's circuit.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    /// Service name
    pub service: String,
    /// Current state
    pub state: CircuitState,
    /// Failures inside the rolling window
    pub failure_count: u32,
    /// Derived health label
    pub health: HealthLabel,
    /// Last recorded failure
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Last time the failure count was reset
    pub last_reset_at: Option<DateTime<Utc>>,
    /// When an open circuit will next allow a probe
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ServiceRecord {
    state: CircuitState,
    /// Timestamps of failures inside the rolling window (oldest first)
    failures: VecDeque<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_reset_at: Option<DateTime<Utc>>,
    half_open_since: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    /// Set by `force_open`; suppresses the automatic cooldown probe until
    /// an operator calls `force_close`.
    forced_open: bool,
}

/// Per-service circuit breaker registry
pub struct CircuitBreaker {
    enabled: bool,
    failure_threshold: u32,
    failure_window: Duration,
    cooldown: Duration,
    services: DashMap<String, ServiceRecord>,
}

impl CircuitBreaker {
    /// Create a new breaker registry from config
    #[must_use]
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            enabled: config.enabled,
            failure_threshold: config.failure_threshold,
            failure_window: config.failure_window,
            cooldown: config.cooldown,
            services: DashMap::new(),
        }
    }

    /// Check whether a call to `service` may proceed.
    ///
    /// Open circuits transition to half-open once the cooldown has elapsed;
    /// in half-open a single probe is granted until its outcome is reported.
    #[tracing::instrument(skip(self))]
    pub fn can_proceed(&self, service: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let Some(mut record) = self.services.get_mut(service) else {
            // No record yet: the service has never failed.
            return true;
        };
        let now = Utc::now();
        self.advance_cooldown(service, &mut record, now);

        match record.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                warn!(service, "circuit open, rejecting call");
                false
            }
            CircuitState::HalfOpen => {
                if record.probe_in_flight && !self.elapsed(record.half_open_since, now) {
                    debug!(service, "probe already in flight, rejecting call");
                    false
                } else {
                    debug!(service, "circuit half-open, granting probe");
                    record.probe_in_flight = true;
                    record.half_open_since = Some(now);
                    true
                }
            }
        }
    }

    /// Record a failed call against `service`.
    ///
    /// Creates the record lazily on first failure. May transition
    /// closed→open (threshold reached) or half_open→open (failed probe).
    /// Failures reported while already open are ignored: the short-circuit
    /// is a routing signal, not new evidence.
    pub fn record_failure(&self, service: &str, error: &str) -> Option<StateChange> {
        if !self.enabled {
            return None;
        }

        let now = Utc::now();
        let mut record = self.services.entry(service.to_string()).or_default();

        match record.state {
            CircuitState::Closed => {
                self.prune_window(&mut record, now);
                record.failures.push_back(now);
                record.last_failure_at = Some(now);
                let count = record.failures.len() as u32;
                warn!(
                    service,
                    failures = count,
                    threshold = self.failure_threshold,
                    error,
                    "failure recorded"
                );
                if count >= self.failure_threshold {
                    return Some(self.transition(service, &mut record, CircuitState::Open, now));
                }
                None
            }
            CircuitState::HalfOpen => {
                record.failures.push_back(now);
                record.last_failure_at = Some(now);
                record.probe_in_flight = false;
                warn!(service, error, "probe failed, reopening circuit");
                Some(self.transition(service, &mut record, CircuitState::Open, now))
            }
            CircuitState::Open => {
                trace!(service, "failure while open ignored");
                None
            }
        }
    }

    /// Record a successful call against `service`.
    ///
    /// Resets the rolling failure count; a successful half-open probe closes
    /// the circuit.
    pub fn record_success(&self, service: &str, latency: Duration) -> Option<StateChange> {
        if !self.enabled {
            return None;
        }

        let now = Utc::now();
        let mut record = self.services.get_mut(service)?;

        match record.state {
            CircuitState::Closed => {
                if !record.failures.is_empty() {
                    record.failures.clear();
                    record.last_reset_at = Some(now);
                    trace!(service, "success reset failure count");
                }
                None
            }
            CircuitState::HalfOpen => {
                record.failures.clear();
                record.last_reset_at = Some(now);
                record.probe_in_flight = false;
                info!(
                    service,
                    latency_ms = latency.as_millis() as u64,
                    "probe succeeded, closing circuit"
                );
                Some(self.transition(service, &mut record, CircuitState::Closed, now))
            }
            CircuitState::Open => {
                trace!(service, "success while open ignored");
                None
            }
        }
    }

    /// Current status for `service`.
    ///
    /// Reading the status of an open circuit past its cooldown performs the
    /// open→half_open transition, so the next read after the cooldown
    /// reports half-open.
    pub fn status(&self, service: &str) -> BreakerStatus {
        let now = Utc::now();

        let Some(mut record) = self.services.get_mut(service) else {
            return BreakerStatus {
                service: service.to_string(),
                state: CircuitState::Closed,
                failure_count: 0,
                health: HealthLabel::Healthy,
                last_failure_at: None,
                last_reset_at: None,
                next_retry_at: None,
            };
        };
        self.advance_cooldown(service, &mut record, now);
        self.snapshot_status(service, &record)
    }

    /// Lightweight state+count snapshot for retry contexts.
    #[must_use]
    pub fn snapshot(&self, service: &str) -> CircuitSnapshot {
        self.services.get(service).map_or(
            CircuitSnapshot {
                state: CircuitState::Closed,
                failure_count: 0,
            },
            |record| CircuitSnapshot {
                state: record.state,
                failure_count: record.failures.len() as u32,
            },
        )
    }

    /// Status snapshots for every known service.
    #[must_use]
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        self.services
            .iter()
            .map(|entry| self.snapshot_status(entry.key(), entry.value()))
            .collect()
    }

    /// Services whose circuit is currently open.
    #[must_use]
    pub fn open_services(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|entry| entry.value().state == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Operator override: pin the circuit open.
    ///
    /// Bypasses the normal transition rules — the automatic cooldown probe
    /// is suppressed until `force_close` is called.
    pub fn force_open(&self, service: &str) -> Option<StateChange> {
        let now = Utc::now();
        let mut record = self.services.entry(service.to_string()).or_default();
        record.forced_open = true;
        record.last_failure_at = Some(now);
        record.probe_in_flight = false;
        warn!(service, "circuit forced open by operator");
        if record.state == CircuitState::Open {
            return None;
        }
        Some(self.transition(service, &mut record, CircuitState::Open, now))
    }

    /// Operator override: close the circuit and clear its failure window.
    pub fn force_close(&self, service: &str) -> Option<StateChange> {
        let now = Utc::now();
        let mut record = self.services.entry(service.to_string()).or_default();
        record.forced_open = false;
        record.failures.clear();
        record.probe_in_flight = false;
        record.last_reset_at = Some(now);
        warn!(service, "circuit forced closed by operator");
        if record.state == CircuitState::Closed {
            return None;
        }
        Some(self.transition(service, &mut record, CircuitState::Closed, now))
    }

    fn snapshot_status(&self, service: &str, record: &ServiceRecord) -> BreakerStatus {
        let failure_count = record.failures.len() as u32;
        let next_retry_at = if record.state == CircuitState::Open {
            record.last_failure_at.and_then(|t| {
                chrono::Duration::from_std(self.cooldown)
                    .ok()
                    .map(|d| t + d)
            })
        } else {
            None
        };

        BreakerStatus {
            service: service.to_string(),
            state: record.state,
            failure_count,
            health: self.health_label(record, failure_count),
            last_failure_at: record.last_failure_at,
            last_reset_at: record.last_reset_at,
            next_retry_at,
        }
    }

    fn health_label(&self, record: &ServiceRecord, failure_count: u32) -> HealthLabel {
        match record.state {
            CircuitState::Open => HealthLabel::Unhealthy,
            CircuitState::HalfOpen => HealthLabel::Degraded,
            CircuitState::Closed => {
                if failure_count * 2 >= self.failure_threshold {
                    HealthLabel::Degraded
                } else {
                    HealthLabel::Healthy
                }
            }
        }
    }

    /// Transition open→half_open when the cooldown has elapsed (unless the
    /// circuit was forced open by an operator).
    fn advance_cooldown(&self, service: &str, record: &mut ServiceRecord, now: DateTime<Utc>) {
        if record.state == CircuitState::Open
            && !record.forced_open
            && self.elapsed(record.last_failure_at, now)
        {
            record.probe_in_flight = false;
            record.half_open_since = Some(now);
            self.transition(service, record, CircuitState::HalfOpen, now);
        }
    }

    fn elapsed(&self, since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        since.is_some_and(|t| {
            now.signed_duration_since(t)
                .to_std()
                .is_ok_and(|e| e >= self.cooldown)
        })
    }

    fn prune_window(&self, record: &mut ServiceRecord, now: DateTime<Utc>) {
        while let Some(oldest) = record.failures.front() {
            let stale = now
                .signed_duration_since(*oldest)
                .to_std()
                .is_ok_and(|age| age > self.failure_window);
            if stale {
                record.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(
        &self,
        service: &str,
        record: &mut ServiceRecord,
        to: CircuitState,
        now: DateTime<Utc>,
    ) -> StateChange {
        let from = record.state;
        record.state = to;

        match to {
            CircuitState::Closed => {
                info!(service, %from, "circuit closed");
            }
            CircuitState::Open => {
                warn!(
                    service,
                    %from,
                    failures = record.failures.len(),
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                debug!(service, %from, "circuit half-open");
            }
        }

        StateChange {
            service: service.to_string(),
            from,
            to,
            at: now,
        }
    }
}
