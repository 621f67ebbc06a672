//! Failure-pattern detection over recorded metric streams
//!
//! A detector run reads the rolling metric window, evaluates the pattern
//! checks and persists positive findings as detections. Repeat findings of
//! a pattern are deduplicated against unresolved detections, and active
//! detections auto-resolve once their pattern stops being observed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::config::DetectorConfig;
use crate::error::{Error, Result};

mod checks;
pub mod streams;

use checks::{run_checks, WindowedMetrics, CHECKS};
use streams::MetricsReader;

/// The failure shapes the detector can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePattern {
    /// Error rate well above the service baseline
    ErrorSpike,
    /// Latency climbing past its baseline or an absolute ceiling
    PerformanceDegradation,
    /// Several services failing inside the same short interval
    CascadeFailure,
    /// Memory, timeout or capacity pressure
    ResourceExhaustion,
    /// An external dependency reporting unhealthy
    DependencyFailure,
}

impl FailurePattern {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorSpike => "error_spike",
            Self::PerformanceDegradation => "performance_degradation",
            Self::CascadeFailure => "cascade_failure",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::DependencyFailure => "dependency_failure",
        }
    }
}

impl fmt::Display for FailurePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a detection is, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth a look eventually
    Low,
    /// Worth a look soon
    Medium,
    /// Degrading user-visible behavior
    High,
    /// Actively breaking the system
    Critical,
}

impl Severity {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a stored detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    /// Newly raised, nobody has looked yet
    Active,
    /// An operator is on it
    Investigating,
    /// Closed with a resolution note
    Resolved,
    /// Acknowledged but intentionally muted
    Suppressed,
}

impl DetectionStatus {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::Suppressed => "suppressed",
        }
    }
}

impl fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dated event in a detection's reconstructed narrative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When the event happened
    pub at: DateTime<Utc>,
    /// What happened
    pub event: String,
}

/// Urgency attached to a recommended action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPriority {
    /// Whenever convenient
    Low,
    /// During normal operations
    Medium,
    /// Today
    High,
    /// Right now
    Urgent,
}

impl ActionPriority {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for ActionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete remediation step suggested alongside a detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// What to do
    pub action: String,
    /// How urgently
    pub priority: ActionPriority,
    /// Why it should help
    pub rationale: String,
}

/// The detector's best reconstruction of what went wrong.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    /// Most likely cause
    pub primary_cause: String,
    /// Supporting observations
    pub contributing_factors: Vec<String>,
    /// Ordered events behind the finding
    pub timeline: Vec<TimelineEntry>,
}

/// A stored failure detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetection {
    /// Unique id
    pub id: Uuid,
    /// Which pattern fired
    pub pattern: FailurePattern,
    /// How bad it is
    pub severity: Severity,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Services involved
    pub affected_services: Vec<String>,
    /// Reconstructed cause and timeline
    pub root_cause: RootCause,
    /// Suggested remediation, ordered by priority
    pub recommendations: Vec<Recommendation>,
    /// Lifecycle status
    pub status: DetectionStatus,
    /// When the pattern was detected
    pub detected_at: DateTime<Utc>,
    /// When it was resolved, if it has been
    pub resolved_at: Option<DateTime<Utc>>,
    /// Resolution note
    pub resolution: Option<String>,
}

/// Persistence seam for detections.
#[async_trait]
pub trait DetectionStore: Send + Sync {
    /// Store a new detection.
    async fn insert(&self, detection: FailureDetection) -> Result<()>;

    /// Detections still being worked, oldest first.
    async fn active(&self) -> Result<Vec<FailureDetection>>;

    /// Most recent unresolved detection of `pattern` raised at or after
    /// `since`. Suppressed detections count, resolved ones do not.
    async fn latest_active_with_pattern_since(
        &self,
        pattern: FailurePattern,
        since: DateTime<Utc>,
    ) -> Result<Option<FailureDetection>>;

    /// Close a detection with a resolution note.
    async fn resolve(&self, id: Uuid, resolution: &str) -> Result<FailureDetection>;
}

/// Keeps detections in process memory.
#[derive(Default)]
pub struct InMemoryDetectionStore {
    detections: DashMap<Uuid, FailureDetection>,
}

impl InMemoryDetectionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored detection regardless of status, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<FailureDetection> {
        let mut all: Vec<FailureDetection> =
            self.detections.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by_key(|detection| detection.detected_at);
        all
    }
}

#[async_trait]
impl DetectionStore for InMemoryDetectionStore {
    async fn insert(&self, detection: FailureDetection) -> Result<()> {
        self.detections.insert(detection.id, detection);
        Ok(())
    }

    async fn active(&self) -> Result<Vec<FailureDetection>> {
        let mut active: Vec<FailureDetection> = self
            .detections
            .iter()
            .filter(|entry| {
                matches!(
                    entry.status,
                    DetectionStatus::Active | DetectionStatus::Investigating
                )
            })
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by_key(|detection| detection.detected_at);
        Ok(active)
    }

    async fn latest_active_with_pattern_since(
        &self,
        pattern: FailurePattern,
        since: DateTime<Utc>,
    ) -> Result<Option<FailureDetection>> {
        Ok(self
            .detections
            .iter()
            .filter(|entry| {
                entry.pattern == pattern
                    && entry.status != DetectionStatus::Resolved
                    && entry.detected_at >= since
            })
            .map(|entry| entry.value().clone())
            .max_by_key(|detection| detection.detected_at))
    }

    async fn resolve(&self, id: Uuid, resolution: &str) -> Result<FailureDetection> {
        let mut entry = self
            .detections
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("detection {id}")))?;
        entry.status = DetectionStatus::Resolved;
        entry.resolved_at = Some(Utc::now());
        entry.resolution = Some(resolution.to_string());
        Ok(entry.clone())
    }
}

const AUTO_RESOLUTION: &str = "condition no longer observed";

/// Evaluates the pattern checks against the rolling metric window.
pub struct FailureDetector {
    config: DetectorConfig,
    metrics: Arc<dyn MetricsReader>,
    store: Arc<dyn DetectionStore>,
    breaker: Arc<CircuitBreaker>,
}

impl FailureDetector {
    /// Create a detector over the given metric source and detection store.
    #[must_use]
    pub fn new(
        config: DetectorConfig,
        metrics: Arc<dyn MetricsReader>,
        store: Arc<dyn DetectionStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            metrics,
            store,
            breaker,
        }
    }

    /// One detection pass. Gathers the window, runs every check, resolves
    /// active detections whose pattern is no longer observed, and stores
    /// findings that are not duplicates of a recent unresolved detection.
    ///
    /// Returns only the detections this pass created.
    ///
    /// # Errors
    ///
    /// Fails when the metrics reader or the detection store does.
    pub async fn run(&self) -> Result<Vec<FailureDetection>> {
        let now = Utc::now();
        let window_start = floor(now, self.config.window);
        let metrics = WindowedMetrics {
            window_start,
            recent_start: floor(now, self.config.recent_span),
            now,
            errors: self.metrics.errors_since(window_start).await?,
            health_checks: self.metrics.health_checks_since(window_start).await?,
            latencies: self.metrics.latencies_since(window_start).await?,
            breaker_events: self.metrics.breaker_events_since(window_start).await?,
            open_circuits: self.breaker.open_services(),
        };

        let findings = run_checks(&self.config, &metrics, CHECKS);
        let observed: HashSet<FailurePattern> =
            findings.iter().map(|finding| finding.pattern).collect();

        for detection in self.store.active().await? {
            if detection.status == DetectionStatus::Active && !observed.contains(&detection.pattern)
            {
                info!(pattern = %detection.pattern, id = %detection.id, "auto-resolving detection");
                self.store.resolve(detection.id, AUTO_RESOLUTION).await?;
            }
        }

        let dedup_floor = floor(now, self.config.dedup_window);
        let mut created = Vec::new();
        for finding in findings {
            if let Some(existing) = self
                .store
                .latest_active_with_pattern_since(finding.pattern, dedup_floor)
                .await?
            {
                debug!(
                    pattern = %finding.pattern,
                    existing = %existing.id,
                    "pattern already detected, skipping duplicate"
                );
                continue;
            }
            let detection = FailureDetection {
                id: Uuid::new_v4(),
                pattern: finding.pattern,
                severity: finding.severity,
                confidence: finding.confidence,
                affected_services: finding.affected_services,
                root_cause: RootCause {
                    primary_cause: finding.primary_cause,
                    contributing_factors: finding.contributing_factors,
                    timeline: finding.timeline,
                },
                recommendations: finding.recommendations,
                status: DetectionStatus::Active,
                detected_at: now,
                resolved_at: None,
                resolution: None,
            };
            info!(
                pattern = %detection.pattern,
                severity = %detection.severity,
                confidence = detection.confidence,
                services = ?detection.affected_services,
                "failure pattern detected"
            );
            self.store.insert(detection.clone()).await?;
            created.push(detection);
        }
        Ok(created)
    }

    /// Close a detection with an operator-supplied resolution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no detection has that id.
    pub async fn resolve(&self, id: Uuid, resolution: &str) -> Result<FailureDetection> {
        self.store.resolve(id, resolution).await
    }

    /// Detections still being worked.
    ///
    /// # Errors
    ///
    /// Fails when the detection store does.
    pub async fn active(&self) -> Result<Vec<FailureDetection>> {
        self.store.active().await
    }
}

fn floor(now: DateTime<Utc>, span: std::time::Duration) -> DateTime<Utc> {
    TimeDelta::from_std(span)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
