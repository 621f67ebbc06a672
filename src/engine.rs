//! Guarded analysis call path
//!
//! [`ResilienceEngine`] owns the circuit breaker, retry classifier,
//! fallback analyzer, quality assessor and comparison engine, and runs the
//! full degradation flow: breaker gate, upstream attempt, retry with
//! backoff, quality-gated fallback, and the later upgrade decision once an
//! AI result becomes available again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::comparison::{AiAnalysis, ComparisonEngine, ComparisonResult, UpgradeUrgency};
use crate::config::Config;
use crate::detector::streams::{MetricsRecorder, ServiceKind};
use crate::error::{Error, Result};
use crate::fallback::{FallbackAnalyzer, FallbackReason, FallbackResult};
use crate::health::{HealthLabel, HealthRegistry};
use crate::quality::{QualityAssessment, QualityAssessor};
use crate::retry::{classify, RetryClassifier, RetryContext};
use crate::scheduler::{TaskScheduler, TokioScheduler};

/// Client port for the upstream AI analysis service.
///
/// The engine never imports a concrete client; callers inject one at
/// construction time.
#[async_trait]
pub trait UpstreamAnalyzer: Send + Sync {
    /// Service name used for breaker, health and metrics bookkeeping.
    fn service_name(&self) -> &str;

    /// One analysis attempt against the upstream.
    async fn analyze(&self, text: &str, context: Option<&str>) -> Result<AiAnalysis>;
}

/// How a guarded analysis was produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// The upstream AI answered within the retry budget.
    Ai {
        /// The upstream result
        analysis: AiAnalysis,
        /// Attempts spent, including the successful one
        attempts: u32,
    },
    /// The deterministic fallback stood in.
    Fallback {
        /// The fallback result
        result: FallbackResult,
        /// Quality gate verdict for the result
        assessment: QualityAssessment,
        /// Upstream attempts spent before degrading (zero when the
        /// circuit was already open)
        attempts: u32,
    },
}

impl AnalysisOutcome {
    /// True when the fallback produced this outcome.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Id of the stored fallback result, if this outcome is one.
    #[must_use]
    pub fn fallback_id(&self) -> Option<Uuid> {
        match self {
            Self::Fallback { result, .. } => Some(result.id),
            Self::Ai { .. } => None,
        }
    }
}

/// Handed to the upgrade handler when a scheduled upgrade fires.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Id of the fallback result being replaced
    pub fallback_id: Uuid,
    /// Upstream service the replacement came from
    pub service: String,
    /// The AI analysis to replace the fallback with
    pub ai: AiAnalysis,
    /// Queue priority the comparison assigned
    pub urgency: UpgradeUrgency,
    /// Why the upgrade was recommended
    pub reason: String,
    /// Expected quality gain
    pub estimated_improvement: f64,
}

/// Callback invoked when a scheduled upgrade fires.
pub type UpgradeHandler = Arc<dyn Fn(UpgradeRequest) + Send + Sync>;

/// Fallback results kept around for a possible upgrade.
const PENDING_CAP: usize = 1024;

/// Facade over the whole degradation pipeline.
pub struct ResilienceEngine {
    breaker: Arc<CircuitBreaker>,
    classifier: RetryClassifier,
    analyzer: FallbackAnalyzer,
    assessor: QualityAssessor,
    comparator: ComparisonEngine,
    health: Arc<HealthRegistry>,
    recorder: Arc<MetricsRecorder>,
    scheduler: Arc<dyn TaskScheduler>,
    upstream: Arc<dyn UpstreamAnalyzer>,
    pending: Arc<DashMap<Uuid, FallbackResult>>,
    upgrade_handler: Option<UpgradeHandler>,
}

impl ResilienceEngine {
    /// Build an engine from configuration and an upstream client.
    #[must_use]
    pub fn new(config: &Config, upstream: Arc<dyn UpstreamAnalyzer>) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(&config.breaker)),
            classifier: RetryClassifier::new(&config.retry),
            analyzer: FallbackAnalyzer::new(&config.fallback),
            assessor: QualityAssessor::new(&config.quality),
            comparator: ComparisonEngine::new(&config.upgrade, &config.quality),
            health: Arc::new(HealthRegistry::new()),
            recorder: Arc::new(MetricsRecorder::new()),
            scheduler: Arc::new(TokioScheduler),
            upstream,
            pending: Arc::new(DashMap::new()),
            upgrade_handler: None,
        }
    }

    /// Replace the task scheduler (tests capture tasks this way).
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Install the callback that applies a scheduled upgrade.
    #[must_use]
    pub fn with_upgrade_handler(mut self, handler: UpgradeHandler) -> Self {
        self.upgrade_handler = Some(handler);
        self
    }

    /// Shared circuit breaker, for wiring the detector and operator
    /// overrides.
    #[must_use]
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Shared health registry.
    #[must_use]
    pub fn health(&self) -> Arc<HealthRegistry> {
        Arc::clone(&self.health)
    }

    /// Shared metrics recorder, the detector's stream source.
    #[must_use]
    pub fn recorder(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.recorder)
    }

    /// Run one guarded analysis.
    ///
    /// An open circuit routes straight to fallback without recording a new
    /// failure. Retryable upstream failures back off and retry up to the
    /// configured attempt budget, then degrade to fallback. Validation and
    /// authentication failures surface as [`Error::Fatal`] instead of being
    /// masked by a degraded result.
    #[instrument(skip(self, text, context), fields(service = %self.upstream.service_name()))]
    pub async fn analyze_text(
        &self,
        text: &str,
        context: Option<&str>,
    ) -> Result<AnalysisOutcome> {
        let service = self.upstream.service_name().to_string();

        if !self.breaker.can_proceed(&service) {
            debug!(service, "circuit open, routing straight to fallback");
            return Ok(self.degrade(text, FallbackReason::CircuitOpen, 0));
        }

        let mut attempt: u32 = 1;
        loop {
            let started = Instant::now();
            match self.upstream.analyze(text, context).await {
                Ok(analysis) => {
                    let latency = started.elapsed();
                    if let Some(change) = self.breaker.record_success(&service, latency) {
                        self.recorder.record_breaker_event(change);
                    }
                    self.health.record_success(&service, latency);
                    self.recorder.record_latency(&service, latency);
                    self.recorder.record_health_check(
                        &service,
                        ServiceKind::Dependency,
                        HealthLabel::Healthy,
                        None,
                    );
                    debug!(
                        service,
                        attempt,
                        latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        "upstream analysis succeeded"
                    );
                    return Ok(AnalysisOutcome::Ai {
                        analysis,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    let message = error.to_string();
                    let kind = classify(&message);
                    if !RetryClassifier::is_fallback_eligible(kind) {
                        warn!(service, kind = %kind, error = %message, "fatal upstream error");
                        return Err(Error::Fatal { kind, message });
                    }

                    self.health.record_failure(&service);
                    self.recorder.record_error(&service, &message);
                    self.recorder.record_health_check(
                        &service,
                        ServiceKind::Dependency,
                        self.health.report(&service).label,
                        Some(message.clone()),
                    );
                    if let Some(change) = self.breaker.record_failure(&service, &message) {
                        self.recorder.record_breaker_event(change);
                    }

                    let ctx = RetryContext::new(attempt, kind, self.breaker.snapshot(&service));
                    let decision = self.classifier.calculate_strategy(&ctx);
                    if decision.should_retry {
                        debug!(
                            service,
                            attempt,
                            kind = %kind,
                            delay_ms = u64::try_from(decision.delay.as_millis()).unwrap_or(u64::MAX),
                            "retrying upstream"
                        );
                        tokio::time::sleep(decision.delay).await;
                        attempt += 1;
                        continue;
                    }

                    let reason = if self.breaker.snapshot(&service).state == CircuitState::Open {
                        FallbackReason::CircuitOpen
                    } else {
                        FallbackReason::RetriesExhausted
                    };
                    info!(
                        service,
                        attempts = attempt,
                        kind = %kind,
                        reason = %reason,
                        "degrading to fallback analysis"
                    );
                    return Ok(self.degrade(text, reason, attempt));
                }
            }
        }
    }

    /// Compare a now-available AI analysis against a stored fallback result
    /// and, when the comparison recommends it, schedule the upgrade.
    ///
    /// Breaker state is re-read here. A circuit that opened after the
    /// fallback was produced vetoes the upgrade even if the comparison
    /// otherwise favors it.
    pub fn decide_upgrade(&self, fallback_id: Uuid, ai: &AiAnalysis) -> Result<ComparisonResult> {
        let fallback = self
            .pending
            .get(&fallback_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("fallback result {fallback_id}")))?;

        let service = self.upstream.service_name().to_string();
        let circuit_open = self.breaker.status(&service).state == CircuitState::Open;
        let comparison = self.comparator.compare(ai, &fallback, circuit_open);

        let recommendation = &comparison.upgrade_recommendation;
        if recommendation.should_upgrade {
            let delay = upgrade_delay(recommendation.urgency);
            info!(
                fallback_id = %fallback_id,
                urgency = %recommendation.urgency,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "upgrade scheduled"
            );
            let request = UpgradeRequest {
                fallback_id,
                service,
                ai: ai.clone(),
                urgency: recommendation.urgency,
                reason: recommendation.reason.clone(),
                estimated_improvement: recommendation.estimated_improvement,
            };
            let handler = self.upgrade_handler.clone();
            let pending = Arc::clone(&self.pending);
            self.scheduler.run_after(
                delay,
                Box::pin(async move {
                    pending.remove(&request.fallback_id);
                    if let Some(handler) = handler {
                        handler(request);
                    }
                }),
            );
        } else {
            debug!(
                fallback_id = %fallback_id,
                reason = %recommendation.reason,
                "keeping fallback result"
            );
        }
        Ok(comparison)
    }

    /// Whether a fallback result is still awaiting a possible upgrade.
    #[must_use]
    pub fn is_pending(&self, fallback_id: Uuid) -> bool {
        self.pending.contains_key(&fallback_id)
    }

    fn degrade(&self, text: &str, reason: FallbackReason, attempts: u32) -> AnalysisOutcome {
        let result = self.analyzer.analyze(text, reason);
        let assessment = self.assessor.validate(&result);
        if !assessment.is_valid {
            warn!(
                fallback_id = %result.id,
                quality = assessment.quality_score,
                issues = assessment.issues.len(),
                "fallback result failed the quality gate"
            );
        }
        self.remember(result.clone());
        AnalysisOutcome::Fallback {
            result,
            assessment,
            attempts,
        }
    }

    fn remember(&self, result: FallbackResult) {
        if self.pending.len() >= PENDING_CAP {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|entry| entry.analyzed_at)
                .map(|entry| *entry.key());
            if let Some(id) = oldest {
                self.pending.remove(&id);
            }
        }
        self.pending.insert(result.id, result);
    }
}

fn upgrade_delay(urgency: UpgradeUrgency) -> Duration {
    match urgency {
        UpgradeUrgency::Urgent => Duration::ZERO,
        UpgradeUrgency::High => Duration::from_secs(1),
        UpgradeUrgency::Normal => Duration::from_secs(10),
        UpgradeUrgency::Low => Duration::from_secs(60),
    }
}
