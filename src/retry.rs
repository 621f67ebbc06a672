//! Error classification and retry strategy
//!
//! Classifies raw upstream error strings into an [`ErrorKind`], decides
//! whether a failed call should be retried (and after how long), and gates
//! which kinds are allowed to route to the fallback analyzer. Validation and
//! authentication errors are caller/configuration defects: they are never
//! retried and never masked by fallback output.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::breaker::{CircuitSnapshot, CircuitState};
use crate::config::RetryConfig;

/// Classified upstream error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connectivity failure (DNS, refused, reset)
    Network,
    /// Upstream throttling (429-equivalent)
    RateLimit,
    /// Call exceeded its deadline
    Timeout,
    /// Malformed request rejected by the upstream
    Validation,
    /// Upstream 5xx-equivalent failure
    ServiceError,
    /// Credential or permission failure
    Authentication,
}

impl ErrorKind {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::ServiceError => "service_error",
            Self::Authentication => "authentication",
        }
    }

    /// Kinds that indicate a caller/config defect rather than an outage.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Validation | Self::Authentication)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a raw upstream error message.
///
/// Matching is ordered: throttling and credential markers are checked before
/// the generic validation vocabulary ("invalid api key" is an authentication
/// failure, not a validation one), and timeouts before generic connectivity.
/// Unrecognized messages default to [`ErrorKind::ServiceError`], which is
/// retried a bounded number of times and remains fallback-eligible.
#[must_use]
pub fn classify(error: &str) -> ErrorKind {
    let msg = error.to_lowercase();

    let contains_any = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    if contains_any(&["rate limit", "too many requests", "429", "quota exceeded"]) {
        ErrorKind::RateLimit
    } else if contains_any(&[
        "unauthorized",
        "authentication",
        "api key",
        "forbidden",
        "401",
        "403",
        "credential",
    ]) {
        ErrorKind::Authentication
    } else if contains_any(&[
        "validation",
        "invalid",
        "bad request",
        "400",
        "422",
        "malformed",
        "unprocessable",
    ]) {
        ErrorKind::Validation
    } else if contains_any(&["timeout", "timed out", "deadline exceeded"]) {
        ErrorKind::Timeout
    } else if contains_any(&[
        "network",
        "connection",
        "dns",
        "refused",
        "reset by peer",
        "unreachable",
        "broken pipe",
    ]) {
        ErrorKind::Network
    } else {
        ErrorKind::ServiceError
    }
}

/// Context for a single failed call attempt.
///
/// Ephemeral: built right after a failure and consumed immediately by
/// [`RetryClassifier::calculate_strategy`] to decide the next action.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// 1-based attempt number of the call that just failed
    pub attempt: u32,
    /// Classified kind of the failure
    pub error_kind: ErrorKind,
    /// Circuit state and failure count captured at the time of the error
    pub circuit: CircuitSnapshot,
    /// When this context was created
    pub created_at: DateTime<Utc>,
}

impl RetryContext {
    /// Build a context for the attempt that just failed.
    #[must_use]
    pub fn new(attempt: u32, error_kind: ErrorKind, circuit: CircuitSnapshot) -> Self {
        Self {
            attempt,
            error_kind,
            circuit,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a retry-strategy calculation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    /// Whether another attempt should be made
    pub should_retry: bool,
    /// Backoff delay before the next attempt (zero when not retrying)
    pub delay: Duration,
    /// The classified error kind the decision was based on
    pub error_kind: ErrorKind,
}

impl RetryDecision {
    fn give_up(error_kind: ErrorKind) -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
            error_kind,
        }
    }
}

/// Retry strategy calculator
///
/// Exponential backoff with bounded additive jitter. The jitter fraction is
/// kept below 1.0 so that delays still strictly increase across attempts
/// until the maximum delay caps them.
#[derive(Debug, Clone)]
pub struct RetryClassifier {
    enabled: bool,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    rate_limit_min_delay: Duration,
    jitter_ratio: f64,
}

impl RetryClassifier {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            rate_limit_min_delay: config.rate_limit_min_delay,
            // A ratio >= 1.0 would let jitter overtake the next doubling and
            // break delay monotonicity.
            jitter_ratio: config.jitter_ratio.clamp(0.0, 0.9),
        }
    }

    /// Decide whether the failed attempt in `ctx` should be retried.
    ///
    /// Validation and authentication errors never retry. An open circuit
    /// forces `should_retry=false` regardless of kind: the breaker has
    /// already decided the service is down, so the caller should go straight
    /// to fallback. Rate-limited calls get a longer minimum delay.
    #[must_use]
    pub fn calculate_strategy(&self, ctx: &RetryContext) -> RetryDecision {
        self.calculate_strategy_with_rng(ctx, &mut rand::rng())
    }

    /// Same as [`calculate_strategy`](Self::calculate_strategy) with an
    /// injected jitter source, for deterministic tests.
    pub fn calculate_strategy_with_rng<R: Rng + ?Sized>(
        &self,
        ctx: &RetryContext,
        rng: &mut R,
    ) -> RetryDecision {
        let kind = ctx.error_kind;

        if !self.enabled || kind.is_permanent() {
            return RetryDecision::give_up(kind);
        }

        if ctx.circuit.state == CircuitState::Open {
            debug!(
                error_kind = %kind,
                attempt = ctx.attempt,
                "circuit open, skipping retry in favor of fallback"
            );
            return RetryDecision::give_up(kind);
        }

        if ctx.attempt >= self.max_attempts {
            debug!(
                error_kind = %kind,
                attempt = ctx.attempt,
                max_attempts = self.max_attempts,
                "retry attempts exhausted"
            );
            return RetryDecision::give_up(kind);
        }

        let delay = self.backoff_delay(ctx.attempt, kind, rng);
        RetryDecision {
            should_retry: true,
            delay,
            error_kind: kind,
        }
    }

    /// True for kinds that may be served by the fallback analyzer after
    /// retries are exhausted.
    #[must_use]
    pub fn is_fallback_eligible(kind: ErrorKind) -> bool {
        matches!(
            kind,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::ServiceError
        )
    }

    fn backoff_delay<R: Rng + ?Sized>(&self, attempt: u32, kind: ErrorKind, rng: &mut R) -> Duration {
        // attempt is 1-based; the first retry waits the base delay.
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay);

        let jitter = base.mul_f64(self.jitter_ratio * rng.random::<f64>());
        let mut delay = base.saturating_add(jitter).min(self.max_delay);

        if kind == ErrorKind::RateLimit {
            delay = delay.max(self.rate_limit_min_delay);
        }

        delay
    }
}
