//! Quality assessment for fallback results
//!
//! Scores a fallback result for trustworthiness from what the result
//! itself carries: confidence, signal diversity, timing and insight
//! richness. Pure function of the result, nothing persisted.

use serde::Serialize;
use tracing::debug;

use crate::config::QualityConfig;
use crate::fallback::FallbackResult;

/// A specific problem found while assessing a fallback result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    /// Confidence below 0.2
    VeryLowConfidence,
    /// No keywords, rules or patterns contributed
    NoSignals,
    /// Analysis took longer than the slow-processing threshold
    SlowProcessing,
    /// Result carries no insights
    NoInsights,
}

impl QualityIssue {
    /// Human-readable description for logs and operator output.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::VeryLowConfidence => "confidence score is very low",
            Self::NoSignals => "no analysis signals were detected",
            Self::SlowProcessing => "analysis took unusually long",
            Self::NoInsights => "result contains no insights",
        }
    }
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Outcome of validating one fallback result.
#[derive(Debug, Clone, Serialize)]
pub struct QualityAssessment {
    /// Whether the result is trustworthy enough to store and surface
    pub is_valid: bool,
    /// Trust score in [0, 1]
    pub quality_score: f64,
    /// Problems found, in evaluation order
    pub issues: Vec<QualityIssue>,
}

/// Processing time above which a result is penalized.
const SLOW_PROCESSING_MS: u64 = 5000;
/// Processing time below which a result earns a bonus.
const FAST_PROCESSING_MS: u64 = 100;

/// Scores fallback results for trustworthiness.
pub struct QualityAssessor {
    min_valid_score: f64,
    max_issues: usize,
}

impl QualityAssessor {
    /// Create an assessor from config.
    #[must_use]
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            min_valid_score: config.min_valid_score,
            max_issues: config.max_issues,
        }
    }

    /// Validate a fallback result.
    ///
    /// Starts from 0.5 and adjusts for confidence, signal diversity,
    /// processing time and insight count. Valid means the clamped score
    /// reaches the configured minimum with fewer than the maximum issues.
    #[must_use]
    pub fn validate(&self, result: &FallbackResult) -> QualityAssessment {
        let mut score: f64 = 0.5;
        let mut issues = Vec::new();

        if result.confidence_score < 0.2 {
            score -= 0.2;
            issues.push(QualityIssue::VeryLowConfidence);
        }
        if result.confidence_score > 0.6 {
            score += 0.1;
        }

        let signal_types = usize::from(!result.metadata.keywords_matched.is_empty())
            + usize::from(!result.metadata.rules_fired.is_empty())
            + usize::from(!result.metadata.pattern_matches.is_empty());
        if signal_types >= 2 {
            score += 0.2;
        } else if signal_types == 0 {
            score -= 0.3;
            issues.push(QualityIssue::NoSignals);
        }

        if result.processing_time_ms > SLOW_PROCESSING_MS {
            score -= 0.1;
            issues.push(QualityIssue::SlowProcessing);
        } else if result.processing_time_ms < FAST_PROCESSING_MS {
            score += 0.1;
        }

        match result.insights.len() {
            0 => {
                score -= 0.1;
                issues.push(QualityIssue::NoInsights);
            }
            1 => {}
            _ => score += 0.1,
        }

        let quality_score = score.clamp(0.0, 1.0);
        let is_valid = quality_score >= self.min_valid_score && issues.len() < self.max_issues;

        debug!(
            result_id = %result.id,
            quality = quality_score,
            valid = is_valid,
            issues = issues.len(),
            "fallback result assessed"
        );

        QualityAssessment {
            is_valid,
            quality_score,
            issues,
        }
    }
}
