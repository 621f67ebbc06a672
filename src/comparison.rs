//! AI/fallback result comparison and upgrade decisions
//!
//! Given an AI analysis and a stored fallback result for the same text,
//! computes sentiment agreement, quality differential and pattern
//! consistency, then walks a fixed decision ladder to recommend whether
//! the fallback should be replaced. The live circuit state and the cost
//! budget gate every upgrade regardless of how good the AI result looks.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{QualityConfig, UpgradeConfig};
use crate::fallback::{FallbackResult, Sentiment};
use crate::quality::QualityAssessor;

/// An analysis produced by the upstream AI service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysis {
    /// Sentiment category
    pub sentiment: Sentiment,
    /// Model-reported confidence in [0, 1]
    pub confidence_score: f64,
    /// Quality score if the upstream reports one
    pub quality_score: Option<f64>,
    /// Keywords the model surfaced
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Insights the model surfaced
    #[serde(default)]
    pub insights: Vec<String>,
}

impl AiAnalysis {
    /// Reported quality, or a confidence-derived estimate when the
    /// upstream does not report one.
    #[must_use]
    pub fn quality(&self) -> f64 {
        self.quality_score
            .unwrap_or_else(|| 0.6f64.mul_add(self.confidence_score, 0.3))
            .clamp(0.0, 1.0)
    }
}

/// Categorical sentiment agreement between the two results.
#[derive(Debug, Clone, Serialize)]
pub struct SentimentAgreement {
    /// Whether the categories match
    pub agreement: bool,
    /// AI sentiment
    pub ai_sentiment: Sentiment,
    /// Fallback sentiment
    pub fallback_sentiment: Sentiment,
    /// AI confidence minus fallback confidence
    pub confidence_delta: f64,
    /// Distance between the categories on a positive=1, neutral=0.5,
    /// negative=0 scale
    pub score_distance: f64,
}

/// Which side produced the more trustworthy result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAdvantage {
    /// AI quality clearly higher
    Ai,
    /// Fallback quality clearly higher
    Fallback,
    /// Within the similarity band
    Similar,
}

/// Quality scores side by side.
#[derive(Debug, Clone, Serialize)]
pub struct QualityComparison {
    /// AI quality
    pub ai_quality: f64,
    /// Fallback quality
    pub fallback_quality: f64,
    /// Advantage label
    pub advantage: QualityAdvantage,
}

/// Keyword and theme consistency between the two results.
#[derive(Debug, Clone, Serialize)]
pub struct PatternConsistency {
    /// Jaccard overlap of keyword sets
    pub keyword_overlap: f64,
    /// Jaccard overlap of insight vocabulary
    pub theme_alignment: f64,
    /// Explicit contradictions found
    pub contradictions: Vec<String>,
}

/// Queue priority for an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeUrgency {
    /// No rush
    Low,
    /// Ordinary queue position
    Normal,
    /// Jump the queue
    High,
    /// Process immediately
    Urgent,
}

impl UpgradeUrgency {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for UpgradeUrgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether and how urgently to replace the fallback result.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeRecommendation {
    /// Replace the stored fallback result
    pub should_upgrade: bool,
    /// Confidence in this recommendation
    pub confidence: f64,
    /// Human-readable reason
    pub reason: String,
    /// Queue priority
    pub urgency: UpgradeUrgency,
    /// Expected quality gain from upgrading
    pub estimated_improvement: f64,
}

/// Full comparison between an AI and a fallback result.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    /// Sentiment agreement
    pub sentiment_agreement: SentimentAgreement,
    /// Quality differential
    pub quality_comparison: QualityComparison,
    /// Keyword and theme consistency
    pub pattern_consistency: PatternConsistency,
    /// The upgrade decision
    pub upgrade_recommendation: UpgradeRecommendation,
}

/// Estimates the cost of re-running an analysis upstream.
///
/// The default implementation is a coarse keyword-count proxy; swap in a
/// token-count model via [`ComparisonEngine::with_estimator`] without
/// touching the decision ladder.
pub trait CostEstimator: Send + Sync {
    /// Estimated cost of upgrading the given fallback result.
    fn estimate(&self, fallback: &FallbackResult) -> f64;
}

/// Cost proxy: matched keyword count times a constant unit cost.
pub struct KeywordCountEstimator {
    unit_cost: f64,
}

impl KeywordCountEstimator {
    /// Create an estimator with the given per-keyword cost.
    #[must_use]
    pub fn new(unit_cost: f64) -> Self {
        Self { unit_cost }
    }
}

impl CostEstimator for KeywordCountEstimator {
    fn estimate(&self, fallback: &FallbackResult) -> f64 {
        fallback.metadata.keywords_matched.len() as f64 * self.unit_cost
    }
}

/// Words ignored when tokenizing insights for theme alignment.
const THEME_STOPWORDS: &[&str] = &[
    "the", "and", "a", "an", "of", "to", "in", "is", "are", "was", "were", "with", "for", "that",
    "this", "have", "has", "had", "not", "but", "you", "your", "may", "into",
];

/// Compares AI and fallback results and recommends upgrades.
pub struct ComparisonEngine {
    assessor: QualityAssessor,
    cost_budget: f64,
    quality_margin: f64,
    confidence_margin: f64,
    theme_alignment_floor: f64,
    low_quality_floor: f64,
    settled_quality: f64,
    estimator: Box<dyn CostEstimator>,
}

impl ComparisonEngine {
    /// Create an engine with the default keyword-count cost estimator.
    #[must_use]
    pub fn new(upgrade: &UpgradeConfig, quality: &QualityConfig) -> Self {
        Self {
            assessor: QualityAssessor::new(quality),
            cost_budget: upgrade.cost_budget,
            quality_margin: upgrade.quality_margin,
            confidence_margin: upgrade.confidence_margin,
            theme_alignment_floor: upgrade.theme_alignment_floor,
            low_quality_floor: upgrade.low_quality_floor,
            settled_quality: upgrade.settled_quality,
            estimator: Box::new(KeywordCountEstimator::new(upgrade.keyword_unit_cost)),
        }
    }

    /// Replace the cost estimator.
    #[must_use]
    pub fn with_estimator(mut self, estimator: Box<dyn CostEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Estimated cost of upgrading `fallback`.
    #[must_use]
    pub fn estimate_cost(&self, fallback: &FallbackResult) -> f64 {
        self.estimator.estimate(fallback)
    }

    /// Compare an AI result against a fallback result.
    ///
    /// `ai_circuit_open` must be the circuit state read immediately before
    /// this call, not a value captured earlier in the call chain.
    #[must_use]
    pub fn compare(
        &self,
        ai: &AiAnalysis,
        fallback: &FallbackResult,
        ai_circuit_open: bool,
    ) -> ComparisonResult {
        let fallback_quality = self.assessor.validate(fallback).quality_score;
        let ai_quality = ai.quality();

        let sentiment_agreement = SentimentAgreement {
            agreement: ai.sentiment == fallback.sentiment,
            ai_sentiment: ai.sentiment,
            fallback_sentiment: fallback.sentiment,
            confidence_delta: ai.confidence_score - fallback.confidence_score,
            score_distance: (category_score(ai.sentiment) - category_score(fallback.sentiment))
                .abs(),
        };

        let quality_comparison = QualityComparison {
            ai_quality,
            fallback_quality,
            advantage: if (ai_quality - fallback_quality).abs() < 0.1 {
                QualityAdvantage::Similar
            } else if ai_quality > fallback_quality {
                QualityAdvantage::Ai
            } else {
                QualityAdvantage::Fallback
            },
        };

        let pattern_consistency = self.pattern_consistency(ai, fallback, &sentiment_agreement);
        let upgrade_recommendation = self.recommend(
            fallback,
            &sentiment_agreement,
            &quality_comparison,
            &pattern_consistency,
            ai_circuit_open,
        );

        debug!(
            fallback_id = %fallback.id,
            agreement = sentiment_agreement.agreement,
            advantage = ?quality_comparison.advantage,
            should_upgrade = upgrade_recommendation.should_upgrade,
            urgency = %upgrade_recommendation.urgency,
            "comparison complete"
        );

        ComparisonResult {
            sentiment_agreement,
            quality_comparison,
            pattern_consistency,
            upgrade_recommendation,
        }
    }

    fn pattern_consistency(
        &self,
        ai: &AiAnalysis,
        fallback: &FallbackResult,
        agreement: &SentimentAgreement,
    ) -> PatternConsistency {
        let keyword_overlap = jaccard(
            ai.keywords.iter().map(|k| k.to_lowercase()),
            fallback
                .metadata
                .keywords_matched
                .iter()
                .map(|k| k.to_lowercase()),
        );

        let ai_themes = theme_tokens(&ai.insights);
        let fallback_themes = theme_tokens(&fallback.insights);
        // With no insight vocabulary on either side, keyword overlap is the
        // best available alignment signal.
        let theme_alignment = if ai_themes.is_empty() || fallback_themes.is_empty() {
            keyword_overlap
        } else {
            jaccard(ai_themes.into_iter(), fallback_themes.into_iter())
        };

        let mut contradictions = Vec::new();
        let opposite = matches!(
            (agreement.ai_sentiment, agreement.fallback_sentiment),
            (Sentiment::Positive, Sentiment::Negative) | (Sentiment::Negative, Sentiment::Positive)
        );
        if opposite {
            contradictions.push(format!(
                "ai analysis says {} while fallback says {}",
                agreement.ai_sentiment, agreement.fallback_sentiment
            ));
        }
        if ai.confidence_score > 0.8 && fallback.confidence_score < 0.3 {
            contradictions.push(
                "ai is highly confident while fallback confidence is very low".to_string(),
            );
        }

        PatternConsistency {
            keyword_overlap,
            theme_alignment,
            contradictions,
        }
    }

    fn recommend(
        &self,
        fallback: &FallbackResult,
        agreement: &SentimentAgreement,
        quality: &QualityComparison,
        consistency: &PatternConsistency,
        ai_circuit_open: bool,
    ) -> UpgradeRecommendation {
        let improvement = (quality.ai_quality - quality.fallback_quality).max(0.0);

        if ai_circuit_open {
            return UpgradeRecommendation {
                should_upgrade: false,
                confidence: 0.95,
                reason: "ai service circuit breaker is open".to_string(),
                urgency: UpgradeUrgency::Low,
                estimated_improvement: improvement,
            };
        }

        let cost = self.estimator.estimate(fallback);
        if cost > self.cost_budget {
            return UpgradeRecommendation {
                should_upgrade: false,
                confidence: 0.9,
                reason: format!(
                    "estimated upgrade cost {cost:.1} exceeds budget {:.1}",
                    self.cost_budget
                ),
                urgency: UpgradeUrgency::Low,
                estimated_improvement: improvement,
            };
        }

        if agreement.agreement && quality.fallback_quality > self.settled_quality {
            return UpgradeRecommendation {
                should_upgrade: false,
                confidence: 0.8,
                reason: "sentiments agree and fallback quality is already settled".to_string(),
                urgency: UpgradeUrgency::Low,
                estimated_improvement: improvement,
            };
        }

        if !agreement.agreement && agreement.confidence_delta > self.confidence_margin {
            let urgency = if consistency.contradictions.is_empty() {
                UpgradeUrgency::High
            } else {
                UpgradeUrgency::Urgent
            };
            return UpgradeRecommendation {
                should_upgrade: true,
                confidence: 0.85,
                reason: "sentiments disagree and ai confidence is clearly higher".to_string(),
                urgency,
                estimated_improvement: improvement,
            };
        }

        let quality_gap = quality.ai_quality - quality.fallback_quality;
        if quality_gap > self.quality_margin {
            let urgency = if quality_gap > 2.0 * self.quality_margin {
                UpgradeUrgency::High
            } else {
                UpgradeUrgency::Normal
            };
            return UpgradeRecommendation {
                should_upgrade: true,
                confidence: 0.75,
                reason: "ai quality clearly exceeds fallback quality".to_string(),
                urgency,
                estimated_improvement: improvement,
            };
        }

        if consistency.theme_alignment < self.theme_alignment_floor
            && quality.fallback_quality < self.low_quality_floor
        {
            return UpgradeRecommendation {
                should_upgrade: true,
                confidence: 0.6,
                reason: "fallback missed the themes and its quality is low".to_string(),
                urgency: UpgradeUrgency::Normal,
                estimated_improvement: improvement,
            };
        }

        UpgradeRecommendation {
            should_upgrade: false,
            confidence: 0.6,
            reason: "no clear advantage from upgrading".to_string(),
            urgency: UpgradeUrgency::Low,
            estimated_improvement: improvement,
        }
    }
}

fn category_score(sentiment: Sentiment) -> f64 {
    match sentiment {
        Sentiment::Positive => 1.0,
        Sentiment::Neutral => 0.5,
        Sentiment::Negative => 0.0,
    }
}

fn jaccard(a: impl Iterator<Item = String>, b: impl Iterator<Item = String>) -> f64 {
    let a: std::collections::HashSet<String> = a.collect();
    let b: std::collections::HashSet<String> = b.collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    intersection as f64 / union as f64
}

fn theme_tokens(insights: &[String]) -> std::collections::HashSet<String> {
    insights
        .iter()
        .flat_map(|insight| {
            insight
                .split(|c: char| !c.is_alphanumeric())
                .filter(|token| token.len() >= 3)
                .map(str::to_lowercase)
        })
        .filter(|token| !THEME_STOPWORDS.contains(&token.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{FallbackMetadata, FallbackReason};
    use chrono::Utc;
    use uuid::Uuid;

    fn engine() -> ComparisonEngine {
        ComparisonEngine::new(&UpgradeConfig::default(), &QualityConfig::default())
    }

    fn fallback_with(
        sentiment: Sentiment,
        confidence: f64,
        keywords: &[&str],
        rules: &[&str],
        insights: &[&str],
    ) -> FallbackResult {
        FallbackResult {
            id: Uuid::new_v4(),
            sentiment,
            confidence_score: confidence,
            mood_suggestion: None,
            insights: insights.iter().map(|s| (*s).to_string()).collect(),
            method: "rule_based".to_string(),
            processing_time_ms: 10,
            analyzed_at: Utc::now(),
            metadata: FallbackMetadata {
                keywords_matched: keywords.iter().map(|s| (*s).to_string()).collect(),
                rules_fired: rules.iter().map(|s| (*s).to_string()).collect(),
                pattern_matches: Vec::new(),
                fallback_reason: FallbackReason::RetriesExhausted,
            },
        }
    }

    fn ai_with(sentiment: Sentiment, confidence: f64, quality: Option<f64>) -> AiAnalysis {
        AiAnalysis {
            sentiment,
            confidence_score: confidence,
            quality_score: quality,
            keywords: vec!["happy".to_string(), "grateful".to_string()],
            insights: vec!["Expressions of gratitude suggest a positive outlook".to_string()],
        }
    }

    #[test]
    fn similar_quality_and_agreement_means_no_upgrade() {
        // Fallback quality: 0.5 + 0.1 + 0.2 + 0.1 + 0.1 = 1.0.
        let fallback = fallback_with(
            Sentiment::Positive,
            0.8,
            &["happy", "grateful"],
            &["intensity_boost"],
            &["Expressions of gratitude suggest a positive outlook", "second insight"],
        );
        let ai = ai_with(Sentiment::Positive, 0.85, Some(0.95));

        let result = engine().compare(&ai, &fallback, false);
        assert_eq!(result.quality_comparison.advantage, QualityAdvantage::Similar);
        assert!(result.sentiment_agreement.agreement);
        assert!(!result.upgrade_recommendation.should_upgrade);
        assert_eq!(result.upgrade_recommendation.urgency, UpgradeUrgency::Low);
    }

    #[test]
    fn disagreement_with_confident_ai_upgrades_urgently() {
        let fallback = fallback_with(Sentiment::Negative, 0.25, &["argued"], &[], &[]);
        let ai = ai_with(Sentiment::Positive, 0.9, Some(0.9));

        let result = engine().compare(&ai, &fallback, false);
        assert!(!result.sentiment_agreement.agreement);
        assert!((result.sentiment_agreement.score_distance - 1.0).abs() < 1e-9);
        assert!(result.upgrade_recommendation.should_upgrade);
        // Opposite sentiments plus a confidence gap: two contradictions.
        assert_eq!(result.pattern_consistency.contradictions.len(), 2);
        assert_eq!(result.upgrade_recommendation.urgency, UpgradeUrgency::Urgent);
    }

    #[test]
    fn open_circuit_blocks_any_upgrade() {
        let fallback = fallback_with(Sentiment::Negative, 0.25, &["argued"], &[], &[]);
        let ai = ai_with(Sentiment::Positive, 0.9, Some(0.9));

        let result = engine().compare(&ai, &fallback, true);
        assert!(!result.upgrade_recommendation.should_upgrade);
        assert!(result.upgrade_recommendation.reason.contains("circuit breaker"));
    }

    #[test]
    fn cost_over_budget_blocks_upgrade() {
        let engine = ComparisonEngine::new(
            &UpgradeConfig {
                cost_budget: 4.0,
                keyword_unit_cost: 2.5,
                ..UpgradeConfig::default()
            },
            &QualityConfig::default(),
        );
        let fallback = fallback_with(Sentiment::Negative, 0.25, &["argued", "hurt"], &[], &[]);
        let ai = ai_with(Sentiment::Positive, 0.9, Some(0.9));

        let result = engine.compare(&ai, &fallback, false);
        assert!(!result.upgrade_recommendation.should_upgrade);
        assert!(result.upgrade_recommendation.reason.contains("exceeds budget"));
    }

    #[test]
    fn clear_quality_gap_upgrades_even_in_agreement() {
        // Fallback quality: 0.5 - 0.2 + 0.1 - 0.1 = 0.3 (one signal type).
        let fallback = fallback_with(Sentiment::Positive, 0.15, &["good"], &[], &[]);
        let ai = ai_with(Sentiment::Positive, 0.9, Some(0.85));

        let result = engine().compare(&ai, &fallback, false);
        assert!(result.sentiment_agreement.agreement);
        assert_eq!(result.quality_comparison.advantage, QualityAdvantage::Ai);
        assert!(result.upgrade_recommendation.should_upgrade);
        assert_eq!(result.upgrade_recommendation.urgency, UpgradeUrgency::High);
        assert!(result.upgrade_recommendation.estimated_improvement > 0.5);
    }

    #[test]
    fn theme_misalignment_with_weak_fallback_upgrades() {
        // Fallback quality: 0.5 - 0.2 + 0.1 - 0.1 = 0.3.
        let fallback = fallback_with(Sentiment::Neutral, 0.15, &["kw0", "kw1"], &[], &[]);
        let ai = AiAnalysis {
            sentiment: Sentiment::Neutral,
            confidence_score: 0.4,
            quality_score: Some(0.45),
            keywords: vec!["totally".to_string(), "different".to_string()],
            insights: vec!["unrelated themes entirely".to_string()],
        };

        let result = engine().compare(&ai, &fallback, false);
        assert!(result.pattern_consistency.theme_alignment < 0.3);
        assert!(result.upgrade_recommendation.should_upgrade);
        assert_eq!(result.upgrade_recommendation.urgency, UpgradeUrgency::Normal);
    }

    #[test]
    fn fallback_advantage_is_labelled() {
        let fallback = fallback_with(
            Sentiment::Positive,
            0.8,
            &["happy", "grateful"],
            &["intensity_boost"],
            &["insight one", "insight two"],
        );
        // Weak AI result with no reported quality: 0.3 + 0.6 * 0.2 = 0.42.
        let ai = ai_with(Sentiment::Positive, 0.2, None);

        let result = engine().compare(&ai, &fallback, false);
        assert_eq!(result.quality_comparison.advantage, QualityAdvantage::Fallback);
        assert!(!result.upgrade_recommendation.should_upgrade);
    }

    #[test]
    fn keyword_overlap_is_jaccard() {
        let fallback = fallback_with(
            Sentiment::Positive,
            0.8,
            &["happy", "grateful", "calm"],
            &["intensity_boost"],
            &["a", "b"],
        );
        // AI keywords: happy, grateful. Intersection 2, union 3.
        let ai = ai_with(Sentiment::Positive, 0.8, Some(0.9));

        let result = engine().compare(&ai, &fallback, false);
        assert!((result.pattern_consistency.keyword_overlap - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn custom_cost_estimator_is_honored() {
        struct FlatCost(f64);
        impl CostEstimator for FlatCost {
            fn estimate(&self, _fallback: &FallbackResult) -> f64 {
                self.0
            }
        }

        let engine = engine().with_estimator(Box::new(FlatCost(1_000.0)));
        let fallback = fallback_with(Sentiment::Negative, 0.25, &["argued"], &[], &[]);
        let ai = ai_with(Sentiment::Positive, 0.9, Some(0.9));

        let result = engine.compare(&ai, &fallback, false);
        assert!(!result.upgrade_recommendation.should_upgrade);
        assert!(result.upgrade_recommendation.reason.contains("exceeds budget"));
    }
}
