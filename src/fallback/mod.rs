//! Deterministic rule-based sentiment analysis
//!
//! Substitute for the upstream AI analyzer when it is unavailable. Three
//! stages run over the raw text: weighted keyword lexicons, a named regex
//! pattern library, then rule adjustments (negation, intensity,
//! punctuation, length). Pure CPU work with no I/O; identical input always
//! produces identical sentiment and confidence.
//!
//! The analyzer never fails. Empty or punctuation-only input yields a
//! structurally valid low-confidence neutral result, and a soft wall-clock
//! budget truncates the later stages rather than letting a pathological
//! input hang the caller.

mod lexicon;
mod patterns;
mod rules;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::FallbackConfig;

/// Sentiment category of an analysis result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    /// Normalized score above +0.2
    Positive,
    /// Normalized score below -0.2
    Negative,
    /// Everything in between
    Neutral,
}

impl Sentiment {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the fallback path produced this result instead of the upstream AI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Circuit breaker short-circuited the call
    CircuitOpen,
    /// Retries were exhausted without a usable response
    RetriesExhausted,
    /// Upstream reported itself unavailable
    UpstreamUnavailable,
    /// Caller requested fallback analysis directly
    Manual,
}

impl FallbackReason {
    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::RetriesExhausted => "retries_exhausted",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals that contributed to a fallback result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackMetadata {
    /// Lexicon keywords found in the text, in lexicon order
    pub keywords_matched: Vec<String>,
    /// Rules that fired, in evaluation order
    pub rules_fired: Vec<String>,
    /// Names of regex patterns that matched
    pub pattern_matches: Vec<String>,
    /// Why fallback analysis ran at all
    pub fallback_reason: FallbackReason,
}

/// A completed fallback analysis. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackResult {
    /// Identifier for later upgrade tracking
    pub id: Uuid,
    /// Sentiment category
    pub sentiment: Sentiment,
    /// Confidence in [0.1, 0.9]
    pub confidence_score: f64,
    /// Suggested mood word for the entry
    pub mood_suggestion: Option<String>,
    /// Human-readable observations, pattern insights first
    pub insights: Vec<String>,
    /// Analysis method tag
    pub method: String,
    /// Wall-clock time the analysis took
    pub processing_time_ms: u64,
    /// When the analysis ran
    pub analyzed_at: DateTime<Utc>,
    /// Contributing signals
    pub metadata: FallbackMetadata,
}

/// Lowercased text with token set and punctuation counts, shared by the
/// lexicon and rule stages.
pub(crate) struct PreparedText {
    lowered: String,
    tokens: HashSet<String>,
    pub(crate) word_count: usize,
    pub(crate) question_marks: usize,
    pub(crate) exclamations: usize,
}

impl PreparedText {
    pub(crate) fn new(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let mut tokens = HashSet::new();
        let mut word_count = 0;
        for token in lowered.split(|c: char| !c.is_alphanumeric() && c != '\'') {
            let token = token.trim_matches('\'');
            if token.is_empty() {
                continue;
            }
            word_count += 1;
            tokens.insert(token.to_string());
        }
        Self {
            question_marks: text.matches('?').count(),
            exclamations: text.matches('!').count(),
            lowered,
            tokens,
            word_count,
        }
    }

    pub(crate) fn has_token(&self, word: &str) -> bool {
        self.tokens.contains(word)
    }

    pub(crate) fn contains_phrase(&self, phrase: &str) -> bool {
        self.lowered.contains(phrase)
    }
}

/// Method tag for a full three-stage analysis.
const METHOD_FULL: &str = "rule_based";
/// Method tag when the time budget cut the analysis short.
const METHOD_TRUNCATED: &str = "rule_based_truncated";

/// Deterministic three-stage sentiment analyzer.
pub struct FallbackAnalyzer {
    deadline: Duration,
    short_entry_words: usize,
    long_entry_words: usize,
}

impl FallbackAnalyzer {
    /// Create an analyzer from config.
    #[must_use]
    pub fn new(config: &FallbackConfig) -> Self {
        Self {
            deadline: config.deadline,
            short_entry_words: config.short_entry_words,
            long_entry_words: config.long_entry_words,
        }
    }

    /// Analyze `text`, tagging the result with `reason`.
    ///
    /// Never fails; the worst case is a low-confidence neutral result.
    #[must_use]
    pub fn analyze(&self, text: &str, reason: FallbackReason) -> FallbackResult {
        let started = Instant::now();
        let prepared = PreparedText::new(text);

        let mut score = 0.0;
        let mut weight = 0.0;
        let mut keywords = Vec::new();
        for lex in &lexicon::LEXICONS {
            for hit in lex.matches(&prepared) {
                score += hit.signed_weight;
                weight += hit.weight;
                keywords.push(hit.keyword.to_string());
            }
        }

        let mut insights = Vec::new();
        let mut pattern_names = Vec::new();
        let patterns_allowed = started.elapsed() < self.deadline;
        if patterns_allowed {
            for hit in patterns::scan(text) {
                score += hit.signed_confidence;
                weight += hit.confidence();
                insights.push(hit.insight.to_string());
                pattern_names.push(hit.name.to_string());
            }
        }

        let mut rules_fired = Vec::new();
        let rules_allowed = patterns_allowed && started.elapsed() < self.deadline;
        if rules_allowed {
            let outcome = rules::apply(
                &prepared,
                score,
                weight,
                self.short_entry_words,
                self.long_entry_words,
            );
            score = outcome.score;
            weight = outcome.weight;
            rules_fired = outcome.fired;
            insights.extend(outcome.insights);
        }

        let truncated = !rules_allowed;
        if truncated {
            warn!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                budget_ms = self.deadline.as_millis() as u64,
                "analysis budget exhausted, returning partial result"
            );
        }

        let normalized = if weight > 0.0 { score / weight } else { 0.0 };
        let sentiment = if normalized > 0.2 {
            Sentiment::Positive
        } else if normalized < -0.2 {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        };

        let signal_types = usize::from(!keywords.is_empty())
            + usize::from(!pattern_names.is_empty())
            + usize::from(!rules_fired.is_empty());
        let length_adjustment = if prepared.word_count < self.short_entry_words {
            -0.05
        } else if prepared.word_count > self.long_entry_words {
            0.05
        } else {
            0.0
        };
        let confidence_score = (0.1
            + (weight * 0.15).min(0.45)
            + 0.1 * signal_types as f64
            + length_adjustment)
            .clamp(0.1, 0.9);

        let mood_suggestion = Self::suggest_mood(&keywords, sentiment, normalized);

        debug!(
            %sentiment,
            confidence = confidence_score,
            keywords = keywords.len(),
            patterns = pattern_names.len(),
            rules = rules_fired.len(),
            "fallback analysis complete"
        );

        FallbackResult {
            id: Uuid::new_v4(),
            sentiment,
            confidence_score,
            mood_suggestion,
            insights,
            method: if truncated { METHOD_TRUNCATED } else { METHOD_FULL }.to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            analyzed_at: Utc::now(),
            metadata: FallbackMetadata {
                keywords_matched: keywords,
                rules_fired,
                pattern_matches: pattern_names,
                fallback_reason: reason,
            },
        }
    }

    /// First matched keyword with a mood-table entry wins, otherwise fall
    /// back to a sentiment-and-magnitude default.
    fn suggest_mood(keywords: &[String], sentiment: Sentiment, normalized: f64) -> Option<String> {
        for keyword in keywords {
            if let Some(mood) = lexicon::mood_for_keyword(keyword) {
                return Some(mood.to_string());
            }
        }
        let default = match sentiment {
            Sentiment::Positive if normalized > 0.6 => "joyful",
            Sentiment::Positive => "content",
            Sentiment::Negative if normalized < -0.6 => "distressed",
            Sentiment::Negative => "down",
            Sentiment::Neutral => "reflective",
        };
        Some(default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> FallbackAnalyzer {
        FallbackAnalyzer::new(&FallbackConfig::default())
    }

    #[test]
    fn identical_input_gives_identical_sentiment_and_confidence() {
        let a = analyzer();
        let text = "We argued about chores but made up before bed. Feeling hopeful.";
        let first = a.analyze(text, FallbackReason::Manual);
        let second = a.analyze(text, FallbackReason::Manual);
        assert_eq!(first.sentiment, second.sentiment);
        assert!((first.confidence_score - second.confidence_score).abs() < f64::EPSILON);
        assert_eq!(first.metadata.keywords_matched, second.metadata.keywords_matched);
        assert_eq!(first.metadata.rules_fired, second.metadata.rules_fired);
        assert_eq!(first.insights, second.insights);
    }

    #[test]
    fn empty_input_is_neutral_and_low_confidence() {
        let result = analyzer().analyze("", FallbackReason::CircuitOpen);
        assert_eq!(result.sentiment, Sentiment::Neutral);
        assert!(result.confidence_score < 0.3);
        assert!(result.metadata.keywords_matched.is_empty());
        assert!(result.metadata.pattern_matches.is_empty());
    }

    #[test]
    fn punctuation_only_input_does_not_panic() {
        let result = analyzer().analyze("?!?!...", FallbackReason::Manual);
        assert_eq!(result.sentiment, Sentiment::Neutral);
        assert!(result.confidence_score < 0.3);
    }

    #[test]
    fn intensified_positive_entry_is_positive_with_boost_marker() {
        let result = analyzer().analyze(
            "I'm extremely happy and absolutely thrilled!",
            FallbackReason::RetriesExhausted,
        );
        assert_eq!(result.sentiment, Sentiment::Positive);
        assert!(result.metadata.rules_fired.contains(&"intensity_boost".to_string()));
        assert!(result.confidence_score > 0.4);
        assert_eq!(
            result.metadata.keywords_matched,
            vec!["happy".to_string(), "thrilled".to_string()]
        );
    }

    #[test]
    fn conflict_heavy_entry_is_negative_with_mood_from_table() {
        let result = analyzer().analyze(
            "We argued all night and I cried. I feel so lonely and hurt.",
            FallbackReason::Manual,
        );
        assert_eq!(result.sentiment, Sentiment::Negative);
        assert_eq!(result.mood_suggestion.as_deref(), Some("lonely"));
        assert!(result
            .metadata
            .pattern_matches
            .contains(&"conflict_language".to_string()));
        assert!(!result.insights.is_empty());
        assert!(result.confidence_score <= 0.9);
    }

    #[test]
    fn plain_factual_entry_is_neutral_with_floor_confidence() {
        let result = analyzer().analyze(
            "Went to the store and bought groceries for the week.",
            FallbackReason::Manual,
        );
        assert_eq!(result.sentiment, Sentiment::Neutral);
        assert!((result.confidence_score - 0.1).abs() < 1e-9);
        assert_eq!(result.mood_suggestion.as_deref(), Some("reflective"));
    }

    #[test]
    fn mood_defaults_by_magnitude_without_table_hit() {
        // "wonderful" and "amazing" carry no mood-table entry.
        let result = analyzer().analyze(
            "What a wonderful, amazing day. We spent the evening together celebrating.",
            FallbackReason::Manual,
        );
        assert_eq!(result.sentiment, Sentiment::Positive);
        let mood = result.mood_suggestion.unwrap();
        assert!(mood == "joyful" || mood == "content");
    }

    #[test]
    fn questions_produce_uncertainty_insight() {
        let result = analyzer().analyze(
            "Did I handle the argument right? Should I have said more?",
            FallbackReason::Manual,
        );
        assert!(result.metadata.rules_fired.contains(&"uncertainty_penalty".to_string()));
        assert!(result
            .insights
            .iter()
            .any(|insight| insight.contains("uncertainty")));
    }

    #[test]
    fn confidence_stays_inside_clamp_bounds() {
        let gushing = "I love love love this! Amazing wonderful fantastic excellent day, \
                       so grateful and thrilled and delighted and happy and excited beyond words!"
            .repeat(3);
        let result = analyzer().analyze(&gushing, FallbackReason::Manual);
        assert!(result.confidence_score <= 0.9);
        assert!(result.confidence_score >= 0.1);
    }

    #[test]
    fn exhausted_budget_truncates_but_still_returns_a_result() {
        let a = FallbackAnalyzer::new(&FallbackConfig {
            deadline: Duration::ZERO,
            ..FallbackConfig::default()
        });
        let result = a.analyze("We had a big fight about the move.", FallbackReason::Manual);
        assert_eq!(result.method, "rule_based_truncated");
        assert!(result.metadata.pattern_matches.is_empty());
        assert!(result.metadata.rules_fired.is_empty());
        // Keyword stage still ran.
        assert!(result.metadata.keywords_matched.contains(&"fight".to_string()));
    }

    #[test]
    fn full_run_reports_rule_based_method() {
        let result = analyzer().analyze("A calm, quiet day.", FallbackReason::Manual);
        assert_eq!(result.method, "rule_based");
        assert!(result.processing_time_ms < 100);
    }
}
