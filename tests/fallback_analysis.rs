//! Fallback analysis pipeline tests
//!
//! Runs the rule-based analyzer and the quality assessor together, the way
//! the engine uses them when the upstream AI is unavailable: analyze raw
//! text, then score the result for trustworthiness.

use std::time::Duration;

use understudy::config::{FallbackConfig, QualityConfig};
use understudy::fallback::{FallbackAnalyzer, FallbackReason, Sentiment};
use understudy::quality::{QualityAssessor, QualityIssue};

fn pipeline() -> (FallbackAnalyzer, QualityAssessor) {
    (
        FallbackAnalyzer::new(&FallbackConfig::default()),
        QualityAssessor::new(&QualityConfig::default()),
    )
}

#[test]
fn test_rich_entry_passes_the_quality_gate() {
    let (analyzer, assessor) = pipeline();
    let result = analyzer.analyze(
        "I'm so grateful and thankful for my amazing partner. \
         We spent the evening together and it was wonderful!",
        FallbackReason::CircuitOpen,
    );

    assert_eq!(result.sentiment, Sentiment::Positive);
    assert_eq!(result.mood_suggestion.as_deref(), Some("grateful"));
    // All three signal types contributed.
    assert!(result.metadata.keywords_matched.contains(&"grateful".to_string()));
    assert!(result.metadata.pattern_matches.contains(&"quality_time".to_string()));
    assert!(result.metadata.rules_fired.contains(&"intensity_boost".to_string()));
    assert!(result.confidence_score > 0.8);

    let assessment = assessor.validate(&result);
    assert!(assessment.is_valid);
    assert!(assessment.issues.is_empty());
    assert!((assessment.quality_score - 1.0).abs() < 1e-9);
}

#[test]
fn test_empty_entry_degrades_gracefully() {
    let (analyzer, assessor) = pipeline();
    let result = analyzer.analyze("", FallbackReason::RetriesExhausted);

    assert_eq!(result.sentiment, Sentiment::Neutral);
    assert!(result.confidence_score < 0.2);
    assert!(result.metadata.keywords_matched.is_empty());
    assert!(result.insights.is_empty());
    assert_eq!(result.mood_suggestion.as_deref(), Some("reflective"));

    let assessment = assessor.validate(&result);
    assert!(assessment.issues.contains(&QualityIssue::VeryLowConfidence));
    assert!(assessment.issues.contains(&QualityIssue::NoInsights));
    assert!(assessment.quality_score < 0.35);
}

#[test]
fn test_identical_text_scores_identically() {
    let (analyzer, assessor) = pipeline();
    let text = "We fought again last night. I feel hopeless and maybe it's all my fault.";

    let first = analyzer.analyze(text, FallbackReason::Manual);
    let second = analyzer.analyze(text, FallbackReason::Manual);

    assert_ne!(first.id, second.id);
    assert_eq!(first.sentiment, second.sentiment);
    assert!((first.confidence_score - second.confidence_score).abs() < f64::EPSILON);
    assert_eq!(first.insights, second.insights);
    assert_eq!(first.metadata.keywords_matched, second.metadata.keywords_matched);

    let first_quality = assessor.validate(&first).quality_score;
    let second_quality = assessor.validate(&second).quality_score;
    assert!((first_quality - second_quality).abs() < f64::EPSILON);
}

#[test]
fn test_conflict_entry_reports_negative_with_pattern_insights() {
    let (analyzer, assessor) = pipeline();
    let result = analyzer.analyze(
        "We fought again last night. I feel hopeless and maybe it's all my fault.",
        FallbackReason::UpstreamUnavailable,
    );

    assert_eq!(result.sentiment, Sentiment::Negative);
    assert!(result.metadata.pattern_matches.contains(&"conflict_language".to_string()));
    assert!(result.metadata.pattern_matches.contains(&"self_doubt".to_string()));
    assert_eq!(result.insights.len(), 2);
    assert!(result.confidence_score > 0.7);

    // Negative sentiment is not a quality problem.
    let assessment = assessor.validate(&result);
    assert!(assessment.is_valid);
    assert!(assessment.issues.is_empty());
}

#[test]
fn test_zero_deadline_truncates_to_the_lexicon_stage() {
    let analyzer = FallbackAnalyzer::new(&FallbackConfig {
        deadline: Duration::ZERO, // Force the budget to expire immediately
        short_entry_words: 10,
        long_entry_words: 50,
    });
    let result = analyzer.analyze(
        "I'm extremely happy and absolutely thrilled!",
        FallbackReason::Manual,
    );

    assert_eq!(result.method, "rule_based_truncated");
    assert!(result.metadata.keywords_matched.contains(&"thrilled".to_string()));
    assert!(result.metadata.pattern_matches.is_empty());
    assert!(result.metadata.rules_fired.is_empty());

    // A truncated result is still usable, just flagged for missing insights.
    let assessment = QualityAssessor::new(&QualityConfig::default()).validate(&result);
    assert!(assessment.is_valid);
    assert!(assessment.issues.contains(&QualityIssue::NoInsights));
}

#[test]
fn test_reason_tag_flows_through_to_the_result() {
    let (analyzer, _) = pipeline();
    let result = analyzer.analyze("Quiet day, nothing special.", FallbackReason::CircuitOpen);
    assert_eq!(result.metadata.fallback_reason, FallbackReason::CircuitOpen);
    assert_eq!(result.method, "rule_based");
}
