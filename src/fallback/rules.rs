//! Rule adjustments applied after keyword and pattern scoring
//!
//! Rules run in a fixed order: negation, intensity, uncertainty, emphasis,
//! then length weighting. Each fired rule is recorded by name so quality
//! assessment can count rules as an active signal type.

use super::PreparedText;

const NEGATIONS: &[&str] = &[
    "not", "never", "no", "nothing", "don't", "didn't", "doesn't", "can't", "won't", "isn't",
    "wasn't", "aren't", "couldn't", "wouldn't", "shouldn't", "haven't", "hasn't",
];

const INTENSIFIERS: &[&str] = &[
    "very",
    "extremely",
    "absolutely",
    "really",
    "incredibly",
    "totally",
    "completely",
    "deeply",
    "utterly",
    "so",
];

const DIMINISHERS: &[&str] = &[
    "slightly", "somewhat", "barely", "mildly", "a little", "a bit", "kind of", "sort of",
];

/// Per-question-mark score penalty.
const UNCERTAINTY_PENALTY: f64 = 0.05;
/// Per-exclamation-mark boost, capped at [`EMPHASIS_CAP`].
const EMPHASIS_STEP: f64 = 0.05;
const EMPHASIS_CAP: f64 = 0.15;

pub(crate) struct RuleOutcome {
    pub score: f64,
    pub weight: f64,
    pub fired: Vec<String>,
    pub insights: Vec<String>,
}

/// Apply the rule stage to an intermediate (score, weight) pair.
pub(crate) fn apply(
    text: &PreparedText,
    score: f64,
    weight: f64,
    short_entry_words: usize,
    long_entry_words: usize,
) -> RuleOutcome {
    let mut outcome = RuleOutcome {
        score,
        weight,
        fired: Vec::new(),
        insights: Vec::new(),
    };

    // Negation flips and dampens an already-positive score, then applies a
    // flat penalty. Negative and neutral scores are left alone.
    if outcome.score > 0.0 && contains_any(text, NEGATIONS) {
        outcome.score = -(outcome.score * 0.5) - 0.2;
        outcome.fired.push("negation_flip".to_string());
    }

    if outcome.score != 0.0 && contains_any(text, INTENSIFIERS) {
        outcome.score *= 1.3;
        outcome.fired.push("intensity_boost".to_string());
    }

    if outcome.score != 0.0 && contains_any(text, DIMINISHERS) {
        outcome.score *= 0.7;
        outcome.fired.push("intensity_dampen".to_string());
    }

    if text.question_marks > 0 {
        outcome.score -= UNCERTAINTY_PENALTY * text.question_marks as f64;
        outcome.fired.push("uncertainty_penalty".to_string());
        outcome
            .insights
            .push("Question marks suggest uncertainty or searching for answers".to_string());
    }

    // Exclamation marks amplify whatever direction the score already has;
    // with no direction there is nothing to amplify.
    if text.exclamations > 0 && outcome.score != 0.0 {
        let boost = (EMPHASIS_STEP * text.exclamations as f64).min(EMPHASIS_CAP);
        outcome.score += boost.copysign(outcome.score);
        outcome.fired.push("emphasis_boost".to_string());
        outcome
            .insights
            .push("Exclamation marks add emotional emphasis".to_string());
    }

    if text.word_count < short_entry_words {
        outcome.weight *= 0.7;
        outcome.fired.push("short_entry_discount".to_string());
    } else if text.word_count > long_entry_words {
        outcome.weight *= 1.2;
        outcome.fired.push("long_entry_boost".to_string());
    }

    outcome
}

fn contains_any(text: &PreparedText, words: &[&str]) -> bool {
    words.iter().any(|word| {
        if word.contains(' ') {
            text.contains_phrase(word)
        } else {
            text.has_token(word)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(text: &str) -> PreparedText {
        PreparedText::new(text)
    }

    #[test]
    fn negation_flips_positive_score_with_penalty() {
        let outcome = apply(&prepared("I am not happy about this at all today"), 1.0, 1.0, 10, 50);
        assert!((outcome.score - (-0.7)).abs() < 1e-9);
        assert!(outcome.fired.contains(&"negation_flip".to_string()));
    }

    #[test]
    fn negation_leaves_negative_score_alone() {
        let outcome = apply(&prepared("I am not sad anymore honestly speaking right now"), -1.0, 1.0, 5, 50);
        assert!((outcome.score - (-1.0)).abs() < 1e-9);
        assert!(!outcome.fired.contains(&"negation_flip".to_string()));
    }

    #[test]
    fn intensifier_multiplies_score() {
        let outcome = apply(&prepared("extremely happy words fill this line for sure today yes"), 2.0, 2.0, 5, 50);
        assert!((outcome.score - 2.6).abs() < 1e-9);
        assert!(outcome.fired.contains(&"intensity_boost".to_string()));
    }

    #[test]
    fn diminisher_dampens_score() {
        let outcome = apply(&prepared("it was somewhat good overall I would say in truth"), 1.0, 1.0, 5, 50);
        assert!((outcome.score - 0.7).abs() < 1e-9);
        assert!(outcome.fired.contains(&"intensity_dampen".to_string()));
    }

    #[test]
    fn phrase_diminishers_match() {
        let outcome = apply(&prepared("I guess it went a little better than before maybe"), 1.0, 1.0, 5, 50);
        assert!(outcome.fired.contains(&"intensity_dampen".to_string()));
    }

    #[test]
    fn question_marks_subtract_per_occurrence() {
        let outcome = apply(&prepared("was it right? did I mess up? who even knows?"), 0.5, 1.0, 5, 50);
        assert!((outcome.score - 0.35).abs() < 1e-9);
        assert!(outcome.fired.contains(&"uncertainty_penalty".to_string()));
        assert_eq!(outcome.insights.len(), 1);
    }

    #[test]
    fn emphasis_boost_is_capped_and_directional() {
        let positive = apply(&prepared("what a day!!!! truly one to remember for us both"), 1.0, 1.0, 5, 50);
        assert!((positive.score - 1.15).abs() < 1e-9);

        let negative = apply(&prepared("what a day!!!! truly one to forget for us both"), -1.0, 1.0, 5, 50);
        assert!((negative.score - (-1.15)).abs() < 1e-9);
    }

    #[test]
    fn emphasis_skipped_when_score_has_no_direction() {
        let outcome = apply(&prepared("just another day at the office again today I suppose!"), 0.0, 0.0, 5, 50);
        assert!(!outcome.fired.contains(&"emphasis_boost".to_string()));
    }

    #[test]
    fn length_rules_adjust_weight_not_score() {
        let short = apply(&prepared("short one"), 1.0, 1.0, 10, 50);
        assert!((short.weight - 0.7).abs() < 1e-9);
        assert!((short.score - 1.0).abs() < 1e-9);
        assert!(short.fired.contains(&"short_entry_discount".to_string()));

        let long_text = "word ".repeat(60);
        let long = apply(&prepared(&long_text), 1.0, 1.0, 10, 50);
        assert!((long.weight - 1.2).abs() < 1e-9);
        assert!(long.fired.contains(&"long_entry_boost".to_string()));
    }
}
