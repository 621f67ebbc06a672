//! Named regex pattern library
//!
//! Each pattern carries a polarity-signed confidence and a human-readable
//! insight. A pattern contributes at most once per analysis regardless of
//! how many times it occurs in the text. Compiled once on first use.

use std::sync::OnceLock;

use regex::Regex;

pub(crate) struct Pattern {
    pub name: &'static str,
    regex: Regex,
    /// Signed score contribution; the magnitude is the weight contribution.
    pub signed_confidence: f64,
    pub insight: &'static str,
}

impl Pattern {
    pub fn confidence(&self) -> f64 {
        self.signed_confidence.abs()
    }
}

/// Patterns matching `text`, in library order.
pub(crate) fn scan(text: &str) -> Vec<&'static Pattern> {
    patterns()
        .iter()
        .filter(|pattern| pattern.regex.is_match(text))
        .collect()
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(build_patterns).as_slice()
}

fn build_patterns() -> Vec<Pattern> {
    let def = |name, pattern: &str, signed_confidence, insight| Pattern {
        name,
        regex: Regex::new(pattern).expect("static regex"),
        signed_confidence,
        insight,
    };

    vec![
        def(
            "gratitude_expression",
            r"(?i)\b(thanks?|thank you|so grateful|appreciate[ds]?)\b",
            0.6,
            "Expressions of gratitude suggest a positive outlook",
        ),
        def(
            "quality_time",
            r"(?i)\b(spent (time|the (day|evening|weekend)) together|date night|quality time)\b",
            0.7,
            "Shared time together points to investment in the relationship",
        ),
        def(
            "conflict_language",
            r"(?i)\b(we (fought|argued)|big (fight|argument)|screaming match|yelled at (me|him|her|them|each other))\b",
            -0.7,
            "Conflict language indicates ongoing tension",
        ),
        def(
            "repair_attempt",
            r"(?i)\b(apologi[sz]ed|made up|talked it (out|through)|worked (it|things) out)\b",
            0.6,
            "Repair attempts show willingness to resolve conflict",
        ),
        def(
            "distancing_language",
            r"(?i)\b(needs? space|grow(n|ing) apart|drift(ed|ing) apart|silent treatment|barely (talk|speak|talking|speaking))\b",
            -0.6,
            "Distancing language suggests emotional withdrawal",
        ),
        def(
            "future_planning",
            r"(?i)\b(planning (a|our)|looking forward to|can'?t wait|next (month|year) we)\b",
            0.5,
            "Making plans together signals optimism about the relationship",
        ),
        def(
            "self_doubt",
            r"(?i)\b(my fault|blame myself|not good enough|what('| i)s wrong with me)\b",
            -0.6,
            "Self-critical language may point to inward distress",
        ),
        def(
            "support_received",
            r"(?i)\b((was|is|been) there for me|had my back|listened to me|supported me)\b",
            0.6,
            "Feeling supported strengthens the sense of connection",
        ),
        def(
            "overwhelm",
            r"(?i)\b(can'?t (cope|handle|take)|too much for me|at my limit|breaking point)\b",
            -0.7,
            "Language suggests feeling overwhelmed or at capacity",
        ),
        def(
            "affection_expression",
            r"(?i)\b(i love (him|her|them)|told me (he|she|they) loved?|hugged|kissed|cuddled)\b",
            0.6,
            "Direct expressions of affection",
        ),
    ]
}
