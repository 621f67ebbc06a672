//! Weighted sentiment lexicons and the keyword-to-mood table
//!
//! Four fixed lexicons, two generic and two relationship-specific. Each
//! entry contributes the lexicon's default weight unless it carries an
//! override. Entries containing a space are matched as phrases against the
//! lowered text; single words are matched against the token set.

use super::PreparedText;

pub(crate) struct Lexicon {
    pub name: &'static str,
    /// +1.0 for positive lexicons, -1.0 for negative.
    pub polarity: f64,
    pub default_weight: f64,
    entries: &'static [(&'static str, Option<f64>)],
}

pub(crate) struct KeywordHit {
    pub keyword: &'static str,
    /// Magnitude contributed to the total-weight denominator.
    pub weight: f64,
    /// Polarity-signed contribution to the running score.
    pub signed_weight: f64,
}

impl Lexicon {
    /// Hits in declared entry order; a keyword counts once no matter how
    /// often it occurs.
    pub fn matches(&self, text: &PreparedText) -> Vec<KeywordHit> {
        self.entries
            .iter()
            .filter(|(keyword, _)| {
                if keyword.contains(' ') {
                    text.contains_phrase(keyword)
                } else {
                    text.has_token(keyword)
                }
            })
            .map(|(keyword, override_weight)| {
                let weight = override_weight.unwrap_or(self.default_weight);
                KeywordHit {
                    keyword,
                    weight,
                    signed_weight: self.polarity * weight,
                }
            })
            .collect()
    }
}

pub(crate) static LEXICONS: [Lexicon; 4] = [
    Lexicon {
        name: "generic_positive",
        polarity: 1.0,
        default_weight: 1.0,
        entries: &[
            ("happy", None),
            ("joy", Some(1.3)),
            ("joyful", Some(1.3)),
            ("glad", None),
            ("good", Some(0.7)),
            ("great", Some(1.1)),
            ("wonderful", Some(1.4)),
            ("amazing", Some(1.4)),
            ("excellent", Some(1.4)),
            ("fantastic", Some(1.4)),
            ("love", Some(1.5)),
            ("loved", Some(1.4)),
            ("lovely", Some(1.2)),
            ("excited", Some(1.2)),
            ("thrilled", Some(1.5)),
            ("delighted", Some(1.4)),
            ("grateful", Some(1.3)),
            ("thankful", Some(1.2)),
            ("content", Some(0.8)),
            ("calm", Some(0.8)),
            ("peaceful", Some(0.9)),
            ("relaxed", Some(0.8)),
            ("hopeful", None),
            ("optimistic", Some(1.1)),
            ("proud", Some(1.1)),
            ("relieved", Some(0.9)),
            ("fun", None),
            ("enjoy", Some(1.1)),
            ("enjoyed", Some(1.1)),
            ("smile", Some(0.9)),
            ("smiled", Some(0.9)),
            ("laugh", Some(0.9)),
            ("laughed", None),
            ("better", Some(0.7)),
            ("best", Some(1.2)),
        ],
    },
    Lexicon {
        name: "generic_negative",
        polarity: -1.0,
        default_weight: 1.0,
        entries: &[
            ("sad", None),
            ("unhappy", Some(1.1)),
            ("angry", Some(1.3)),
            ("mad", None),
            ("furious", Some(1.5)),
            ("awful", Some(1.4)),
            ("terrible", Some(1.4)),
            ("horrible", Some(1.4)),
            ("bad", Some(0.7)),
            ("worst", Some(1.3)),
            ("hate", Some(1.5)),
            ("hated", Some(1.4)),
            ("upset", Some(1.1)),
            ("frustrated", Some(1.2)),
            ("frustrating", Some(1.2)),
            ("annoyed", Some(1.1)),
            ("anxious", Some(1.2)),
            ("anxiety", Some(1.2)),
            ("worried", Some(1.1)),
            ("worry", None),
            ("stressed", Some(1.2)),
            ("stress", None),
            ("tired", Some(0.8)),
            ("exhausted", Some(1.2)),
            ("lonely", Some(1.3)),
            ("hurt", Some(1.2)),
            ("pain", Some(1.1)),
            ("painful", Some(1.2)),
            ("cry", Some(1.2)),
            ("cried", Some(1.2)),
            ("crying", Some(1.2)),
            ("afraid", Some(1.1)),
            ("scared", Some(1.1)),
            ("fear", None),
            ("disappointed", Some(1.2)),
            ("disappointing", Some(1.1)),
            ("miserable", Some(1.4)),
            ("depressed", Some(1.5)),
            ("hopeless", Some(1.4)),
            ("overwhelmed", Some(1.2)),
        ],
    },
    Lexicon {
        name: "relationship_positive",
        polarity: 1.0,
        default_weight: 1.2,
        entries: &[
            ("quality time", None),
            ("date night", None),
            ("connected", None),
            ("connection", Some(1.0)),
            ("supportive", None),
            ("support", Some(1.0)),
            ("supported", None),
            ("appreciated", None),
            ("appreciate", Some(1.0)),
            ("trust", None),
            ("trusted", None),
            ("intimacy", Some(1.3)),
            ("affection", None),
            ("affectionate", None),
            ("caring", None),
            ("listened", None),
            ("understanding", Some(1.0)),
            ("understood", None),
            ("forgave", Some(1.3)),
            ("forgiveness", Some(1.3)),
            ("reconciled", Some(1.3)),
            ("closer", None),
            ("cherish", Some(1.4)),
            ("devoted", Some(1.3)),
            ("partnership", Some(1.0)),
            ("teamwork", Some(1.0)),
            ("worked it out", Some(1.3)),
            ("made up", None),
        ],
    },
    Lexicon {
        name: "relationship_negative",
        polarity: -1.0,
        default_weight: 1.2,
        entries: &[
            ("argument", None),
            ("argued", None),
            ("arguing", None),
            ("fight", None),
            ("fought", None),
            ("fighting", None),
            ("conflict", Some(1.0)),
            ("distant", None),
            ("ignored", None),
            ("ignoring", None),
            ("dismissed", None),
            ("betrayed", Some(1.5)),
            ("betrayal", Some(1.5)),
            ("jealous", None),
            ("jealousy", None),
            ("resentment", Some(1.3)),
            ("resent", Some(1.3)),
            ("criticized", None),
            ("criticism", Some(1.0)),
            ("contempt", Some(1.5)),
            ("stonewalling", Some(1.4)),
            ("silent treatment", Some(1.4)),
            ("shut down", Some(1.0)),
            ("neglected", Some(1.3)),
            ("cheated", Some(1.6)),
            ("lied", Some(1.4)),
            ("lying", Some(1.4)),
            ("breakup", Some(1.5)),
            ("broke up", Some(1.5)),
            ("divorce", Some(1.6)),
            ("separation", Some(1.4)),
        ],
    },
];

/// First-match-wins keyword-to-mood mapping, checked against matched
/// keywords in the order they were matched.
const MOODS: &[(&str, &str)] = &[
    ("grateful", "grateful"),
    ("thankful", "grateful"),
    ("excited", "excited"),
    ("thrilled", "excited"),
    ("calm", "calm"),
    ("peaceful", "calm"),
    ("relaxed", "calm"),
    ("hopeful", "hopeful"),
    ("proud", "proud"),
    ("anxious", "anxious"),
    ("anxiety", "anxious"),
    ("worried", "anxious"),
    ("stressed", "stressed"),
    ("stress", "stressed"),
    ("angry", "angry"),
    ("furious", "angry"),
    ("mad", "angry"),
    ("sad", "sad"),
    ("cried", "sad"),
    ("crying", "sad"),
    ("lonely", "lonely"),
    ("tired", "tired"),
    ("exhausted", "tired"),
    ("hurt", "hurt"),
    ("overwhelmed", "overwhelmed"),
];

pub(crate) fn mood_for_keyword(keyword: &str) -> Option<&'static str> {
    MOODS
        .iter()
        .find(|(candidate, _)| *candidate == keyword)
        .map(|(_, mood)| *mood)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::PreparedText;

    fn hits(lexicon_name: &str, text: &str) -> Vec<String> {
        let prepared = PreparedText::new(text);
        LEXICONS
            .iter()
            .find(|l| l.name == lexicon_name)
            .unwrap()
            .matches(&prepared)
            .into_iter()
            .map(|h| h.keyword.to_string())
            .collect()
    }

    #[test]
    fn single_words_match_whole_tokens_only() {
        assert_eq!(hits("relationship_positive", "she was supportive"), vec!["supportive"]);
        // "unsupportive" must not match "supportive" or "support".
        assert!(hits("relationship_positive", "he was unsupportive").is_empty());
    }

    #[test]
    fn phrases_match_as_substrings() {
        assert_eq!(
            hits("relationship_positive", "We had some quality time yesterday"),
            vec!["quality time"]
        );
        assert_eq!(
            hits("relationship_negative", "the silent treatment again"),
            vec!["silent treatment"]
        );
    }

    #[test]
    fn overrides_take_precedence_over_lexicon_default() {
        let prepared = PreparedText::new("absolutely thrilled");
        let lexicon = LEXICONS.iter().find(|l| l.name == "generic_positive").unwrap();
        let hit = &lexicon.matches(&prepared)[0];
        assert_eq!(hit.keyword, "thrilled");
        assert!((hit.weight - 1.5).abs() < f64::EPSILON);
        assert!((hit.signed_weight - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_lexicons_contribute_negative_signed_weight() {
        let prepared = PreparedText::new("we argued all night");
        let lexicon = LEXICONS.iter().find(|l| l.name == "relationship_negative").unwrap();
        let hit = &lexicon.matches(&prepared)[0];
        assert_eq!(hit.keyword, "argued");
        assert!(hit.signed_weight < 0.0);
        assert!(hit.weight > 0.0);
    }

    #[test]
    fn mood_table_lookup() {
        assert_eq!(mood_for_keyword("grateful"), Some("grateful"));
        assert_eq!(mood_for_keyword("thrilled"), Some("excited"));
        assert_eq!(mood_for_keyword("argument"), None);
    }
}
