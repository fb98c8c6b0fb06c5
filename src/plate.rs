//! Licence-plate text normalisation and grammar validation.
//!
//! OCR output is case-folded and stripped down to `A-Z0-9`, then tested
//! against the supported plate grammars in a fixed order. The first grammar
//! that matches wins. The validator keeps no state: the same input always
//! yields the same outcome.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PlateGrammar {
    /// Sri Lanka, old series: `WP1234`.
    SriLankaOld,
    /// Sri Lanka, new series: `ABC1234`.
    SriLankaNew,
    /// India: state, RTO district, series, number (`CA01AB1234`).
    India,
}

impl PlateGrammar {
    /// Evaluation order.
    pub const ALL: [PlateGrammar; 3] = [
        PlateGrammar::SriLankaOld,
        PlateGrammar::SriLankaNew,
        PlateGrammar::India,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PlateGrammar::SriLankaOld => "SL-old",
            PlateGrammar::SriLankaNew => "SL-new",
            PlateGrammar::India => "IN",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            PlateGrammar::SriLankaOld => r"^[A-Z]{2}[0-9]{4}$",
            PlateGrammar::SriLankaNew => r"^[A-Z]{3}[0-9]{4}$",
            PlateGrammar::India => r"^[A-Z]{2}[0-9]{1,2}[A-Z]{1,2}[0-9]{1,4}$",
        }
    }

    fn regex(&self) -> &'static Regex {
        static SL_OLD: OnceLock<Regex> = OnceLock::new();
        static SL_NEW: OnceLock<Regex> = OnceLock::new();
        static INDIA: OnceLock<Regex> = OnceLock::new();
        let cell = match self {
            PlateGrammar::SriLankaOld => &SL_OLD,
            PlateGrammar::SriLankaNew => &SL_NEW,
            PlateGrammar::India => &INDIA,
        };
        cell.get_or_init(|| Regex::new(self.pattern()).unwrap())
    }

    /// Tests an already-normalised string.
    pub fn matches(&self, normalized: &str) -> bool {
        self.regex().is_match(normalized)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidatedPlate {
    pub text: String,
    pub grammar: PlateGrammar,
}

/// Uppercase, then drop everything outside `A-Z0-9`.
pub fn normalize(raw: &str) -> String {
    raw.to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Normalise raw OCR text and accept it if any plate grammar matches.
pub fn validate(raw: &str) -> Option<ValidatedPlate> {
    if raw.is_empty() {
        return None;
    }
    let text = normalize(raw);
    if text.is_empty() {
        return None;
    }
    PlateGrammar::ALL
        .into_iter()
        .find(|grammar| grammar.matches(&text))
        .map(|grammar| ValidatedPlate { text, grammar })
}

/// Text-only form of [`validate`].
pub fn validate_text(raw: &str) -> Option<String> {
    validate(raw).map(|plate| plate.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_formats() {
        assert_eq!(validate_text("WP1234").as_deref(), Some("WP1234"));
        assert_eq!(validate_text("ab-1234").as_deref(), Some("AB1234"));
        assert_eq!(validate_text("ABC1234").as_deref(), Some("ABC1234"));
        assert_eq!(validate_text("CA01AB1234").as_deref(), Some("CA01AB1234"));
        assert_eq!(validate_text("wp 1234").as_deref(), Some("WP1234"));
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(validate_text("12345"), None);
        assert_eq!(validate_text(""), None);
        assert_eq!(validate_text("WP12345"), None);
        assert_eq!(validate_text("  --  "), None);
        assert_eq!(validate_text("ABCD1234"), None);
    }

    #[test]
    fn first_matching_grammar_wins() {
        assert_eq!(validate("WP1234").unwrap().grammar, PlateGrammar::SriLankaOld);
        assert_eq!(validate("ABC1234").unwrap().grammar, PlateGrammar::SriLankaNew);
        assert_eq!(validate("KA5M12").unwrap().grammar, PlateGrammar::India);
        // Two letters, two digits, two letters, four digits.
        assert_eq!(validate("mh12-de-1433").unwrap().grammar, PlateGrammar::India);
    }

    #[test]
    fn normalize_strips_symbols_and_folds_case() {
        assert_eq!(normalize("a b|c-1.2_3"), "ABC123");
        assert_eq!(normalize("wp\n1234\t"), "WP1234");
    }

    #[test]
    fn validation_is_deterministic() {
        for raw in ["WP1234", "nope", "CA01AB1234", ""] {
            assert_eq!(validate(raw), validate(raw));
        }
    }
}
