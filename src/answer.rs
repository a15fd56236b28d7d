//! Free-text answer normalization and matching
//!
//! Open-answer rounds accept a message as correct only when it equals the
//! stored answer after normalization. Normalization is deliberately strict:
//! it forgives casing, punctuation, stray whitespace, and equivalent
//! Perso-Arabic letter forms, but it never does fuzzy matching.

use itertools::Itertools;
use unicode_normalization::UnicodeNormalization;

/// Normalizes answer text for comparison
///
/// The pipeline: trim, Unicode NFKC, Perso-Arabic letter folding (with
/// zero-width and directional marks removed), lowercasing, punctuation
/// replaced by spaces, and whitespace collapsed to single spaces.
pub fn normalize(text: &str) -> String {
    text.trim()
        .nfkc()
        .filter_map(fold_char)
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .join(" ")
}

/// Folds a single character, returning `None` for characters that are
/// dropped entirely
fn fold_char(c: char) -> Option<char> {
    Some(match c {
        // Arabic letter variants folded to their Persian forms
        'ي' | 'ى' | 'ئ' => 'ی',
        'ك' => 'ک',
        'ۀ' | 'ة' => 'ه',
        'ؤ' => 'و',
        'أ' | 'إ' | 'آ' => 'ا',
        // Zero-width non-joiner, right-to-left mark, byte order mark
        '\u{200c}' | '\u{200f}' | '\u{feff}' => return None,
        // Punctuation becomes a space so "a-b" and "a b" compare equal
        '.' | '!' | '?' | '،' | ',' | '؛' | ':' | 'ـ' | '«' | '»' | '(' | ')' | '[' | ']'
        | '{' | '}' | '-' | '_' | '/' | '\\' => ' ',
        other => other,
    })
}

/// The normalized expected answer(s) for one open round
///
/// A round may carry a localized answer and an original-language alternate;
/// a guess matching either scores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerKey {
    primary: String,
    alternate: Option<String>,
}

impl AnswerKey {
    /// Builds a key from the localized answer and an optional alternate
    pub fn new(primary: &str, alternate: Option<&str>) -> Self {
        Self {
            primary: normalize(primary),
            alternate: alternate.map(normalize).filter(|a| !a.is_empty()),
        }
    }

    /// Checks whether a raw guess matches this key after normalization
    ///
    /// Empty guesses (or guesses that normalize to nothing) never match.
    pub fn matches(&self, guess: &str) -> bool {
        let guess = normalize(guess);
        if guess.is_empty() {
            return false;
        }
        (!self.primary.is_empty() && guess == self.primary)
            || self.alternate.as_deref() == Some(guess.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casing_punctuation_and_spacing_are_forgiven() {
        assert_eq!(normalize("  Hello,   WORLD!! "), "hello world");
        assert_eq!(normalize("rock-and-roll"), "rock and roll");
    }

    #[test]
    fn arabic_letter_forms_fold_together() {
        // Arabic yeh and kaf vs their Persian counterparts
        assert_eq!(normalize("علي"), normalize("علی"));
        assert_eq!(normalize("كتاب"), normalize("کتاب"));
        assert_eq!(normalize("مسئلة"), normalize("مسیله"));
    }

    #[test]
    fn compatibility_forms_normalize() {
        assert_eq!(normalize("ＡＢＣ"), "abc");
    }

    #[test]
    fn zero_width_marks_are_dropped() {
        assert_eq!(normalize("می\u{200c}روم"), "میروم");
        assert_eq!(normalize("\u{feff}paris\u{200f}"), "paris");
    }

    #[test]
    fn key_matches_either_answer_form() {
        let key = AnswerKey::new("پاریس", Some("Paris"));
        assert!(key.matches("  paris "));
        assert!(key.matches("پاریس"));
        assert!(!key.matches("london"));
        assert!(!key.matches(""));
        assert!(!key.matches("..."));
    }

    #[test]
    fn blank_alternate_is_ignored() {
        let key = AnswerKey::new("seven", Some("   "));
        assert!(key.matches("Seven"));
        assert!(!key.matches(""));
    }
}
