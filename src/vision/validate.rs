//! Card-number pattern validation
//!
//! Accepts recognized text only when it contains sixteen digits laid out as
//! four groups of four (optionally separated by a single space) and the engine
//! reported enough confidence.

use regex::Regex;
use std::sync::LazyLock;

/// Digits in a primary card number
pub const CARD_DIGITS: usize = 16;
/// Confidence must be strictly above this
pub const MIN_CONFIDENCE: f32 = 60.0;

static CARD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{4} ?[0-9]{4} ?[0-9]{4} ?[0-9]{4}").expect("valid card pattern"));

/// A number that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct CardCandidate {
    /// Sixteen digits, spaces removed
    pub number: String,
    pub confidence: f32,
}

/// First grouped 16-digit run in `text`, spaces removed
pub fn find_card_number(text: &str) -> Option<String> {
    let found = CARD_PATTERN.find(text)?;
    let digits: String = found
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    (digits.len() == CARD_DIGITS).then_some(digits)
}

/// Validate recognized text against the pattern and confidence threshold
pub fn validate(text: &str, confidence: f32, min_confidence: f32) -> Option<CardCandidate> {
    // NaN never passes
    if !(confidence > min_confidence) {
        return None;
    }
    find_card_number(text).map(|number| CardCandidate { number, confidence })
}
