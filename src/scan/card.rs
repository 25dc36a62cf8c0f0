//! Accepted detections

use chrono::{DateTime, Local};
use serde::Serialize;

/// Prefix shown in place of the first twelve digits
const MASK_PREFIX: &str = "**** **** **** ";

/// A validated card number
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedCard {
    /// Sixteen digits, no separators
    pub number: String,
    pub confidence: f32,
    pub timestamp: DateTime<Local>,
}

impl DetectedCard {
    pub fn new(number: String, confidence: f32) -> Self {
        Self {
            number,
            confidence,
            timestamp: Local::now(),
        }
    }

    /// Number with all but the last four digits hidden
    pub fn masked(&self) -> String {
        mask_number(&self.number)
    }

    /// Digits in groups of four
    pub fn grouped(&self) -> String {
        self.number
            .as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Masked or full form, depending on `reveal`
    pub fn display(&self, reveal: bool) -> String {
        if reveal {
            self.grouped()
        } else {
            self.masked()
        }
    }
}

/// Mask a digit string, keeping the last four characters
pub fn mask_number(number: &str) -> String {
    let chars: Vec<char> = number.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("{MASK_PREFIX}{tail}")
}
