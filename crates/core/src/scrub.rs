//! Identifier scrubbing.
//!
//! Free text from an intake passes through [`IdentifierDetector::scrub`] before it goes anywhere
//! near the model provider. Emails, `http(s)` URLs and phone-like digit runs are replaced with
//! fixed placeholders. [`IdentifierDetector::contains_identifiers`] re-runs the same patterns,
//! plus a bare date-of-birth keyword check, over the *serialised* outgoing payload and is the
//! last check before any external call.
//!
//! The placeholders contain no digits, `@` or scheme prefixes, so scrubbing is idempotent.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

pub const REDACTED_EMAIL: &str = "[redacted-email]";
pub const REDACTED_URL: &str = "[redacted-url]";
pub const REDACTED_PHONE: &str = "[redacted-phone]";

macro_rules! identifier_pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($regex_str).expect("identifier pattern is a valid regex"));
    };
}

identifier_pattern!(RE_EMAIL, r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}");

identifier_pattern!(RE_URL, r"(?i)\bhttps?://\S+");

// UK-biased: a 10/11 digit run starting with 0, or a grouped international-looking number.
identifier_pattern!(
    RE_PHONE,
    r"\b(?:0\d{9,10}|\+?\d{1,3}[-\s]?\d{2,4}[-\s]?\d{3,4}[-\s]?\d{3,4})\b"
);

// Coarse on purpose: any field or text mentioning a DOB keyword blocks generation.
identifier_pattern!(RE_DOB_KEYWORD, r"(?i)\b(?:dob|dateofbirth|date_of_birth)\b");

/// Pluggable identifier detection.
///
/// The orchestrator only talks to this trait, so a stricter detector (for example one backed by
/// a named-entity recogniser) can be swapped in without touching report generation.
pub trait IdentifierDetector: Send + Sync {
    /// Replace identifiers in `text` with placeholders.
    fn scrub(&self, text: &str) -> String;

    /// Whether `serialized` still contains anything that looks like an identifier.
    fn contains_identifiers(&self, serialized: &str) -> bool;
}

/// Regex-based detector for emails, URLs, phone numbers and DOB keywords.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternScrubber;

impl IdentifierDetector for PatternScrubber {
    fn scrub(&self, text: &str) -> String {
        let text = RE_EMAIL.replace_all(text, REDACTED_EMAIL);
        let text = RE_URL.replace_all(&text, REDACTED_URL);
        RE_PHONE.replace_all(&text, REDACTED_PHONE).into_owned()
    }

    fn contains_identifiers(&self, serialized: &str) -> bool {
        RE_EMAIL.is_match(serialized)
            || RE_URL.is_match(serialized)
            || RE_PHONE.is_match(serialized)
            || RE_DOB_KEYWORD.is_match(serialized)
    }
}

/// Scrub a JSON value that is expected to be a string.
///
/// Anything that is not a string yields an empty string rather than an error.
pub fn scrub_text_value(detector: &dyn IdentifierDetector, value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => detector.scrub(s),
        _ => String::new(),
    }
}

/// Scrub every string in a JSON tree, leaving keys and non-string leaves untouched.
pub fn scrub_value(detector: &dyn IdentifierDetector, value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(detector.scrub(&s)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| scrub_value(detector, v))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, scrub_value(detector, v)))
                .collect(),
        ),
        other => other,
    }
}
