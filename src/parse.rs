//! Total parsers for free-form model output.
//!
//! Model replies are untrusted text. Every parser here accepts any input and
//! returns a [`Parsed`] value instead of panicking or guessing.
//!
//! Labelled replies (`Reframed question: ...`, `#NEW QUERY#: ...`) are read
//! with patterns of the form `(?is)^.*<label>\s*:?(.*)$`. The greedy prefix
//! selects the last occurrence of the label, so a model that echoes the
//! instructions before answering still parses.

use fancy_regex::Regex;
use std::sync::LazyLock;

static RESPONSE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^.*\bresponse\s*:(.*)$").expect("valid regex")
});

/// Result of parsing model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Parsed(T),
    /// The raw text that could not be parsed.
    Malformed(String),
}

/// Strip incidental markdown around a short label: asterisks, backticks,
/// quotes, and surrounding whitespace.
pub fn strip_formatting(raw: &str) -> String {
    raw.replace(['*', '`'], "")
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Text captured by the first group of `pattern`, if it matches.
pub fn capture<'a>(pattern: &Regex, raw: &'a str) -> Option<&'a str> {
    pattern
        .captures(raw)
        .ok()
        .flatten()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parse a boolean verdict such as `True`, `**False**`, or `RESPONSE: True`.
pub fn parse_verdict(raw: &str) -> Parsed<bool> {
    let cleaned = strip_formatting(raw);
    let candidate = capture(&RESPONSE_LABEL, &cleaned)
        .map(strip_formatting)
        .unwrap_or(cleaned);
    let word = candidate
        .split(|c: char| !c.is_ascii_alphabetic())
        .find(|w| !w.is_empty())
        .unwrap_or("")
        .to_ascii_lowercase();
    match word.as_str() {
        "true" | "yes" => Parsed::Parsed(true),
        "false" | "no" => Parsed::Parsed(false),
        _ => Parsed::Malformed(raw.to_string()),
    }
}
