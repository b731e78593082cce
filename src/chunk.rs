//! Bullet-entry text chunker.
//!
//! Design guides in the knowledge pool are mostly bulleted lists where each
//! `•` entry is one self-contained recommendation. Each entry becomes one
//! chunk, running from the bullet marker to the period that ends it. An
//! entry with no closing period runs on into the next bullet until one is
//! found. Line wraps inside an entry are collapsed to single spaces.
//!
//! Text without any bullet entries is split on paragraph boundaries
//! (`\n\n`) instead.

use fancy_regex::Regex;
use std::sync::LazyLock;

/// One `•` entry: the shortest run ending in a period that is followed by
/// the next bullet or the end of the text.
static BULLET_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"•\s*([\s\S]+?\.)(?=\s*•|\s*$)").expect("valid regex")
});

/// Split text into chunks, one per bullet entry, falling back to paragraphs.
pub fn chunk_text(text: &str) -> Vec<String> {
    let bullets = split_by_bullets(text);
    if bullets.is_empty() {
        split_paragraphs(text)
    } else {
        bullets
    }
}

/// Extract every `•` entry up to its terminating period.
///
/// Text before the first bullet and a trailing entry without a period are
/// dropped.
pub fn split_by_bullets(text: &str) -> Vec<String> {
    BULLET_ENTRY
        .captures_iter(text)
        .filter_map(Result::ok)
        .filter_map(|caps| caps.get(1))
        .map(|m| collapse_whitespace(m.as_str()))
        .filter(|entry| !entry.is_empty() && entry != ".")
        .collect()
}

/// Non-empty paragraphs with internal whitespace collapsed.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(collapse_whitespace)
        .filter(|p| !p.is_empty())
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_chunk_per_bullet() {
        let text = "Recommended WWR by city\n\
                    • Barcelona: keep south WWR\n  between 30 and 40%.\n\
                    • Oslo: larger north glazing is acceptable.";
        assert_eq!(
            split_by_bullets(text),
            vec![
                "Barcelona: keep south WWR between 30 and 40%.",
                "Oslo: larger north glazing is acceptable.",
            ]
        );
    }

    #[test]
    fn test_entry_without_period_runs_into_next() {
        let text = "• Madrid: shade west facades\n• Lisbon: same as Madrid.";
        assert_eq!(
            split_by_bullets(text),
            vec!["Madrid: shade west facades • Lisbon: same as Madrid."]
        );
    }

    #[test]
    fn test_unterminated_trailing_entry_dropped() {
        let text = "• First entry.\n• dangling entry";
        assert_eq!(split_by_bullets(text), vec!["First entry."]);
    }

    #[test]
    fn test_period_inside_entry() {
        let text = "• Use 0.35 WWR. Prefer low-e glass.\n• Next.";
        assert_eq!(
            split_by_bullets(text),
            vec!["Use 0.35 WWR. Prefer low-e glass.", "Next."]
        );
    }

    #[test]
    fn test_preamble_and_trailing_whitespace() {
        let text = "Guide intro. Read carefully.\n• Shade west facades.\n\n   ";
        assert_eq!(split_by_bullets(text), vec!["Shade west facades."]);
    }

    #[test]
    fn test_fallback_to_paragraphs() {
        let text = "Daylight matters.\n\n\n\nGlazing\nmatters too.\n\n   ";
        assert_eq!(
            chunk_text(text),
            vec!["Daylight matters.", "Glazing matters too."]
        );
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("").is_empty());
        assert!(split_by_bullets("no bullets here.").is_empty());
    }
}
