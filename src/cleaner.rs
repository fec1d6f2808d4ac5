//! Post-processing of raw model output into a single-line translation.
//!
//! Best effort: the model is told to answer with the translation only, but
//! small models still echo the framing markers or append an explanation.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::prompt::{TEXT_END, TEXT_START};

static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

/// Phrases that introduce commentary rather than translation, in English and
/// Italian.
static EXPLANATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:means\b|refers\s+to\b|however\b|in\s+other\s+words\b|note:|significa\b|si\s+riferisce\s+a\b|tuttavia\b|in\s+altre\s+parole\b|nota:)",
    )
    .unwrap()
});

/// Strip markers, keep the first line, cut at the first explanation phrase.
/// May return an empty string when nothing survives.
pub fn clean_translation(raw: &str) -> String {
    let text = raw
        .replace(TEXT_START, "")
        .replace(TEXT_END, "")
        .replace("\r\n", "\n");
    let mut text = text.trim();

    if let Some(blank) = BLANK_LINE.find(text) {
        text = &text[..blank.start()];
    }
    if let Some(newline) = text.find('\n') {
        text = &text[..newline];
    }
    if let Some(phrase) = EXPLANATION.find(text) {
        text = &text[..phrase.start()];
    }

    let cleaned = text.trim().to_string();
    if cleaned.is_empty() && !raw.trim().is_empty() {
        debug!("Cleaning removed the whole response: {:?}", raw);
    }
    cleaned
}
