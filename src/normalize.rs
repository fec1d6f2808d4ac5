//! Text and language-code canonicalization for cache lookups, plus the
//! pass-through classification for strings that should never reach the model.

use regex::Regex;
use std::sync::LazyLock;

pub const AUTO_LANGUAGE: &str = "auto";

/// Identity of a translation request once variants that cannot change the
/// meaning (dash forms, line endings, casing of language tags) are folded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_language: String,
    pub target_language: String,
    pub text: String,
}

impl CacheKey {
    pub fn new(text: &str, source_language: &str, target_language: &str) -> Self {
        Self {
            source_language: normalize_language(source_language),
            target_language: normalize_language(target_language),
            text: normalize_text(text),
        }
    }
}

/// Fold dash variants to ASCII hyphen, line endings to `\n`, non-breaking
/// spaces to plain spaces, and trim the ends.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' | '\u{FE63}' | '\u{FF0D}' => out.push('-'),
            '\u{00A0}' | '\u{202F}' => out.push(' '),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            '\u{2028}' | '\u{2029}' => out.push('\n'),
            other => out.push(other),
        }
    }
    out.trim().to_string()
}

/// Lowercase, `_` to `-`; an empty code means auto-detect.
pub fn normalize_language(code: &str) -> String {
    let code = code.trim().to_lowercase().replace('_', "-");
    if code.is_empty() {
        AUTO_LANGUAGE.to_string()
    } else {
        code
    }
}

/// Primary subtag of a language code (`pt-BR` -> `pt`), `None` for auto.
pub fn primary_subtag(code: &str) -> Option<String> {
    let normalized = normalize_language(code);
    let primary = normalized.split('-').next().unwrap_or_default().to_string();
    if primary.is_empty() || primary == AUTO_LANGUAGE {
        None
    } else {
        Some(primary)
    }
}

pub fn same_language(source: &str, target: &str) -> bool {
    match (primary_subtag(source), primary_subtag(target)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Acronyms and format codes that read the same in every language.
const KEEP_AS_IS_LABELS: &[&str] = &[
    "ok", "id", "url", "api", "faq", "pdf", "csv", "json", "html", "http", "https", "llm",
    "nmt", "gpu", "cpu", "ui", "ux",
];

static SNAKE_OR_CONSTANT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:_[A-Za-z0-9]+)+$").unwrap());
static CAMEL_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+(?:[A-Z][a-z0-9]*)+$").unwrap());
static KEBAB_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*-[0-9a-z]*[0-9][0-9a-z]*$").unwrap());
static PATH_OR_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[A-Za-z][A-Za-z0-9+.-]*://\S+|[\w.-]*[/\\][\w./\\-]*|[\w-]+\.[\w.-]*\w)$").unwrap());
static VERSION_OR_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:v?\d+(?:\.\d+)+|0x[0-9A-Fa-f]+|#[0-9A-Fa-f]{3,8})$").unwrap());
static CODE_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^`[^`]+`$").unwrap());

/// Whether `text` should be returned untouched instead of being sent to the model.
pub fn is_non_translatable(text: &str) -> bool {
    let t = text.trim();
    if t.is_empty() || t.chars().count() == 1 {
        return true;
    }
    if !t.chars().any(char::is_alphabetic) {
        return true;
    }
    if KEEP_AS_IS_LABELS.iter().any(|label| t.eq_ignore_ascii_case(label)) {
        return true;
    }
    if t.contains(char::is_whitespace) {
        return CODE_SPAN.is_match(t);
    }
    SNAKE_OR_CONSTANT.is_match(t)
        || CAMEL_CASE.is_match(t)
        || KEBAB_IDENT.is_match(t)
        || PATH_OR_URL.is_match(t)
        || VERSION_OR_HEX.is_match(t)
        || CODE_SPAN.is_match(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_folds_dashes_newlines_and_language_case() {
        let a = CacheKey::new("Red\u{2014}blue\r\nline ", "EN_us", "IT");
        let b = CacheKey::new("Red-blue\nline", "en-US", "it");
        assert_eq!(a, b);
        assert_eq!(a.source_language, "en-us");
        assert_eq!(a.text, "Red-blue\nline");
    }

    #[test]
    fn test_empty_source_language_is_auto() {
        assert_eq!(CacheKey::new("hi", "", "fr").source_language, "auto");
    }

    #[test]
    fn test_same_language_by_primary_subtag() {
        assert!(same_language("en-GB", "EN"));
        assert!(same_language("pt_BR", "pt-PT"));
        assert!(!same_language("en", "fr"));
        assert!(!same_language("auto", "auto"));
        assert!(!same_language("", "en"));
    }

    #[test]
    fn test_identifiers_and_labels_pass_through() {
        for text in [
            "user_id",
            "MAX_RETRIES",
            "getUserName",
            "src/main.rs",
            "https://example.com/a?b=1",
            "config.toml",
            "v1.2.3",
            "#ff00aa",
            "OK",
            "Api",
            "…",
            "42",
            "!!",
            "x",
            "   ",
            "`cargo test`",
        ] {
            assert!(is_non_translatable(text), "{text:?} should pass through");
        }
    }

    #[test]
    fn test_natural_text_is_translatable() {
        for text in ["Hello", "Save changes", "Good morning, Anna.", "well-known", "Ciao!", "Email", "beta", "Wifi"] {
            assert!(!is_non_translatable(text), "{text:?} should be translated");
        }
    }
}
