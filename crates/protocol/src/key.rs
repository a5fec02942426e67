use once_cell::sync::Lazy;
use regex::Regex;

/// Unicode general category P: dashes, brackets, quotes and other punctuation. Symbols such as
/// `+`, `$` or `₺` are not in it.
static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\p{P}").expect("valid punctuation class"));

/// Fuzzy identity of a requirement sentence: lowercase, trimmed, punctuation removed,
/// whitespace runs collapsed to a single space.
///
/// Two requirements that differ only in punctuation map to the same key. Feedback and catalog
/// lookups accept that collision.
pub fn requirement_key(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    PUNCTUATION
        .replace_all(&lowered, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
