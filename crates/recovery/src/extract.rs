use crate::scan::ScanState;
use once_cell::sync::Lazy;
use regex::Regex;

static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```[A-Za-z0-9_+\-]*").expect("valid fence regex"));
static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```\s*$").expect("valid fence regex"));

/// Remove a leading ```` ```lang ```` marker and a trailing ```` ``` ```` marker, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let start = FENCE_OPEN.find(trimmed).map_or(0, |m| m.end());
    let rest = &trimmed[start..];
    let end = FENCE_CLOSE.find(rest).map_or(rest.len(), |m| m.start());
    rest[..end].trim()
}

/// Pull the first JSON object or array out of `text`.
///
/// The scan starts at the first `{` or `[` and stops when the nesting stack empties. When the text
/// runs out first (the oracle hit its output limit), an open string literal is terminated and the
/// missing closers are appended innermost first. A closer that does not match the innermost open
/// token ends the scan there and the fragment is closed the same way.
///
/// Text without any opening token is returned fence-stripped and otherwise untouched; validation
/// decides what happens to it.
pub fn extract_candidate(text: &str) -> String {
    let body = strip_code_fences(text);
    let Some(start) = body.find(['{', '[']) else {
        return body.to_string();
    };
    let fragment = &body[start..];

    let mut state = ScanState::Outside;
    let mut closers: Vec<char> = Vec::new();
    let mut end = fragment.len();

    for (idx, ch) in fragment.char_indices() {
        if state == ScanState::Outside {
            match ch {
                '{' => closers.push('}'),
                '[' => closers.push(']'),
                '}' | ']' => {
                    if closers.last() != Some(&ch) {
                        end = idx;
                        break;
                    }
                    closers.pop();
                    if closers.is_empty() {
                        return fragment[..idx + ch.len_utf8()].to_string();
                    }
                }
                _ => {}
            }
        }
        state = state.step(ch);
    }

    log::debug!(
        "force-closing truncated JSON fragment ({} open levels, open string: {})",
        closers.len(),
        state != ScanState::Outside
    );
    force_close(&fragment[..end], state, &closers)
}

fn force_close(fragment: &str, state: ScanState, closers: &[char]) -> String {
    let mut out = String::with_capacity(fragment.len() + closers.len() + 1);
    match state {
        ScanState::Outside => out.push_str(fragment.trim_end()),
        ScanState::InString => {
            out.push_str(fragment);
            out.push('"');
        }
        ScanState::Escape => {
            // A dangling backslash would escape the closing quote.
            out.push_str(&fragment[..fragment.len() - 1]);
            out.push('"');
        }
    }
    out.extend(closers.iter().rev());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_fences_with_and_without_language_tag() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```  \n"), "[1]");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn returns_first_complete_object_and_ignores_trailing_prose() {
        let text = "Sure! {\"a\": {\"b\": [1, 2]}} and then {\"c\": 3}";
        assert_eq!(extract_candidate(text), "{\"a\": {\"b\": [1, 2]}}");
    }

    #[test]
    fn picks_array_when_it_comes_first() {
        assert_eq!(extract_candidate("x [1, {\"a\": 2}] y"), "[1, {\"a\": 2}]");
    }

    #[test]
    fn braces_inside_strings_do_not_count() {
        let text = r#"{"a": "}{][", "b": "\"}"}"#;
        assert_eq!(extract_candidate(text), text);
    }

    #[test]
    fn closes_truncated_nesting_innermost_first() {
        assert_eq!(
            extract_candidate(r#"{"checks": [{"requirement": "X", "pages": [1, 2"#),
            r#"{"checks": [{"requirement": "X", "pages": [1, 2]}]}"#
        );
    }

    #[test]
    fn terminates_open_string_before_closing() {
        assert_eq!(
            extract_candidate(r#"{"checks": [{"evidence": "Amount: 10"#),
            r#"{"checks": [{"evidence": "Amount: 10"}]}"#
        );
    }

    #[test]
    fn drops_dangling_escape_when_truncated_inside_string() {
        assert_eq!(extract_candidate(r#"{"a": "line\"#), r#"{"a": "line"}"#);
    }

    #[test]
    fn mismatched_closer_ends_the_scan() {
        assert_eq!(extract_candidate(r#"{"a": [1, 2}"#), r#"{"a": [1, 2]}"#);
    }

    #[test]
    fn text_without_json_is_returned_as_is() {
        assert_eq!(extract_candidate("```\nno json here\n```"), "no json here");
        assert_eq!(extract_candidate(""), "");
    }

    #[test]
    fn truncated_fenced_output_closes_cleanly() {
        let text = "```json\n{\"checks\": [{\"requirement\": \"X\"},\n```";
        assert_eq!(
            extract_candidate(text),
            "{\"checks\": [{\"requirement\": \"X\"},]}"
        );
    }
}
