use crate::scan::ScanState;

fn is_edge_junk(ch: char) -> bool {
    ch.is_whitespace()
        || ch.is_control()
        || matches!(ch, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}')
}

/// Bare tokens some models emit for non-finite numbers. Signed forms must be tried first.
const NON_FINITE: [&str; 4] = ["-Infinity", "-NaN", "Infinity", "NaN"];

/// Repair the most common JSON-syntax slips in a recovered candidate.
///
/// * invisible and control characters at either edge are trimmed;
/// * a comma whose next significant character is `]` or `}` is dropped;
/// * bare `NaN`, `Infinity` and their negated forms become `null`;
/// * raw newlines, carriage returns and tabs inside string literals are escaped.
///
/// String contents are otherwise preserved byte for byte.
pub fn sanitize(candidate: &str) -> String {
    let text = candidate.trim_matches(is_edge_junk);
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut state = ScanState::Outside;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match state {
            ScanState::Outside => {
                if ch == ',' && closes_next(&chars[i + 1..]) {
                    i += 1;
                    continue;
                }
                if let Some(len) = non_finite_at(&chars, i) {
                    out.push_str("null");
                    i += len;
                    continue;
                }
                out.push(ch);
            }
            ScanState::InString => match ch {
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(ch),
            },
            ScanState::Escape => match ch {
                // The backslash is already written; complete it as a valid escape.
                '\n' => out.push('n'),
                '\r' => out.push('r'),
                '\t' => out.push('t'),
                _ => out.push(ch),
            },
        }
        state = state.step(ch);
        i += 1;
    }
    out
}

/// Next significant character, skipping whitespace and further commas, is a closer.
fn closes_next(rest: &[char]) -> bool {
    rest.iter()
        .find(|c| !c.is_whitespace() && **c != ',')
        .is_some_and(|c| matches!(c, ']' | '}'))
}

fn non_finite_at(chars: &[char], at: usize) -> Option<usize> {
    if at > 0 && is_word_char(chars[at - 1]) {
        return None;
    }
    NON_FINITE.iter().find_map(|token| {
        let len = token.chars().count();
        let end = at + len;
        if end > chars.len() || !chars[at..end].iter().copied().eq(token.chars()) {
            return None;
        }
        if chars.get(end).is_some_and(|c| is_word_char(*c)) {
            return None;
        }
        Some(len)
    })
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
