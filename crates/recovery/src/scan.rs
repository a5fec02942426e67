/// Lexical position of a forward scan over JSON-ish text.
///
/// Structural characters (`{}[],`) only count while `Outside`. A backslash inside a string
/// moves to `Escape`, which consumes exactly one character and returns to `InString`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanState {
    Outside,
    InString,
    Escape,
}

impl ScanState {
    pub(crate) fn step(self, ch: char) -> Self {
        match (self, ch) {
            (Self::Outside, '"') => Self::InString,
            (Self::Outside, _) => Self::Outside,
            (Self::InString, '\\') => Self::Escape,
            (Self::InString, '"') => Self::Outside,
            (Self::InString, _) => Self::InString,
            (Self::Escape, _) => Self::InString,
        }
    }
}
