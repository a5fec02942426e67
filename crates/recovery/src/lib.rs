//! # Regcheck Recovery
//!
//! Turns whatever text the oracle produced into JSON that can be validated: code fences are
//! stripped, the first object or array is cut out (and force-closed when the output was
//! truncated), and common syntax slips are sanitized. None of these steps fail; validation
//! decides whether a repair round is needed.

mod extract;
mod sanitize;
mod scan;
mod validate;

pub use extract::{extract_candidate, strip_code_fences};
pub use sanitize::sanitize;
pub use validate::{validate, RepairNeeded, ResponseSchema, Validated};

/// Extract then sanitize.
pub fn recover_candidate(raw: &str) -> String {
    sanitize(&extract_candidate(raw))
}

pub const PREVIEW_CHARS: usize = 500;

/// First [`PREVIEW_CHARS`] characters of `text`, marked when cut.
pub fn bounded_preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
