use regcheck_protocol::{requirement_key, CheckResult, RequirementCatalog};
use std::collections::{BTreeSet, HashMap};

pub const MAX_PAGES: usize = 200;
pub const SNIPPET_CHARS: usize = 80;
pub const MAX_SNIPPETS: usize = 3;
pub const DEFAULT_CONFIDENCE: f64 = 0.5;
const UNNAMED_FILE: &str = "file";

const MANDATORY_CUES: &[&str] = &["mandatory", "zorunlu"];
const OPTIONAL_CUES: &[&str] = &["optional", "opsiyonel", "seçimli", "secimli"];

/// Fills in what the oracle left out of a check result, from the per-file evidence it did
/// return, and resolves `mustHave` against the requirement catalog.
///
/// Normalizing an already normalized result changes nothing.
pub struct EvidenceAggregator {
    must_have: HashMap<String, bool>,
}

impl EvidenceAggregator {
    pub fn new(catalog: &RequirementCatalog) -> Self {
        Self {
            must_have: catalog.must_have_index(),
        }
    }

    pub fn normalize(&self, checks: &mut [CheckResult]) {
        for check in checks {
            self.normalize_one(check);
        }
    }

    pub fn normalize_one(&self, check: &mut CheckResult) {
        check.pages = clean_pages(check.pages.iter().copied());

        if let Some(must) = lexical_must_have(&check.requirement).or_else(|| {
            self.must_have
                .get(&requirement_key(&check.requirement))
                .copied()
        }) {
            check.must_have = must;
        }

        if check.evidence.trim().is_empty() {
            let snippets: Vec<String> = check
                .evidence_by_file
                .iter()
                .filter(|fe| !fe.evidence.trim().is_empty())
                .take(MAX_SNIPPETS)
                .map(|fe| {
                    let name = if fe.file_name.trim().is_empty() {
                        UNNAMED_FILE
                    } else {
                        fe.file_name.as_str()
                    };
                    format!("{name}: {}", truncate(fe.evidence.trim(), SNIPPET_CHARS))
                })
                .collect();
            check.evidence = snippets.join(" | ");
        }

        if check.pages.is_empty() {
            check.pages = clean_pages(
                check
                    .evidence_by_file
                    .iter()
                    .flat_map(|fe| fe.pages.iter().copied()),
            );
        }

        let confidence = match check.confidence {
            Some(c) if !c.is_nan() => c,
            _ => {
                let known: Vec<f64> = check
                    .evidence_by_file
                    .iter()
                    .filter_map(|fe| fe.confidence)
                    .filter(|c| c.is_finite())
                    .collect();
                if known.is_empty() {
                    DEFAULT_CONFIDENCE
                } else {
                    round2(known.iter().sum::<f64>() / known.len() as f64)
                }
            }
        };
        check.confidence = Some(confidence.clamp(0.0, 1.0));
    }
}

/// `Some(true)` for a mandatory cue, `Some(false)` for an optional one. Mandatory cues win.
pub fn lexical_must_have(requirement: &str) -> Option<bool> {
    let text = requirement.to_lowercase();
    if MANDATORY_CUES.iter().any(|cue| text.contains(cue)) {
        Some(true)
    } else if OPTIONAL_CUES.iter().any(|cue| text.contains(cue)) {
        Some(false)
    } else {
        None
    }
}

fn clean_pages(pages: impl Iterator<Item = i64>) -> Vec<i64> {
    pages
        .filter(|p| *p >= 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(MAX_PAGES)
        .collect()
}

/// At most `max` characters; an ellipsis marks a cut.
pub fn truncate(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
