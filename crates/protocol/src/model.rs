use crate::key::requirement_key;
use crate::lenient::{
    lenient_bool, lenient_opt_bool, lenient_opt_f64, lenient_opt_i32, lenient_opt_i64,
    lenient_pages, null_as_default, null_as_empty_vec,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `maxOccurs` sentinel meaning "no upper bound".
pub const UNBOUNDED_OCCURS: i32 = -1;

fn default_true() -> bool {
    true
}

/// One checkable compliance condition drawn from a reference document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementSpec {
    #[serde(alias = "Requirement", default, deserialize_with = "null_as_default")]
    pub requirement: String,

    #[serde(
        alias = "Field",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "null_as_default"
    )]
    pub field: Option<String>,

    #[serde(
        alias = "Section",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "null_as_default"
    )]
    pub section: Option<String>,

    #[serde(
        alias = "Article",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "null_as_default"
    )]
    pub article: Option<String>,

    #[serde(
        alias = "MustHave",
        alias = "must_have",
        default = "default_true",
        deserialize_with = "lenient_bool"
    )]
    pub must_have: bool,

    #[serde(
        alias = "MinOccurs",
        alias = "min_occurs",
        default,
        deserialize_with = "lenient_opt_i32"
    )]
    pub min_occurs: Option<i32>,

    #[serde(
        alias = "MaxOccurs",
        alias = "max_occurs",
        default,
        deserialize_with = "lenient_opt_i32"
    )]
    pub max_occurs: Option<i32>,
}

impl RequirementSpec {
    pub fn new(requirement: impl Into<String>, must_have: bool) -> Self {
        Self {
            requirement: requirement.into(),
            field: None,
            section: None,
            article: None,
            must_have,
            min_occurs: None,
            max_occurs: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_occurs == Some(UNBOUNDED_OCCURS)
    }

    /// Blank references become absent and any negative `maxOccurs` collapses onto the sentinel.
    pub fn tidy(&mut self) {
        for slot in [&mut self.field, &mut self.section, &mut self.article] {
            if slot.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *slot = None;
            }
        }
        if self.max_occurs.is_some_and(|v| v < 0) {
            self.max_occurs = Some(UNBOUNDED_OCCURS);
        }
    }
}

/// The persisted requirement list plus whatever notes the oracle attached to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementCatalog {
    #[serde(alias = "Requirements", default, deserialize_with = "null_as_empty_vec")]
    pub requirements: Vec<RequirementSpec>,

    #[serde(
        alias = "Notes",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "null_as_default"
    )]
    pub notes: Option<String>,
}

impl RequirementCatalog {
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    /// Normalized requirement key → mustHave. The first entry wins when two requirements
    /// normalize to the same key.
    pub fn must_have_index(&self) -> HashMap<String, bool> {
        let mut index = HashMap::new();
        for spec in &self.requirements {
            index
                .entry(requirement_key(&spec.requirement))
                .or_insert(spec.must_have);
        }
        index
    }
}

/// The oracle's verdict for one requirement, aggregated across every uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub requirement: String,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub present: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub evidence: String,

    /// 1-based page numbers.
    #[serde(default, deserialize_with = "lenient_pages")]
    pub pages: Vec<i64>,

    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub confidence: Option<f64>,

    #[serde(
        rename = "mustHave",
        alias = "must_have",
        default,
        deserialize_with = "lenient_bool"
    )]
    pub must_have: bool,

    #[serde(
        rename = "evidence_by_file",
        alias = "evidenceByFile",
        default,
        deserialize_with = "null_as_empty_vec"
    )]
    pub evidence_by_file: Vec<FileEvidence>,

    #[serde(
        rename = "law_refs",
        alias = "lawRefs",
        default,
        deserialize_with = "null_as_empty_vec"
    )]
    pub law_refs: Vec<LawRef>,
}

impl CheckResult {
    pub fn new(requirement: impl Into<String>, present: bool) -> Self {
        Self {
            requirement: requirement.into(),
            present,
            ..Default::default()
        }
    }
}

/// Evidence contributed by a single uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEvidence {
    #[serde(
        rename = "file",
        alias = "filename",
        alias = "fileName",
        default,
        deserialize_with = "null_as_default"
    )]
    pub file_name: String,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub present: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub evidence: String,

    #[serde(default, deserialize_with = "lenient_pages")]
    pub pages: Vec<i64>,

    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub confidence: Option<f64>,
}

/// Citation into a reference document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LawRef {
    #[serde(
        rename = "doc_name",
        alias = "docName",
        default,
        deserialize_with = "null_as_default"
    )]
    pub doc_name: String,

    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub page: Option<i64>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub quote: Option<String>,
}

/// A human correction. Never mutated after it is appended to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackOverride {
    pub requirement_key: String,
    pub scenario: String,
    pub invoice_type: String,
    #[serde(default, deserialize_with = "lenient_opt_bool")]
    pub present_override: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub evidence_override: Option<String>,
    pub created_at_unix_ms: u64,
}

impl FeedbackOverride {
    pub fn matches_context(&self, scenario: &str, invoice_type: &str) -> bool {
        eq_ignore_case(&self.scenario, scenario) && eq_ignore_case(&self.invoice_type, invoice_type)
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Remote handle of an artifact the oracle already holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub uri: String,
    pub mime_type: String,
}

/// Persisted record of a local file that was uploaded to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCacheEntry {
    pub local_path: String,
    pub sha256: String,
    pub file_uri: String,
    pub mime_type: String,
}

impl UploadCacheEntry {
    pub fn attachment(&self) -> AttachmentRef {
        AttachmentRef {
            uri: self.file_uri.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}
