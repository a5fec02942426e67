//! # Regcheck Protocol
//!
//! Data model shared by every regcheck crate: the requirement catalog, per-requirement check
//! results with their per-file evidence, human feedback overrides and upload-cache records.
//!
//! Records coming from the oracle are deserialized leniently (see [`lenient`]); everything this
//! workspace writes is serialized with stable field names.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

mod key;
pub mod lenient;
mod model;

pub use key::requirement_key;
pub use model::{
    AttachmentRef, CheckResult, FeedbackOverride, FileEvidence, LawRef, RequirementCatalog,
    RequirementSpec, UploadCacheEntry, UNBOUNDED_OCCURS,
};

/// Error body returned by the binary's HTTP surface and printed by the CLI.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

pub fn serialize_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(Into::into)
}

pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
