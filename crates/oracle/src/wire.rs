//! Request and response bodies of the Gemini-compatible REST API.

use crate::error::{OracleError, Result};
use regcheck_protocol::AttachmentRef;
use serde_json::{json, Value};

pub fn generate_url(base_url: &str, model: &str) -> String {
    format!(
        "{}/v1beta/models/{model}:generateContent",
        base_url.trim_end_matches('/')
    )
}

pub fn upload_start_url(base_url: &str) -> String {
    format!("{}/upload/v1beta/files", base_url.trim_end_matches('/'))
}

/// Text parts first, then one `file_data` part per attachment.
pub fn generate_payload(
    prompt_parts: &[String],
    attachments: &[AttachmentRef],
    schema: &Value,
    max_output_tokens: u32,
) -> Value {
    let mut parts: Vec<Value> = prompt_parts
        .iter()
        .map(|text| json!({ "text": text }))
        .collect();
    parts.extend(attachments.iter().map(|a| {
        json!({
            "file_data": { "mime_type": a.mime_type, "file_uri": a.uri }
        })
    }));

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "response_mime_type": "application/json",
            "response_schema": schema,
            "max_output_tokens": max_output_tokens,
        }
    })
}

/// Text of the first text part of the first candidate.
pub fn extract_first_text(body: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body).map_err(|_| OracleError::malformed(body))?;
    value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .and_then(|parts| parts.iter().find_map(|p| p.get("text").and_then(Value::as_str)))
        .map(str::to_string)
        .ok_or_else(|| OracleError::malformed(body))
}

pub fn upload_start_body(display_name: &str) -> Value {
    json!({ "file": { "display_name": display_name } })
}

/// The file record sits either under `file` or at the root. A missing mime type falls back to
/// the one that was sent.
pub fn parse_upload_response(body: &str, sent_mime: &str) -> Result<AttachmentRef> {
    let value: Value = serde_json::from_str(body).map_err(|_| OracleError::malformed(body))?;
    let file = value.get("file").unwrap_or(&value);
    let uri = file
        .get("uri")
        .and_then(Value::as_str)
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| OracleError::malformed(body))?;
    let mime_type = file
        .get("mime_type")
        .or_else(|| file.get("mimeType"))
        .and_then(Value::as_str)
        .unwrap_or(sent_mime);
    Ok(AttachmentRef {
        uri: uri.to_string(),
        mime_type: mime_type.to_string(),
    })
}
