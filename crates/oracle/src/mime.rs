use std::path::Path;

pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Extensions the oracle accepts as attachments.
const ALLOWED: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("xml", "application/xml"),
];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Mime type for an allowlisted file, `None` otherwise.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = extension(path)?;
    ALLOWED
        .iter()
        .find(|(allowed, _)| *allowed == ext)
        .map(|(_, mime)| *mime)
}

pub fn is_allowed(path: &Path) -> bool {
    mime_for_path(path).is_some()
}

/// Lowercased extension of an allowlisted file name.
pub fn allowed_extension(file_name: &str) -> Option<String> {
    let path = Path::new(file_name);
    is_allowed(path).then(|| extension(path)).flatten()
}
