use crate::fs_util::{sha256_hex, write_bytes_atomic};
use crate::{Result, StoreError};
use regcheck_oracle::mime::allowed_extension;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

/// Upper bound on the bytes extracted from a single archive.
pub const MAX_ARCHIVE_BYTES: u64 = 512 * 1024 * 1024;

/// A document on disk together with the name its submitter gave it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub path: PathBuf,
    pub display_name: String,
}

impl StoredDocument {
    /// A caller-supplied local file; its own file name is the display name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("file")
            .to_string();
        Self { path, display_name }
    }
}

/// Result of accepting one submitted file, which may be an archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaterializedUpload {
    pub documents: Vec<StoredDocument>,
    /// Names that were not stored because their type is not accepted.
    pub skipped: Vec<String>,
}

pub fn is_archive(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Store posted document bytes as `<dir>/<sha256>.<ext>`.
///
/// Identical bytes always land on the same path, so the upload cache recognizes a re-posted
/// document. Files outside the attachment allowlist are rejected.
pub async fn materialize_upload(
    dir: &Path,
    file_name: &str,
    bytes: &[u8],
) -> Result<StoredDocument> {
    let ext = allowed_extension(file_name)
        .ok_or_else(|| StoreError::UnsupportedFile(file_name.to_string()))?;
    let path = dir.join(format!("{}.{ext}", sha256_hex(bytes)));
    if tokio::fs::try_exists(&path).await? {
        log::debug!("upload {file_name} already materialized at {}", path.display());
    } else {
        write_bytes_atomic(path.clone(), bytes.to_vec()).await?;
    }
    Ok(StoredDocument {
        path,
        display_name: file_name.to_string(),
    })
}

/// Extract the allowlisted entries of a zip archive and materialize each one.
///
/// Directory entries are ignored, entries outside the allowlist are reported as skipped, and
/// every stored entry keeps its own file name (without the directory part) as display name.
pub async fn materialize_archive(
    dir: &Path,
    archive_name: &str,
    bytes: Vec<u8>,
) -> Result<MaterializedUpload> {
    let name = archive_name.to_string();
    let (entries, skipped) = tokio::task::spawn_blocking(move || read_archive(&name, bytes))
        .await
        .map_err(|err| StoreError::Other(format!("archive extraction task failed: {err}")))??;

    let mut upload = MaterializedUpload {
        documents: Vec::with_capacity(entries.len()),
        skipped,
    };
    for (entry_name, entry_bytes) in entries {
        upload
            .documents
            .push(materialize_upload(dir, &entry_name, &entry_bytes).await?);
    }
    log::debug!(
        "archive {archive_name}: {} documents, {} skipped",
        upload.documents.len(),
        upload.skipped.len()
    );
    Ok(upload)
}

/// Accept one submitted file: archives are expanded, other files are stored when allowlisted.
pub async fn materialize_submission(
    dir: &Path,
    file_name: &str,
    bytes: Vec<u8>,
) -> Result<MaterializedUpload> {
    if is_archive(file_name) {
        return materialize_archive(dir, file_name, bytes).await;
    }
    match materialize_upload(dir, file_name, &bytes).await {
        Ok(document) => Ok(MaterializedUpload {
            documents: vec![document],
            skipped: Vec::new(),
        }),
        Err(StoreError::UnsupportedFile(name)) => {
            log::warn!("skipping unsupported upload {name}");
            Ok(MaterializedUpload {
                documents: Vec::new(),
                skipped: vec![name],
            })
        }
        Err(err) => Err(err),
    }
}

type ArchiveEntries = (Vec<(String, Vec<u8>)>, Vec<String>);

fn read_archive(archive_name: &str, bytes: Vec<u8>) -> Result<ArchiveEntries> {
    let corrupt = |err: zip::result::ZipError| StoreError::Archive(format!("{archive_name}: {err}"));
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;

    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    let mut budget = MAX_ARCHIVE_BYTES;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(corrupt)?;
        if entry.is_dir() {
            continue;
        }
        let Some(entry_name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        else {
            log::warn!("{archive_name}: ignoring entry with unsafe path {:?}", entry.name());
            continue;
        };
        if allowed_extension(&entry_name).is_none() {
            log::warn!("{archive_name}: skipping unsupported entry {entry_name}");
            skipped.push(format!("{archive_name}/{entry_name}"));
            continue;
        }

        let mut content = Vec::new();
        (&mut entry).take(budget + 1).read_to_end(&mut content)?;
        let used = content.len() as u64;
        if used > budget {
            return Err(StoreError::Archive(format!(
                "{archive_name}: extracted content exceeds {MAX_ARCHIVE_BYTES} bytes"
            )));
        }
        budget -= used;
        entries.push((entry_name, content));
    }
    Ok((entries, skipped))
}
