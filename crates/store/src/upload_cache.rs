use crate::fs_util::{read_optional, sha256_hex, write_json_atomic};
use crate::keyed_lock::KeyedLocks;
use crate::Result;
use regcheck_oracle::mime::{mime_for_path, FALLBACK_MIME};
use regcheck_oracle::{ArtifactUploader, OracleError};
use regcheck_protocol::{AttachmentRef, UploadCacheEntry};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Content-addressed record of files already uploaded to the oracle, keyed by local path.
///
/// A lookup hits only when the stored hash matches the file's current bytes. Concurrent callers
/// for the same unseen `(path, hash)` wait on each other and share one upload.
pub struct UploadCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, UploadCacheEntry>>,
    key_locks: KeyedLocks,
    persist_lock: tokio::sync::Mutex<()>,
}

impl UploadCache {
    /// Load the persisted map. A corrupt file is logged and treated as empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match read_optional(&path).await? {
            None => HashMap::new(),
            Some(bytes) => match serde_json::from_slice::<HashMap<String, UploadCacheEntry>>(&bytes)
            {
                Ok(map) => map,
                Err(err) => {
                    log::warn!(
                        "ignoring unreadable upload cache {}: {err}",
                        path.display()
                    );
                    HashMap::new()
                }
            },
        };
        log::debug!("upload cache {}: {} entries", path.display(), entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            key_locks: KeyedLocks::new(),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn get(&self, local_path: &Path) -> Option<UploadCacheEntry> {
        self.entries().get(&path_key(local_path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, UploadCacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &str, sha256: &str) -> Option<AttachmentRef> {
        self.entries()
            .get(key)
            .filter(|entry| entry.sha256 == sha256)
            .map(UploadCacheEntry::attachment)
    }

    /// Upload under the local file name; see [`Self::get_or_upload_named`].
    pub async fn get_or_upload(
        &self,
        local_path: &Path,
        uploader: &dyn ArtifactUploader,
        cancel: &CancellationToken,
    ) -> Result<AttachmentRef> {
        let display_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("file");
        self.get_or_upload_named(local_path, display_name, uploader, cancel)
            .await
    }

    /// `display_name` only labels a fresh upload; cache identity stays `(local_path, sha256)`.
    pub async fn get_or_upload_named(
        &self,
        local_path: &Path,
        display_name: &str,
        uploader: &dyn ArtifactUploader,
        cancel: &CancellationToken,
    ) -> Result<AttachmentRef> {
        let bytes = match read_optional(local_path).await? {
            Some(bytes) => bytes,
            None => return Err(OracleError::MissingArtifact(local_path.to_path_buf()).into()),
        };
        let sha256 = sha256_hex(&bytes);
        let key = path_key(local_path);

        if let Some(hit) = self.lookup(&key, &sha256) {
            log::debug!("upload cache hit for {key}");
            return Ok(hit);
        }

        let _guard = self.key_locks.lock(&format!("{key}\0{sha256}")).await;
        if let Some(hit) = self.lookup(&key, &sha256) {
            log::debug!("upload cache hit for {key} after waiting");
            return Ok(hit);
        }

        let mime_type = mime_for_path(local_path).unwrap_or(FALLBACK_MIME);
        let attachment = uploader
            .upload_artifact(bytes, display_name, mime_type, cancel)
            .await?;

        let entry = UploadCacheEntry {
            local_path: key.clone(),
            sha256,
            file_uri: attachment.uri.clone(),
            mime_type: attachment.mime_type.clone(),
        };
        self.entries().insert(key, entry);
        self.persist().await?;
        Ok(attachment)
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot: BTreeMap<String, UploadCacheEntry> = self
            .entries()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        write_json_atomic(&self.path, &snapshot).await
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
