use crate::fs_util::{lock_file, LockMode};
use crate::{Result, StoreError};
use regcheck_protocol::FeedbackOverride;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Append-only JSON-lines log of human overrides.
///
/// Appends take an in-process async lock and an exclusive OS file lock, so records written by
/// concurrent tasks or processes never interleave. Readers take a shared lock.
pub struct FeedbackLog {
    path: PathBuf,
    append_lock: tokio::sync::Mutex<()>,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &FeedbackOverride) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut lock = lock_file(&path, LockMode::Exclusive, true)?;
            let file = lock.file();
            file.write_all(&line)?;
            file.sync_data()
        })
        .await
        .map_err(|err| StoreError::Other(format!("join feedback append: {err}")))??;

        log::debug!(
            "recorded feedback for {:?} ({}/{})",
            record.requirement_key,
            record.scenario,
            record.invoice_type
        );
        Ok(())
    }

    /// Every record in log order. Lines that do not parse are skipped with a warning.
    pub async fn load_all(&self) -> Result<Vec<FeedbackOverride>> {
        let path = self.path.clone();
        let raw = tokio::task::spawn_blocking(move || -> std::io::Result<Option<String>> {
            if !path.exists() {
                return Ok(None);
            }
            let mut lock = lock_file(&path, LockMode::Shared, false)?;
            let mut raw = String::new();
            lock.file().read_to_string(&mut raw)?;
            Ok(Some(raw))
        })
        .await
        .map_err(|err| StoreError::Other(format!("join feedback read: {err}")))??;

        let Some(raw) = raw else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FeedbackOverride>(line) {
                Ok(record) => records.push(record),
                Err(err) => log::warn!(
                    "skipping unreadable feedback record {}:{}: {err}",
                    self.path.display(),
                    idx + 1
                ),
            }
        }
        Ok(records)
    }

    /// Records for one scenario and invoice type, compared case-insensitively.
    pub async fn load_for(
        &self,
        scenario: &str,
        invoice_type: &str,
    ) -> Result<Vec<FeedbackOverride>> {
        let mut records = self.load_all().await?;
        records.retain(|r| r.matches_context(scenario, invoice_type));
        Ok(records)
    }
}
