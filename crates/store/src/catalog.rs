use crate::fs_util::{read_optional, write_json_atomic};
use crate::Result;
use regcheck_protocol::RequirementCatalog;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};

/// The persisted requirement catalog.
///
/// Saves replace the file atomically. Generation of a new catalog is serialized through
/// [`CatalogStore::generation_guard`].
pub struct CatalogStore {
    path: PathBuf,
    generation: Mutex<()>,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            generation: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when nothing is persisted. An unreadable file is logged and reported as absent so
    /// the next bootstrap regenerates it.
    pub async fn load(&self) -> Result<Option<RequirementCatalog>> {
        let Some(bytes) = read_optional(&self.path).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<RequirementCatalog>(&bytes) {
            Ok(catalog) => Ok(Some(catalog)),
            Err(err) => {
                log::warn!(
                    "ignoring unreadable requirement catalog {}: {err}",
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    /// The persisted catalog if it has at least one requirement.
    pub async fn load_non_empty(&self) -> Result<Option<RequirementCatalog>> {
        Ok(self.load().await?.filter(|c| !c.is_empty()))
    }

    pub async fn save(&self, catalog: &RequirementCatalog) -> Result<()> {
        write_json_atomic(&self.path, catalog).await?;
        log::info!(
            "saved {} requirements to {}",
            catalog.len(),
            self.path.display()
        );
        Ok(())
    }

    pub async fn generation_guard(&self) -> MutexGuard<'_, ()> {
        self.generation.lock().await
    }

    /// `None` while another generation is running.
    pub fn try_generation_guard(&self) -> Option<MutexGuard<'_, ()>> {
        self.generation.try_lock().ok()
    }
}
