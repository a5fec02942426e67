use std::path::{Path, PathBuf};

pub const REQUIREMENTS_FILE: &str = "requirements.json";
pub const FEEDBACK_FILE: &str = "feedback.jsonl";
pub const UPLOAD_CACHE_FILE: &str = "upload_cache.json";
pub const UPLOADS_DIR: &str = "uploads";

/// File locations under the data directory.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn requirements_path(&self) -> PathBuf {
        self.root.join(REQUIREMENTS_FILE)
    }

    pub fn feedback_path(&self) -> PathBuf {
        self.root.join(FEEDBACK_FILE)
    }

    pub fn upload_cache_path(&self) -> PathBuf {
        self.root.join(UPLOAD_CACHE_FILE)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }
}
