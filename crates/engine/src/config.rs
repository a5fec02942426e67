use crate::{EngineError, Result};
use regcheck_store::StoreLayout;
use std::path::PathBuf;

pub const DEFAULT_DATA_DIR: &str = "Data";
pub const DEFAULT_REQUIREMENT_COUNT: usize = 30;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Regulation documents every catalog generation and analysis is grounded on.
    pub reference_docs: Vec<PathBuf>,
    /// Catalog size hint passed to the oracle.
    pub requirement_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            reference_docs: Vec::new(),
            requirement_count: DEFAULT_REQUIREMENT_COUNT,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(dir) = get("REGCHECK_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir.trim());
        }
        if let Some(docs) = get("REGCHECK_REFERENCE_DOCS") {
            cfg.reference_docs = std::env::split_paths(docs.trim())
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(raw) = get("REGCHECK_REQUIREMENT_COUNT") {
            cfg.requirement_count = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(EngineError::InvalidConfig(format!(
                        "REGCHECK_REQUIREMENT_COUNT must be a positive integer, got {raw:?}"
                    )))
                }
            };
        }
        Ok(cfg)
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(&self.data_dir)
    }
}
