//! # Regcheck Store
//!
//! Durable state kept under the data directory:
//!
//! - [`UploadCache`]: which local files the oracle already holds (`upload_cache.json`)
//! - [`FeedbackLog`]: append-only human overrides (`feedback.jsonl`)
//! - [`CatalogStore`]: the generated requirement catalog (`requirements.json`)
//! - [`materialize_submission`]: posted files and zip archives stored under `uploads/`
//!
//! Whole-file state is replaced atomically (temp file + rename); the feedback log is appended
//! under an exclusive OS lock.

mod catalog;
mod error;
mod feedback;
mod fs_util;
mod keyed_lock;
mod layout;
mod upload_cache;
mod uploads;

pub use catalog::CatalogStore;
pub use error::{Result, StoreError};
pub use feedback::FeedbackLog;
pub use keyed_lock::KeyedLocks;
pub use layout::{StoreLayout, FEEDBACK_FILE, REQUIREMENTS_FILE, UPLOADS_DIR, UPLOAD_CACHE_FILE};
pub use upload_cache::UploadCache;
pub use uploads::{
    is_archive, materialize_archive, materialize_submission, materialize_upload,
    MaterializedUpload, StoredDocument, MAX_ARCHIVE_BYTES,
};
