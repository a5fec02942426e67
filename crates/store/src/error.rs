use regcheck_oracle::OracleError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("unreadable archive {0}")]
    Archive(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Oracle(err) => err.code(),
            Self::UnsupportedFile(_) | Self::Archive(_) => "invalid_request",
            Self::Io(_) | Self::Json(_) | Self::Other(_) => "storage",
        }
    }
}
