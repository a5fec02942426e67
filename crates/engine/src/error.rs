use regcheck_oracle::OracleError;
use regcheck_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Stable machine code carried by CLI output and HTTP error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Oracle(err) => err.code(),
            Self::Store(err) => err.code(),
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Oracle(OracleError::Cancelled) | Self::Store(StoreError::Oracle(OracleError::Cancelled))
        )
    }
}
