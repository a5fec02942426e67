use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OracleError>;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("oracle API key is not configured (set REGCHECK_ORACLE_API_KEY)")]
    MissingCredential,

    #[error("artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("oracle unavailable after {attempts} attempts: {message}")]
    UpstreamUnavailable {
        attempts: u32,
        last_status: Option<u16>,
        message: String,
    },

    #[error("oracle rejected the request (HTTP {status}): {body_preview}")]
    UpstreamRejected { status: u16, body_preview: String },

    #[error("malformed oracle response: {preview}")]
    MalformedResponse { preview: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid oracle configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OracleError {
    pub fn malformed(text: &str) -> Self {
        Self::MalformedResponse {
            preview: regcheck_recovery::bounded_preview(text),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MissingArtifact(_) => "missing_artifact",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamRejected { .. } => "upstream_rejected",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::Cancelled => "cancelled",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Io(_) => "storage",
        }
    }
}
