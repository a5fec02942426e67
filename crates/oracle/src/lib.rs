//! # Regcheck Oracle
//!
//! Every call to the generative content-analysis service goes through [`OracleGateway`]: file
//! uploads, structured generation and the single repair request. Calls share one retry policy
//! ([`retry`]) and one transport seam ([`OracleTransport`]) so they can be exercised without a
//! network.

mod config;
mod error;
mod gateway;
pub mod mime;
pub mod retry;
mod transport;
pub mod wire;

pub use config::{OracleConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use error::{OracleError, Result};
pub use gateway::{ArtifactUploader, Oracle, OracleGateway};
pub use retry::RetryPolicy;
pub use transport::{HttpRequest, HttpResponse, OracleTransport, ReqwestTransport, TransportError};
