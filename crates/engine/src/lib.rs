//! # Regcheck Engine
//!
//! Compliance analysis over the oracle:
//!
//! 1. documents and reference regulations are resolved to oracle attachments (upload cache);
//! 2. the oracle is asked for structured check results, with one repair round when the output
//!    cannot be recovered into the expected shape;
//! 3. results are normalized from their per-file evidence ([`EvidenceAggregator`]);
//! 4. stored human corrections are applied on top ([`FeedbackOverlay`]).
//!
//! The requirement catalog the analysis runs against is generated once from the reference
//! documents by [`CatalogBootstrapper`].

mod aggregate;
mod analyze;
mod bootstrap;
mod config;
mod error;
mod overlay;
mod pipeline;
mod prompt;
mod schema;
mod service;

pub use aggregate::{lexical_must_have, truncate, EvidenceAggregator, DEFAULT_CONFIDENCE, MAX_PAGES};
pub use analyze::{Analyzer, NamedAttachment, ScenarioContext};
pub use bootstrap::{BootstrapOutcome, CatalogBootstrapper};
pub use config::{EngineConfig, DEFAULT_DATA_DIR, DEFAULT_REQUIREMENT_COUNT};
pub use error::{EngineError, Result};
pub use overlay::{apply_overrides, FeedbackOverlay, FeedbackRequest};
pub use pipeline::generate_structured;
pub use schema::{checks_schema, requirements_schema};
pub use service::{AnalysisReport, ComplianceService};
