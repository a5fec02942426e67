use crate::pipeline::generate_structured;
use crate::prompt::requirements_prompt;
use crate::schema::requirements_schema;
use crate::{EngineError, Result};
use regcheck_oracle::{ArtifactUploader, Oracle, OracleError};
use regcheck_protocol::{RequirementCatalog, RequirementSpec};
use regcheck_store::{CatalogStore, UploadCache};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "requirements", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// A non-empty catalog was already persisted.
    AlreadyPresent(usize),
    Generated(usize),
    /// Another generation holds the lock; nothing was done.
    InFlight,
    /// No reference documents are configured.
    NoSources,
}

/// Builds the requirement catalog from the configured reference documents.
///
/// Generation runs are serialized by the catalog store's generation lock. Nothing is written
/// unless a complete, validated catalog was produced, so a failed or cancelled run leaves the
/// previous file as it was.
pub struct CatalogBootstrapper {
    oracle: Arc<dyn Oracle>,
    uploader: Arc<dyn ArtifactUploader>,
    uploads: Arc<UploadCache>,
    catalog: Arc<CatalogStore>,
    reference_docs: Vec<PathBuf>,
    requirement_count: usize,
}

impl CatalogBootstrapper {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        uploader: Arc<dyn ArtifactUploader>,
        uploads: Arc<UploadCache>,
        catalog: Arc<CatalogStore>,
        reference_docs: Vec<PathBuf>,
        requirement_count: usize,
    ) -> Self {
        Self {
            oracle,
            uploader,
            uploads,
            catalog,
            reference_docs,
            requirement_count,
        }
    }

    /// Generate and persist a catalog unless a non-empty one exists. A call made while another
    /// generation is running returns [`BootstrapOutcome::InFlight`] immediately.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<BootstrapOutcome> {
        let Some(_guard) = self.catalog.try_generation_guard() else {
            return Ok(BootstrapOutcome::InFlight);
        };
        if let Some(existing) = self.catalog.load_non_empty().await? {
            return Ok(BootstrapOutcome::AlreadyPresent(existing.len()));
        }
        if self.reference_docs.is_empty() {
            return Ok(BootstrapOutcome::NoSources);
        }
        let catalog = self.generate(cancel).await?;
        Ok(BootstrapOutcome::Generated(catalog.len()))
    }

    /// Replace the catalog unconditionally, waiting for any running generation first.
    pub async fn regenerate(&self, cancel: &CancellationToken) -> Result<RequirementCatalog> {
        let _guard = self.catalog.generation_guard().await;
        if self.reference_docs.is_empty() {
            return Err(EngineError::InvalidConfig(
                "no reference documents configured (REGCHECK_REFERENCE_DOCS)".into(),
            ));
        }
        self.generate(cancel).await
    }

    /// Run [`Self::run_once`] in the background. The outcome is logged, never returned.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_logged(&cancel).await })
    }

    async fn run_logged(&self, cancel: &CancellationToken) {
        match self.run_once(cancel).await {
            Ok(BootstrapOutcome::AlreadyPresent(n)) => {
                log::info!("requirement catalog present ({n} requirements); generation skipped")
            }
            Ok(BootstrapOutcome::Generated(n)) => {
                log::info!("requirement catalog generated: {n} requirements")
            }
            Ok(BootstrapOutcome::InFlight) => {
                log::debug!("requirement catalog generation already running")
            }
            Ok(BootstrapOutcome::NoSources) => {
                log::warn!("no reference documents configured; requirement catalog not generated")
            }
            Err(err) if err.is_cancelled() => {
                log::info!("requirement catalog generation cancelled")
            }
            Err(err) => log::error!("requirement catalog generation failed: {err}"),
        }
    }

    async fn generate(&self, cancel: &CancellationToken) -> Result<RequirementCatalog> {
        let mut attachments = Vec::with_capacity(self.reference_docs.len());
        for path in &self.reference_docs {
            log::info!("uploading reference document {}", path.display());
            attachments.push(
                self.uploads
                    .get_or_upload(path, self.uploader.as_ref(), cancel)
                    .await?,
            );
        }

        let validated = generate_structured::<RequirementSpec>(
            self.oracle.as_ref(),
            &[requirements_prompt(self.requirement_count)],
            &attachments,
            &requirements_schema(),
            cancel,
        )
        .await?;

        let mut requirements = validated.items;
        requirements.retain(|r| !r.requirement.trim().is_empty());
        for spec in &mut requirements {
            spec.tidy();
        }
        if requirements.is_empty() {
            return Err(OracleError::MalformedResponse {
                preview: "catalog has no usable requirements".into(),
            }
            .into());
        }

        let notes = validated
            .root
            .get("notes")
            .and_then(|n| n.as_str())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let catalog = RequirementCatalog {
            requirements,
            notes,
        };
        if cancel.is_cancelled() {
            return Err(OracleError::Cancelled.into());
        }
        self.catalog.save(&catalog).await?;
        Ok(catalog)
    }
}
