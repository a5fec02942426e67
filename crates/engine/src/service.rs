use crate::analyze::{Analyzer, NamedAttachment, ScenarioContext};
use crate::bootstrap::{BootstrapOutcome, CatalogBootstrapper};
use crate::config::EngineConfig;
use crate::overlay::{FeedbackOverlay, FeedbackRequest};
use crate::{EngineError, Result};
use regcheck_oracle::mime::is_allowed;
use regcheck_oracle::{ArtifactUploader, Oracle, OracleConfig, OracleGateway};
use regcheck_protocol::{AttachmentRef, CheckResult, FeedbackOverride, RequirementCatalog};
use regcheck_store::{
    is_archive, materialize_archive, materialize_submission, CatalogStore, FeedbackLog,
    MaterializedUpload, StoreLayout, StoredDocument, UploadCache,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub scenario: String,
    pub invoice_type: String,
    pub checks: Vec<CheckResult>,
    /// Inputs that were not analyzed because their type is not accepted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_files: Vec<String>,
    pub catalog_size: usize,
}

/// Everything a caller needs, wired over one data directory.
pub struct ComplianceService {
    config: EngineConfig,
    layout: StoreLayout,
    uploader: Arc<dyn ArtifactUploader>,
    uploads: Arc<UploadCache>,
    catalog: Arc<CatalogStore>,
    feedback: FeedbackOverlay,
    analyzer: Analyzer,
    bootstrapper: Arc<CatalogBootstrapper>,
    shutdown: CancellationToken,
}

impl ComplianceService {
    pub async fn open(
        config: EngineConfig,
        oracle: Arc<dyn Oracle>,
        uploader: Arc<dyn ArtifactUploader>,
    ) -> Result<Self> {
        let layout = config.layout();
        let uploads = Arc::new(UploadCache::open(layout.upload_cache_path()).await?);
        let catalog = Arc::new(CatalogStore::new(layout.requirements_path()));
        let feedback = FeedbackOverlay::new(Arc::new(FeedbackLog::new(layout.feedback_path())));
        let bootstrapper = Arc::new(CatalogBootstrapper::new(
            Arc::clone(&oracle),
            Arc::clone(&uploader),
            Arc::clone(&uploads),
            Arc::clone(&catalog),
            config.reference_docs.clone(),
            config.requirement_count,
        ));
        Ok(Self {
            analyzer: Analyzer::new(oracle),
            config,
            layout,
            uploader,
            uploads,
            catalog,
            feedback,
            bootstrapper,
            shutdown: CancellationToken::new(),
        })
    }

    /// Production wiring: one reqwest-backed gateway serves both generation and uploads.
    pub async fn with_gateway(config: EngineConfig, oracle: OracleConfig) -> Result<Self> {
        let gateway = Arc::new(OracleGateway::with_reqwest(oracle)?);
        Self::open(config, gateway.clone(), gateway).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Cancelled when the owner shuts down; background bootstraps started by
    /// [`Self::analyze_documents`] observe it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub async fn analyze(
        &self,
        catalog: &RequirementCatalog,
        documents: &[NamedAttachment],
        references: &[AttachmentRef],
        prior_feedback: &[FeedbackOverride],
        ctx: &ScenarioContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckResult>> {
        self.analyzer
            .analyze(catalog, documents, references, prior_feedback, ctx, cancel)
            .await
    }

    /// Resolve everything from local paths: archives, allowlist, uploads, catalog, reference
    /// documents and stored feedback.
    ///
    /// Zip archives are expanded into the uploads directory and their entries analyzed under
    /// their own names.
    pub async fn analyze_documents(
        &self,
        paths: &[PathBuf],
        ctx: &ScenarioContext,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport> {
        let mut accepted = MaterializedUpload::default();
        for path in paths {
            let document = StoredDocument::from_path(path.as_path());
            if is_archive(&document.display_name) {
                let bytes = tokio::fs::read(path).await.map_err(|err| {
                    EngineError::InvalidRequest(format!("cannot read {}: {err}", path.display()))
                })?;
                let expanded = materialize_archive(
                    &self.layout.uploads_dir(),
                    &document.display_name,
                    bytes,
                )
                .await?;
                accepted.documents.extend(expanded.documents);
                accepted.skipped.extend(expanded.skipped);
            } else if is_allowed(path) {
                accepted.documents.push(document);
            } else {
                log::warn!("skipping unsupported file {}", path.display());
                accepted.skipped.push(path.display().to_string());
            }
        }
        self.analyze_stored(&accepted.documents, accepted.skipped, ctx, cancel)
            .await
    }

    /// Analyze documents already on disk, each labelled with its submitted name.
    ///
    /// A missing catalog does not block the analysis; it triggers a background bootstrap and the
    /// analysis runs without catalog context.
    pub async fn analyze_stored(
        &self,
        stored: &[StoredDocument],
        skipped_files: Vec<String>,
        ctx: &ScenarioContext,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport> {
        if stored.is_empty() {
            return Err(EngineError::InvalidRequest(
                "no supported documents (pdf, png, jpg, jpeg, tif, tiff, doc, docx, xml, zip)".into(),
            ));
        }

        let catalog = match self.catalog.load_non_empty().await? {
            Some(catalog) => catalog,
            None => {
                log::warn!("requirement catalog missing; analyzing without it");
                self.bootstrapper.spawn(self.shutdown.child_token());
                RequirementCatalog::default()
            }
        };

        let mut documents = Vec::with_capacity(stored.len());
        for document in stored {
            let attachment = self
                .uploads
                .get_or_upload_named(
                    &document.path,
                    &document.display_name,
                    self.uploader.as_ref(),
                    cancel,
                )
                .await?;
            documents.push(NamedAttachment {
                file_name: document.display_name.clone(),
                attachment,
            });
        }
        let mut references = Vec::with_capacity(self.config.reference_docs.len());
        for path in &self.config.reference_docs {
            references.push(self.upload(path, cancel).await?);
        }
        let prior = self
            .feedback
            .overrides_for(&ctx.scenario, &ctx.invoice_type)
            .await?;

        let checks = self
            .analyze(&catalog, &documents, &references, &prior, ctx, cancel)
            .await?;
        Ok(AnalysisReport {
            scenario: ctx.scenario.clone(),
            invoice_type: ctx.invoice_type.clone(),
            checks,
            skipped_files,
            catalog_size: catalog.len(),
        })
    }

    async fn upload(&self, path: &Path, cancel: &CancellationToken) -> Result<AttachmentRef> {
        Ok(self
            .uploads
            .get_or_upload(path, self.uploader.as_ref(), cancel)
            .await?)
    }

    pub async fn record_feedback(&self, request: FeedbackRequest) -> Result<FeedbackOverride> {
        self.feedback.record(request).await
    }

    pub async fn feedback_for(&self, ctx: &ScenarioContext) -> Result<Vec<FeedbackOverride>> {
        self.feedback
            .overrides_for(&ctx.scenario, &ctx.invoice_type)
            .await
    }

    pub async fn requirements(&self) -> Result<Option<RequirementCatalog>> {
        Ok(self.catalog.load().await?)
    }

    pub async fn regenerate_requirements(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RequirementCatalog> {
        self.bootstrapper.regenerate(cancel).await
    }

    pub async fn bootstrap(&self, cancel: &CancellationToken) -> Result<BootstrapOutcome> {
        self.bootstrapper.run_once(cancel).await
    }

    pub fn spawn_bootstrap(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.bootstrapper.spawn(cancel)
    }

    /// Persist one posted file under the uploads directory, expanding zip archives. Unsupported
    /// files come back in `skipped` instead of failing the request.
    pub async fn accept_upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<MaterializedUpload> {
        Ok(materialize_submission(&self.layout.uploads_dir(), file_name, bytes).await?)
    }
}
