use crate::aggregate::EvidenceAggregator;
use crate::overlay::apply_overrides;
use crate::pipeline::generate_structured;
use crate::prompt::{analysis_prompt, catalog_part};
use crate::schema::checks_schema;
use crate::{EngineError, Result};
use regcheck_oracle::Oracle;
use regcheck_protocol::{AttachmentRef, CheckResult, FeedbackOverride, RequirementCatalog};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioContext {
    pub scenario: String,
    pub invoice_type: String,
}

impl ScenarioContext {
    pub fn new(scenario: impl Into<String>, invoice_type: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            invoice_type: invoice_type.into(),
        }
    }
}

/// A user document already held by the oracle, with the name shown in the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedAttachment {
    pub file_name: String,
    pub attachment: AttachmentRef,
}

pub struct Analyzer {
    oracle: Arc<dyn Oracle>,
}

impl Analyzer {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// One analysis round: prompt with catalog and hints, structured generation with a single
    /// repair, then evidence aggregation and feedback overrides.
    ///
    /// `prior_feedback` may span several contexts; only overrides matching `ctx` are used.
    pub async fn analyze(
        &self,
        catalog: &RequirementCatalog,
        documents: &[NamedAttachment],
        references: &[AttachmentRef],
        prior_feedback: &[FeedbackOverride],
        ctx: &ScenarioContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckResult>> {
        if documents.is_empty() {
            return Err(EngineError::InvalidRequest(
                "at least one document is required".into(),
            ));
        }

        let hints: Vec<FeedbackOverride> = prior_feedback
            .iter()
            .filter(|f| f.matches_context(&ctx.scenario, &ctx.invoice_type))
            .cloned()
            .collect();

        let prompt_parts = vec![
            analysis_prompt(ctx, documents, &hints),
            catalog_part(catalog),
        ];
        let attachments: Vec<AttachmentRef> = documents
            .iter()
            .map(|d| d.attachment.clone())
            .chain(references.iter().cloned())
            .collect();

        let validated = generate_structured::<CheckResult>(
            self.oracle.as_ref(),
            &prompt_parts,
            &attachments,
            &checks_schema(),
            cancel,
        )
        .await?;

        let mut checks = validated.items;
        EvidenceAggregator::new(catalog).normalize(&mut checks);
        apply_overrides(&mut checks, &hints);
        log::info!(
            "analysis {}/{}: {} checks over {} documents",
            ctx.scenario,
            ctx.invoice_type,
            checks.len(),
            documents.len()
        );
        Ok(checks)
    }
}
