use crate::analyze::{NamedAttachment, ScenarioContext};
use regcheck_protocol::{FeedbackOverride, RequirementCatalog, UNBOUNDED_OCCURS};
use serde_json::json;

pub fn requirements_prompt(target_count: usize) -> String {
    format!(
        "Extract every compliance requirement stated in the attached regulation documents \
(aim for at least {target_count}; do not summarize or merge requirements).

Cardinality mapping:
- Mandatory(1) => mustHave=true, minOccurs=1, maxOccurs=1
- Optional(0..1) => mustHave=false, minOccurs=0, maxOccurs=1
- Optional(0..n) => mustHave=false, minOccurs=0, maxOccurs={UNBOUNDED_OCCURS}
- Mandatory(1..n) => mustHave=true, minOccurs=1, maxOccurs={UNBOUNDED_OCCURS}

For each requirement give the element name in 'field' and its context in 'section' \
(for example PostalAddress.CityName), the article or heading in 'article' when there is one, \
and a single short verifiable sentence in 'requirement'.
Use only the attached documents. Answer with JSON matching the response schema."
    )
}

pub fn analysis_prompt(
    ctx: &ScenarioContext,
    documents: &[NamedAttachment],
    hints: &[FeedbackOverride],
) -> String {
    let files: Vec<_> = documents
        .iter()
        .map(|d| json!({ "name": d.file_name, "mime": d.attachment.mime_type }))
        .collect();
    let hints: Vec<_> = hints
        .iter()
        .map(|h| {
            json!({
                "requirementKey": h.requirement_key,
                "present": h.present_override,
                "evidence": h.evidence_override,
            })
        })
        .collect();
    let pretty = |v: &serde_json::Value| {
        serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
    };

    format!(
        "Scenario = {scenario}, InvoiceType = {invoice_type}.
The user files and the regulation documents are attached. For every requirement:
- extract the evidence per file (evidence_by_file) and decide the overall result (present);
- cite the regulation basis (law_refs);
- when present=true, fill 'evidence' with a short human-readable summary (field name/value or \
a one or two word quote); never leave it empty;
- list the 1-based pages where the evidence appears in 'pages' ([] when unknown);
- give 'confidence' in 0..1, 0.5 when unknown;
- keep 'evidence' and 'pages' consistent with evidence_by_file.
Emit strictly valid JSON: close every array and object, no trailing commas.

user_files:
{files}

Corrections from earlier reviews (take them into account):
{hints}

Return only the relevant requirements. Do not write anything outside the JSON.",
        scenario = ctx.scenario,
        invoice_type = ctx.invoice_type,
        files = pretty(&serde_json::Value::Array(files)),
        hints = pretty(&serde_json::Value::Array(hints)),
    )
}

/// The catalog as the oracle sees it.
pub fn catalog_part(catalog: &RequirementCatalog) -> String {
    let requirements: Vec<_> = catalog
        .requirements
        .iter()
        .map(|r| {
            json!({
                "requirement": r.requirement,
                "mustHave": r.must_have,
                "minOccurs": r.min_occurs.unwrap_or(0),
                "maxOccurs": r.max_occurs.unwrap_or(UNBOUNDED_OCCURS),
            })
        })
        .collect();
    json!({ "requirements": requirements }).to_string()
}
