use async_trait::async_trait;
use pretty_assertions::assert_eq;
use regcheck_engine::{
    Analyzer, BootstrapOutcome, CatalogBootstrapper, ComplianceService, EngineConfig,
    FeedbackRequest, NamedAttachment, ScenarioContext,
};
use regcheck_oracle::{ArtifactUploader, Oracle, OracleError};
use regcheck_protocol::{
    AttachmentRef, FeedbackOverride, RequirementCatalog, RequirementSpec, UNBOUNDED_OCCURS,
};
use regcheck_store::{CatalogStore, UploadCache};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

type Reply = Result<String, OracleError>;

#[derive(Default)]
struct FakeOracle {
    sends: Mutex<VecDeque<Reply>>,
    repairs: Mutex<VecDeque<Reply>>,
    send_calls: AtomicUsize,
    repair_calls: AtomicUsize,
    last_prompt: Mutex<Vec<String>>,
    last_attachments: Mutex<Vec<AttachmentRef>>,
}

impl FakeOracle {
    fn new(sends: Vec<Reply>, repairs: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            sends: Mutex::new(sends.into()),
            repairs: Mutex::new(repairs.into()),
            ..Self::default()
        })
    }

    fn sends(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    fn repairs(&self) -> usize {
        self.repair_calls.load(Ordering::SeqCst)
    }
}

fn exhausted() -> Reply {
    Err(OracleError::UpstreamUnavailable {
        attempts: 4,
        last_status: Some(503),
        message: "script exhausted".into(),
    })
}

#[async_trait]
impl Oracle for FakeOracle {
    async fn send(
        &self,
        prompt_parts: &[String],
        attachments: &[AttachmentRef],
        _schema: &Value,
        _cancel: &CancellationToken,
    ) -> regcheck_oracle::Result<String> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().expect("lock") = prompt_parts.to_vec();
        *self.last_attachments.lock().expect("lock") = attachments.to_vec();
        self.sends
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(exhausted)
    }

    async fn repair(
        &self,
        _raw_text: &str,
        _schema: &Value,
        _cancel: &CancellationToken,
    ) -> regcheck_oracle::Result<String> {
        self.repair_calls.fetch_add(1, Ordering::SeqCst);
        self.repairs
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(exhausted)
    }
}

#[derive(Default)]
struct FakeUploader {
    uploads: AtomicUsize,
}

#[async_trait]
impl ArtifactUploader for FakeUploader {
    async fn upload_artifact(
        &self,
        _bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
        _cancel: &CancellationToken,
    ) -> regcheck_oracle::Result<AttachmentRef> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(AttachmentRef {
            uri: format!("files/{display_name}"),
            mime_type: mime_type.to_string(),
        })
    }
}

fn ctx() -> ScenarioContext {
    ScenarioContext::new("TICARIFATURA", "SATIS")
}

fn document(name: &str) -> NamedAttachment {
    NamedAttachment {
        file_name: name.to_string(),
        attachment: AttachmentRef {
            uri: format!("files/{name}"),
            mime_type: "application/pdf".into(),
        },
    }
}

fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, bytes) in files {
        writer.start_file(*name, options).expect("start");
        writer.write_all(bytes).expect("write");
    }
    writer.finish().expect("finish").into_inner()
}

fn catalog() -> RequirementCatalog {
    RequirementCatalog {
        requirements: vec![
            RequirementSpec::new("Total amount is stated", true),
            RequirementSpec::new("Order reference", false),
        ],
        notes: None,
    }
}

#[tokio::test]
async fn fenced_output_with_trailing_comma_yields_normalized_checks() {
    let raw = "```json\n{\"checks\": [\
        {\"requirement\": \"Total amount is stated.\", \"present\": true, \"evidence\": \"\",\
         \"mustHave\": false, \"evidence_by_file\": [\
            {\"file\": \"a.pdf\", \"present\": true, \"evidence\": \"Amount: 100\", \"pages\": [2, 1], \"confidence\": 0.8},\
         ],},\
        {\"requirement\": \"Order reference\", \"present\": false,}\
    ]}\n```";
    let oracle = FakeOracle::new(vec![Ok(raw.to_string())], vec![]);
    let analyzer = Analyzer::new(oracle.clone());

    let checks = analyzer
        .analyze(
            &catalog(),
            &[document("a.pdf")],
            &[],
            &[],
            &ctx(),
            &CancellationToken::new(),
        )
        .await
        .expect("analyze");

    assert_eq!(oracle.repairs(), 0);
    assert_eq!(checks.len(), 2);
    let total = &checks[0];
    assert!(total.present);
    assert!(total.must_have, "catalog lookup by normalized key");
    assert_eq!(total.evidence, "a.pdf: Amount: 100");
    assert_eq!(total.pages, vec![1, 2]);
    assert_eq!(total.confidence, Some(0.8));
    assert_eq!(checks[1].confidence, Some(0.5));
}

#[tokio::test]
async fn prior_feedback_is_hinted_and_applied() {
    let raw = r#"{"checks": [{"requirement": "Order reference", "present": false}]}"#;
    let oracle = FakeOracle::new(vec![Ok(raw.to_string())], vec![]);
    let analyzer = Analyzer::new(oracle.clone());
    let feedback = vec![
        FeedbackOverride {
            requirement_key: "order reference".into(),
            scenario: "ticarifatura".into(),
            invoice_type: "satis".into(),
            present_override: Some(true),
            evidence_override: Some("Sipariş No: 42".into()),
            created_at_unix_ms: 10,
        },
        FeedbackOverride {
            requirement_key: "order reference".into(),
            scenario: "TEMELFATURA".into(),
            invoice_type: "SATIS".into(),
            present_override: Some(false),
            evidence_override: None,
            created_at_unix_ms: 99,
        },
    ];

    let checks = analyzer
        .analyze(
            &catalog(),
            &[document("a.pdf")],
            &[],
            &feedback,
            &ctx(),
            &CancellationToken::new(),
        )
        .await
        .expect("analyze");

    assert!(checks[0].present);
    assert_eq!(checks[0].evidence, "Sipariş No: 42");
    let prompt = oracle.last_prompt.lock().expect("lock").join("\n");
    assert!(prompt.contains("Sipariş No: 42"));
    assert!(!prompt.contains("TEMELFATURA"));
}

#[tokio::test]
async fn unrecoverable_output_gets_exactly_one_repair() {
    let oracle = FakeOracle::new(
        vec![Ok("I am unable to produce JSON for this document.".into())],
        vec![Ok(r#"{"checks": [{"requirement": "Total amount is stated", "present": true, "evidence": "100 TL"}]}"#.into())],
    );
    let checks = Analyzer::new(oracle.clone())
        .analyze(
            &catalog(),
            &[document("a.pdf")],
            &[],
            &[],
            &ctx(),
            &CancellationToken::new(),
        )
        .await
        .expect("repaired");
    assert_eq!(oracle.sends(), 1);
    assert_eq!(oracle.repairs(), 1);
    assert_eq!(checks[0].evidence, "100 TL");
}

#[tokio::test]
async fn failed_repair_surfaces_bounded_malformed_response() {
    let garbage = "no json ".repeat(200);
    let oracle = FakeOracle::new(vec![Ok("nope".into())], vec![Ok(garbage)]);
    let err = Analyzer::new(oracle.clone())
        .analyze(
            &catalog(),
            &[document("a.pdf")],
            &[],
            &[],
            &ctx(),
            &CancellationToken::new(),
        )
        .await
        .expect_err("malformed");

    assert_eq!(err.code(), "malformed_response");
    assert_eq!(oracle.repairs(), 1);
    match err {
        regcheck_engine::EngineError::Oracle(OracleError::MalformedResponse { preview }) => {
            assert!(preview.chars().count() <= 503);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn analysis_requires_a_document() {
    let oracle = FakeOracle::new(vec![], vec![]);
    let err = Analyzer::new(oracle.clone())
        .analyze(
            &catalog(),
            &[],
            &[],
            &[],
            &ctx(),
            &CancellationToken::new(),
        )
        .await
        .expect_err("no documents");
    assert_eq!(err.code(), "invalid_request");
    assert_eq!(oracle.sends(), 0);
}

struct BootstrapFixture {
    _dir: tempfile::TempDir,
    store: Arc<CatalogStore>,
    uploader: Arc<FakeUploader>,
    bootstrapper: CatalogBootstrapper,
}

async fn bootstrap_fixture(oracle: Arc<FakeOracle>, with_sources: bool) -> BootstrapFixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let law = dir.path().join("law.pdf");
    std::fs::write(&law, b"%PDF regulation").expect("write law");
    let store = Arc::new(CatalogStore::new(dir.path().join("requirements.json")));
    let uploads = Arc::new(
        UploadCache::open(dir.path().join("upload_cache.json"))
            .await
            .expect("cache"),
    );
    let uploader = Arc::new(FakeUploader::default());
    let sources = if with_sources { vec![law] } else { Vec::new() };
    let bootstrapper = CatalogBootstrapper::new(
        oracle,
        uploader.clone(),
        uploads,
        store.clone(),
        sources,
        30,
    );
    BootstrapFixture {
        _dir: dir,
        store,
        uploader,
        bootstrapper,
    }
}

const GENERATED: &str = r#"{"requirements": [
    {"requirement": "Invoice number is present", "field": "ID", "article": " ", "mustHave": true, "minOccurs": 1, "maxOccurs": 1},
    {"requirement": "Note lines", "field": "Note", "article": "7.1", "mustHave": false, "minOccurs": 0, "maxOccurs": -7}
], "notes": "from 1.4.213"}"#;

#[tokio::test]
async fn bootstrap_generates_once_and_tidies_records() {
    let oracle = FakeOracle::new(vec![Ok(GENERATED.into())], vec![]);
    let fx = bootstrap_fixture(oracle.clone(), true).await;
    let cancel = CancellationToken::new();

    let outcome = fx.bootstrapper.run_once(&cancel).await.expect("bootstrap");
    assert_eq!(outcome, BootstrapOutcome::Generated(2));

    let saved = fx.store.load().await.expect("load").expect("persisted");
    assert_eq!(saved.notes.as_deref(), Some("from 1.4.213"));
    assert_eq!(saved.requirements[0].article, None);
    assert_eq!(saved.requirements[1].max_occurs, Some(UNBOUNDED_OCCURS));
    assert_eq!(fx.uploader.uploads.load(Ordering::SeqCst), 1);

    let again = fx.bootstrapper.run_once(&cancel).await.expect("second run");
    assert_eq!(again, BootstrapOutcome::AlreadyPresent(2));
    assert_eq!(oracle.sends(), 1);
}

#[tokio::test]
async fn empty_catalog_is_repaired_and_never_persisted_when_still_empty() {
    let oracle = FakeOracle::new(
        vec![Ok(r#"{"requirements": []}"#.into())],
        vec![Ok(r#"{"requirements": []}"#.into())],
    );
    let fx = bootstrap_fixture(oracle.clone(), true).await;

    let err = fx
        .bootstrapper
        .run_once(&CancellationToken::new())
        .await
        .expect_err("empty");
    assert_eq!(err.code(), "malformed_response");
    assert_eq!(oracle.repairs(), 1);
    assert_eq!(fx.store.load().await.expect("load"), None);
}

#[tokio::test]
async fn failed_regeneration_keeps_previous_catalog() {
    let oracle = FakeOracle::new(
        vec![Err(OracleError::UpstreamRejected {
            status: 400,
            body_preview: "bad".into(),
        })],
        vec![],
    );
    let fx = bootstrap_fixture(oracle, true).await;
    fx.store.save(&catalog()).await.expect("seed");

    let err = fx
        .bootstrapper
        .regenerate(&CancellationToken::new())
        .await
        .expect_err("rejected");
    assert_eq!(err.code(), "upstream_rejected");
    assert_eq!(fx.store.load().await.expect("load"), Some(catalog()));
}

#[tokio::test]
async fn trigger_while_generating_is_a_no_op() {
    let oracle = FakeOracle::new(vec![], vec![]);
    let fx = bootstrap_fixture(oracle.clone(), true).await;

    let held = fx.store.generation_guard().await;
    let outcome = fx
        .bootstrapper
        .run_once(&CancellationToken::new())
        .await
        .expect("no-op");
    assert_eq!(outcome, BootstrapOutcome::InFlight);
    assert_eq!(oracle.sends(), 0);
    drop(held);
}

#[tokio::test]
async fn missing_sources_are_reported() {
    let oracle = FakeOracle::new(vec![], vec![]);
    let fx = bootstrap_fixture(oracle, false).await;
    let cancel = CancellationToken::new();
    assert_eq!(
        fx.bootstrapper.run_once(&cancel).await.expect("run"),
        BootstrapOutcome::NoSources
    );
    let err = fx.bootstrapper.regenerate(&cancel).await.expect_err("no sources");
    assert_eq!(err.code(), "invalid_config");
}

#[tokio::test]
async fn cancelled_bootstrap_persists_nothing() {
    let oracle = FakeOracle::new(vec![Ok(GENERATED.into())], vec![]);
    let fx = bootstrap_fixture(oracle, true).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fx.bootstrapper.run_once(&cancel).await.expect_err("cancelled");
    assert!(err.is_cancelled());
    assert_eq!(fx.store.load().await.expect("load"), None);
}

#[tokio::test]
async fn analyze_documents_resolves_uploads_references_and_feedback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("Data");
    let law = dir.path().join("1.4.213.pdf");
    std::fs::write(&law, b"%PDF law").expect("law");
    let invoice = dir.path().join("fatura.xml");
    std::fs::write(&invoice, b"<Invoice/>").expect("invoice");
    let archive = dir.path().join("bundle.zip");
    std::fs::write(
        &archive,
        zip_of(&[("ekler/irsaliye.pdf", b"%PDF-1.7"), ("readme.txt", b"hi")]),
    )
    .expect("zip");

    let config = EngineConfig {
        data_dir: data.clone(),
        reference_docs: vec![law],
        requirement_count: 30,
    };
    let reply = r#"{"checks": [{"requirement": "Order reference", "present": false}]}"#;
    let oracle = FakeOracle::new(vec![Ok(reply.into()), Ok(reply.into())], vec![]);
    let uploader = Arc::new(FakeUploader::default());
    let service = ComplianceService::open(config, oracle.clone(), uploader.clone())
        .await
        .expect("service");
    CatalogStore::new(data.join("requirements.json"))
        .save(&catalog())
        .await
        .expect("seed catalog");

    service
        .record_feedback(FeedbackRequest {
            requirement: "Order reference!".into(),
            scenario: "TicariFatura".into(),
            invoice_type: "Satis".into(),
            present_override: Some(true),
            evidence_override: None,
        })
        .await
        .expect("feedback");

    let paths: Vec<PathBuf> = vec![invoice.clone(), archive];
    let report = service
        .analyze_documents(&paths, &ctx(), &CancellationToken::new())
        .await
        .expect("analysis");

    assert_eq!(report.catalog_size, 2);
    assert_eq!(report.skipped_files, vec!["bundle.zip/readme.txt".to_string()]);
    assert!(report.checks[0].present, "feedback override applied");
    let attachments = oracle.last_attachments.lock().expect("lock").clone();
    assert_eq!(
        attachments
            .iter()
            .map(|a| a.uri.as_str())
            .collect::<Vec<_>>(),
        vec!["files/fatura.xml", "files/irsaliye.pdf", "files/1.4.213.pdf"]
    );
    let prompt = oracle.last_prompt.lock().expect("lock").join("\n");
    assert!(prompt.contains("irsaliye.pdf"), "entry name reaches the prompt");
    assert_eq!(attachments[0].mime_type, "application/xml");

    service
        .analyze_documents(&[invoice], &ctx(), &CancellationToken::new())
        .await
        .expect("second analysis");
    assert_eq!(uploader.uploads.load(Ordering::SeqCst), 3, "second run is cached");
}
