use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Request, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::Engine as _;
use regcheck_engine::{ComplianceService, EngineError, FeedbackRequest, ScenarioContext};
use regcheck_protocol::ErrorEnvelope;
use regcheck_store::MaterializedUpload;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) const AUTH_TOKEN_ENV: &str = "REGCHECK_AUTH_TOKEN";
pub(crate) const MAX_BODY_BYTES_ENV: &str = "REGCHECK_MAX_BODY_BYTES";

/// Documents travel as base64 inside JSON, so this admits scans of roughly 48 MiB.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Bearer secret required on every request. Only its SHA-256 digest is held.
pub(crate) struct ApiToken {
    digest: [u8; 32],
}

impl ApiToken {
    /// `None` for a blank secret.
    pub(crate) fn new(secret: &str) -> Option<Self> {
        let secret = secret.trim();
        (!secret.is_empty()).then(|| Self {
            digest: Sha256::digest(secret.as_bytes()).into(),
        })
    }

    /// Accepts `Authorization: Bearer <secret>`, scheme case-insensitive.
    fn admits(&self, headers: &HeaderMap) -> bool {
        let Some((scheme, credential)) = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().split_once(' '))
        else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("bearer") {
            return false;
        }
        let presented = Sha256::digest(credential.trim().as_bytes());
        presented
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }
}

pub(crate) struct HttpState {
    pub(crate) service: Arc<ComplianceService>,
    pub(crate) auth_token: Option<ApiToken>,
}

/// A document posted inline.
#[derive(Debug, Deserialize)]
pub(crate) struct PostedDocument {
    #[serde(alias = "fileName")]
    pub(crate) file_name: String,
    /// Standard base64 of the file bytes.
    #[serde(alias = "contentBase64")]
    pub(crate) content_base64: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnalyzeRequest {
    pub(crate) scenario: String,
    #[serde(alias = "invoiceType")]
    pub(crate) invoice_type: String,
    pub(crate) documents: Vec<PostedDocument>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    catalog_size: usize,
}

pub(crate) fn router(state: Arc<HttpState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/feedback", post(feedback))
        .route("/requirements", get(requirements))
        .route("/requirements/regenerate", post(regenerate))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

async fn require_auth(
    State(state): State<Arc<HttpState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(token) = &state.auth_token {
        if !token.admits(request.headers()) {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Missing or invalid Authorization header".to_string(),
            );
        }
    }
    next.run(request).await
}

async fn analyze(
    State(state): State<Arc<HttpState>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request: AnalyzeRequest = match parse_body(body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    // Dropping the handler (client gone) cancels the oracle work.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let mut accepted = MaterializedUpload::default();
    for doc in request.documents {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(doc.content_base64.trim())
        {
            Ok(bytes) => bytes,
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    format!("document {:?} is not valid base64: {err}", doc.file_name),
                )
            }
        };
        match state.service.accept_upload(&doc.file_name, bytes).await {
            Ok(upload) => {
                accepted.documents.extend(upload.documents);
                accepted.skipped.extend(upload.skipped);
            }
            Err(err) => return engine_error(&err),
        }
    }

    let ctx = ScenarioContext::new(request.scenario, request.invoice_type);
    match state
        .service
        .analyze_stored(&accepted.documents, accepted.skipped, &ctx, &cancel)
        .await
    {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(err) => engine_error(&err),
    }
}

async fn feedback(
    State(state): State<Arc<HttpState>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request: FeedbackRequest = match parse_body(body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match state.service.record_feedback(request).await {
        Ok(record) => json_response(StatusCode::OK, &record),
        Err(err) => engine_error(&err),
    }
}

async fn requirements(State(state): State<Arc<HttpState>>) -> Response {
    match state.service.requirements().await {
        Ok(Some(catalog)) => json_response(StatusCode::OK, &catalog),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            "no requirement catalog has been generated yet".to_string(),
        ),
        Err(err) => engine_error(&err),
    }
}

async fn regenerate(State(state): State<Arc<HttpState>>) -> Response {
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    match state.service.regenerate_requirements(&cancel).await {
        Ok(catalog) => json_response(StatusCode::OK, &catalog),
        Err(err) => engine_error(&err),
    }
}

async fn health(State(state): State<Arc<HttpState>>) -> Response {
    match state.service.requirements().await {
        Ok(catalog) => json_response(
            StatusCode::OK,
            &Health {
                status: "ok",
                catalog_size: catalog.map_or(0, |c| c.len()),
            },
        ),
        Err(err) => engine_error(&err),
    }
}

fn parse_body<T: DeserializeOwned>(body: Result<Bytes, BytesRejection>) -> Result<T, Response> {
    let body = body.map_err(|rejection| {
        let status = rejection.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "payload_too_large"
        } else {
            "invalid_request"
        };
        error_response(status, code, rejection.body_text())
    })?;
    serde_json::from_slice(&body).map_err(|err| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("Invalid JSON request: {err}"),
        )
    })
}

pub(crate) fn status_for(code: &str) -> StatusCode {
    match code {
        "invalid_request" | "missing_artifact" => StatusCode::BAD_REQUEST,
        "unauthorized" => StatusCode::UNAUTHORIZED,
        "payload_too_large" => StatusCode::PAYLOAD_TOO_LARGE,
        "not_found" => StatusCode::NOT_FOUND,
        "upstream_rejected" | "malformed_response" => StatusCode::BAD_GATEWAY,
        "missing_credential" | "upstream_unavailable" | "cancelled" => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_error(err: &EngineError) -> Response {
    let code = err.code();
    if status_for(code).is_server_error() {
        log::error!("request failed ({code}): {err}");
    } else {
        log::warn!("request rejected ({code}): {err}");
    }
    error_response(status_for(code), code, err.to_string())
}

fn hint_for(code: &str) -> Option<String> {
    let hint = match code {
        "unauthorized" => format!(
            "If the server is started with {AUTH_TOKEN_ENV}, include Authorization: Bearer <token>."
        ),
        "missing_credential" => {
            "Set REGCHECK_ORACLE_API_KEY in the server environment and restart.".to_string()
        }
        "invalid_request" => {
            "Verify the request is valid JSON with the documented fields.".to_string()
        }
        "payload_too_large" => format!(
            "Raise the limit with --max-body-bytes or {MAX_BODY_BYTES_ENV}, or post fewer documents per request."
        ),
        "not_found" => "POST /requirements/regenerate builds the catalog.".to_string(),
        _ => return None,
    };
    Some(hint)
}

pub(crate) fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    let envelope = ErrorEnvelope {
        code: code.to_string(),
        message,
        hint: hint_for(code),
    };
    let mut response = json_response(status, &envelope);
    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(bytes) => (status, [(CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(err) => {
            log::error!("failed to serialize response: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine as _;
    use pretty_assertions::assert_eq;
    use regcheck_engine::EngineConfig;
    use regcheck_oracle::{ArtifactUploader, Oracle};
    use regcheck_protocol::AttachmentRef;
    use serde_json::{json, Value};
    use std::io::Write;
    use std::net::SocketAddr;

    struct CannedOracle;

    /// The first `user_files` name listed in the analysis prompt.
    fn first_user_file(prompt_parts: &[String]) -> String {
        prompt_parts
            .iter()
            .find_map(|part| {
                let files = part.split_once("user_files:\n")?.1.split_once("\n\n")?.0;
                let files: Value = serde_json::from_str(files).ok()?;
                files[0]["name"].as_str().map(str::to_string)
            })
            .unwrap_or_default()
    }

    fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, bytes) in files {
            writer.start_file(*name, options).expect("start");
            writer.write_all(bytes).expect("write");
        }
        writer.finish().expect("finish").into_inner()
    }

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[async_trait]
    impl Oracle for CannedOracle {
        async fn send(
            &self,
            prompt_parts: &[String],
            _attachments: &[AttachmentRef],
            _schema: &Value,
            _cancel: &CancellationToken,
        ) -> regcheck_oracle::Result<String> {
            let file = first_user_file(prompt_parts);
            Ok(json!({
                "checks": [{
                    "requirement": "Invoice date",
                    "present": true,
                    "evidence_by_file": [{"file": file, "present": true, "evidence": "2024-01-31"}]
                }]
            })
            .to_string())
        }

        async fn repair(
            &self,
            raw_text: &str,
            _schema: &Value,
            _cancel: &CancellationToken,
        ) -> regcheck_oracle::Result<String> {
            Ok(raw_text.to_string())
        }
    }

    #[async_trait]
    impl ArtifactUploader for CannedOracle {
        async fn upload_artifact(
            &self,
            _bytes: Vec<u8>,
            display_name: &str,
            mime_type: &str,
            _cancel: &CancellationToken,
        ) -> regcheck_oracle::Result<AttachmentRef> {
            Ok(AttachmentRef {
                uri: format!("files/{display_name}"),
                mime_type: mime_type.to_string(),
            })
        }
    }

    async fn serve(auth: Option<&str>) -> (tempfile::TempDir, SocketAddr) {
        serve_with_limit(auth, DEFAULT_MAX_BODY_BYTES).await
    }

    async fn serve_with_limit(
        auth: Option<&str>,
        max_body_bytes: usize,
    ) -> (tempfile::TempDir, SocketAddr) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig {
            data_dir: dir.path().join("Data"),
            reference_docs: Vec::new(),
            requirement_count: 30,
        };
        let oracle = Arc::new(CannedOracle);
        let service = ComplianceService::open(config, oracle.clone(), oracle)
            .await
            .expect("service");
        let state = Arc::new(HttpState {
            service: Arc::new(service),
            auth_token: auth.and_then(ApiToken::new),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move { axum::serve(listener, router(state, max_body_bytes)).await });
        (dir, addr)
    }

    #[tokio::test]
    async fn health_requires_bearer_token_when_configured() {
        let (_dir, addr) = serve(Some("s3cret")).await;
        let client = reqwest::Client::new();

        let denied = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .expect("request");
        assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(
            denied.headers().get("www-authenticate").map(|v| v.as_bytes()),
            Some(&b"Bearer"[..])
        );
        let body: Value = denied.json().await.expect("json");
        assert_eq!(body["code"], "unauthorized");

        let ok: Value = client
            .get(format!("http://{addr}/health"))
            .bearer_auth("s3cret")
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(ok, json!({"status": "ok", "catalog_size": 0}));
    }

    #[tokio::test]
    async fn feedback_is_recorded_and_malformed_bodies_are_rejected() {
        let (dir, addr) = serve(None).await;
        let client = reqwest::Client::new();

        let record: Value = client
            .post(format!("http://{addr}/feedback"))
            .json(&json!({
                "requirement": "Invoice date.",
                "scenario": " TICARIFATURA ",
                "invoice_type": "SATIS",
                "present_override": false
            }))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(record["requirement_key"], "invoice date");
        assert_eq!(record["scenario"], "TICARIFATURA");
        assert!(dir.path().join("Data/feedback.jsonl").exists());

        let bad = client
            .post(format!("http://{addr}/feedback"))
            .body("{not json")
            .send()
            .await
            .expect("request");
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = bad.json().await.expect("json");
        assert_eq!(body["code"], "invalid_request");
    }

    #[tokio::test]
    async fn posted_documents_are_analyzed_under_their_own_names() {
        let (dir, addr) = serve(None).await;
        let client = reqwest::Client::new();
        let content = b64(b"%PDF-1.7 invoice");

        let response = client
            .post(format!("http://{addr}/analyze"))
            .json(&json!({
                "scenario": "TICARIFATURA",
                "invoiceType": "SATIS",
                "documents": [
                    {"file_name": "fatura.pdf", "content_base64": content},
                    {"file_name": "notes.txt", "content_base64": content}
                ]
            }))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let report: Value = response.json().await.expect("json");
        assert_eq!(report["checks"][0]["present"], true);
        assert_eq!(report["checks"][0]["evidence"], "fatura.pdf: 2024-01-31");
        assert_eq!(report["skipped_files"], json!(["notes.txt"]));

        let uploads: Vec<_> = std::fs::read_dir(dir.path().join("Data/uploads"))
            .expect("uploads dir")
            .collect();
        assert_eq!(uploads.len(), 1);
    }

    #[tokio::test]
    async fn posted_archive_is_expanded() {
        let (dir, addr) = serve(None).await;
        let archive = zip_of(&[
            ("ekler/irsaliye.pdf", b"%PDF-1.7 waybill"),
            ("ekler/scan.png", b"\x89PNG"),
            ("readme.txt", b"hello"),
        ]);

        let report: Value = reqwest::Client::new()
            .post(format!("http://{addr}/analyze"))
            .json(&json!({
                "scenario": "TICARIFATURA",
                "invoice_type": "SATIS",
                "documents": [{"fileName": "bundle.zip", "contentBase64": b64(&archive)}]
            }))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(report["checks"][0]["evidence"], "irsaliye.pdf: 2024-01-31");
        assert_eq!(report["skipped_files"], json!(["bundle.zip/readme.txt"]));

        let uploads = std::fs::read_dir(dir.path().join("Data/uploads"))
            .expect("uploads dir")
            .count();
        assert_eq!(uploads, 2);
    }

    #[tokio::test]
    async fn corrupt_archive_is_a_bad_request() {
        let (_dir, addr) = serve(None).await;
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/analyze"))
            .json(&json!({
                "scenario": "TICARIFATURA",
                "invoice_type": "SATIS",
                "documents": [{"file_name": "bundle.zip", "content_base64": b64(b"PK??")}]
            }))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.expect("json");
        assert_eq!(body["code"], "invalid_request");
    }

    #[tokio::test]
    async fn scanned_documents_beyond_a_few_megabytes_are_accepted() {
        let (_dir, addr) = serve(None).await;
        let mut scan = b"%PDF-1.7\n".to_vec();
        scan.resize(3 * 1024 * 1024, b'x');

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/analyze"))
            .json(&json!({
                "scenario": "TICARIFATURA",
                "invoice_type": "SATIS",
                "documents": [{"file_name": "fatura.pdf", "content_base64": b64(&scan)}]
            }))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn body_over_the_configured_limit_is_rejected_with_an_envelope() {
        let (_dir, addr) = serve_with_limit(None, 1024).await;
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/analyze"))
            .json(&json!({
                "scenario": "TICARIFATURA",
                "invoice_type": "SATIS",
                "documents": [{"file_name": "fatura.pdf", "content_base64": b64(&[b'x'; 4096])}]
            }))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
        let body: Value = response.json().await.expect("json");
        assert_eq!(body["code"], "payload_too_large");
        assert!(body["hint"]
            .as_str()
            .is_some_and(|hint| hint.contains(MAX_BODY_BYTES_ENV)));
    }

    #[tokio::test]
    async fn missing_catalog_is_not_found() {
        let (_dir, addr) = serve(None).await;
        let response = reqwest::get(format!("http://{addr}/requirements"))
            .await
            .expect("request");
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[test]
    fn bearer_scheme_is_case_insensitive_and_secret_exact() {
        let token = ApiToken::new("  s3cret ").expect("token");
        let headers = |value: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
            headers
        };
        assert!(token.admits(&headers("Bearer s3cret")));
        assert!(token.admits(&headers("bearer  s3cret ")));
        assert!(!token.admits(&headers("Bearer s3cre")));
        assert!(!token.admits(&headers("Basic s3cret")));
        assert!(!token.admits(&headers("s3cret")));
        assert!(!token.admits(&HeaderMap::new()));
        assert!(ApiToken::new(" \t").is_none());
    }

    #[test]
    fn error_codes_map_to_statuses() {
        assert_eq!(status_for("payload_too_large"), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(status_for("missing_artifact"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("malformed_response"), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for("upstream_unavailable"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for("storage"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
