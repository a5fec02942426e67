use crate::config::OracleConfig;
use crate::error::{OracleError, Result};
use crate::retry::{
    backoff_delay, classify, parse_retry_after, sample_jitter, transient_delay, Disposition,
};
use crate::transport::{HttpRequest, HttpResponse, OracleTransport, ReqwestTransport};
use crate::wire;
use async_trait::async_trait;
use regcheck_protocol::AttachmentRef;
use regcheck_recovery::bounded_preview;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Structured generation against the oracle.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Prompt plus attachments in, raw text of the first candidate out.
    async fn send(
        &self,
        prompt_parts: &[String],
        attachments: &[AttachmentRef],
        schema: &Value,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Ask the oracle to re-emit `raw_text` as a single schema-valid JSON object.
    async fn repair(
        &self,
        raw_text: &str,
        schema: &Value,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload_artifact(
        &self,
        bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
        cancel: &CancellationToken,
    ) -> Result<AttachmentRef>;
}

pub struct OracleGateway {
    config: OracleConfig,
    transport: Arc<dyn OracleTransport>,
}

impl OracleGateway {
    pub fn new(config: OracleConfig, transport: Arc<dyn OracleTransport>) -> Self {
        Self { config, transport }
    }

    pub fn with_reqwest(config: OracleConfig) -> Result<Self> {
        let transport = ReqwestTransport::new()
            .map_err(|err| OracleError::InvalidConfig(format!("HTTP client: {err}")))?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn json_request(&self, url: String, body: &Value, api_key: &str) -> HttpRequest {
        HttpRequest {
            url,
            headers: vec![
                ("x-goog-api-key".to_string(), api_key.to_string()),
                ("content-type".to_string(), "application/json".to_string()),
            ],
            body: body.to_string().into_bytes(),
            timeout: self.config.request_timeout,
        }
    }

    async fn generate(
        &self,
        prompt_parts: &[String],
        attachments: &[AttachmentRef],
        schema: &Value,
        max_output_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let api_key = self.config.api_key()?;
        let payload = wire::generate_payload(prompt_parts, attachments, schema, max_output_tokens);
        let request = self.json_request(
            wire::generate_url(&self.config.base_url, &self.config.model),
            &payload,
            api_key,
        );
        let response = self.send_with_retry("generate", &request, cancel).await?;
        wire::extract_first_text(&response.text())
    }

    /// Send `request` until it succeeds, fails fatally, or the retry budget runs out.
    ///
    /// No delay is slept after the final attempt, and cancellation interrupts both the in-flight
    /// request and any backoff sleep.
    async fn send_with_retry(
        &self,
        op: &str,
        request: &HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(OracleError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OracleError::Cancelled),
                res = self.transport.send(request.clone()) => res,
            };

            let (delay, last_status, message) = match outcome {
                Ok(response) => {
                    let body = response.text();
                    let retry_after = parse_retry_after(response.header("retry-after"), &body);
                    match classify(response.status, retry_after) {
                        Disposition::Success => {
                            log::debug!("oracle {op}: HTTP {} on attempt {attempt}", response.status);
                            return Ok(response);
                        }
                        Disposition::Fatal => {
                            log::warn!("oracle {op}: HTTP {} is not retryable", response.status);
                            return Err(OracleError::UpstreamRejected {
                                status: response.status,
                                body_preview: bounded_preview(&body),
                            });
                        }
                        Disposition::Retryable { retry_after } => (
                            backoff_delay(
                                policy,
                                attempt,
                                retry_after,
                                sample_jitter(policy.backoff_jitter_ms),
                            ),
                            Some(response.status),
                            format!("HTTP {}: {}", response.status, bounded_preview(&body)),
                        ),
                    }
                }
                Err(err) => (
                    transient_delay(policy, sample_jitter(policy.transient_jitter_ms)),
                    None,
                    err.to_string(),
                ),
            };

            if attempt >= max_attempts {
                log::warn!("oracle {op}: giving up after {attempt} attempts ({message})");
                return Err(OracleError::UpstreamUnavailable {
                    attempts: attempt,
                    last_status,
                    message,
                });
            }

            log::warn!(
                "oracle {op}: attempt {attempt}/{max_attempts} failed ({message}); retrying in {}ms",
                delay.as_millis()
            );
            sleep_or_cancel(delay, cancel).await?;
        }
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OracleError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

const REPAIR_INSTRUCTION: &str = "The text below was meant to be a JSON object matching the \
response schema but could not be parsed. Re-emit it as a single JSON object that satisfies the \
schema exactly. Output only JSON. Drop any record that is incomplete or truncated; do not invent \
values.";

#[async_trait]
impl Oracle for OracleGateway {
    async fn send(
        &self,
        prompt_parts: &[String],
        attachments: &[AttachmentRef],
        schema: &Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.generate(
            prompt_parts,
            attachments,
            schema,
            self.config.max_output_tokens,
            cancel,
        )
        .await
    }

    async fn repair(
        &self,
        raw_text: &str,
        schema: &Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let parts = vec![REPAIR_INSTRUCTION.to_string(), raw_text.to_string()];
        self.generate(
            &parts,
            &[],
            schema,
            self.config.repair_max_output_tokens,
            cancel,
        )
        .await
    }
}

#[async_trait]
impl ArtifactUploader for OracleGateway {
    /// Two-phase resumable upload: `start` returns an upload URL, then the bytes are sent with
    /// `upload, finalize`. Each phase retries on its own.
    async fn upload_artifact(
        &self,
        bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
        cancel: &CancellationToken,
    ) -> Result<AttachmentRef> {
        let api_key = self.config.api_key()?;

        let mut start = self.json_request(
            wire::upload_start_url(&self.config.base_url),
            &wire::upload_start_body(display_name),
            api_key,
        );
        start.headers.extend([
            ("X-Goog-Upload-Protocol".to_string(), "resumable".to_string()),
            ("X-Goog-Upload-Command".to_string(), "start".to_string()),
            (
                "X-Goog-Upload-Header-Content-Length".to_string(),
                bytes.len().to_string(),
            ),
            (
                "X-Goog-Upload-Header-Content-Type".to_string(),
                mime_type.to_string(),
            ),
        ]);
        let started = self.send_with_retry("upload start", &start, cancel).await?;
        let upload_url = started
            .header("x-goog-upload-url")
            .map(str::to_string)
            .ok_or_else(|| OracleError::malformed(&started.text()))?;

        let size = bytes.len();
        let upload = HttpRequest {
            url: upload_url,
            headers: vec![
                ("x-goog-api-key".to_string(), api_key.to_string()),
                ("content-type".to_string(), mime_type.to_string()),
                ("X-Goog-Upload-Offset".to_string(), "0".to_string()),
                (
                    "X-Goog-Upload-Command".to_string(),
                    "upload, finalize".to_string(),
                ),
            ],
            body: bytes,
            timeout: self.config.upload_timeout,
        };
        let finished = self.send_with_retry("upload", &upload, cancel).await?;
        let attachment = wire::parse_upload_response(&finished.text(), mime_type)?;
        log::info!("uploaded {display_name} ({size} bytes) as {}", attachment.uri);
        Ok(attachment)
    }
}
