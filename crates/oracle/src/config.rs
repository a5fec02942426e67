use crate::error::{OracleError, Result};
use crate::retry::RetryPolicy;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub upload_timeout: Duration,
    pub max_output_tokens: u32,
    pub repair_max_output_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(180),
            upload_timeout: Duration::from_secs(600),
            max_output_tokens: 8192,
            repair_max_output_tokens: 4096,
            retry: RetryPolicy::default(),
        }
    }
}

impl OracleConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        cfg.api_key = get("REGCHECK_ORACLE_API_KEY").map(|v| v.trim().to_string());
        if let Some(model) = get("REGCHECK_ORACLE_MODEL") {
            cfg.model = model.trim().to_string();
        }
        if let Some(url) = get("REGCHECK_ORACLE_BASE_URL") {
            cfg.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(raw) = get("REGCHECK_ORACLE_TIMEOUT_SECS") {
            let secs: u64 = parse_positive("REGCHECK_ORACLE_TIMEOUT_SECS", &raw)?;
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = get("REGCHECK_ORACLE_MAX_ATTEMPTS") {
            cfg.retry.max_attempts = parse_positive("REGCHECK_ORACLE_MAX_ATTEMPTS", &raw)?;
        }
        Ok(cfg)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(OracleError::MissingCredential)
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(OracleError::InvalidConfig(format!(
            "{key} must be a positive integer, got {raw:?}"
        ))),
    }
}
