//! HTTP transport for the analyzer protocol.
//!
//! Each scan worker owns one `AnalyzerClient`; the per-client throttle
//! guarantees a minimum interval between any two requests issued through
//! the same instance.

use crate::backoff::parse_retry_after;
use crate::protocol::{AnalyzerApi, ApiError, StatusResponse, SubmitResponse};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use vscan_utils::safeio::{SanitizeContext, SizeBudget, sanitize_string};

/// Sent on every request, per the analyzer's API guidelines.
pub const USER_AGENT: &str = concat!(
    "vscan/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/vscan-dev/vscan)"
);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Construction-time failures; these are scan-fatal configuration
/// problems, not per-extension errors.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("analyzer base URL must use https: {0}")]
    InsecureBaseUrl(String),

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct AnalyzerClientOptions {
    pub base_url: String,
    pub request_timeout: Duration,
    pub max_response_bytes: u64,
    /// Minimum interval between any two requests from this client.
    pub min_request_interval: Duration,
}

/// Enforces the per-client request pacing. The lock is released before
/// sleeping; a loop re-checks afterwards.
#[derive(Debug)]
struct Throttle {
    min_interval: Duration,
    last: tokio::sync::Mutex<Option<Instant>>,
}

impl Throttle {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: tokio::sync::Mutex::new(None),
        }
    }

    async fn wait(&self) {
        loop {
            let sleep_for = {
                let mut last = self.last.lock().await;
                let now = Instant::now();
                match *last {
                    Some(prev) if now.duration_since(prev) < self.min_interval => {
                        self.min_interval - now.duration_since(prev)
                    }
                    _ => {
                        *last = Some(now);
                        return;
                    }
                }
            };
            tokio::time::sleep(sleep_for).await;
        }
    }
}

/// One-attempt HTTP implementation of [`AnalyzerApi`].
#[derive(Debug)]
pub struct AnalyzerClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    max_response_bytes: u64,
    throttle: Throttle,
}

impl AnalyzerClient {
    /// # Errors
    ///
    /// Rejects non-https base URLs and surfaces reqwest builder failures.
    pub fn new(options: AnalyzerClientOptions) -> Result<Self, ClientError> {
        if !options.base_url.starts_with("https://") {
            return Err(ClientError::InsecureBaseUrl(options.base_url));
        }

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            request_timeout: options.request_timeout,
            max_response_bytes: options.max_response_bytes,
            throttle: Throttle::new(options.min_request_interval),
        })
    }

    /// Analysis ids come from the remote; refuse anything that could
    /// alter the request path.
    fn check_analysis_id(analysis_id: &str) -> Result<(), ApiError> {
        if analysis_id.is_empty()
            || analysis_id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(ApiError::Malformed(format!(
                "suspicious analysis id: {}",
                sanitize_string(analysis_id, SanitizeContext::Log)
            )));
        }
        Ok(())
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ApiError> {
        self.throttle.wait().await;

        let mut req = self
            .http
            .request(method.clone(), &url)
            .timeout(self.request_timeout);
        if let Some(body) = &body {
            req = req.json(body);
        }

        debug!(%method, url = %url, "analyzer request");
        let resp = req.send().await.map_err(map_reqwest_error)?;
        let status = resp.status();

        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            return Err(match status.as_u16() {
                404 => ApiError::NotFound,
                code @ (429 | 502 | 503 | 504) => ApiError::Status {
                    status: code,
                    retry_after,
                    retryable: true,
                },
                code => ApiError::Status {
                    status: code,
                    retry_after: None,
                    retryable: false,
                },
            });
        }

        // Stream the body under the configured ceiling; a response that
        // exceeds it is a permanent failure, not an allocation.
        let mut resp = resp;
        let mut budget = SizeBudget::new(self.max_response_bytes);
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(map_reqwest_error)? {
            budget
                .consume(chunk.len() as u64)
                .map_err(|_| ApiError::ResponseTooLarge {
                    limit: self.max_response_bytes,
                })?;
            buf.extend_from_slice(&chunk);
        }

        let value: serde_json::Value =
            serde_json::from_slice(&buf).map_err(|e| ApiError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ApiError::Malformed(
                "response root is not a JSON object".to_string(),
            ));
        }
        Ok(value)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(sanitize_string(&e.to_string(), SanitizeContext::Log))
    }
}

#[async_trait]
impl AnalyzerApi for AnalyzerClient {
    async fn submit(&self, publisher: &str, name: &str) -> Result<SubmitResponse, ApiError> {
        let url = format!("{}/api/extensions/analyze", self.base_url);
        let body = json!({ "publisher": publisher, "name": name });
        let value = self.request(reqwest::Method::POST, url, Some(body)).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn poll(&self, analysis_id: &str) -> Result<StatusResponse, ApiError> {
        Self::check_analysis_id(analysis_id)?;
        let url = format!("{}/api/extensions/status/{}", self.base_url, analysis_id);
        let value = self.request(reqwest::Method::GET, url, None).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn fetch(&self, analysis_id: &str) -> Result<serde_json::Value, ApiError> {
        Self::check_analysis_id(analysis_id)?;
        let url = format!("{}/api/extensions/results/{}", self.base_url, analysis_id);
        self.request(reqwest::Method::GET, url, None).await
    }
}
