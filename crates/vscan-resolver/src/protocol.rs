//! Wire types and the transport seam for the remote analyzer.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;

/// Analysis state as reported by the remote service.
///
/// The observed vocabulary is `pending`, `in_progress`, `completed`, and
/// `failed`. Anything else is carried as `Other` and treated as
/// non-terminal; the poll deadline bounds how long an unknown status can
/// keep an analysis alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Other(String),
}

impl AnalysisStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl<'de> Deserialize<'de> for AnalysisStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "in_progress" | "in-progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Other(raw),
        })
    }
}

/// Response to `POST /api/extensions/analyze`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub analysis_id: String,
    pub status: AnalysisStatus,
}

/// Response to `GET /api/extensions/status/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: AnalysisStatus,
    #[serde(default)]
    pub progress: Option<u32>,
}

/// Transport-level failures for one analyzer request.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("analyzer returned HTTP {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        retryable: bool,
    },

    #[error("extension not known to the analyzer")]
    NotFound,

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("analyzer response exceeded {limit} bytes")]
    ResponseTooLarge { limit: u64 },

    #[error("malformed analyzer response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Retryable conditions: HTTP 429/502/503/504, network timeouts, and
    /// connection-level transport failures. Everything else is permanent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Status {
                retryable: true,
                ..
            } | Self::Timeout
                | Self::Transport(_)
        )
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// One-attempt transport seam for the analyzer protocol. Implemented by
/// the HTTP client; tests script it directly. Retries and pacing live a
/// level up in the resolver.
#[async_trait]
pub trait AnalyzerApi: Send + Sync {
    async fn submit(&self, publisher: &str, name: &str) -> Result<SubmitResponse, ApiError>;

    async fn poll(&self, analysis_id: &str) -> Result<StatusResponse, ApiError>;

    async fn fetch(&self, analysis_id: &str) -> Result<serde_json::Value, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses_parse() {
        let s: AnalysisStatus = serde_json::from_str(r#""pending""#).unwrap();
        assert_eq!(s, AnalysisStatus::Pending);
        let s: AnalysisStatus = serde_json::from_str(r#""in_progress""#).unwrap();
        assert_eq!(s, AnalysisStatus::InProgress);
        let s: AnalysisStatus = serde_json::from_str(r#""COMPLETED""#).unwrap();
        assert_eq!(s, AnalysisStatus::Completed);
        let s: AnalysisStatus = serde_json::from_str(r#""failed""#).unwrap();
        assert_eq!(s, AnalysisStatus::Failed);
    }

    #[test]
    fn unknown_status_is_non_terminal() {
        let s: AnalysisStatus = serde_json::from_str(r#""queued""#).unwrap();
        assert_eq!(s, AnalysisStatus::Other("queued".to_string()));
        assert!(!s.is_terminal());
    }

    #[test]
    fn terminal_statuses() {
        assert!(AnalysisStatus::Completed.is_terminal());
        assert!(AnalysisStatus::Failed.is_terminal());
        assert!(!AnalysisStatus::Pending.is_terminal());
        assert!(!AnalysisStatus::InProgress.is_terminal());
    }

    #[test]
    fn submit_response_uses_camel_case() {
        let body = r#"{"analysisId": "an-7", "status": "pending"}"#;
        let parsed: SubmitResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.analysis_id, "an-7");
        assert_eq!(parsed.status, AnalysisStatus::Pending);
    }

    #[test]
    fn retryability_classification() {
        for code in [429u16, 502, 503, 504] {
            let err = ApiError::Status {
                status: code,
                retry_after: None,
                retryable: true,
            };
            assert!(err.is_retryable(), "code: {code}");
        }
        let permanent = ApiError::Status {
            status: 400,
            retry_after: None,
            retryable: false,
        };
        assert!(!permanent.is_retryable());
        assert!(ApiError::Timeout.is_retryable());
        assert!(ApiError::Transport("reset".to_string()).is_retryable());
        assert!(!ApiError::NotFound.is_retryable());
        assert!(!ApiError::Malformed("x".to_string()).is_retryable());
        assert!(!ApiError::ResponseTooLarge { limit: 1 }.is_retryable());
    }
}
