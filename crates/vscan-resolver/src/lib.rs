//! Remote analyzer resolution: submit → poll → fetch with retries,
//! pacing, and bounded ingestion.
//!
//! The protocol state machine lives in [`RemoteResolver`] and is generic
//! over the [`protocol::AnalyzerApi`] transport seam; the HTTP transport
//! is [`client::AnalyzerClient`]. Pacing arithmetic is pure ([`backoff`])
//! and time is injected ([`clock`]) so tests assert delay bounds without
//! sleeping.

pub mod backoff;
pub mod client;
pub mod clock;
mod parse;
pub mod protocol;

pub use backoff::{BACKOFF_CAP, RetryPolicy, backoff_delay, parse_retry_after};
pub use client::{AnalyzerClient, AnalyzerClientOptions, ClientError, USER_AGENT};
pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
pub use parse::{ParseError, parse_verdict};
pub use protocol::{AnalysisStatus, AnalyzerApi, ApiError, StatusResponse, SubmitResponse};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use vscan_utils::cancel::CancelFlag;
use vscan_utils::safeio::{SanitizeContext, sanitize_string};
use vscan_utils::types::{ExtensionRef, ExtensionVerdict};

/// Callback invoked before each retry sleep; the engine uses it to count
/// retried requests and surface progress events.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, extension_id: &str, attempt: u32, delay: Duration);
}

/// Observer that ignores retries.
pub struct NoopRetryObserver;

impl RetryObserver for NoopRetryObserver {
    fn on_retry(&self, _extension_id: &str, _attempt: u32, _delay: Duration) {}
}

/// Per-worker seam between the engine and verdict acquisition.
#[async_trait]
pub trait VerdictResolver: Send + Sync {
    /// Resolve one extension to a verdict. Returns `None` only when
    /// cancellation interrupted resolution; every other outcome, including
    /// failures, is expressed in the verdict's `source_status`.
    async fn resolve(
        &self,
        ext: &ExtensionRef,
        cancel: &CancelFlag,
        retries: &dyn RetryObserver,
    ) -> Option<ExtensionVerdict>;
}

/// Drives the analyzer protocol for one worker.
pub struct RemoteResolver<A: AnalyzerApi> {
    api: A,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    poll_interval: Duration,
    analysis_timeout: Duration,
    detailed: bool,
}

impl<A: AnalyzerApi> RemoteResolver<A> {
    pub fn new(
        api: A,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        poll_interval: Duration,
        analysis_timeout: Duration,
        detailed: bool,
    ) -> Self {
        Self {
            api,
            clock,
            policy,
            poll_interval,
            analysis_timeout,
            detailed,
        }
    }

    /// Sleep that wakes early on cancellation. Returns true when
    /// cancelled.
    async fn sleep_cancellable(&self, duration: Duration, cancel: &CancelFlag) -> bool {
        tokio::select! {
            () = cancel.cancelled() => true,
            () = self.clock.sleep(duration) => false,
        }
    }

    /// Run one protocol operation under the retry policy.
    ///
    /// `None` means cancellation; `Some(Err(_))` is a permanent failure or
    /// exhausted retries.
    async fn with_retry<T, F, Fut>(
        &self,
        extension_id: &str,
        cancel: &CancelFlag,
        retries: &dyn RetryObserver,
        op: F,
    ) -> Option<Result<T, ApiError>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match op().await {
                Ok(value) => return Some(Ok(value)),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay =
                        backoff_delay(attempt, &self.policy, e.retry_after(), rand::random());
                    retries.on_retry(extension_id, attempt + 1, delay);
                    debug!(
                        extension_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient analyzer failure; backing off"
                    );
                    if self.sleep_cancellable(delay, cancel).await {
                        return None;
                    }
                    attempt += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn failure(&self, ext: &ExtensionRef, error: &ApiError) -> ExtensionVerdict {
        let message = sanitize_string(&error.to_string(), SanitizeContext::Error);
        warn!(extension_id = %ext.id(), %message, "resolution failed");
        ExtensionVerdict::failed(ext.id(), &ext.version, message)
    }
}

#[async_trait]
impl<A: AnalyzerApi> VerdictResolver for RemoteResolver<A> {
    async fn resolve(
        &self,
        ext: &ExtensionRef,
        cancel: &CancelFlag,
        retries: &dyn RetryObserver,
    ) -> Option<ExtensionVerdict> {
        let extension_id = ext.id();

        let submitted = match self
            .with_retry(&extension_id, cancel, retries, || {
                self.api.submit(&ext.publisher, &ext.name)
            })
            .await?
        {
            Ok(response) => response,
            Err(ApiError::NotFound) => {
                return Some(ExtensionVerdict::not_found(&extension_id, &ext.version));
            }
            Err(e) => return Some(self.failure(ext, &e)),
        };
        debug!(
            extension_id = %extension_id,
            analysis_id = %submitted.analysis_id,
            "analysis submitted"
        );

        // Poll until the analysis reaches a terminal state or the
        // per-extension wall clock runs out. A 2xx submit that already
        // reports completion skips the loop entirely.
        let deadline = self.clock.now()
            + chrono::Duration::from_std(self.analysis_timeout)
                .unwrap_or_else(|_| chrono::Duration::days(1));
        let mut status = submitted.status.clone();
        while !status.is_terminal() {
            if self.clock.now() >= deadline {
                warn!(extension_id = %extension_id, "analysis did not finish before the deadline");
                return Some(ExtensionVerdict::failed(
                    &extension_id,
                    &ext.version,
                    "analysis did not finish before the deadline",
                ));
            }
            if self.sleep_cancellable(self.poll_interval, cancel).await {
                return None;
            }
            status = match self
                .with_retry(&extension_id, cancel, retries, || {
                    self.api.poll(&submitted.analysis_id)
                })
                .await?
            {
                Ok(response) => response.status,
                Err(ApiError::NotFound) => {
                    return Some(ExtensionVerdict::not_found(&extension_id, &ext.version));
                }
                Err(e) => return Some(self.failure(ext, &e)),
            };
        }

        if status == AnalysisStatus::Failed {
            return Some(ExtensionVerdict::failed(
                &extension_id,
                &ext.version,
                "analysis failed on the remote service",
            ));
        }

        let body = match self
            .with_retry(&extension_id, cancel, retries, || {
                self.api.fetch(&submitted.analysis_id)
            })
            .await?
        {
            Ok(body) => body,
            Err(ApiError::NotFound) => {
                return Some(ExtensionVerdict::not_found(&extension_id, &ext.version));
            }
            Err(e) => return Some(self.failure(ext, &e)),
        };

        match parse_verdict(
            ext,
            &submitted.analysis_id,
            &body,
            self.detailed,
            self.clock.now(),
        ) {
            Ok(verdict) => Some(verdict),
            Err(e) => Some(self.failure(ext, &ApiError::Malformed(e.to_string()))),
        }
    }
}
