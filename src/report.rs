//! Progress-port implementations for the CLI edge.

use vscan_engine::{ProgressEvent, ProgressPort};
use vscan_utils::safeio::{SanitizeContext, sanitize_string};

/// Renders progress events as tracing log lines. Messages that may carry
/// network- or user-controlled text are sanitized before they reach a
/// terminal.
pub struct LogProgress;

impl ProgressPort for LogProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::ScanStarted { total } => {
                tracing::info!(total, "scan started");
            }
            ProgressEvent::ExtensionStarted { extension_id } => {
                tracing::debug!(extension_id = %extension_id, "checking extension");
            }
            ProgressEvent::CacheHit {
                extension_id,
                risk_level,
            } => {
                tracing::info!(
                    extension_id = %extension_id,
                    risk = %risk_level,
                    "cached verdict"
                );
            }
            ProgressEvent::FreshResult {
                extension_id,
                risk_level,
                vuln_total,
            } => {
                tracing::info!(
                    extension_id = %extension_id,
                    risk = %risk_level,
                    vulnerabilities = vuln_total,
                    "analyzed"
                );
            }
            ProgressEvent::ExtensionFailed {
                extension_id,
                message,
            } => {
                tracing::warn!(
                    extension_id = %extension_id,
                    reason = %sanitize_string(&message, SanitizeContext::Output),
                    "extension not resolved"
                );
            }
            ProgressEvent::Retry {
                extension_id,
                attempt,
                delay,
            } => {
                tracing::info!(
                    extension_id = %extension_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying analyzer request"
                );
            }
            ProgressEvent::ScanCompleted { stats } => {
                tracing::info!(
                    succeeded = stats.succeeded,
                    failed = stats.failed,
                    not_found = stats.not_found,
                    from_cache = stats.from_cache,
                    fresh = stats.fresh_scans,
                    retries = stats.retried_requests,
                    "scan completed"
                );
            }
        }
    }
}
