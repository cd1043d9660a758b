//! Typed event stream from the engine to presentation surfaces.

use crate::stats::ScanStatsSnapshot;
use std::time::Duration;
use vscan_utils::types::RiskLevel;

/// Events emitted by the engine, in arrival order. Cross-extension
/// ordering is unspecified; cache writes happen before the corresponding
/// event is observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    ScanStarted {
        total: usize,
    },
    ExtensionStarted {
        extension_id: String,
    },
    CacheHit {
        extension_id: String,
        risk_level: RiskLevel,
    },
    FreshResult {
        extension_id: String,
        risk_level: RiskLevel,
        vuln_total: u64,
    },
    ExtensionFailed {
        extension_id: String,
        message: String,
    },
    Retry {
        extension_id: String,
        attempt: u32,
        delay: Duration,
    },
    ScanCompleted {
        stats: ScanStatsSnapshot,
    },
}

/// Outbound port to whatever renders progress. Implementations live at
/// the edge (terminal UI, plain logger, silent); the engine depends only
/// on this trait.
pub trait ProgressPort: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct SilentProgress;

impl ProgressPort for SilentProgress {
    fn emit(&self, _event: ProgressEvent) {}
}
