//! vscan: audit locally installed VS Code extensions against a remote
//! security analyzer.
//!
//! The pipeline: discovery → filters → worker-pooled resolution against
//! the analyzer (with an HMAC-authenticated SQLite cache in front) → a
//! typed progress stream. This crate is the edge: CLI parsing, wiring of
//! concrete implementations into the engine's trait seams, and exit-code
//! mapping. The heavy lifting lives in the workspace crates re-exported
//! below.

pub mod cli;
pub mod report;

pub use vscan_cache::{CacheStats, CacheStore, VerdictCache};
pub use vscan_config::{ScanConfig, ScanConfigBuilder, ScanFilters};
pub use vscan_discovery::discover;
pub use vscan_engine::{
    EXIT_CLEAN, EXIT_FINDINGS, EXIT_SCAN_FAILED, ProgressEvent, ProgressPort, ScanEngine,
    ScanOutcome, ScanStatsSnapshot, SilentProgress,
};
pub use vscan_resolver::{
    AnalyzerClient, AnalyzerClientOptions, RemoteResolver, RetryPolicy, VerdictResolver,
};
pub use vscan_utils::cancel::CancelFlag;
pub use vscan_utils::types::{ExtensionRef, ExtensionVerdict, RiskLevel, SourceStatus, VulnCounts};
