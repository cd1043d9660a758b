//! Foundation utilities shared across the vscan workspace.
//!
//! This crate holds the pieces every other crate leans on: validated paths
//! and sanitization ([`safeio`]), the core domain types ([`types`]), the
//! cooperative cancellation flag ([`cancel`]), and tracing setup
//! ([`logging`]).

pub mod cancel;
pub mod logging;
pub mod safeio;
pub mod types;

pub use cancel::CancelFlag;
pub use safeio::{PathRules, SafeIoError, SanitizeContext, SizeBudget, ValidatedPath};
pub use types::{
    DependencyRisk, ExtensionRef, ExtensionVerdict, RiskFactor, RiskLevel, SourceStatus,
    VulnCounts,
};
