//! Core domain types: extension references, verdicts, and risk taxonomy.

use crate::safeio::ValidatedPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Risk classification assigned by the analyzer.
///
/// Variants are ordered so that `a >= b` means "a is at least as severe
/// as b", which is what threshold filtering relies on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "low" => Ok(Self::Low),
            "medium" | "moderate" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unrecognized risk level '{other}' (expected critical, high, medium, low, or unknown)"
            )),
        }
    }
}

impl RiskLevel {
    /// Lenient parse used on wire payloads: unrecognized values collapse
    /// to `Unknown` instead of failing the whole verdict.
    #[must_use]
    pub fn from_wire(s: &str) -> Self {
        Self::from_str(s).unwrap_or(Self::Unknown)
    }
}

/// Vulnerability counts reported for an extension's dependency tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnCounts {
    #[serde(default)]
    pub critical: u64,
    #[serde(default)]
    pub high: u64,
    #[serde(default)]
    pub moderate: u64,
    #[serde(default)]
    pub low: u64,
    #[serde(default)]
    pub info: u64,
    #[serde(default)]
    pub total: u64,
}

/// Where a verdict came from, and whether resolution succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    NotFound,
    Error,
}

/// One dependency of an analyzed extension (detailed mode only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRisk {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

/// A named risk factor surfaced by the analyzer (detailed mode only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub severity: RiskLevel,
}

/// Parsed security result for one extension at a specific version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionVerdict {
    pub extension_id: String,
    pub version: String,
    #[serde(default)]
    pub analysis_id: Option<String>,
    /// Analyzer score in 0..=100; absent when the analyzer reported none.
    #[serde(default)]
    pub security_score: Option<u8>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub vuln_counts: VulnCounts,
    #[serde(default)]
    pub publisher_verified: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyRisk>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risk_factors: Vec<RiskFactor>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub analyzed_at: Option<DateTime<Utc>>,
    pub source_status: SourceStatus,
    /// Sanitized failure description; only set when `source_status` is
    /// not `Success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Raw analyzer response, retained in detailed mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<serde_json::Value>,
}

impl ExtensionVerdict {
    /// A verdict for an extension the analyzer has never seen.
    #[must_use]
    pub fn not_found(extension_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            version: version.into(),
            analysis_id: None,
            security_score: None,
            risk_level: RiskLevel::Unknown,
            vuln_counts: VulnCounts::default(),
            publisher_verified: false,
            dependencies: Vec::new(),
            risk_factors: Vec::new(),
            updated_at: None,
            analyzed_at: None,
            source_status: SourceStatus::NotFound,
            error: None,
            raw_payload: None,
        }
    }

    /// A verdict recording a resolution failure. `message` must already be
    /// sanitized for the error context.
    #[must_use]
    pub fn failed(
        extension_id: impl Into<String>,
        version: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut v = Self::not_found(extension_id, version);
        v.source_status = SourceStatus::Error;
        v.error = Some(message.into());
        v
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.source_status == SourceStatus::Success
    }
}

/// A locally installed extension as found by discovery. Read-only after
/// construction.
#[derive(Debug, Clone)]
pub struct ExtensionRef {
    pub publisher: String,
    pub name: String,
    pub version: String,
    pub install_path: ValidatedPath,
    pub installed_at: Option<DateTime<Utc>>,
    pub display_name: Option<String>,
}

impl ExtensionRef {
    /// Identity key: `"{publisher}.{name}"`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}.{}", self.publisher, self.name)
    }
}

impl fmt::Display for ExtensionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.publisher, self.name, self.version)
    }
}

/// Extension-id equality. Case-insensitive on platforms whose default
/// filesystems are case-insensitive, byte-wise elsewhere.
#[must_use]
pub fn ids_equal(a: &str, b: &str) -> bool {
    if cfg!(any(windows, target_os = "macos")) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_ordering_tracks_severity() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert!(RiskLevel::Low > RiskLevel::Unknown);
    }

    #[test]
    fn risk_level_parses_common_spellings() {
        assert_eq!("critical".parse::<RiskLevel>().unwrap(), RiskLevel::Critical);
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert_eq!("moderate".parse::<RiskLevel>().unwrap(), RiskLevel::Medium);
        assert!("severe".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn risk_level_wire_parse_never_fails() {
        assert_eq!(RiskLevel::from_wire("nonsense"), RiskLevel::Unknown);
        assert_eq!(RiskLevel::from_wire("critical"), RiskLevel::Critical);
    }

    #[test]
    fn risk_level_serde_is_lowercase() {
        let json = serde_json::to_string(&RiskLevel::High).unwrap();
        assert_eq!(json, r#""high""#);
        let parsed: RiskLevel = serde_json::from_str(r#""critical""#).unwrap();
        assert_eq!(parsed, RiskLevel::Critical);
    }

    #[test]
    fn verdict_roundtrips_through_json() {
        let verdict = ExtensionVerdict {
            extension_id: "publisher.tool".to_string(),
            version: "1.2.3".to_string(),
            analysis_id: Some("a-123".to_string()),
            security_score: Some(87),
            risk_level: RiskLevel::Low,
            vuln_counts: VulnCounts {
                total: 1,
                low: 1,
                ..VulnCounts::default()
            },
            publisher_verified: true,
            dependencies: vec![DependencyRisk {
                name: "left-pad".to_string(),
                version: "1.0.0".to_string(),
                risk_level: RiskLevel::Low,
            }],
            risk_factors: Vec::new(),
            updated_at: None,
            analyzed_at: None,
            source_status: SourceStatus::Success,
            error: None,
            raw_payload: None,
        };

        let bytes = serde_json::to_vec(&verdict).unwrap();
        let back: ExtensionVerdict = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, verdict);
    }

    #[test]
    fn failed_verdict_carries_message_and_status() {
        let v = ExtensionVerdict::failed("a.b", "1.0.0", "connection reset");
        assert_eq!(v.source_status, SourceStatus::Error);
        assert_eq!(v.error.as_deref(), Some("connection reset"));
        assert!(!v.is_success());
    }

    #[test]
    fn ids_equal_is_exact_on_case_sensitive_platforms() {
        assert!(ids_equal("pub.name", "pub.name"));
        if cfg!(any(windows, target_os = "macos")) {
            assert!(ids_equal("Pub.Name", "pub.name"));
        } else {
            assert!(!ids_equal("Pub.Name", "pub.name"));
        }
    }
}
