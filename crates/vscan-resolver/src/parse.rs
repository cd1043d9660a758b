//! Turning an analyzer results document into an [`ExtensionVerdict`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use vscan_utils::types::{
    DependencyRisk, ExtensionRef, ExtensionVerdict, RiskFactor, RiskLevel, SourceStatus,
    VulnCounts,
};

#[derive(Error, Debug)]
#[error("unexpected results shape: {0}")]
pub struct ParseError(String);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ResultsDoc {
    security_score: ScoreDoc,
    publisher_verified: bool,
    analysis_modules: ModulesDoc,
    updated_at: Option<DateTime<Utc>>,
    analyzed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ScoreDoc {
    score: Option<f64>,
    risk_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ModulesDoc {
    dependencies: DependenciesDoc,
    risk_factors: Vec<RiskFactorDoc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DependenciesDoc {
    vulnerabilities: VulnerabilitiesDoc,
    list: Vec<DependencyDoc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VulnerabilitiesDoc {
    summary: VulnCounts,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DependencyDoc {
    name: String,
    version: String,
    risk_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RiskFactorDoc {
    code: String,
    description: String,
    severity: Option<String>,
}

/// Parse a fetched results document.
///
/// Detailed mode additionally carries dependency and risk-factor lists
/// plus the raw payload; in normal mode those are dropped at the parse
/// boundary so they never reach the cache.
///
/// # Errors
///
/// Returns [`ParseError`] when the document root is not an object or a
/// present field has the wrong shape. Parse failures on a 2xx body are
/// permanent, never retried.
pub fn parse_verdict(
    ext: &ExtensionRef,
    analysis_id: &str,
    body: &serde_json::Value,
    detailed: bool,
    now: DateTime<Utc>,
) -> Result<ExtensionVerdict, ParseError> {
    if !body.is_object() {
        return Err(ParseError("results root is not an object".to_string()));
    }
    let doc: ResultsDoc =
        serde_json::from_value(body.clone()).map_err(|e| ParseError(e.to_string()))?;

    let security_score = doc
        .security_score
        .score
        .filter(|s| s.is_finite() && (0.0..=100.0).contains(s))
        .map(|s| s.round() as u8);
    let risk_level = doc
        .security_score
        .risk_level
        .as_deref()
        .map(RiskLevel::from_wire)
        .unwrap_or_default();

    let (dependencies, risk_factors, raw_payload) = if detailed {
        let dependencies = doc
            .analysis_modules
            .dependencies
            .list
            .into_iter()
            .map(|d| DependencyRisk {
                name: d.name,
                version: d.version,
                risk_level: d
                    .risk_level
                    .as_deref()
                    .map(RiskLevel::from_wire)
                    .unwrap_or_default(),
            })
            .collect();
        let risk_factors = doc
            .analysis_modules
            .risk_factors
            .into_iter()
            .map(|f| RiskFactor {
                code: f.code,
                description: f.description,
                severity: f
                    .severity
                    .as_deref()
                    .map(RiskLevel::from_wire)
                    .unwrap_or_default(),
            })
            .collect();
        (dependencies, risk_factors, Some(body.clone()))
    } else {
        (Vec::new(), Vec::new(), None)
    };

    Ok(ExtensionVerdict {
        extension_id: ext.id(),
        version: ext.version.clone(),
        analysis_id: Some(analysis_id.to_string()),
        security_score,
        risk_level,
        vuln_counts: doc.analysis_modules.dependencies.vulnerabilities.summary,
        publisher_verified: doc.publisher_verified,
        dependencies,
        risk_factors,
        updated_at: doc.updated_at.or(Some(now)),
        analyzed_at: doc.analyzed_at,
        source_status: SourceStatus::Success,
        error: None,
        raw_payload,
    })
}
