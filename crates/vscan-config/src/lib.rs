//! Scan configuration: recognized options, range validation, and freeze
//! semantics.
//!
//! Callers assemble a [`ScanConfigBuilder`] (typically from CLI flags),
//! then call [`ScanConfigBuilder::freeze`] to obtain an immutable
//! [`ScanConfig`]. All range checks happen at freeze time so the engine
//! never sees an out-of-range value.

use std::time::Duration;
use thiserror::Error;
use vscan_utils::safeio::{self, PathRules, SafeIoError, ValidatedPath};
use vscan_utils::types::RiskLevel;

/// Default analyzer endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.vscan.dev";

const DEFAULT_WORKERS: usize = 3;
const DEFAULT_REQUEST_DELAY_SECS: f64 = 1.5;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_SECS: f64 = 2.0;
const DEFAULT_CACHE_MAX_AGE_DAYS: u32 = 30;
const DEFAULT_MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: f64 = 2.0;
const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 300;

/// Configuration validation errors. All are fatal to the scan (exit 2).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value} (expected {expected})")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("no cache directory could be determined for this platform")]
    NoCacheDir,

    #[error(transparent)]
    Path(#[from] SafeIoError),
}

/// Pre- and post-scan filters. Combined with AND semantics.
#[derive(Debug, Clone, Default)]
pub struct ScanFilters {
    /// Exact-match allowlist on extension id; empty means "all".
    pub include_ids: Vec<String>,
    /// Exact-match denylist on extension id.
    pub exclude_ids: Vec<String>,
    /// Case-insensitive exact match on publisher.
    pub publisher: Option<String>,
    /// Applied after verdict acquisition: retain verdicts at or above this
    /// level.
    pub min_risk_level: Option<RiskLevel>,
}

/// Immutable runtime configuration for one scan.
///
/// Constructed only through [`ScanConfigBuilder::freeze`].
#[derive(Debug, Clone)]
pub struct ScanConfig {
    workers: usize,
    request_delay: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    cache_max_age: Duration,
    use_cache: bool,
    refresh_cache: bool,
    cache_dir: ValidatedPath,
    extensions_dir: Option<ValidatedPath>,
    filters: ScanFilters,
    detailed: bool,
    max_response_bytes: u64,
    per_request_timeout: Duration,
    poll_interval: Duration,
    analysis_timeout: Duration,
    api_base_url: String,
    risk_exit_threshold: RiskLevel,
}

impl ScanConfig {
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn request_delay(&self) -> Duration {
        self.request_delay
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    #[must_use]
    pub fn cache_max_age(&self) -> Duration {
        self.cache_max_age
    }

    #[must_use]
    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    #[must_use]
    pub fn refresh_cache(&self) -> bool {
        self.refresh_cache
    }

    #[must_use]
    pub fn cache_dir(&self) -> &ValidatedPath {
        &self.cache_dir
    }

    #[must_use]
    pub fn extensions_dir(&self) -> Option<&ValidatedPath> {
        self.extensions_dir.as_ref()
    }

    #[must_use]
    pub fn filters(&self) -> &ScanFilters {
        &self.filters
    }

    #[must_use]
    pub fn detailed(&self) -> bool {
        self.detailed
    }

    #[must_use]
    pub fn max_response_bytes(&self) -> u64 {
        self.max_response_bytes
    }

    #[must_use]
    pub fn per_request_timeout(&self) -> Duration {
        self.per_request_timeout
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn analysis_timeout(&self) -> Duration {
        self.analysis_timeout
    }

    #[must_use]
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    #[must_use]
    pub fn risk_exit_threshold(&self) -> RiskLevel {
        self.risk_exit_threshold
    }
}

/// Mutable accumulator for scan options.
#[derive(Debug, Clone, Default)]
pub struct ScanConfigBuilder {
    workers: Option<usize>,
    request_delay_seconds: Option<f64>,
    max_retries: Option<u32>,
    retry_base_delay_seconds: Option<f64>,
    cache_max_age_days: Option<u32>,
    use_cache: Option<bool>,
    refresh_cache: Option<bool>,
    cache_dir: Option<String>,
    extensions_dir: Option<String>,
    filters: ScanFilters,
    detailed: Option<bool>,
    max_response_bytes: Option<u64>,
    per_request_timeout_seconds: Option<u64>,
    api_base_url: Option<String>,
    risk_exit_threshold: Option<RiskLevel>,
}

impl ScanConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = Some(n);
        self
    }

    #[must_use]
    pub fn request_delay_seconds(mut self, secs: f64) -> Self {
        self.request_delay_seconds = Some(secs);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    #[must_use]
    pub fn retry_base_delay_seconds(mut self, secs: f64) -> Self {
        self.retry_base_delay_seconds = Some(secs);
        self
    }

    #[must_use]
    pub fn cache_max_age_days(mut self, days: u32) -> Self {
        self.cache_max_age_days = Some(days);
        self
    }

    #[must_use]
    pub fn use_cache(mut self, yes: bool) -> Self {
        self.use_cache = Some(yes);
        self
    }

    #[must_use]
    pub fn refresh_cache(mut self, yes: bool) -> Self {
        self.refresh_cache = Some(yes);
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<String>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn extensions_dir(mut self, dir: impl Into<String>) -> Self {
        self.extensions_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn filters(mut self, filters: ScanFilters) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn detailed(mut self, yes: bool) -> Self {
        self.detailed = Some(yes);
        self
    }

    #[must_use]
    pub fn max_response_bytes(mut self, bytes: u64) -> Self {
        self.max_response_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn per_request_timeout_seconds(mut self, secs: u64) -> Self {
        self.per_request_timeout_seconds = Some(secs);
        self
    }

    #[must_use]
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn risk_exit_threshold(mut self, level: RiskLevel) -> Self {
        self.risk_exit_threshold = Some(level);
        self
    }

    /// Validate every option and produce the frozen configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on the first out-of-range value or invalid
    /// path. Configuration errors are scan-fatal.
    pub fn freeze(self) -> Result<ScanConfig, ConfigError> {
        let workers = self.workers.unwrap_or(DEFAULT_WORKERS);
        if !(1..=5).contains(&workers) {
            return Err(ConfigError::InvalidValue {
                key: "workers",
                value: workers.to_string(),
                expected: "1..=5",
            });
        }

        let request_delay_secs = self
            .request_delay_seconds
            .unwrap_or(DEFAULT_REQUEST_DELAY_SECS);
        if !(0.1..=30.0).contains(&request_delay_secs) {
            return Err(ConfigError::InvalidValue {
                key: "request_delay_seconds",
                value: request_delay_secs.to_string(),
                expected: "0.1..=30.0",
            });
        }

        let max_retries = self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries > 10 {
            return Err(ConfigError::InvalidValue {
                key: "max_retries",
                value: max_retries.to_string(),
                expected: "0..=10",
            });
        }

        let retry_base_secs = self
            .retry_base_delay_seconds
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY_SECS);
        if !(0.1..=60.0).contains(&retry_base_secs) {
            return Err(ConfigError::InvalidValue {
                key: "retry_base_delay_seconds",
                value: retry_base_secs.to_string(),
                expected: "0.1..=60.0",
            });
        }

        let cache_max_age_days = self
            .cache_max_age_days
            .unwrap_or(DEFAULT_CACHE_MAX_AGE_DAYS);
        if !(1..=365).contains(&cache_max_age_days) {
            return Err(ConfigError::InvalidValue {
                key: "cache_max_age_days",
                value: cache_max_age_days.to_string(),
                expected: "1..=365",
            });
        }

        let max_response_bytes = self.max_response_bytes.unwrap_or(DEFAULT_MAX_RESPONSE_BYTES);
        if max_response_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_response_bytes",
                value: max_response_bytes.to_string(),
                expected: "a positive byte count",
            });
        }

        let per_request_timeout_secs = self
            .per_request_timeout_seconds
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if per_request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "per_request_timeout_seconds",
                value: per_request_timeout_secs.to_string(),
                expected: "a positive number of seconds",
            });
        }

        let api_base_url = self
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        if !api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "api_url",
                value: api_base_url,
                expected: "an https:// URL",
            });
        }

        let cache_dir = match self.cache_dir {
            Some(raw) => safeio::validate_path(&raw, &PathRules::absolute("cache directory"))?,
            None => {
                let default = dirs::cache_dir()
                    .map(|d| d.join("vscan"))
                    .ok_or(ConfigError::NoCacheDir)?;
                safeio::validate_path(
                    &default.to_string_lossy(),
                    &PathRules::absolute("cache directory"),
                )?
            }
        };

        let extensions_dir = self
            .extensions_dir
            .map(|raw| safeio::validate_path(&raw, &PathRules::absolute("extensions directory")))
            .transpose()?;

        Ok(ScanConfig {
            workers,
            request_delay: Duration::from_secs_f64(request_delay_secs),
            max_retries,
            retry_base_delay: Duration::from_secs_f64(retry_base_secs),
            cache_max_age: Duration::from_secs(u64::from(cache_max_age_days) * 24 * 60 * 60),
            use_cache: self.use_cache.unwrap_or(true),
            refresh_cache: self.refresh_cache.unwrap_or(false),
            cache_dir,
            extensions_dir,
            filters: self.filters,
            detailed: self.detailed.unwrap_or(false),
            max_response_bytes,
            per_request_timeout: Duration::from_secs(per_request_timeout_secs),
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS),
            analysis_timeout: Duration::from_secs(DEFAULT_ANALYSIS_TIMEOUT_SECS),
            api_base_url,
            risk_exit_threshold: self.risk_exit_threshold.unwrap_or(RiskLevel::High),
        })
    }
}
