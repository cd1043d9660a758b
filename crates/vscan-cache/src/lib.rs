//! Durable, authenticated, versioned verdict storage.
//!
//! The store is an embedded SQLite database keyed by
//! `(extension_id, version)`. Every entry carries an HMAC-SHA256 tag over
//! `payload || schema_version || key`; a tag that fails verification makes
//! the entry indistinguishable from a miss. The HMAC key is generated per
//! installation and kept in an owner-only file next to the database.
//!
//! Concurrency contract: all mutating operations run on the scan
//! coordinator's thread. Workers never touch the store.

mod key;
mod store;

pub use key::InstallKey;
pub use store::{CacheStats, CacheStore, DB_FILE, KEY_FILE, SCHEMA_VERSION};

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use vscan_utils::types::{ExtensionVerdict, SourceStatus};

/// Cache failures. I/O and database errors during `store` are logged by
/// the caller and never abort a scan; errors at open time are scan-fatal.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("refusing to cache a verdict with status {status:?}")]
    NotCacheable { status: SourceStatus },
}

/// Seam between the scan engine and verdict persistence.
///
/// The SQLite-backed [`CacheStore`] is the production implementation;
/// tests may substitute an in-memory one.
pub trait VerdictCache: Send {
    /// Look up a fresh, authenticated verdict. Tag mismatch, schema
    /// mismatch, and age-out all present as a miss.
    fn lookup(
        &mut self,
        extension_id: &str,
        version: &str,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Option<ExtensionVerdict>;

    /// Persist a successful verdict. Only verdicts with
    /// `source_status == Success` are cacheable.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotCacheable`] for non-success verdicts, or
    /// the underlying database/serialization error.
    fn store(&mut self, verdict: &ExtensionVerdict, now: DateTime<Utc>) -> Result<(), CacheError>;

    /// Remove every entry, returning the number removed.
    fn clear(&mut self) -> Result<u64, CacheError>;

    /// Aggregate statistics for the `cache stats` surface.
    fn stats(&mut self, now: DateTime<Utc>, max_age: Duration) -> Result<CacheStats, CacheError>;
}
