//! SQLite-backed verdict store with rename-aside corruption recovery.

use crate::key::InstallKey;
use crate::{CacheError, VerdictCache};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use vscan_utils::safeio::ValidatedPath;
use vscan_utils::types::{ExtensionVerdict, SourceStatus};

/// Current on-disk schema version, tracked in the `meta` table and mixed
/// into every entry's HMAC tag.
pub const SCHEMA_VERSION: u32 = 2;

/// Database filename under the cache directory.
pub const DB_FILE: &str = "cache.db";

/// Key filename under the cache directory.
pub const KEY_FILE: &str = "hmac.key";

const CREATE_TABLES_SQL: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS verdicts (
        extension_id TEXT NOT NULL,
        version TEXT NOT NULL,
        payload BLOB NOT NULL,
        stored_at INTEGER NOT NULL,
        schema_version INTEGER NOT NULL,
        hmac_tag BLOB NOT NULL,
        analysis_id TEXT,
        PRIMARY KEY (extension_id, version)
    );
";

/// Aggregate view of the store, surfaced by `vscan cache stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub avg_age_secs: Option<u64>,
    pub stale_entries: u64,
    /// Entries that failed HMAC verification during this process's
    /// lifetime.
    pub tag_failures: u64,
}

#[derive(Debug, thiserror::Error)]
enum SchemaError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("unsupported cache schema version {0}")]
    UnsupportedVersion(i64),
}

/// The production [`VerdictCache`]: single-writer SQLite plus a
/// per-installation HMAC key.
pub struct CacheStore {
    conn: Connection,
    key: InstallKey,
    tag_failures: u64,
}

impl CacheStore {
    /// Open (or create) the store under `dir`.
    ///
    /// A database that fails `PRAGMA integrity_check` or cannot be
    /// migrated is renamed aside and rebuilt. A missing or unusable key
    /// file forces key regeneration, which invalidates every entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the directory cannot be created or the
    /// rebuilt database still cannot be opened. Open-time failures are
    /// scan-fatal.
    pub fn open(dir: &ValidatedPath, now: DateTime<Utc>) -> Result<Self, CacheError> {
        fs::create_dir_all(dir.as_path())?;
        let (key, regenerated) = InstallKey::load_or_generate(&dir.as_path().join(KEY_FILE))?;

        let db_path = dir.as_path().join(DB_FILE);
        let conn = match Self::try_open(&db_path) {
            Some(conn) => conn,
            None => Self::rebuild(&db_path, now)?,
        };
        let conn = match Self::ensure_schema(conn) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "cache schema migration failed; rebuilding store");
                let fresh = Self::rebuild(&db_path, now)?;
                Self::ensure_schema(fresh).map_err(|e| match e {
                    SchemaError::Sqlite(e) => CacheError::Sqlite(e),
                    SchemaError::UnsupportedVersion(_) => {
                        CacheError::Sqlite(rusqlite::Error::InvalidQuery)
                    }
                })?
            }
        };

        let mut store = Self {
            conn,
            key,
            tag_failures: 0,
        };
        if regenerated {
            let removed = store.clear()?;
            if removed > 0 {
                warn!(removed, "cache key regenerated; invalidated all entries");
            }
        }
        Ok(store)
    }

    /// Open the database only if it passes the integrity check.
    fn try_open(db_path: &Path) -> Option<Connection> {
        let conn = Connection::open(db_path).ok()?;
        let check: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .ok()?;
        if check.eq_ignore_ascii_case("ok") {
            Some(conn)
        } else {
            warn!("cache database failed integrity check");
            None
        }
    }

    /// Move a broken database aside and open a fresh one.
    fn rebuild(db_path: &Path, now: DateTime<Utc>) -> Result<Connection, CacheError> {
        if db_path.exists() {
            let aside = db_path.with_file_name(format!("cache.db.corrupt-{}", now.timestamp()));
            fs::rename(db_path, &aside)?;
            warn!("corrupt cache database moved aside; starting fresh");
        }
        Ok(Connection::open(db_path)?)
    }

    /// Create tables on a fresh database, or run forward-only migrations
    /// on an old one.
    fn ensure_schema(conn: Connection) -> Result<Connection, SchemaError> {
        conn.execute_batch(CREATE_TABLES_SQL)?;

        let recorded: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let current = i64::from(SCHEMA_VERSION);
        match recorded.and_then(|v| v.parse::<i64>().ok()) {
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![current.to_string()],
                )?;
            }
            Some(v) if v == current => {}
            Some(1) => {
                debug!("migrating cache schema from version 1");
                conn.execute_batch("ALTER TABLE verdicts ADD COLUMN analysis_id TEXT;")?;
                conn.execute(
                    "UPDATE meta SET value = ?1 WHERE key = 'schema_version'",
                    params![current.to_string()],
                )?;
            }
            Some(other) => return Err(SchemaError::UnsupportedVersion(other)),
        }
        Ok(conn)
    }
}

impl VerdictCache for CacheStore {
    fn lookup(
        &mut self,
        extension_id: &str,
        version: &str,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Option<ExtensionVerdict> {
        let row = self
            .conn
            .query_row(
                "SELECT payload, stored_at, schema_version, hmac_tag
                 FROM verdicts WHERE extension_id = ?1 AND version = ?2",
                params![extension_id, version],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )
            .optional()
            .ok()
            .flatten()?;
        let (payload, stored_at, row_schema, tag) = row;

        if row_schema != i64::from(SCHEMA_VERSION) {
            debug!(extension_id, "cache entry has stale schema version");
            return None;
        }
        if !self
            .key
            .verify(&payload, SCHEMA_VERSION, extension_id, version, &tag)
        {
            self.tag_failures += 1;
            warn!(extension_id, "cache entry failed authentication; ignoring");
            return None;
        }

        let age_secs = now.timestamp() - stored_at;
        if age_secs > max_age.as_secs().min(i64::MAX as u64) as i64 {
            debug!(extension_id, age_secs, "cache entry aged out");
            return None;
        }

        match serde_json::from_slice(&payload) {
            Ok(verdict) => Some(verdict),
            Err(e) => {
                warn!(extension_id, error = %e, "authenticated cache payload failed to decode");
                None
            }
        }
    }

    fn store(&mut self, verdict: &ExtensionVerdict, now: DateTime<Utc>) -> Result<(), CacheError> {
        if verdict.source_status != SourceStatus::Success {
            return Err(CacheError::NotCacheable {
                status: verdict.source_status,
            });
        }

        let payload = serde_json::to_vec(verdict)?;
        let tag = self.key.tag(
            &payload,
            SCHEMA_VERSION,
            &verdict.extension_id,
            &verdict.version,
        );
        self.conn.execute(
            "INSERT INTO verdicts
                 (extension_id, version, payload, stored_at, schema_version, hmac_tag, analysis_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (extension_id, version) DO UPDATE SET
                 payload = excluded.payload,
                 stored_at = excluded.stored_at,
                 schema_version = excluded.schema_version,
                 hmac_tag = excluded.hmac_tag,
                 analysis_id = excluded.analysis_id",
            params![
                verdict.extension_id,
                verdict.version,
                payload,
                now.timestamp(),
                i64::from(SCHEMA_VERSION),
                tag,
                verdict.analysis_id,
            ],
        )?;
        Ok(())
    }

    fn clear(&mut self) -> Result<u64, CacheError> {
        let removed = self.conn.execute("DELETE FROM verdicts", [])?;
        Ok(removed as u64)
    }

    fn stats(&mut self, now: DateTime<Utc>, max_age: Duration) -> Result<CacheStats, CacheError> {
        let entries: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM verdicts", [], |row| row.get(0))?;
        let avg_age: Option<f64> = self.conn.query_row(
            "SELECT AVG(?1 - stored_at) FROM verdicts",
            params![now.timestamp()],
            |row| row.get(0),
        )?;
        let cutoff = now.timestamp() - max_age.as_secs().min(i64::MAX as u64) as i64;
        let stale: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM verdicts WHERE stored_at < ?1",
            params![cutoff],
            |row| row.get(0),
        )?;

        Ok(CacheStats {
            entries: entries.max(0) as u64,
            avg_age_secs: avg_age.map(|a| a.max(0.0) as u64),
            stale_entries: stale.max(0) as u64,
            tag_failures: self.tag_failures,
        })
    }
}
