//! Enumeration of locally installed VS Code extensions.
//!
//! Walks the extensions root (`~/.vscode/extensions` by default), parses
//! each directory's size-bounded `package.json`, and filters through the
//! editor's `extensions.json` install registry when one exists, so old
//! shadowed versions are not scanned. Individual bad directories are
//! skipped with a warning; an unreadable root is fatal to the scan.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use thiserror::Error;
use tracing::{debug, warn};
use vscan_utils::safeio::{self, PathRules, SafeIoError, ValidatedPath};
use vscan_utils::types::{ExtensionRef, ids_equal};

/// Manifests larger than this are treated as malformed.
pub const MANIFEST_MAX_BYTES: u64 = 1024 * 1024;

/// The install registry can list hundreds of extensions; still bounded.
const REGISTRY_MAX_BYTES: u64 = 4 * 1024 * 1024;

/// Optional install index at the extensions root. Authoritative for which
/// `(id, version)` pairs are currently installed.
pub const REGISTRY_FILE: &str = "extensions.json";

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Discovery failures are scan-fatal (exit 2); anything recoverable is a
/// per-directory skip instead.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("no home directory could be determined for this platform")]
    NoHomeDir,

    #[error("extensions directory not found: {path}")]
    RootNotFound { path: String },

    #[error("extensions directory could not be read: {0}")]
    RootUnreadable(std::io::Error),

    #[error(transparent)]
    Path(#[from] SafeIoError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PackageManifest {
    publisher: Option<String>,
    name: Option<String>,
    version: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    identifier: RegistryIdentifier,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryIdentifier {
    id: String,
}

/// Platform default extensions root: `~/.vscode/extensions`.
pub fn default_extensions_dir() -> Result<ValidatedPath, DiscoveryError> {
    let home = dirs::home_dir().ok_or(DiscoveryError::NoHomeDir)?;
    let dir = home.join(".vscode").join("extensions");
    Ok(safeio::validate_path(
        &dir.to_string_lossy(),
        &PathRules::absolute("extensions directory"),
    )?)
}

/// Enumerate installed extensions under `extensions_dir` (or the platform
/// default), deduplicated by id and ordered by id.
///
/// # Errors
///
/// Returns [`DiscoveryError`] when the root is missing or unreadable.
/// Malformed individual directories are skipped with a warning.
pub fn discover(extensions_dir: Option<&ValidatedPath>) -> Result<Vec<ExtensionRef>, DiscoveryError> {
    let root = match extensions_dir {
        Some(dir) => dir.clone(),
        None => default_extensions_dir()?,
    };
    if !root.as_path().is_dir() {
        return Err(DiscoveryError::RootNotFound {
            path: root.to_string(),
        });
    }

    let registry = load_registry(&root);
    if let Some(registry) = &registry {
        debug!(installed = registry.len(), "using install registry");
    }

    let mut found: BTreeMap<String, ExtensionRef> = BTreeMap::new();
    let entries = fs::read_dir(root.as_path()).map_err(DiscoveryError::RootUnreadable)?;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let dir = match root.join_name(&name) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(directory = %name, error = %e, "skipping suspicious directory name");
                continue;
            }
        };

        let Some(ext) = read_extension(&dir, &name) else {
            continue;
        };

        if let Some(registry) = &registry
            && !registry_contains(registry, &ext.id(), &ext.version)
        {
            debug!(extension = %ext, "not in install registry; skipping");
            continue;
        }

        let key = dedup_key(&ext.id());
        match found.get(&key) {
            Some(existing) if version_key(&existing.version) >= version_key(&ext.version) => {
                debug!(extension = %ext, "shadowed by newer installed version");
            }
            _ => {
                found.insert(key, ext);
            }
        }
    }

    Ok(found.into_values().collect())
}

/// Read and validate one extension directory's manifest. Returns `None`
/// (after logging a warning) on any malformation.
fn read_extension(dir: &ValidatedPath, dir_name: &str) -> Option<ExtensionRef> {
    let manifest_path = dir.join_name("package.json").ok()?;
    let bytes = match safeio::bounded_read_file(manifest_path.as_path(), MANIFEST_MAX_BYTES) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(directory = dir_name, error = %e, "skipping extension: unreadable manifest");
            return None;
        }
    };
    let manifest: PackageManifest = match serde_json::from_slice(&bytes) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(directory = dir_name, error = %e, "skipping extension: malformed manifest");
            return None;
        }
    };

    let Some(publisher) = manifest.publisher.filter(|p| IDENTIFIER.is_match(p)) else {
        warn!(directory = dir_name, "skipping extension: missing or invalid publisher");
        return None;
    };
    let Some(name) = manifest.name.filter(|n| IDENTIFIER.is_match(n)) else {
        warn!(directory = dir_name, "skipping extension: missing or invalid name");
        return None;
    };
    let Some(version) = manifest.version.filter(|v| !v.is_empty()) else {
        warn!(directory = dir_name, "skipping extension: missing version");
        return None;
    };

    let installed_at: Option<DateTime<Utc>> = fs::metadata(dir.as_path())
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::from);

    Some(ExtensionRef {
        publisher,
        name,
        version,
        install_path: dir.clone(),
        installed_at,
        display_name: manifest.display_name,
    })
}

/// Parse the optional install registry. An unreadable or malformed
/// registry downgrades to "no registry" with a warning rather than
/// failing the scan.
fn load_registry(root: &ValidatedPath) -> Option<Vec<(String, String)>> {
    let path = root.join_name(REGISTRY_FILE).ok()?;
    if !path.as_path().is_file() {
        return None;
    }
    let bytes = match safeio::bounded_read_file(path.as_path(), REGISTRY_MAX_BYTES) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "install registry unreadable; scanning all directories");
            return None;
        }
    };
    let entries: Vec<RegistryEntry> = match serde_json::from_slice(&bytes) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "install registry malformed; scanning all directories");
            return None;
        }
    };
    Some(
        entries
            .into_iter()
            .filter_map(|e| e.version.map(|v| (e.identifier.id, v)))
            .collect(),
    )
}

fn registry_contains(registry: &[(String, String)], id: &str, version: &str) -> bool {
    registry
        .iter()
        .any(|(rid, rversion)| ids_equal(rid, id) && rversion == version)
}

fn dedup_key(id: &str) -> String {
    if cfg!(any(windows, target_os = "macos")) {
        id.to_ascii_lowercase()
    } else {
        id.to_string()
    }
}

/// Best-effort ordering key for version strings: numeric dotted segments
/// compare numerically, anything else as zero.
fn version_key(version: &str) -> Vec<u64> {
    version
        .split(['.', '-', '+'])
        .map(|seg| seg.parse().unwrap_or(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn write_extension(root: &Path, dir: &str, manifest: &serde_json::Value) {
        let ext_dir = root.join(dir);
        fs::create_dir_all(&ext_dir).unwrap();
        fs::write(
            ext_dir.join("package.json"),
            serde_json::to_vec_pretty(manifest).unwrap(),
        )
        .unwrap();
    }

    fn manifest(publisher: &str, name: &str, version: &str) -> serde_json::Value {
        json!({
            "publisher": publisher,
            "name": name,
            "version": version,
            "displayName": format!("{name} (display)"),
        })
    }

    fn root_path(tmp: &tempfile::TempDir) -> ValidatedPath {
        safeio::validate_path(
            tmp.path().to_str().unwrap(),
            &PathRules::absolute("extensions directory"),
        )
        .unwrap()
    }

    #[test]
    fn discovers_well_formed_extensions_sorted_by_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_extension(tmp.path(), "zeta.last-1.0.0", &manifest("zeta", "last", "1.0.0"));
        write_extension(tmp.path(), "acme.tool-2.1.0", &manifest("acme", "tool", "2.1.0"));

        let found = discover(Some(&root_path(&tmp))).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id(), "acme.tool");
        assert_eq!(found[0].version, "2.1.0");
        assert_eq!(found[0].display_name.as_deref(), Some("tool (display)"));
        assert_eq!(found[1].id(), "zeta.last");
    }

    #[test]
    fn missing_root_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let root = safeio::validate_path(
            missing.to_str().unwrap(),
            &PathRules::absolute("extensions directory"),
        )
        .unwrap();
        let err = discover(Some(&root)).unwrap_err();
        assert!(matches!(err, DiscoveryError::RootNotFound { .. }));
    }

    #[test]
    fn malformed_manifest_is_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_extension(tmp.path(), "acme.good-1.0.0", &manifest("acme", "good", "1.0.0"));
        let bad = tmp.path().join("acme.bad-1.0.0");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join("package.json"), b"{ not json").unwrap();

        let found = discover(Some(&root_path(&tmp))).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "acme.good");
    }

    #[test]
    fn missing_required_fields_are_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_extension(tmp.path(), "no-pub-1.0.0", &json!({"name": "x", "version": "1.0.0"}));
        write_extension(tmp.path(), "no-ver-1.0.0", &json!({"publisher": "a", "name": "x"}));
        write_extension(
            tmp.path(),
            "bad-ident-1.0.0",
            &manifest("spaces bad", "x", "1.0.0"),
        );

        let found = discover(Some(&root_path(&tmp))).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn oversized_manifest_is_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("acme.big-1.0.0");
        fs::create_dir_all(&dir).unwrap();
        let mut doc = serde_json::Map::new();
        doc.insert("publisher".into(), json!("acme"));
        doc.insert("name".into(), json!("big"));
        doc.insert("version".into(), json!("1.0.0"));
        doc.insert("padding".into(), json!("x".repeat(2 * 1024 * 1024)));
        fs::write(
            dir.join("package.json"),
            serde_json::to_vec(&serde_json::Value::Object(doc)).unwrap(),
        )
        .unwrap();

        let found = discover(Some(&root_path(&tmp))).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn files_and_hidden_entries_are_ignored() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("stray.txt"), b"hello").unwrap();
        fs::create_dir_all(tmp.path().join(".obsolete")).unwrap();
        write_extension(tmp.path(), "acme.tool-1.0.0", &manifest("acme", "tool", "1.0.0"));

        let found = discover(Some(&root_path(&tmp))).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn dedup_keeps_newest_version_without_registry() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_extension(tmp.path(), "acme.tool-1.0.0", &manifest("acme", "tool", "1.0.0"));
        write_extension(tmp.path(), "acme.tool-1.10.0", &manifest("acme", "tool", "1.10.0"));
        write_extension(tmp.path(), "acme.tool-1.2.0", &manifest("acme", "tool", "1.2.0"));

        let found = discover(Some(&root_path(&tmp))).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version, "1.10.0");
    }

    #[test]
    fn install_registry_is_authoritative() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_extension(tmp.path(), "acme.tool-1.0.0", &manifest("acme", "tool", "1.0.0"));
        write_extension(tmp.path(), "acme.tool-2.0.0", &manifest("acme", "tool", "2.0.0"));
        write_extension(tmp.path(), "acme.gone-1.0.0", &manifest("acme", "gone", "1.0.0"));
        fs::write(
            tmp.path().join(REGISTRY_FILE),
            serde_json::to_vec(&json!([
                { "identifier": { "id": "acme.tool" }, "version": "1.0.0" }
            ]))
            .unwrap(),
        )
        .unwrap();

        let found = discover(Some(&root_path(&tmp))).unwrap();
        // The registry pins the shadowed older version and drops the
        // unlisted extension entirely.
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "acme.tool");
        assert_eq!(found[0].version, "1.0.0");
    }

    #[test]
    fn malformed_registry_downgrades_to_no_filter() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_extension(tmp.path(), "acme.tool-1.0.0", &manifest("acme", "tool", "1.0.0"));
        fs::write(tmp.path().join(REGISTRY_FILE), b"[ not json").unwrap();

        let found = discover(Some(&root_path(&tmp))).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn version_key_orders_numerically() {
        assert!(version_key("1.10.0") > version_key("1.9.9"));
        assert!(version_key("2.0.0") > version_key("1.99.99"));
        assert_eq!(version_key("1.0.0"), vec![1, 0, 0]);
    }
}
