//! Per-installation HMAC key management.
//!
//! The key is a secret at rest: owner-only file mode, never logged, never
//! included in error messages.

use crate::CacheError;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Key length in bytes.
pub const KEY_LEN: usize = 32;

/// Separator between extension id and version inside the MAC input,
/// preventing boundary ambiguity between the two fields.
const FIELD_SEPARATOR: u8 = 0x1f;

/// The per-installation HMAC key.
pub struct InstallKey {
    bytes: [u8; KEY_LEN],
}

impl fmt::Debug for InstallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material must never appear in debug output.
        f.write_str("InstallKey(..)")
    }
}

impl InstallKey {
    /// Load the key from `path`, or generate a fresh one when the file is
    /// missing, unreadable, or the wrong length. The boolean is true when
    /// a new key was generated, which obligates the caller to invalidate
    /// all existing cache entries.
    pub fn load_or_generate(path: &Path) -> Result<(Self, bool), CacheError> {
        match fs::read(path) {
            Ok(bytes) if bytes.len() >= KEY_LEN => {
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(&bytes[..KEY_LEN]);
                Ok((Self { bytes: key }, false))
            }
            Ok(_) => {
                warn!("cache key file is truncated; regenerating");
                let key = Self::generate_to(path)?;
                Ok((key, true))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = Self::generate_to(path)?;
                Ok((key, true))
            }
            Err(e) => {
                warn!(error = %e, "cache key file unreadable; regenerating");
                let _ = fs::remove_file(path);
                let key = Self::generate_to(path)?;
                Ok((key, true))
            }
        }
    }

    fn generate_to(path: &Path) -> Result<Self, CacheError> {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        // When the file pre-existed, create(true) keeps its old mode.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(Self { bytes })
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.bytes).expect("HMAC accepts any key length")
    }

    fn feed(
        mac: &mut HmacSha256,
        payload: &[u8],
        schema_version: u32,
        extension_id: &str,
        version: &str,
    ) {
        mac.update(payload);
        mac.update(&schema_version.to_le_bytes());
        mac.update(extension_id.as_bytes());
        mac.update(&[FIELD_SEPARATOR]);
        mac.update(version.as_bytes());
    }

    /// Compute the authentication tag for one cache entry.
    #[must_use]
    pub fn tag(
        &self,
        payload: &[u8],
        schema_version: u32,
        extension_id: &str,
        version: &str,
    ) -> Vec<u8> {
        let mut mac = self.mac();
        Self::feed(&mut mac, payload, schema_version, extension_id, version);
        mac.finalize().into_bytes().to_vec()
    }

    /// Constant-time verification of a stored tag.
    #[must_use]
    pub fn verify(
        &self,
        payload: &[u8],
        schema_version: u32,
        extension_id: &str,
        version: &str,
        tag: &[u8],
    ) -> bool {
        let mut mac = self.mac();
        Self::feed(&mut mac, payload, schema_version, extension_id, version);
        mac.verify_slice(tag).is_ok()
    }
}
