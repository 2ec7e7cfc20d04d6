//! Labeled subkey derivation using HKDF-SHA256.
//!
//! From a single unlock key (or key-block protection key) we derive an
//! independent subkey per purpose, so compromising one sealed entry does
//! not weaken the others.  HKDF (RFC 5869) uses the parent key as input
//! keying material and a context label (`info`) to separate the outputs.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::errors::{DukptError, Result};

/// Length of derived subkeys (256 bits).
const KEY_LEN: usize = 32;

/// Derive a subkey bound to `label` from a parent key.
///
/// `label` is prefixed with `"dukpt-store:entry:"` so entry subkeys can
/// never collide with the file-HMAC key or keys derived in any other
/// context.
pub fn derive_subkey(parent: &[u8], label: &str) -> Result<[u8; KEY_LEN]> {
    let info = format!("dukpt-store:entry:{label}");
    hkdf_derive(parent, info.as_bytes())
}

/// Derive the keystore-file integrity HMAC key.
pub fn derive_file_hmac_key(parent: &[u8]) -> Result<[u8; KEY_LEN]> {
    hkdf_derive(parent, b"dukpt-store:file-hmac")
}

/// Internal helper: HKDF-SHA256 expand with the given `info`.
///
/// The extract step is skipped and the parent used directly as the PRK:
/// it already has full entropy (Argon2id output or an imported KBPK).
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| DukptError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

/// A 32-byte keystore unlock key that zeroes its memory when dropped.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct UnlockKey {
    bytes: [u8; KEY_LEN],
}

impl UnlockKey {
    /// Wrap raw unlock-key bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Access the raw key bytes (to feed HKDF).
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Derive the seal subkey for a labeled keystore entry.
    pub fn entry_key(&self, label: &str) -> Result<[u8; KEY_LEN]> {
        derive_subkey(&self.bytes, label)
    }

    /// Derive the keystore-file HMAC key.
    pub fn file_hmac_key(&self) -> Result<[u8; KEY_LEN]> {
        derive_file_hmac_key(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_separate_subkeys() {
        let parent = [0x42u8; 32];
        let a = derive_subkey(&parent, "bdk:prod").unwrap();
        let b = derive_subkey(&parent, "bdk:test").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn derivation_is_deterministic() {
        let parent = [9u8; 32];
        assert_eq!(
            derive_subkey(&parent, "x").unwrap(),
            derive_subkey(&parent, "x").unwrap()
        );
    }

    #[test]
    fn hmac_key_differs_from_entry_keys() {
        let unlock = UnlockKey::new([1u8; 32]);
        let hmac = unlock.file_hmac_key().unwrap();
        let entry = unlock.entry_key("file-hmac").unwrap();
        // The file-HMAC label lives outside the entry-label namespace.
        assert_ne!(hmac, entry);
    }
}
