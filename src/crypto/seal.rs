//! AES-256-GCM sealing with label binding.
//!
//! Each call to `seal` generates a fresh random 12-byte nonce and
//! prepends it to the ciphertext; the entry label is authenticated as
//! associated data, so a sealed blob cannot be transplanted onto a
//! different entry even under the same key.
//!
//! Layout of the returned byte buffer:
//!   [ 12-byte nonce | ciphertext + 16-byte auth tag ]

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

use crate::errors::{DukptError, Result};

/// Size of the AES-256-GCM nonce in bytes.
const NONCE_LEN: usize = 12;

/// Seal `plaintext` under a 32-byte `key`, binding it to `label`.
///
/// Returns the nonce prepended to the ciphertext (nonce || ciphertext).
pub fn seal(key: &[u8], label: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| DukptError::SealFailed(format!("invalid key length: {e}")))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: label.as_bytes(),
            },
        )
        .map_err(|e| DukptError::SealFailed(format!("encryption error: {e}")))?;

    // Prepend the nonce so the caller only needs to store one blob.
    let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Open a blob produced by [`seal`] under the same key and label.
pub fn open(key: &[u8], label: &str, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(DukptError::OpenFailed);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| DukptError::OpenFailed)?;

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: label.as_bytes(),
            },
        )
        .map_err(|_| DukptError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [0x11u8; 32];
        let sealed = seal(&key, "bdk:prod", b"secret key bytes").unwrap();
        let opened = open(&key, "bdk:prod", &sealed).unwrap();
        assert_eq!(opened, b"secret key bytes");
    }

    #[test]
    fn wrong_label_fails() {
        let key = [0x11u8; 32];
        let sealed = seal(&key, "bdk:prod", b"secret").unwrap();
        assert!(matches!(
            open(&key, "bdk:test", &sealed),
            Err(DukptError::OpenFailed)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&[0x11u8; 32], "x", b"secret").unwrap();
        assert!(open(&[0x22u8; 32], "x", &sealed).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [0x11u8; 32];
        let mut sealed = seal(&key, "x", b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&key, "x", &sealed).is_err());
    }

    #[test]
    fn truncated_blob_fails() {
        assert!(open(&[0u8; 32], "x", &[0u8; 5]).is_err());
    }
}
