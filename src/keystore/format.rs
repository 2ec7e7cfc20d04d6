//! Binary keystore file format and HMAC integrity verification.
//!
//! A `.dukpt` keystore file has this layout:
//!
//! ```text
//! [DKSF: 4 bytes][version: 1 byte][header_len: 4 bytes LE][header JSON][entries JSON][HMAC-SHA256: 32 bytes]
//! ```
//!
//! - **Magic** (`DKSF`): identifies the file as a DUKPT software keystore.
//! - **Version**: format version (currently `1`).
//! - **Header length**: little-endian u32 telling us where the header
//!   JSON ends and the entries JSON begins.
//! - **Header JSON**: serialized `KeystoreHeader`.
//! - **Entries JSON**: serialized `Vec<StoredEntry>` — each entry's key
//!   material is individually sealed before it ever reaches this layer.
//! - **HMAC-SHA256**: 32-byte tag computed over header + entries bytes.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::keyblock::{base64_decode, base64_encode};
use crate::errors::{DukptError, Result};

/// Magic bytes at the start of every keystore file.
const MAGIC: &[u8; 4] = b"DKSF";

/// Current binary format version.
pub const CURRENT_VERSION: u8 = 1;

/// Size of the HMAC tag appended to the file (SHA-256 = 32 bytes).
const HMAC_LEN: usize = 32;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (header_len).
const PREFIX_LEN: usize = 9;

/// Argon2 parameters stored in the keystore header so the exact same
/// KDF settings are used when re-opening.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoredArgon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for StoredArgon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Metadata stored at the beginning of a keystore file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreHeader {
    /// Format version.
    pub version: u8,

    /// The salt used for Argon2id unlock-key derivation (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    /// When this keystore was first created.
    pub created_at: DateTime<Utc>,

    /// Argon2 params used at creation (stored so open uses the same).
    pub argon2_params: StoredArgon2Params,
}

/// One sealed keystore entry.
///
/// The label doubles as the seal AAD and the HKDF subkey context, so an
/// entry cannot be renamed or transplanted without detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Entry label, e.g. `bdk:prod`, `ik:<hex>`, `kbpk`, `officer:alice`.
    pub label: String,

    /// Sealed key material (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub sealed: Vec<u8>,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

/// Write a keystore file to disk **atomically**.
///
/// 1. Serialize header and entries to JSON.
/// 2. Compute HMAC over header + entries bytes.
/// 3. Write to a temp file in the same directory, permissions 0o600.
/// 4. Rename the temp file over the target path.
pub fn write_keystore(
    path: &Path,
    header: &KeystoreHeader,
    entries: &[StoredEntry],
    hmac_key: &[u8],
) -> Result<()> {
    let header_bytes = serde_json::to_vec(header)
        .map_err(|e| DukptError::SerializationError(format!("header: {e}")))?;
    let entries_bytes = serde_json::to_vec(entries)
        .map_err(|e| DukptError::SerializationError(format!("entries: {e}")))?;

    let hmac_tag = compute_hmac(hmac_key, &header_bytes, &entries_bytes)?;

    let header_len = u32::try_from(header_bytes.len()).map_err(|_| {
        DukptError::SerializationError(format!(
            "header length {} exceeds u32::MAX",
            header_bytes.len()
        ))
    })?;
    let total = PREFIX_LEN + header_bytes.len() + entries_bytes.len() + HMAC_LEN;
    let mut buf = Vec::with_capacity(total);

    buf.extend_from_slice(MAGIC);
    buf.push(CURRENT_VERSION);
    buf.extend_from_slice(&header_len.to_le_bytes());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(&entries_bytes);
    buf.extend_from_slice(&hmac_tag);

    // Atomic write: temp file in the same directory, then rename.
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    fs::write(&tmp_path, &buf)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(&tmp_path, perms);
    }

    fs::rename(&tmp_path, path)?;

    Ok(())
}

/// Raw data read from a keystore file on disk.
///
/// Keeps the original bytes so the HMAC can be verified over the exact
/// bytes that were written — no re-serialization needed.
pub struct RawKeystore {
    pub header: KeystoreHeader,
    pub entries: Vec<StoredEntry>,
    /// The raw header JSON bytes exactly as stored on disk.
    pub header_bytes: Vec<u8>,
    /// The raw entries JSON bytes exactly as stored on disk.
    pub entries_bytes: Vec<u8>,
    /// The HMAC tag stored at the end of the file.
    pub stored_hmac: Vec<u8>,
}

/// Read a keystore file from disk and return its parts **with raw bytes**.
///
/// The caller must verify the HMAC over `header_bytes` and
/// `entries_bytes` before trusting the deserialized data.
pub fn read_keystore(path: &Path) -> Result<RawKeystore> {
    if !path.exists() {
        return Err(DukptError::KeystoreNotFound(path.to_path_buf()));
    }

    let data = fs::read(path)?;

    let min_size = PREFIX_LEN + HMAC_LEN;
    if data.len() < min_size {
        return Err(DukptError::InvalidKeystoreFormat(
            "file too small to be a valid keystore".into(),
        ));
    }

    if &data[0..4] != MAGIC {
        return Err(DukptError::InvalidKeystoreFormat(
            "missing DKSF magic bytes".into(),
        ));
    }

    let version = data[4];
    if version != CURRENT_VERSION {
        return Err(DukptError::InvalidKeystoreFormat(format!(
            "unsupported version {version}, expected {CURRENT_VERSION}"
        )));
    }

    let header_len_u32 = u32::from_le_bytes(
        data[5..9]
            .try_into()
            .map_err(|_| DukptError::InvalidKeystoreFormat("bad header length".into()))?,
    );
    let header_len = usize::try_from(header_len_u32).map_err(|_| {
        DukptError::InvalidKeystoreFormat(format!(
            "header length {header_len_u32} exceeds platform address space"
        ))
    })?;

    let header_end = PREFIX_LEN + header_len;
    if header_end + HMAC_LEN > data.len() {
        return Err(DukptError::InvalidKeystoreFormat(
            "header length exceeds file size".into(),
        ));
    }

    let header_bytes = data[PREFIX_LEN..header_end].to_vec();
    let entries_end = data.len() - HMAC_LEN;
    let entries_bytes = data[header_end..entries_end].to_vec();
    let stored_hmac = data[entries_end..].to_vec();

    let header: KeystoreHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| DukptError::InvalidKeystoreFormat(format!("header JSON: {e}")))?;

    let entries: Vec<StoredEntry> = serde_json::from_slice(&entries_bytes)
        .map_err(|e| DukptError::InvalidKeystoreFormat(format!("entries JSON: {e}")))?;

    Ok(RawKeystore {
        header,
        entries,
        header_bytes,
        entries_bytes,
        stored_hmac,
    })
}

/// Compute HMAC-SHA256 over header + entries bytes.
pub fn compute_hmac(hmac_key: &[u8], header_bytes: &[u8], entries_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|e| DukptError::HmacError(format!("invalid HMAC key: {e}")))?;

    mac.update(header_bytes);
    mac.update(entries_bytes);

    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify that the HMAC matches using constant-time comparison.
pub fn verify_hmac(
    hmac_key: &[u8],
    header_bytes: &[u8],
    entries_bytes: &[u8],
    expected_hmac: &[u8],
) -> Result<()> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|e| DukptError::HmacError(format!("invalid HMAC key: {e}")))?;

    mac.update(header_bytes);
    mac.update(entries_bytes);

    mac.verify_slice(expected_hmac)
        .map_err(|_| DukptError::HmacMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_header() -> KeystoreHeader {
        KeystoreHeader {
            version: CURRENT_VERSION,
            salt: vec![7u8; 32],
            created_at: Utc::now(),
            argon2_params: StoredArgon2Params::default(),
        }
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.dukpt");
        let entries = vec![StoredEntry {
            label: "bdk:prod".into(),
            sealed: vec![1, 2, 3],
            created_at: Utc::now(),
        }];
        let hmac_key = [9u8; 32];

        write_keystore(&path, &sample_header(), &entries, &hmac_key).unwrap();
        let raw = read_keystore(&path).unwrap();

        assert_eq!(raw.entries.len(), 1);
        assert_eq!(raw.entries[0].label, "bdk:prod");
        verify_hmac(
            &hmac_key,
            &raw.header_bytes,
            &raw.entries_bytes,
            &raw.stored_hmac,
        )
        .unwrap();
    }

    #[test]
    fn tampered_file_fails_hmac() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.dukpt");
        let hmac_key = [9u8; 32];
        write_keystore(&path, &sample_header(), &[], &hmac_key).unwrap();

        let mut data = fs::read(&path).unwrap();
        let mid = PREFIX_LEN + 2;
        data[mid] ^= 0x01;
        fs::write(&path, &data).unwrap();

        let raw = read_keystore(&path);
        // Either the header fails to parse or the HMAC check fails.
        let verified = raw.and_then(|raw| {
            verify_hmac(
                &hmac_key,
                &raw.header_bytes,
                &raw.entries_bytes,
                &raw.stored_hmac,
            )
        });
        assert!(verified.is_err());
    }

    #[test]
    fn missing_file_is_not_found() {
        assert!(matches!(
            read_keystore(Path::new("/nonexistent/ks.dukpt")),
            Err(DukptError::KeystoreNotFound(_))
        ));
    }

    #[test]
    fn rejects_wrong_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.dukpt");
        fs::write(&path, b"NOPE\x01\x02\x00\x00\x00{}0123456789abcdef0123456789abcdef").unwrap();
        assert!(matches!(
            read_keystore(&path),
            Err(DukptError::InvalidKeystoreFormat(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn keystore_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.dukpt");
        write_keystore(&path, &sample_header(), &[], &[9u8; 32]).unwrap();

        let perms = fs::metadata(&path).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }
}
