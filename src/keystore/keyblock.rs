//! Wrapped-BDK key block and dual-control approvals.
//!
//! A BDK travels to the key store inside a protected envelope:
//!
//! ```text
//! [DKB1: 4 bytes][version: 1 byte][header_len: 4 bytes LE][header JSON]
//! [sealed key: nonce ‖ ciphertext ‖ tag][HMAC-SHA256: 32 bytes]
//! ```
//!
//! - **Header JSON**: environment, algorithm, and the key check value of
//!   the wrapped key.
//! - **Sealed key**: the 32 BDK bytes, AES-256-GCM-sealed under a subkey
//!   of the key-block protection key (KBPK), bound to the environment.
//! - **HMAC-SHA256**: integrity tag over everything before it, under a
//!   second KBPK subkey, verified in constant time.
//!
//! Activation additionally requires dual control: at least two distinct
//! officers must each present an HMAC over the raw envelope bytes under
//! their registered approval key.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{derive_subkey, seal};
use crate::derive::ecb_encrypt;
use crate::errors::{DukptError, Result};

/// Magic bytes at the start of every key block.
const MAGIC: &[u8; 4] = b"DKB1";

/// Current key-block format version.
pub const CURRENT_VERSION: u8 = 1;

/// Size of the trailing HMAC tag (SHA-256 = 32 bytes).
const HMAC_LEN: usize = 32;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (header_len).
const PREFIX_LEN: usize = 9;

/// Length of the key check value in bytes.
const KCV_LEN: usize = 3;

/// Subkey labels under the KBPK.
const WRAP_LABEL: &str = "kbpk-wrap";
const MAC_LABEL: &str = "kbpk-mac";

type HmacSha256 = Hmac<Sha256>;

/// Metadata carried in the key-block header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBlockHeader {
    /// Format version.
    pub version: u8,

    /// Environment the key is destined for (e.g. "prod").
    pub environment: String,

    /// Key algorithm; only "aes-256" is accepted.
    pub algorithm: String,

    /// Key check value of the wrapped key (base64, 3 bytes).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub kcv: Vec<u8>,
}

/// A parsed, structurally valid wrapped-BDK envelope.
///
/// Holding a `WrappedKeyBlock` proves nothing about authenticity — that
/// is established by [`unwrap_key`](Self::unwrap_key) under the KBPK.
#[derive(Debug, Clone)]
pub struct WrappedKeyBlock {
    bytes: Vec<u8>,
    header: KeyBlockHeader,
}

impl WrappedKeyBlock {
    /// Build a key block around `key` for `environment`.
    ///
    /// Used by the provisioning side (key ceremony tooling) and tests.
    pub fn wrap(kbpk: &[u8; 32], environment: &str, key: &Zeroizing<[u8; 32]>) -> Result<Self> {
        let header = KeyBlockHeader {
            version: CURRENT_VERSION,
            environment: environment.to_string(),
            algorithm: "aes-256".to_string(),
            kcv: key_check_value(key).to_vec(),
        };
        let header_bytes = serde_json::to_vec(&header)
            .map_err(|e| DukptError::SerializationError(format!("key-block header: {e}")))?;

        let mut wrap_key = derive_subkey(kbpk, WRAP_LABEL)?;
        let sealed = seal(&wrap_key, &seal_label(environment), key.as_ref());
        wrap_key.zeroize();
        let sealed = sealed?;

        let header_len = u32::try_from(header_bytes.len())
            .map_err(|_| DukptError::SerializationError("key-block header too large".into()))?;

        let mut bytes = Vec::with_capacity(PREFIX_LEN + header_bytes.len() + sealed.len() + HMAC_LEN);
        bytes.extend_from_slice(MAGIC);
        bytes.push(CURRENT_VERSION);
        bytes.extend_from_slice(&header_len.to_le_bytes());
        bytes.extend_from_slice(&header_bytes);
        bytes.extend_from_slice(&sealed);

        let mut mac_key = derive_subkey(kbpk, MAC_LABEL)?;
        let tag = compute_mac(&mac_key, &bytes);
        mac_key.zeroize();
        bytes.extend_from_slice(&tag?);

        Ok(Self { bytes, header })
    }

    /// Parse and structurally validate an envelope.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let min_size = PREFIX_LEN + HMAC_LEN;
        if bytes.len() < min_size {
            return Err(DukptError::InvalidKeyBlock(
                "too small to be a key block".into(),
            ));
        }

        if &bytes[0..4] != MAGIC {
            return Err(DukptError::InvalidKeyBlock("missing DKB1 magic".into()));
        }

        let version = bytes[4];
        if version != CURRENT_VERSION {
            return Err(DukptError::InvalidKeyBlock(format!(
                "unsupported version {version}, expected {CURRENT_VERSION}"
            )));
        }

        let header_len_u32 = u32::from_le_bytes(
            bytes[5..9]
                .try_into()
                .map_err(|_| DukptError::InvalidKeyBlock("bad header length".into()))?,
        );
        let header_len = usize::try_from(header_len_u32)
            .map_err(|_| DukptError::InvalidKeyBlock("header length overflow".into()))?;

        let header_end = PREFIX_LEN
            .checked_add(header_len)
            .ok_or_else(|| DukptError::InvalidKeyBlock("header length overflow".into()))?;
        if header_end + HMAC_LEN > bytes.len() {
            return Err(DukptError::InvalidKeyBlock(
                "header length exceeds envelope size".into(),
            ));
        }

        let header: KeyBlockHeader = serde_json::from_slice(&bytes[PREFIX_LEN..header_end])
            .map_err(|e| DukptError::InvalidKeyBlock(format!("header JSON: {e}")))?;

        if header.algorithm != "aes-256" {
            return Err(DukptError::InvalidKeyBlock(format!(
                "unsupported algorithm '{}'",
                header.algorithm
            )));
        }
        if header.kcv.len() != KCV_LEN {
            return Err(DukptError::InvalidKeyBlock("bad KCV length".into()));
        }

        Ok(Self { bytes, header })
    }

    /// The raw envelope bytes (what officers sign and files carry).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Header metadata.
    pub fn header(&self) -> &KeyBlockHeader {
        &self.header
    }

    /// Verify the envelope under the KBPK and recover the key.
    ///
    /// Store-side only.  Checks, in order: the integrity HMAC (constant
    /// time), the GCM seal, and the key check value (constant time) —
    /// a KCV mismatch means the wrapped key is not the key the ceremony
    /// produced, which is treated as a `SecurityViolation`.
    pub(crate) fn unwrap_key(&self, kbpk: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
        let body_end = self.bytes.len() - HMAC_LEN;

        let mut mac_key = derive_subkey(kbpk, MAC_LABEL)?;
        let verified = verify_mac(&mac_key, &self.bytes[..body_end], &self.bytes[body_end..]);
        mac_key.zeroize();
        verified?;

        let header_len = u32::from_le_bytes(
            self.bytes[5..9]
                .try_into()
                .map_err(|_| DukptError::InvalidKeyBlock("bad header length".into()))?,
        ) as usize;
        let sealed = &self.bytes[PREFIX_LEN + header_len..body_end];

        let mut wrap_key = derive_subkey(kbpk, WRAP_LABEL)?;
        let opened = seal_open(&wrap_key, &self.header.environment, sealed);
        wrap_key.zeroize();
        let mut opened = opened?;

        if opened.len() != 32 {
            opened.zeroize();
            return Err(DukptError::InvalidKeyBlock("wrapped key is not 256-bit".into()));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&opened);
        opened.zeroize();

        let kcv = key_check_value(&key);
        if kcv.ct_eq(&self.header.kcv[..]).unwrap_u8() != 1 {
            return Err(DukptError::SecurityViolation(
                "key check value mismatch on BDK import".into(),
            ));
        }

        Ok(key)
    }
}

fn seal_label(environment: &str) -> String {
    format!("keyblock:{environment}")
}

fn seal_open(wrap_key: &[u8], environment: &str, sealed: &[u8]) -> Result<Vec<u8>> {
    crate::crypto::open(wrap_key, &seal_label(environment), sealed)
}

/// Key check value: first 3 bytes of the AES-ECB encryption of the zero
/// block under the key.
pub fn key_check_value(key: &[u8; 32]) -> [u8; KCV_LEN] {
    let block = ecb_encrypt(key, &[0u8; 16]);
    let mut kcv = [0u8; KCV_LEN];
    kcv.copy_from_slice(&block[..KCV_LEN]);
    kcv
}

fn compute_mac(mac_key: &[u8], data: &[u8]) -> Result<[u8; HMAC_LEN]> {
    let mut mac = HmacSha256::new_from_slice(mac_key)
        .map_err(|e| DukptError::HmacError(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    let mut tag = [0u8; HMAC_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

fn verify_mac(mac_key: &[u8], data: &[u8], expected: &[u8]) -> Result<()> {
    let mut mac = HmacSha256::new_from_slice(mac_key)
        .map_err(|e| DukptError::HmacError(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    mac.verify_slice(expected).map_err(|_| DukptError::HmacMismatch)
}

// ---------------------------------------------------------------------------
// Dual-control approvals
// ---------------------------------------------------------------------------

/// One officer's authorization of a key block: an HMAC-SHA256 over the
/// raw envelope bytes under the officer's registered approval key.
///
/// Serializes to the JSON approval files exchanged during a key ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    /// Registered officer identifier.
    pub officer: String,

    /// HMAC-SHA256 tag (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub mac: Vec<u8>,
}

impl Authorization {
    /// Issue an approval for `block` under an officer's approval key.
    pub fn issue(officer: &str, approval_key: &[u8; 32], block: &WrappedKeyBlock) -> Result<Self> {
        let mac = compute_mac(approval_key, block.as_bytes())?;
        Ok(Self {
            officer: officer.to_string(),
            mac: mac.to_vec(),
        })
    }

    /// Check this approval against `block` under the claimed officer's
    /// registered key.  Constant-time tag comparison.
    pub fn verify(&self, approval_key: &[u8; 32], block: &WrappedKeyBlock) -> bool {
        verify_mac(approval_key, block.as_bytes(), &self.mac).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
