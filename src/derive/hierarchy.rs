//! The three-level AES DUKPT derivation ladder.
//!
//! ```text
//! BDK ──(initial-key data, inside the key store)──▶ IK
//! IK ──(UniqueID ‖ counter, inside the key store)──▶ WK
//! WK ──(usage data, local, ephemeral)──▶ usage key
//! ```
//!
//! Derivations under the BDK and IK run inside the secure-key-store
//! boundary via [`SecureKeyStore::encrypt_block`]; only the working key —
//! which is ephemeral by contract — is handled in engine memory, and only
//! inside `Zeroizing` buffers.
//!
//! Security properties:
//! - Deterministic: same parent key + context always produces the same key.
//! - Separated: different counters, usages, and terminals produce
//!   different keys (distinct derivation data under AES).
//! - Contained: no function here accepts or returns raw BDK/IK bytes.

use std::fmt;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use zeroize::{Zeroize, Zeroizing};

use crate::counter::{CounterGrant, MAX_COUNTER};
use crate::errors::{DukptError, Result};
use crate::keystore::{KeyHandle, SecureKeyStore};
use crate::ksn::Ikid;

use super::constants::{counter_context, derivation_data, DerivationPurpose, KeyUsage};

/// A function-specific key derived for a single transaction.
///
/// The bytes are scrubbed on drop and never appear in `Debug` output.
pub struct UsageKey {
    usage: KeyUsage,
    bytes: Zeroizing<Vec<u8>>,
}

impl UsageKey {
    /// Which function this key serves.
    pub fn usage(&self) -> KeyUsage {
        self.usage
    }

    /// Raw key bytes (16 or 32, per the usage table).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex rendering, for the CLI.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageKey")
            .field("usage", &self.usage)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

/// AES-256-ECB encryption of a single 16-byte block.
///
/// This is the derivation primitive; store implementations use it to run
/// block encryptions inside their boundary.
pub fn ecb_encrypt(key: &[u8; 32], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; 16];
    out.copy_from_slice(&buf);
    out
}

/// Derive an Initial Key from the BDK for a freshly seen terminal.
///
/// The block encryptions run inside the key store under the BDK handle;
/// the assembled IK must be handed straight back to the store for caching
/// (the caller's copy scrubs itself on drop).
pub fn derive_initial_key(
    store: &dyn SecureKeyStore,
    bdk: &KeyHandle,
    ikid: &Ikid,
) -> Result<Zeroizing<[u8; 32]>> {
    let material = derive_key_material(DerivationPurpose::InitialKey, &ikid.0, |block| {
        store.encrypt_block(bdk, block)
    })?;
    into_key32(material)
}

/// Derive the per-transaction Working Key from a terminal's IK.
///
/// Demands a [`CounterGrant`] so derivation from an unvalidated counter is
/// impossible by construction; the range check is defensive on top of
/// that and fails with `InvalidCounter`.
pub fn derive_working_key(
    store: &dyn SecureKeyStore,
    ik: &KeyHandle,
    grant: &CounterGrant,
) -> Result<Zeroizing<[u8; 32]>> {
    let counter = grant.counter();
    if counter == 0 || counter > MAX_COUNTER {
        return Err(DukptError::InvalidCounter);
    }

    let context = counter_context(grant.ikid().unique_id(), counter);
    let material = derive_key_material(DerivationPurpose::WorkingKey, &context, |block| {
        store.encrypt_block(ik, block)
    })?;
    into_key32(material)
}

/// Derive a usage key from an ephemeral Working Key.
///
/// Runs locally: the WK never persists beyond the request, so there is no
/// boundary to cross.  Each usage maps to distinct derivation data, so
/// keys for different functions never coincide.
pub fn derive_usage_key(
    working_key: &Zeroizing<[u8; 32]>,
    usage: KeyUsage,
    unique_id: [u8; 4],
    counter: u32,
) -> Result<UsageKey> {
    let context = counter_context(unique_id, counter);
    let bytes = derive_key_material(DerivationPurpose::Usage(usage), &context, |block| {
        Ok(ecb_encrypt(working_key, block))
    })?;

    Ok(UsageKey { usage, bytes })
}

/// Run the block loop for one derivation step: encrypt derivation-data
/// blocks 1..=n under the parent and concatenate to the table's key
/// length.
fn derive_key_material<F>(
    purpose: DerivationPurpose,
    context: &[u8; 8],
    mut encrypt: F,
) -> Result<Zeroizing<Vec<u8>>>
where
    F: FnMut(&[u8; 16]) -> Result<[u8; 16]>,
{
    let (_, algorithm) = purpose.params();
    let key_len = algorithm.key_len();
    let blocks = (key_len + 15) / 16;

    let mut material = Zeroizing::new(Vec::with_capacity(blocks * 16));
    for index in 1..=blocks {
        let data = derivation_data(purpose, index as u8, context);
        let mut out = encrypt(&data)?;
        material.extend_from_slice(&out);
        out.zeroize();
    }
    material.truncate(key_len);
    Ok(material)
}

/// Move 32 bytes of key material into a fixed-size zeroizing buffer.
fn into_key32(mut material: Zeroizing<Vec<u8>>) -> Result<Zeroizing<[u8; 32]>> {
    if material.len() != 32 {
        material.zeroize();
        return Err(DukptError::KeyDerivationFailed(format!(
            "expected 32 bytes of key material, got {}",
            material.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&material);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wk(byte: u8) -> Zeroizing<[u8; 32]> {
        Zeroizing::new([byte; 32])
    }

    #[test]
    fn usage_key_is_deterministic() {
        let a = derive_usage_key(&wk(1), KeyUsage::MacRequest, [1, 2, 3, 4], 7).unwrap();
        let b = derive_usage_key(&wk(1), KeyUsage::MacRequest, [1, 2, 3, 4], 7).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn usages_produce_distinct_keys() {
        let keys: Vec<_> = KeyUsage::ALL
            .iter()
            .map(|&usage| derive_usage_key(&wk(1), usage, [0; 4], 1).unwrap())
            .collect();
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a.as_bytes(), b.as_bytes(), "{} vs {}", a.usage(), b.usage());
            }
        }
    }

    #[test]
    fn counters_produce_distinct_keys() {
        let a = derive_usage_key(&wk(1), KeyUsage::PinEncryption, [0; 4], 1).unwrap();
        let b = derive_usage_key(&wk(1), KeyUsage::PinEncryption, [0; 4], 2).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn key_widths_follow_the_table() {
        let pin = derive_usage_key(&wk(1), KeyUsage::PinEncryption, [0; 4], 1).unwrap();
        assert_eq!(pin.as_bytes().len(), 16);
        let mac = derive_usage_key(&wk(1), KeyUsage::MacRequest, [0; 4], 1).unwrap();
        assert_eq!(mac.as_bytes().len(), 32);
    }

    #[test]
    fn two_block_output_is_not_repeated_single_block() {
        // Blocks 1 and 2 differ in derivation data, so the two halves of
        // a 32-byte key must differ.
        let mac = derive_usage_key(&wk(3), KeyUsage::DataRequest, [9; 4], 5).unwrap();
        let bytes = mac.as_bytes();
        assert_ne!(&bytes[0..16], &bytes[16..32]);
    }

    #[test]
    fn debug_redacts_key_bytes() {
        let key = derive_usage_key(&wk(1), KeyUsage::MacRequest, [0; 4], 1).unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&key.to_hex()));
    }

    #[test]
    fn ecb_matches_reference_construction() {
        // Independently reassemble the first derivation block and check
        // the loop produces exactly its ECB encryption.
        let parent = wk(0x55);
        let key = derive_usage_key(&parent, KeyUsage::PinEncryption, [1, 2, 3, 4], 9).unwrap();

        let mut data = [0u8; 16];
        data[0] = 0x01; // version
        data[1] = 0x01; // block 1
        data[2..4].copy_from_slice(&0x1000u16.to_be_bytes());
        data[4..6].copy_from_slice(&0x0002u16.to_be_bytes());
        data[6..8].copy_from_slice(&128u16.to_be_bytes());
        data[8..12].copy_from_slice(&[1, 2, 3, 4]);
        data[12..16].copy_from_slice(&9u32.to_be_bytes());

        assert_eq!(key.as_bytes(), &ecb_encrypt(&parent, &data)[..]);
    }
}
