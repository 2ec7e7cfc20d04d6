//! Derivation-data code points and block construction.
//!
//! Every derivation step in the hierarchy encrypts one or two 16-byte
//! derivation-data blocks under the parent key:
//!
//! ```text
//! byte 0      version           0x01
//! byte 1      key block counter 1 (and 2 when 32 output bytes are needed)
//! bytes 2–3   key usage         big-endian, table below
//! bytes 4–5   algorithm         big-endian, table below
//! bytes 6–7   derived length    in bits, big-endian
//! bytes 8–15  context           IKID, or UniqueID ‖ transaction counter
//! ```
//!
//! The code points are kept here as pure data so the derivation function
//! stays uniform and each variant can be validated against the published
//! ANSI X9.24-3 tables independently.

use crate::errors::{DukptError, Result};

/// Derivation-data version byte.
const DERIVATION_DATA_VERSION: u8 = 0x01;

/// Key-usage indicators (X9.24-3 key usage table).
const USAGE_PIN_ENCRYPTION: u16 = 0x1000;
const USAGE_MAC_GENERATION: u16 = 0x2000;
const USAGE_MAC_VERIFICATION: u16 = 0x2001;
const USAGE_DATA_ENCRYPT: u16 = 0x3000;
const USAGE_DATA_DECRYPT: u16 = 0x3001;
const USAGE_KEY_DERIVATION: u16 = 0x8000;
const USAGE_KEY_DERIVATION_INITIAL_KEY: u16 = 0x8001;

/// AES algorithm indicators (X9.24-3 key type table).
const ALGORITHM_AES128: u16 = 0x0002;
const ALGORITHM_AES256: u16 = 0x0004;

/// AES variant a derived key is intended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Aes128,
    Aes256,
}

impl KeyAlgorithm {
    /// Wire indicator for derivation-data bytes 4–5.
    pub fn indicator(self) -> u16 {
        match self {
            Self::Aes128 => ALGORITHM_AES128,
            Self::Aes256 => ALGORITHM_AES256,
        }
    }

    /// Derived key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }
}

/// Client-facing usage-key types.
///
/// Each maps to a distinct (usage indicator, algorithm) pair, so keys for
/// different purposes are cryptographically separated even at the same
/// transaction counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsage {
    /// PIN-block encryption.
    PinEncryption,
    /// Request-direction data encryption.
    DataRequest,
    /// Response-direction data decryption.
    DataResponse,
    /// Request MAC generation.
    MacRequest,
    /// Response MAC verification.
    MacResponse,
}

impl KeyUsage {
    /// All client usages, in table order.
    pub const ALL: [KeyUsage; 5] = [
        Self::PinEncryption,
        Self::DataRequest,
        Self::DataResponse,
        Self::MacRequest,
        Self::MacResponse,
    ];

    /// Parse the wire/CLI spelling.  Anything else is the
    /// `UnsupportedUsageType` failure required of the derivation API.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pin-enc" => Ok(Self::PinEncryption),
            "data-req" => Ok(Self::DataRequest),
            "data-resp" => Ok(Self::DataResponse),
            "mac-req" => Ok(Self::MacRequest),
            "mac-resp" => Ok(Self::MacResponse),
            other => Err(DukptError::UnsupportedUsageType(other.to_string())),
        }
    }

    /// Canonical wire/CLI spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PinEncryption => "pin-enc",
            Self::DataRequest => "data-req",
            Self::DataResponse => "data-resp",
            Self::MacRequest => "mac-req",
            Self::MacResponse => "mac-resp",
        }
    }
}

impl std::fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every derivation step the hierarchy performs, including the internal
/// ones that never surface a key to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationPurpose {
    /// BDK → IK.
    InitialKey,
    /// IK → per-transaction working key.
    WorkingKey,
    /// WK → client usage key.
    Usage(KeyUsage),
}

impl DerivationPurpose {
    /// (usage indicator, algorithm) for this step.
    ///
    /// PIN keys are derived as AES-128 (PIN-block format 4 profile); all
    /// other steps carry the full AES-256 strength of the hierarchy.
    pub fn params(self) -> (u16, KeyAlgorithm) {
        match self {
            Self::InitialKey => (USAGE_KEY_DERIVATION_INITIAL_KEY, KeyAlgorithm::Aes256),
            Self::WorkingKey => (USAGE_KEY_DERIVATION, KeyAlgorithm::Aes256),
            Self::Usage(KeyUsage::PinEncryption) => (USAGE_PIN_ENCRYPTION, KeyAlgorithm::Aes128),
            Self::Usage(KeyUsage::MacRequest) => (USAGE_MAC_GENERATION, KeyAlgorithm::Aes256),
            Self::Usage(KeyUsage::MacResponse) => (USAGE_MAC_VERIFICATION, KeyAlgorithm::Aes256),
            Self::Usage(KeyUsage::DataRequest) => (USAGE_DATA_ENCRYPT, KeyAlgorithm::Aes256),
            Self::Usage(KeyUsage::DataResponse) => (USAGE_DATA_DECRYPT, KeyAlgorithm::Aes256),
        }
    }
}

/// Build the `block_index`-th derivation-data block (1-based) for a step.
///
/// `context` is the step's 8-byte context: the IKID for initial-key
/// derivation, `UniqueID ‖ counter` for everything below it.
pub fn derivation_data(purpose: DerivationPurpose, block_index: u8, context: &[u8; 8]) -> [u8; 16] {
    let (usage, algorithm) = purpose.params();
    let key_bits = (algorithm.key_len() * 8) as u16;

    let mut block = [0u8; 16];
    block[0] = DERIVATION_DATA_VERSION;
    block[1] = block_index;
    block[2..4].copy_from_slice(&usage.to_be_bytes());
    block[4..6].copy_from_slice(&algorithm.indicator().to_be_bytes());
    block[6..8].copy_from_slice(&key_bits.to_be_bytes());
    block[8..16].copy_from_slice(context);
    block
}

/// Pack `UniqueID ‖ counter` into the 8 context bytes used by working-key
/// and usage-key derivation.
pub fn counter_context(unique_id: [u8; 4], counter: u32) -> [u8; 8] {
    let mut context = [0u8; 8];
    context[0..4].copy_from_slice(&unique_id);
    context[4..8].copy_from_slice(&counter.to_be_bytes());
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_layout_matches_table() {
        let context = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7];
        let block = derivation_data(DerivationPurpose::InitialKey, 1, &context);

        assert_eq!(block[0], 0x01, "version");
        assert_eq!(block[1], 0x01, "block counter");
        assert_eq!(&block[2..4], &[0x80, 0x01], "initial-key usage");
        assert_eq!(&block[4..6], &[0x00, 0x04], "AES-256 indicator");
        assert_eq!(&block[6..8], &[0x01, 0x00], "256 bits");
        assert_eq!(&block[8..16], &context);
    }

    #[test]
    fn second_block_differs_only_in_counter_byte() {
        let context = [0u8; 8];
        let first = derivation_data(DerivationPurpose::WorkingKey, 1, &context);
        let second = derivation_data(DerivationPurpose::WorkingKey, 2, &context);
        assert_eq!(first[1], 1);
        assert_eq!(second[1], 2);
        assert_eq!(first[0], second[0]);
        assert_eq!(&first[2..], &second[2..]);
    }

    #[test]
    fn pin_keys_are_aes128() {
        let (usage, algorithm) = DerivationPurpose::Usage(KeyUsage::PinEncryption).params();
        assert_eq!(usage, 0x1000);
        assert_eq!(algorithm, KeyAlgorithm::Aes128);
        assert_eq!(algorithm.key_len(), 16);

        let block = derivation_data(
            DerivationPurpose::Usage(KeyUsage::PinEncryption),
            1,
            &[0u8; 8],
        );
        assert_eq!(&block[4..6], &[0x00, 0x02]);
        assert_eq!(&block[6..8], &[0x00, 0x80], "128 bits");
    }

    #[test]
    fn usage_indicators_are_pairwise_distinct() {
        let mut seen = std::collections::HashSet::new();
        for usage in KeyUsage::ALL {
            let (indicator, _) = DerivationPurpose::Usage(usage).params();
            assert!(seen.insert(indicator), "{usage} shares an indicator");
        }
    }

    #[test]
    fn counter_context_layout() {
        let context = counter_context([1, 2, 3, 4], 0x001F_FFFF);
        assert_eq!(context, [1, 2, 3, 4, 0x00, 0x1F, 0xFF, 0xFF]);
    }

    #[test]
    fn usage_parse_roundtrip() {
        for usage in KeyUsage::ALL {
            assert_eq!(KeyUsage::parse(usage.as_str()).unwrap(), usage);
        }
        assert!(matches!(
            KeyUsage::parse("key-encryption"),
            Err(DukptError::UnsupportedUsageType(_))
        ));
        assert!(matches!(
            KeyUsage::parse(""),
            Err(DukptError::UnsupportedUsageType(_))
        ));
    }
}
