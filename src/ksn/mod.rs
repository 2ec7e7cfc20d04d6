//! Key Serial Number codec.
//!
//! A KSN is a fixed 12-byte structure transmitted alongside every
//! transaction:
//!
//! ```text
//! [derivation ID: 5 bytes][IKID tail: 3 bytes][counter field: 4 bytes BE]
//! ```
//!
//! - **Derivation ID**: identifies the key set / derivation namespace.
//! - **IKID tail**: the low 3 bytes of the terminal's 8-byte Initial Key
//!   ID.  The full IKID is the derivation ID concatenated with this tail,
//!   so it is always recoverable from the KSN alone.
//! - **Counter field**: big-endian; the top 3 bits are reserved and must
//!   be zero.  The 21-bit transaction-counter bound (`0x1F_FFFF`) is a
//!   policy concern enforced by the counter manager, not by this codec.
//!
//! The codec is pure: no side effects, and `encode(decode(x)) == x` for
//! every well-formed 12-byte `x`.

use crate::errors::{DukptError, Result};

/// Wire size of a KSN in bytes.
pub const KSN_LEN: usize = 12;

/// Size of the derivation-ID field in bytes.
pub const DERIVATION_ID_LEN: usize = 5;

/// Size of the IKID-tail field in bytes.
pub const IKID_TAIL_LEN: usize = 3;

/// Mask of the reserved top 3 bits of the counter field.
const RESERVED_MASK: u32 = 0xE000_0000;

/// An 8-byte Initial Key ID, assigned at terminal provisioning and
/// immutable thereafter.  Unique per terminal within a derivation-ID
/// namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ikid(pub [u8; 8]);

impl Ikid {
    /// Parse an IKID from a 16-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        if !stripped.is_ascii() {
            return Err(DukptError::MalformedKsn("IKID is not valid hex".into()));
        }
        if stripped.len() != 16 {
            return Err(DukptError::MalformedKsn(format!(
                "IKID must be 16 hex characters, got {}",
                stripped.len()
            )));
        }
        let mut bytes = [0u8; 8];
        for (i, chunk) in bytes.iter_mut().enumerate() {
            let pair = &stripped[i * 2..i * 2 + 2];
            *chunk = u8::from_str_radix(pair, 16)
                .map_err(|_| DukptError::MalformedKsn(format!("invalid hex in IKID: '{pair}'")))?;
        }
        Ok(Self(bytes))
    }

    /// The rightmost 4 bytes, used as the `UniqueID` context in
    /// working-key derivation data.
    pub fn unique_id(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.0[4..8]);
        out
    }

    /// Render as lowercase hex for display and audit records.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// A decoded Key Serial Number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ksn {
    /// Derivation-ID namespace (bytes 0–4).
    pub derivation_id: [u8; DERIVATION_ID_LEN],
    /// Low 3 bytes of the terminal's IKID (bytes 5–7).
    pub ikid_tail: [u8; IKID_TAIL_LEN],
    /// Transaction counter (bytes 8–11, big-endian, reserved bits clear).
    pub counter: u32,
}

impl Ksn {
    /// Decode a 12-byte KSN.
    ///
    /// Fails with `MalformedKsn` if the input is not exactly 12 bytes or
    /// any of the 3 reserved counter-field bits is set.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KSN_LEN {
            return Err(DukptError::MalformedKsn(format!(
                "expected {KSN_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let mut derivation_id = [0u8; DERIVATION_ID_LEN];
        derivation_id.copy_from_slice(&bytes[0..DERIVATION_ID_LEN]);

        let mut ikid_tail = [0u8; IKID_TAIL_LEN];
        ikid_tail.copy_from_slice(&bytes[DERIVATION_ID_LEN..DERIVATION_ID_LEN + IKID_TAIL_LEN]);

        let counter_field = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if counter_field & RESERVED_MASK != 0 {
            return Err(DukptError::MalformedKsn(
                "reserved counter-field bits are set".into(),
            ));
        }

        Ok(Self {
            derivation_id,
            ikid_tail,
            counter: counter_field,
        })
    }

    /// Encode back to the 12-byte wire form.  Exact inverse of [`decode`].
    ///
    /// Fails with `MalformedKsn` if the in-memory counter collides with
    /// the reserved bits (no such value can ever appear on the wire).
    ///
    /// [`decode`]: Ksn::decode
    pub fn encode(&self) -> Result<[u8; KSN_LEN]> {
        if self.counter & RESERVED_MASK != 0 {
            return Err(DukptError::MalformedKsn(format!(
                "counter {:#x} overlaps reserved bits",
                self.counter
            )));
        }

        let mut out = [0u8; KSN_LEN];
        out[0..DERIVATION_ID_LEN].copy_from_slice(&self.derivation_id);
        out[DERIVATION_ID_LEN..DERIVATION_ID_LEN + IKID_TAIL_LEN].copy_from_slice(&self.ikid_tail);
        out[8..12].copy_from_slice(&self.counter.to_be_bytes());
        Ok(out)
    }

    /// The full 8-byte Initial Key ID: derivation ID ‖ IKID tail.
    pub fn ikid(&self) -> Ikid {
        let mut bytes = [0u8; 8];
        bytes[0..DERIVATION_ID_LEN].copy_from_slice(&self.derivation_id);
        bytes[DERIVATION_ID_LEN..8].copy_from_slice(&self.ikid_tail);
        Ikid(bytes)
    }

    /// The `UniqueID` context bytes for working-key derivation.
    pub fn unique_id(&self) -> [u8; 4] {
        self.ikid().unique_id()
    }

    /// Render the wire form as lowercase hex (for audit records).
    ///
    /// Falls back to a marker string for a counter outside the encodable
    /// range, so audit logging never fails on a bad KSN.
    pub fn to_hex(&self) -> String {
        match self.encode() {
            Ok(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
            Err(_) => "<unencodable>".into(),
        }
    }
}

/// Parse a 24-character hex string into raw KSN bytes.
pub fn ksn_from_hex(s: &str) -> Result<Vec<u8>> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    if !stripped.is_ascii() {
        return Err(DukptError::MalformedKsn("KSN is not valid hex".into()));
    }
    if stripped.len() % 2 != 0 {
        return Err(DukptError::MalformedKsn(
            "hex KSN must have an even number of digits".into(),
        ));
    }
    let mut bytes = Vec::with_capacity(stripped.len() / 2);
    for i in (0..stripped.len()).step_by(2) {
        let pair = &stripped[i..i + 2];
        bytes.push(
            u8::from_str_radix(pair, 16)
                .map_err(|_| DukptError::MalformedKsn(format!("invalid hex: '{pair}'")))?,
        );
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_bytes(counter: u32) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[0..5].copy_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        bytes[5..8].copy_from_slice(&[0x06, 0x07, 0x08]);
        bytes[8..12].copy_from_slice(&counter.to_be_bytes());
        bytes
    }

    #[test]
    fn decode_splits_fields() {
        let ksn = Ksn::decode(&sample_bytes(0x0001_0203)).unwrap();
        assert_eq!(ksn.derivation_id, [0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(ksn.ikid_tail, [0x06, 0x07, 0x08]);
        assert_eq!(ksn.counter, 0x0001_0203);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(matches!(
            Ksn::decode(&[0u8; 11]),
            Err(DukptError::MalformedKsn(_))
        ));
        assert!(matches!(
            Ksn::decode(&[0u8; 13]),
            Err(DukptError::MalformedKsn(_))
        ));
        assert!(matches!(Ksn::decode(&[]), Err(DukptError::MalformedKsn(_))));
    }

    #[test]
    fn decode_rejects_each_reserved_bit() {
        for bit in [0x8000_0000u32, 0x4000_0000, 0x2000_0000] {
            let result = Ksn::decode(&sample_bytes(bit | 1));
            assert!(
                matches!(result, Err(DukptError::MalformedKsn(_))),
                "reserved bit {bit:#x} must be rejected"
            );
        }
    }

    #[test]
    fn decode_allows_counter_above_policy_bound() {
        // Values above 0x1F_FFFF but below the reserved bits are
        // structurally valid; the counter manager rejects them.
        let ksn = Ksn::decode(&sample_bytes(0x0020_0000)).unwrap();
        assert_eq!(ksn.counter, 0x0020_0000);
    }

    #[test]
    fn encode_is_exact_inverse() {
        let bytes = sample_bytes(0x001F_FFFF);
        let ksn = Ksn::decode(&bytes).unwrap();
        assert_eq!(ksn.encode().unwrap(), bytes);
    }

    #[test]
    fn encode_rejects_reserved_counter() {
        let ksn = Ksn {
            derivation_id: [0; 5],
            ikid_tail: [0; 3],
            counter: 0xF000_0000,
        };
        assert!(matches!(
            ksn.encode(),
            Err(DukptError::MalformedKsn(_))
        ));
    }

    #[test]
    fn ikid_is_first_eight_bytes() {
        let ksn = Ksn::decode(&sample_bytes(7)).unwrap();
        assert_eq!(
            ksn.ikid(),
            Ikid([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08])
        );
        assert_eq!(ksn.unique_id(), [0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn ikid_hex_roundtrip() {
        let ikid = Ikid::from_hex("0102030405060708").unwrap();
        assert_eq!(ikid, Ikid([1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(ikid.to_hex(), "0102030405060708");
        assert!(Ikid::from_hex("01020304").is_err());
        assert!(Ikid::from_hex("01020304050607zz").is_err());
    }

    #[test]
    fn ksn_from_hex_parses() {
        let bytes = ksn_from_hex("0102030405060708001fffff").unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[11], 0xff);
        assert!(ksn_from_hex("0102xz").is_err());
        assert!(ksn_from_hex("012").is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_all_well_formed(
            derivation_id in proptest::array::uniform5(any::<u8>()),
            ikid_tail in proptest::array::uniform3(any::<u8>()),
            counter in 0u32..=0x1FFF_FFFF,
        ) {
            let ksn = Ksn { derivation_id, ikid_tail, counter };
            let bytes = ksn.encode().unwrap();
            prop_assert_eq!(Ksn::decode(&bytes).unwrap(), ksn);
        }

        #[test]
        fn decode_fails_on_any_reserved_bit(
            derivation_id in proptest::array::uniform5(any::<u8>()),
            ikid_tail in proptest::array::uniform3(any::<u8>()),
            counter_field in 0x2000_0000u32..,
        ) {
            let mut bytes = [0u8; 12];
            bytes[0..5].copy_from_slice(&derivation_id);
            bytes[5..8].copy_from_slice(&ikid_tail);
            bytes[8..12].copy_from_slice(&counter_field.to_be_bytes());
            prop_assert!(Ksn::decode(&bytes).is_err());
        }
    }
}
