//! Secure key store — the trust boundary holding BDKs and Initial Keys.
//!
//! The engine never owns root or intermediate key material.  It resolves
//! opaque [`KeyHandle`]s and asks the store to run single AES-ECB block
//! encryptions under them; the raw bytes of a BDK or IK never cross the
//! trait.  Production deployments back the trait with an HSM or enclave;
//! [`SoftwareKeyStore`] is the in-process implementation for development,
//! testing, and single-node use.

pub mod format;
pub mod keyblock;
pub mod software;

pub use keyblock::{Authorization, WrappedKeyBlock};
pub use software::SoftwareKeyStore;

use zeroize::Zeroizing;

use crate::errors::Result;
use crate::ksn::Ikid;

/// Class of key a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// Base Derivation Key — one active per environment.
    Bdk,
    /// Per-terminal Initial Key, cached after first derivation.
    InitialKey,
}

impl std::fmt::Display for KeyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bdk => f.write_str("BDK"),
            Self::InitialKey => f.write_str("IK"),
        }
    }
}

/// Opaque reference to a key held inside a [`SecureKeyStore`].
///
/// A handle carries no key material and is only meaningful to the store
/// that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    id: u64,
    class: KeyClass,
}

impl KeyHandle {
    /// Issue a new handle.  Called by store implementations only.
    pub fn new(id: u64, class: KeyClass) -> Self {
        Self { id, class }
    }

    /// Store-local identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// What kind of key this handle refers to.
    pub fn class(&self) -> KeyClass {
        self.class
    }
}

/// The secure-key-store capability consumed by the derivation engine.
///
/// Implementations own all root and intermediate key material.  Every
/// method is a potential boundary suspension point: an implementation
/// talking to external hardware must bound the call with a deadline and
/// surface expiry as `HsmUnavailable`.  No method ever returns raw BDK or
/// IK bytes.
pub trait SecureKeyStore: Send + Sync {
    /// Resolve the active BDK for an environment.
    ///
    /// Fails with `KeyNotFound` when the environment has no active BDK.
    fn active_bdk(&self, environment: &str) -> Result<KeyHandle>;

    /// Look up a cached Initial Key for a terminal.
    fn find_ik(&self, ikid: &Ikid) -> Result<Option<KeyHandle>>;

    /// Cache a freshly derived Initial Key inside the boundary.
    ///
    /// The store takes ownership of the bytes; the caller's copy is
    /// scrubbed on drop.  Returns the handle for immediate use.
    fn store_ik(&self, ikid: &Ikid, key: Zeroizing<[u8; 32]>) -> Result<KeyHandle>;

    /// AES-ECB-encrypt a single derivation-data block under the
    /// referenced key, inside the boundary.
    fn encrypt_block(&self, handle: &KeyHandle, block: &[u8; 16]) -> Result<[u8; 16]>;

    /// Destroy a terminal's cached Initial Key (decommission / re-key).
    fn decommission(&self, ikid: &Ikid) -> Result<()>;

    /// Import a wrapped BDK under dual control.
    ///
    /// Requires valid approvals from at least two distinct registered
    /// officers; a single-authorization call is refused with
    /// `SecurityViolation`.  Refuses to replace an environment's active
    /// BDK — deactivation is a separate operational procedure.
    fn import_bdk(
        &self,
        environment: &str,
        block: &WrappedKeyBlock,
        approvals: &[Authorization],
    ) -> Result<()>;
}
