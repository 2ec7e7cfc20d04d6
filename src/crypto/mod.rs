//! Ambient sealing crypto for the software keystore.
//!
//! This module protects key material *at rest* in the keystore file and
//! in wrapped key blocks.  It is deliberately separate from the DUKPT
//! hierarchy in [`crate::derive`]: nothing here participates in
//! transaction-key derivation.
//!
//! - Argon2id passphrase KDF (`kdf`)
//! - HKDF-SHA256 labeled subkeys (`subkeys`)
//! - AES-256-GCM sealing with label binding (`seal`)

pub mod kdf;
pub mod seal;
pub mod subkeys;

pub use kdf::{derive_unlock_key, generate_salt, Argon2Params};
pub use seal::{open, seal};
pub use subkeys::{derive_file_hmac_key, derive_subkey, UnlockKey};
