//! Key-hierarchy engine: derivation-data tables and the BDK → IK → WK →
//! usage-key ladder.

pub mod constants;
pub mod hierarchy;

pub use constants::{counter_context, derivation_data, DerivationPurpose, KeyAlgorithm, KeyUsage};
pub use hierarchy::{
    derive_initial_key, derive_usage_key, derive_working_key, ecb_encrypt, UsageKey,
};
