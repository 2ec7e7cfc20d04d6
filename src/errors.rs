use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in the DUKPT engine.
///
/// The first group maps 1:1 onto the client-facing status codes
/// (see [`crate::engine::DeriveStatus`]). `HsmUnavailable` and
/// `AuditUnavailable` are transient and may be retried by the caller;
/// `CounterOverflow` and `ReplayDetected` must not be — they indicate a
/// rotation requirement or a protocol violation, not transience.
#[derive(Debug, Error)]
pub enum DukptError {
    // --- Derivation errors ---
    #[error("Malformed KSN: {0}")]
    MalformedKsn(String),

    #[error("Transaction counter {counter:#x} exceeds the 21-bit maximum {max:#x} — IK rotation required")]
    CounterOverflow { counter: u32, max: u32 },

    #[error("Replay detected: counter {counter} was already accepted for this terminal")]
    ReplayDetected { counter: u32 },

    #[error("Working-key derivation requires a validated transaction counter")]
    InvalidCounter,

    #[error("No active BDK for environment '{0}'")]
    KeyNotFound(String),

    #[error("Unsupported usage type '{0}'")]
    UnsupportedUsageType(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Secure key store unavailable: {0}")]
    HsmUnavailable(String),

    #[error("Audit sink unavailable: {0}")]
    AuditUnavailable(String),

    // --- Keystore errors ---
    #[error("Keystore not found at {0}")]
    KeystoreNotFound(PathBuf),

    #[error("Keystore already exists at {0}")]
    KeystoreAlreadyExists(PathBuf),

    #[error("Invalid keystore format: {0}")]
    InvalidKeystoreFormat(String),

    #[error("Invalid key block: {0}")]
    InvalidKeyBlock(String),

    #[error("HMAC verification failed — file may be tampered")]
    HmacMismatch,

    #[error("HMAC error: {0}")]
    HmacError(String),

    // --- Crypto errors ---
    #[error("Sealing failed: {0}")]
    SealFailed(String),

    #[error("Unsealing failed — wrong passphrase or corrupted data")]
    OpenFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("User cancelled operation")]
    UserCancelled,
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, DukptError>;

/// Client-facing status code for a derivation attempt.
///
/// Returned alongside every response and recorded verbatim in the audit
/// trail, so the caller, the wire, and the audit log always agree on the
/// outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeriveStatus {
    Ok,
    MalformedKsn,
    CounterOverflow,
    ReplayDetected,
    InvalidCounter,
    KeyNotFound,
    UnsupportedUsageType,
    SecurityViolation,
    HsmUnavailable,
    AuditUnavailable,
}

impl DeriveStatus {
    /// Canonical wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::MalformedKsn => "MALFORMED_KSN",
            Self::CounterOverflow => "COUNTER_OVERFLOW",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::InvalidCounter => "INVALID_COUNTER",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::UnsupportedUsageType => "UNSUPPORTED_USAGE_TYPE",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::HsmUnavailable => "HSM_UNAVAILABLE",
            Self::AuditUnavailable => "AUDIT_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for DeriveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DukptError {
    /// Map an error onto the status code a derivation client sees.
    ///
    /// Ambient failures (keystore format, sealing, IO, …) can only reach
    /// a derivation request through the store boundary, so they surface
    /// as `HSM_UNAVAILABLE`.
    pub fn status(&self) -> DeriveStatus {
        match self {
            Self::MalformedKsn(_) => DeriveStatus::MalformedKsn,
            Self::CounterOverflow { .. } => DeriveStatus::CounterOverflow,
            Self::ReplayDetected { .. } => DeriveStatus::ReplayDetected,
            Self::InvalidCounter => DeriveStatus::InvalidCounter,
            Self::KeyNotFound(_) => DeriveStatus::KeyNotFound,
            Self::UnsupportedUsageType(_) => DeriveStatus::UnsupportedUsageType,
            Self::SecurityViolation(_) => DeriveStatus::SecurityViolation,
            Self::HsmUnavailable(_) => DeriveStatus::HsmUnavailable,
            Self::AuditUnavailable(_) => DeriveStatus::AuditUnavailable,
            _ => DeriveStatus::HsmUnavailable,
        }
    }
}
