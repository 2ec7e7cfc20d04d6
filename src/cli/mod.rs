//! CLI module — Clap argument parser, output helpers, and command
//! implementations for the `dukpt` operational tool.
//!
//! The CLI drives the software keystore only; an HSM-backed deployment
//! talks to the engine through its library API.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::Parser;
use zeroize::{Zeroize, Zeroizing};

use crate::audit::AuditSink;
use crate::config::validate_environment_name;
use crate::engine::DerivationEngine;
use crate::errors::{DukptError, Result};
use crate::keystore::SoftwareKeyStore;

/// Minimum passphrase length to prevent trivially weak passphrases.
const MIN_PASSPHRASE_LEN: usize = 8;

/// DUKPT CLI: AES key-derivation engine over a software keystore.
#[derive(Parser)]
#[command(
    name = "dukpt",
    about = "AES DUKPT key-derivation engine (ANSI X9.24-3)",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// BDK environment to derive for (default: test)
    #[arg(short, long, default_value = "test", global = true)]
    pub env: String,

    /// Keystore directory (default: .dukpt)
    #[arg(long, default_value = ".dukpt", global = true)]
    pub keystore_dir: String,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Initialize a new software keystore and officer approval keys
    Init {
        /// Officer id to register for dual-control imports (repeat, at least 2)
        #[arg(long = "officer", required = true)]
        officers: Vec<String>,
    },

    /// Wrap a BDK into a protected key block (ceremony tooling)
    WrapBdk {
        /// Path to the KBPK file (base64, 32 bytes)
        #[arg(long)]
        kbpk_file: PathBuf,

        /// Path to raw BDK material (base64, 32 bytes); omit with --generate
        #[arg(long, conflicts_with = "generate")]
        key_file: Option<PathBuf>,

        /// Generate a fresh random BDK instead of reading one
        #[arg(long)]
        generate: bool,

        /// Output path for the key block
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Issue an officer approval for a key block
    Approve {
        /// Path to the key block to approve
        #[arg(long)]
        key_block: PathBuf,

        /// Officer id issuing the approval
        #[arg(long)]
        officer: String,

        /// Path to the officer's approval key file (base64, 32 bytes)
        #[arg(long)]
        key_file: PathBuf,

        /// Output path for the approval JSON
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a wrapped BDK under dual control
    ImportBdk {
        /// Path to the key block
        #[arg(long)]
        key_block: PathBuf,

        /// Approval JSON file (repeat — at least 2 distinct officers)
        #[arg(long = "approval", required = true)]
        approvals: Vec<PathBuf>,
    },

    /// Derive a usage key for a transaction KSN
    Derive {
        /// 24-hex-character KSN
        #[arg(long)]
        ksn: String,

        /// Usage type: pin-enc, data-req, data-resp, mac-req, mac-resp
        #[arg(long)]
        usage: String,
    },

    /// Decode and print the fields of a KSN
    DecodeKsn {
        /// 24-hex-character KSN
        #[arg(long)]
        ksn: String,
    },

    /// Show a terminal's counter state
    Status {
        /// 16-hex-character initial key id
        #[arg(long)]
        ikid: String,
    },

    /// Destroy a terminal's cached IK and reset its counter (re-key)
    Decommission {
        /// 16-hex-character initial key id
        #[arg(long)]
        ikid: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// View the audit log of derivation attempts
    #[cfg(feature = "audit-log")]
    Audit {
        /// Number of entries to show (default: 50)
        #[arg(long, default_value = "50")]
        last: usize,
        /// Show entries since a duration ago (e.g. 7d, 24h, 30m)
        #[arg(long)]
        since: Option<String>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell)
        shell: String,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Get the keystore passphrase, trying in order:
/// 1. `DUKPT_PASSPHRASE` env var (CI/automation)
/// 2. Interactive prompt
///
/// Returns `Zeroizing<String>` so the passphrase is wiped from memory on
/// drop.
pub fn prompt_passphrase() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var("DUKPT_PASSPHRASE") {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    let pw = dialoguer::Password::new()
        .with_prompt("Enter keystore passphrase")
        .interact()
        .map_err(|e| DukptError::CommandFailed(format!("passphrase prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Prompt for a new passphrase with confirmation (used during `init`).
///
/// Also respects `DUKPT_PASSPHRASE` for scripted usage.  Enforces a
/// minimum passphrase length.
pub fn prompt_new_passphrase() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var("DUKPT_PASSPHRASE") {
        if !pw.is_empty() {
            if pw.len() < MIN_PASSPHRASE_LEN {
                return Err(DukptError::CommandFailed(format!(
                    "passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
                )));
            }
            return Ok(Zeroizing::new(pw));
        }
    }

    loop {
        let passphrase = dialoguer::Password::new()
            .with_prompt("Choose keystore passphrase")
            .with_confirmation(
                "Confirm keystore passphrase",
                "Passphrases do not match, try again",
            )
            .interact()
            .map_err(|e| DukptError::CommandFailed(format!("passphrase prompt: {e}")))?;

        if passphrase.len() < MIN_PASSPHRASE_LEN {
            output::warning(&format!(
                "Passphrase must be at least {MIN_PASSPHRASE_LEN} characters. Try again."
            ));
            continue;
        }

        return Ok(Zeroizing::new(passphrase));
    }
}

/// Resolve the keystore directory from the CLI arguments.
pub fn keystore_dir(cli: &Cli) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(&cli.keystore_dir))
}

/// Resolve the keystore file path from the CLI arguments.
pub fn keystore_path(cli: &Cli) -> Result<PathBuf> {
    Ok(keystore_dir(cli)?.join("keystore.dukpt"))
}

/// Open the keystore file, prompting for the passphrase.
pub fn open_store(cli: &Cli) -> Result<SoftwareKeyStore> {
    let path = keystore_path(cli)?;
    let passphrase = prompt_passphrase()?;
    SoftwareKeyStore::open_file(&path, passphrase.as_bytes())
}

/// Build a derivation engine over the opened keystore and the configured
/// audit sink, restoring persisted counter state.
pub fn build_engine(cli: &Cli, store: Arc<SoftwareKeyStore>) -> Result<DerivationEngine> {
    let sink = audit_sink(&keystore_dir(cli)?)?;
    validate_environment_name(&cli.env)?;
    let engine = DerivationEngine::new(store, sink, &cli.env);
    load_counters(cli, &engine)?;
    Ok(engine)
}

/// Restore terminal counter high-water marks from `counters.json`.
///
/// The engine serves a long-running process; for one-shot CLI use the
/// replay window must survive across invocations, so the counter table
/// is snapshotted next to the keystore file.  Counter values are public
/// (they ride on every KSN) — only integrity matters, which the 0o600
/// keystore directory provides for an operational tool.
pub fn load_counters(cli: &Cli, engine: &DerivationEngine) -> Result<()> {
    let path = keystore_dir(cli)?.join("counters.json");
    if !path.exists() {
        return Ok(());
    }

    let contents = std::fs::read_to_string(&path)?;
    let snapshot: std::collections::BTreeMap<String, u32> = serde_json::from_str(&contents)
        .map_err(|e| DukptError::SerializationError(format!("counters.json: {e}")))?;

    for (hex, counter) in snapshot {
        let ikid = crate::ksn::Ikid::from_hex(&hex)?;
        engine.restore_counter(&ikid, counter);
    }
    Ok(())
}

/// Persist the engine's counter table to `counters.json`.
pub fn save_counters(cli: &Cli, engine: &DerivationEngine) -> Result<()> {
    let snapshot: std::collections::BTreeMap<String, u32> = engine
        .counter_snapshot()
        .into_iter()
        .map(|(ikid, counter)| (ikid.to_hex(), counter))
        .collect();

    let path = keystore_dir(cli)?.join("counters.json");
    let contents = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| DukptError::SerializationError(format!("counters.json: {e}")))?;
    std::fs::write(&path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(&path, perms);
    }

    Ok(())
}

#[cfg(feature = "audit-log")]
fn audit_sink(dir: &Path) -> Result<Arc<dyn AuditSink>> {
    Ok(Arc::new(crate::audit::SqliteAuditLog::open(dir)?))
}

#[cfg(not(feature = "audit-log"))]
fn audit_sink(_dir: &Path) -> Result<Arc<dyn AuditSink>> {
    Ok(Arc::new(crate::audit::MemoryAuditLog::new()))
}

/// Read a base64-encoded 32-byte key file.
pub fn load_key_file(path: &Path) -> Result<Zeroizing<[u8; 32]>> {
    let contents = std::fs::read_to_string(path)?;
    let mut decoded = BASE64
        .decode(contents.trim())
        .map_err(|e| DukptError::CommandFailed(format!("{}: invalid base64: {e}", path.display())))?;

    if decoded.len() != 32 {
        decoded.zeroize();
        return Err(DukptError::CommandFailed(format!(
            "{}: expected 32 key bytes, got {}",
            path.display(),
            decoded.len()
        )));
    }

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&decoded);
    decoded.zeroize();
    Ok(key)
}

/// Write a key file as base64, permissions 0o600.
pub fn write_key_file(path: &Path, key: &Zeroizing<[u8; 32]>) -> Result<()> {
    std::fs::write(path, BASE64.encode(key.as_ref()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }

    Ok(())
}

/// Generate a random 32-byte key.
pub fn generate_key() -> Zeroizing<[u8; 32]> {
    use rand::RngCore;
    let mut key = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(key.as_mut());
    key
}
