//! `dukpt import-bdk` — activate a BDK under dual control.

use std::fs;
use std::path::Path;

use crate::cli::{open_store, output, Cli};
use crate::errors::{DeriveStatus, DukptError, Result};
use crate::keystore::{Authorization, SecureKeyStore, WrappedKeyBlock};

/// Execute the `import-bdk` command.
pub fn execute(cli: &Cli, key_block_path: &Path, approval_paths: &[std::path::PathBuf]) -> Result<()> {
    let block = WrappedKeyBlock::from_bytes(fs::read(key_block_path)?)?;

    let mut approvals = Vec::with_capacity(approval_paths.len());
    for path in approval_paths {
        let contents = fs::read_to_string(path)?;
        let approval: Authorization = serde_json::from_str(&contents).map_err(|e| {
            DukptError::SerializationError(format!("{}: {e}", path.display()))
        })?;
        approvals.push(approval);
    }

    let store = open_store(cli)?;
    let result = store.import_bdk(&cli.env, &block, &approvals);

    // Key-lifecycle operations go into the same audit trail as
    // derivations.
    let outcome = match &result {
        Ok(()) => DeriveStatus::Ok,
        Err(e) => e.status(),
    };
    record_import(cli, outcome)?;
    result?;

    output::success(&format!("BDK activated for environment '{}'", cli.env));
    output::field("KCV", &hex(&block.header().kcv));

    Ok(())
}

#[cfg(feature = "audit-log")]
fn record_import(cli: &Cli, outcome: DeriveStatus) -> Result<()> {
    use crate::audit::{AuditEntry, AuditSink, SqliteAuditLog};
    use crate::cli::keystore_dir;

    let log = SqliteAuditLog::open(&keystore_dir(cli)?)?;
    log.record(&AuditEntry::new("import-bdk", None, None, outcome))
}

#[cfg(not(feature = "audit-log"))]
fn record_import(_cli: &Cli, _outcome: DeriveStatus) -> Result<()> {
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
