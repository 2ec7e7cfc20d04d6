//! `dukpt approve` — issue an officer approval for a key block.

use std::fs;
use std::path::Path;

use crate::cli::{load_key_file, output, Cli};
use crate::errors::{DukptError, Result};
use crate::keystore::{Authorization, WrappedKeyBlock};

/// Execute the `approve` command.
pub fn execute(
    _cli: &Cli,
    key_block_path: &Path,
    officer: &str,
    key_file: &Path,
    output_path: &Path,
) -> Result<()> {
    let block = WrappedKeyBlock::from_bytes(fs::read(key_block_path)?)?;
    let approval_key = load_key_file(key_file)?;

    let approval = Authorization::issue(officer, &approval_key, &block)?;

    let json = serde_json::to_string_pretty(&approval)
        .map_err(|e| DukptError::SerializationError(format!("approval: {e}")))?;
    fs::write(output_path, json)?;

    output::success(&format!(
        "Approval from '{officer}' written to {}",
        output_path.display()
    ));

    Ok(())
}
