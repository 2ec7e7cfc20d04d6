//! `dukpt wrap-bdk` — build a protected key block around a BDK.
//!
//! Ceremony tooling: runs on the provisioning side, not against the
//! keystore.  With `--generate` the BDK never exists outside the key
//! block; only its check value is printed.

use std::fs;
use std::path::Path;

use crate::cli::{generate_key, load_key_file, output, Cli};
use crate::config::validate_environment_name;
use crate::errors::{DukptError, Result};
use crate::keystore::WrappedKeyBlock;

/// Execute the `wrap-bdk` command.
pub fn execute(
    cli: &Cli,
    kbpk_file: &Path,
    key_file: Option<&Path>,
    generate: bool,
    output_path: &Path,
) -> Result<()> {
    validate_environment_name(&cli.env)?;

    let kbpk = load_key_file(kbpk_file)?;

    let bdk = match (key_file, generate) {
        (Some(path), _) => load_key_file(path)?,
        (None, true) => generate_key(),
        (None, false) => {
            return Err(DukptError::CommandFailed(
                "pass --key-file <path> or --generate".into(),
            ));
        }
    };

    let block = WrappedKeyBlock::wrap(&kbpk, &cli.env, &bdk)?;
    fs::write(output_path, block.as_bytes())?;

    output::success(&format!(
        "Key block for '{}' written to {}",
        cli.env,
        output_path.display()
    ));
    output::field("KCV", &hex(&block.header().kcv));
    output::tip("Collect two officer approvals with `dukpt approve`.");

    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
