//! `dukpt decommission` — destroy a terminal's IK and reset its counter.

use std::sync::Arc;

use dialoguer::Confirm;

use crate::cli::{build_engine, open_store, output, save_counters, Cli};
use crate::errors::{DukptError, Result};
use crate::ksn::Ikid;

/// Execute the `decommission` command.
pub fn execute(cli: &Cli, ikid_hex: &str, force: bool) -> Result<()> {
    let ikid = Ikid::from_hex(ikid_hex)?;

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Destroy the cached IK for terminal {} and reset its counter?",
                ikid.to_hex()
            ))
            .default(false)
            .interact()
            .map_err(|e| DukptError::CommandFailed(format!("confirmation: {e}")))?;

        if !confirmed {
            return Err(DukptError::UserCancelled);
        }
    }

    let store = Arc::new(open_store(cli)?);
    let engine = build_engine(cli, store)?;

    engine.decommission_terminal(&ikid)?;
    save_counters(cli, &engine)?;

    output::success(&format!("Terminal {} decommissioned", ikid.to_hex()));
    output::tip("The terminal re-provisions on its next derivation request.");

    Ok(())
}
