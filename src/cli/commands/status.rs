//! `dukpt status` — show a terminal's counter state.

use std::sync::Arc;

use crate::cli::{build_engine, open_store, output, Cli};
use crate::counter::TerminalStatus;
use crate::errors::Result;
use crate::keystore::SecureKeyStore;
use crate::ksn::Ikid;

/// Execute the `status` command.
pub fn execute(cli: &Cli, ikid_hex: &str) -> Result<()> {
    let ikid = Ikid::from_hex(ikid_hex)?;

    let store = Arc::new(open_store(cli)?);
    let ik_cached = store.find_ik(&ikid)?.is_some();
    let engine = build_engine(cli, store)?;

    let status = engine.terminal_status(&ikid);
    let label = match status {
        TerminalStatus::Provisioned => "provisioned",
        TerminalStatus::Active => "active",
        TerminalStatus::Exhausted => "exhausted (rotation required)",
    };

    output::field("terminal", &ikid.to_hex());
    output::field("state", label);
    output::field("ik cached", if ik_cached { "yes" } else { "no" });
    match engine.last_accepted_counter(&ikid) {
        Some(counter) => output::field("last counter", &format!("{counter} ({counter:#x})")),
        None => output::field("last counter", "-"),
    }

    if status == TerminalStatus::Exhausted {
        output::tip("Run `dukpt decommission --ikid <hex>` and re-inject a new IK.");
    }

    Ok(())
}
