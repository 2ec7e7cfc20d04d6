//! `dukpt derive` — run one derivation and print the usage key.
//!
//! The usage key is the engine's exportable product (the BDK and IK
//! never surface); printing it hex-encoded is the CLI analogue of
//! handing it to a PIN-block or MAC consumer.

use std::sync::Arc;

use crate::cli::{build_engine, open_store, output, save_counters, Cli};
use crate::errors::Result;
use crate::ksn::ksn_from_hex;

/// Execute the `derive` command.
pub fn execute(cli: &Cli, ksn_hex: &str, usage: &str) -> Result<()> {
    let ksn_bytes = ksn_from_hex(ksn_hex)?;

    let store = Arc::new(open_store(cli)?);
    let engine = build_engine(cli, store)?;

    let result = engine.derive_named(&ksn_bytes, usage);
    // The replay window must survive this process, win or lose.
    save_counters(cli, &engine)?;
    let key = result?;

    output::success("Derivation OK");
    output::field("usage", key.usage().as_str());
    output::field("key", &key.to_hex());

    Ok(())
}
