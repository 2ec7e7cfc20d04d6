//! `dukpt decode-ksn` — decode and print the fields of a KSN.

use crate::cli::{output, Cli};
use crate::counter::MAX_COUNTER;
use crate::errors::Result;
use crate::ksn::{ksn_from_hex, Ksn};

/// Execute the `decode-ksn` command.
pub fn execute(_cli: &Cli, ksn_hex: &str) -> Result<()> {
    let bytes = ksn_from_hex(ksn_hex)?;
    let ksn = Ksn::decode(&bytes)?;

    output::field("derivation id", &hex(&ksn.derivation_id));
    output::field("ikid", &ksn.ikid().to_hex());
    output::field("counter", &format!("{} ({:#x})", ksn.counter, ksn.counter));

    if ksn.counter > MAX_COUNTER {
        output::warning("counter exceeds the 21-bit maximum — derivation would be rejected");
    }

    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
