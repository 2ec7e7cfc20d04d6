//! `dukpt completions` — generate shell completion scripts.

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::cli::Cli;
use crate::errors::{DukptError, Result};

/// Execute the `completions` command.
pub fn execute(shell: &str) -> Result<()> {
    let shell: Shell = shell
        .parse()
        .map_err(|_| DukptError::CommandFailed(format!("unsupported shell '{shell}'")))?;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "dukpt", &mut std::io::stdout());

    Ok(())
}
