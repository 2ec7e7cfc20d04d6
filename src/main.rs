use clap::Parser;
use dukpt_engine::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { ref officers } => {
            dukpt_engine::cli::commands::init::execute(&cli, officers)
        }
        Commands::WrapBdk {
            ref kbpk_file,
            ref key_file,
            generate,
            ref output,
        } => dukpt_engine::cli::commands::wrap_bdk::execute(
            &cli,
            kbpk_file,
            key_file.as_deref(),
            generate,
            output,
        ),
        Commands::Approve {
            ref key_block,
            ref officer,
            ref key_file,
            ref output,
        } => dukpt_engine::cli::commands::approve::execute(&cli, key_block, officer, key_file, output),
        Commands::ImportBdk {
            ref key_block,
            ref approvals,
        } => dukpt_engine::cli::commands::import_bdk::execute(&cli, key_block, approvals),
        Commands::Derive { ref ksn, ref usage } => {
            dukpt_engine::cli::commands::derive_cmd::execute(&cli, ksn, usage)
        }
        Commands::DecodeKsn { ref ksn } => {
            dukpt_engine::cli::commands::decode_ksn::execute(&cli, ksn)
        }
        Commands::Status { ref ikid } => dukpt_engine::cli::commands::status::execute(&cli, ikid),
        Commands::Decommission { ref ikid, force } => {
            dukpt_engine::cli::commands::decommission::execute(&cli, ikid, force)
        }
        #[cfg(feature = "audit-log")]
        Commands::Audit { last, ref since } => {
            dukpt_engine::cli::commands::audit_cmd::execute(&cli, last, since.as_deref())
        }
        Commands::Completions { ref shell } => {
            dukpt_engine::cli::commands::completions::execute(shell)
        }
    };

    if let Err(e) = result {
        dukpt_engine::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}
