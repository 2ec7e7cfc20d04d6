//! Command implementations for the `dukpt` CLI.

pub mod approve;
#[cfg(feature = "audit-log")]
pub mod audit_cmd;
pub mod completions;
pub mod decode_ksn;
pub mod decommission;
pub mod derive_cmd;
pub mod import_bdk;
pub mod init;
pub mod status;
pub mod wrap_bdk;
