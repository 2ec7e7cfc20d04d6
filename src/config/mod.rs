//! Deployment configuration loaded from `.dukpt.toml`.

pub mod settings;

pub use settings::{validate_environment_name, Settings};
