use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{DukptError, Result};

/// Deployment-level configuration, loaded from `.dukpt.toml`.
///
/// Every field has a sensible default so the engine works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Which BDK environment to derive for (e.g. "test", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Directory (relative to the working directory) holding the
    /// keystore file and audit database.
    #[serde(default = "default_keystore_dir")]
    pub keystore_dir: String,

    /// Argon2 memory cost in KiB for the keystore unlock KDF (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_environment() -> String {
    "test".to_string()
}

fn default_keystore_dir() -> String {
    ".dukpt".to_string()
}

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            keystore_dir: default_keystore_dir(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the working directory.
    const FILE_NAME: &'static str = ".dukpt.toml";

    /// Load settings from `<dir>/.dukpt.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            DukptError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        validate_environment_name(&settings.environment)?;
        Ok(settings)
    }

    /// Full path to the keystore file.
    ///
    /// Example: `<dir>/.dukpt/keystore.dukpt`
    pub fn keystore_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.keystore_dir).join("keystore.dukpt")
    }

    /// Directory holding the keystore file and audit database.
    pub fn keystore_dir(&self, dir: &Path) -> PathBuf {
        dir.join(&self.keystore_dir)
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn argon2_params(&self) -> crate::crypto::Argon2Params {
        crate::crypto::Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

/// Validate that an environment name is safe and sensible.
///
/// Allowed: lowercase letters, digits, hyphens. Must not be empty or
/// start/end with a hyphen. Max length 64 characters.  This prevents a
/// typo from silently deriving against the wrong key set.
pub fn validate_environment_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DukptError::ConfigError(
            "environment name cannot be empty".into(),
        ));
    }

    if name.len() > 64 {
        return Err(DukptError::ConfigError(
            "environment name cannot exceed 64 characters".into(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(DukptError::ConfigError(format!(
            "environment name '{name}' is invalid — only lowercase letters, digits, and hyphens are allowed"
        )));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(DukptError::ConfigError(format!(
            "environment name '{name}' cannot start or end with a hyphen"
        )));
    }

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.environment, "test");
        assert_eq!(s.keystore_dir, ".dukpt");
        assert_eq!(s.argon2_memory_kib, 65_536);
        assert_eq!(s.argon2_iterations, 3);
        assert_eq!(s.argon2_parallelism, 4);
    }

    #[test]
    fn load_returns_defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.environment, "test");
    }

    #[test]
    fn load_parses_toml_file() {
        let tmp = TempDir::new().unwrap();
        let config = r#"
environment = "prod"
keystore_dir = "keys"
argon2_memory_kib = 131072
argon2_iterations = 5
argon2_parallelism = 8
"#;
        fs::write(tmp.path().join(".dukpt.toml"), config).unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.environment, "prod");
        assert_eq!(settings.keystore_dir, "keys");
        assert_eq!(settings.argon2_memory_kib, 131_072);
        assert_eq!(settings.argon2_iterations, 5);
        assert_eq!(settings.argon2_parallelism, 8);
    }

    #[test]
    fn load_uses_defaults_for_missing_fields() {
        let tmp = TempDir::new().unwrap();
        let config = "environment = \"prod\"\n";
        fs::write(tmp.path().join(".dukpt.toml"), config).unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.environment, "prod");
        assert_eq!(settings.keystore_dir, ".dukpt");
        assert_eq!(settings.argon2_iterations, 3);
    }

    #[test]
    fn load_errors_on_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".dukpt.toml"), "not valid {{toml").unwrap();
        assert!(Settings::load(tmp.path()).is_err());
    }

    #[test]
    fn load_rejects_bad_environment_name() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".dukpt.toml"), "environment = \"PROD\"\n").unwrap();
        assert!(Settings::load(tmp.path()).is_err());
    }

    #[test]
    fn keystore_path_builds_correct_path() {
        let s = Settings::default();
        let dir = Path::new("/srv/gateway");
        assert_eq!(
            s.keystore_path(dir),
            PathBuf::from("/srv/gateway/.dukpt/keystore.dukpt")
        );
    }

    #[test]
    fn valid_environment_names() {
        assert!(validate_environment_name("test").is_ok());
        assert!(validate_environment_name("prod").is_ok());
        assert!(validate_environment_name("pre-prod").is_ok());
        assert!(validate_environment_name("v2").is_ok());
    }

    #[test]
    fn invalid_environment_names() {
        assert!(validate_environment_name("").is_err());
        assert!(validate_environment_name("Prod").is_err());
        assert!(validate_environment_name("pre prod").is_err());
        assert!(validate_environment_name("pre_prod").is_err());
        assert!(validate_environment_name("-prod").is_err());
        assert!(validate_environment_name("prod-").is_err());
        assert!(validate_environment_name(&"a".repeat(65)).is_err());
    }
}
