//! `dukpt init` — create a new software keystore and officer keys.

use std::collections::HashSet;
use std::fs;

use crate::cli::{generate_key, keystore_dir, keystore_path, output, prompt_new_passphrase, Cli};
use crate::config::Settings;
use crate::errors::{DukptError, Result};
use crate::keystore::SoftwareKeyStore;

/// Execute the `init` command.
pub fn execute(cli: &Cli, officers: &[String]) -> Result<()> {
    let distinct: HashSet<&str> = officers.iter().map(String::as_str).collect();
    if distinct.len() < 2 {
        return Err(DukptError::CommandFailed(
            "dual control requires at least 2 distinct officers (--officer <id> --officer <id>)"
                .into(),
        ));
    }
    for officer in officers {
        if officer.is_empty() || officer.contains(':') {
            return Err(DukptError::CommandFailed(format!(
                "invalid officer id '{officer}'"
            )));
        }
    }

    let cwd = std::env::current_dir()?;
    let dir = keystore_dir(cli)?;
    let path = keystore_path(cli)?;

    // 1. Create the keystore directory if it doesn't exist.
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
        output::info(&format!("Created keystore directory: {}", dir.display()));
    }

    // 2. Refuse to clobber an existing keystore.
    if path.exists() {
        output::tip("Use `dukpt import-bdk` to add a BDK to the existing keystore.");
        return Err(DukptError::KeystoreAlreadyExists(path));
    }

    // 3. Prompt for a new passphrase (with confirmation).
    let passphrase = prompt_new_passphrase()?;

    // 4. Create the keystore file with the configured Argon2 params.
    let settings = Settings::load(&cwd)?;
    let store = SoftwareKeyStore::create(&path, passphrase.as_bytes(), &settings.argon2_params())?;
    output::success(&format!("Keystore created at {}", path.display()));

    // 5. Generate the key-block protection key and the officer approval
    //    keys.  The files are for ceremony tooling — distribute and store
    //    them out of band.
    let kbpk = generate_key();
    store.set_kbpk(kbpk.clone())?;
    let kbpk_path = dir.join("kbpk.key");
    crate::cli::write_key_file(&kbpk_path, &kbpk)?;
    output::info(&format!(
        "Key-block protection key written to {}",
        kbpk_path.display()
    ));

    for officer in distinct {
        let key = generate_key();
        store.register_officer(officer, key.clone())?;
        let officer_path = dir.join(format!("officer-{officer}.key"));
        crate::cli::write_key_file(&officer_path, &key)?;
        output::info(&format!(
            "Approval key for '{officer}' written to {}",
            officer_path.display()
        ));
    }

    output::warning("Move the KBPK and officer key files to offline storage before production use.");
    output::tip("Run `dukpt wrap-bdk` to build a key block for import.");
    output::tip("Run `dukpt import-bdk` with two approvals to activate a BDK.");

    Ok(())
}
