//! In-process software key store.
//!
//! Implements [`SecureKeyStore`] for development, testing, and single-node
//! deployments.  Key material lives in `Zeroizing` buffers behind a
//! `parking_lot::RwLock` and is only reachable through opaque handles;
//! optional persistence seals every entry individually into the binary
//! keystore file (`format`).
//!
//! An explicit offline switch makes every boundary call fail with
//! `HsmUnavailable`, so engine behavior under store outage can be tested
//! without a real HSM.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use super::format::{
    self, KeystoreHeader, RawKeystore, StoredArgon2Params, StoredEntry, CURRENT_VERSION,
};
use super::keyblock::{key_check_value, Authorization, WrappedKeyBlock};
use super::{KeyClass, KeyHandle, SecureKeyStore};
use crate::crypto::{derive_unlock_key, generate_salt, open, seal, Argon2Params, UnlockKey};
use crate::derive::ecb_encrypt;
use crate::errors::{DukptError, Result};
use crate::ksn::Ikid;

/// Minimum number of distinct officer approvals to activate a BDK.
const MIN_APPROVALS: usize = 2;

struct SecretKey {
    handle_id: u64,
    bytes: Zeroizing<[u8; 32]>,
    created_at: DateTime<Utc>,
}

enum HandleTarget {
    Bdk(String),
    Ik(Ikid),
}

#[derive(Default)]
struct State {
    bdks: HashMap<String, SecretKey>,
    iks: HashMap<Ikid, SecretKey>,
    kbpk: Option<Zeroizing<[u8; 32]>>,
    officers: HashMap<String, Zeroizing<[u8; 32]>>,
    handles: HashMap<u64, HandleTarget>,
    next_handle: u64,
}

impl State {
    fn issue_handle(&mut self, target: HandleTarget) -> u64 {
        self.next_handle += 1;
        let id = self.next_handle;
        self.handles.insert(id, target);
        id
    }
}

struct Persistence {
    path: PathBuf,
    header: KeystoreHeader,
    unlock: UnlockKey,
}

/// Software-backed secure key store.
pub struct SoftwareKeyStore {
    state: RwLock<State>,
    persistence: Option<Persistence>,
    offline: AtomicBool,
}

impl SoftwareKeyStore {
    /// Ephemeral store with no file backing (tests, embedded use).
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(State::default()),
            persistence: None,
            offline: AtomicBool::new(false),
        }
    }

    /// Create a new keystore file at `path`.
    pub fn create(path: &Path, passphrase: &[u8], argon2_params: &Argon2Params) -> Result<Self> {
        if path.exists() {
            return Err(DukptError::KeystoreAlreadyExists(path.to_path_buf()));
        }

        let salt = generate_salt();
        let mut unlock_bytes = derive_unlock_key(passphrase, &salt, argon2_params)?;
        let unlock = UnlockKey::new(unlock_bytes);
        unlock_bytes.zeroize();

        let header = KeystoreHeader {
            version: CURRENT_VERSION,
            salt: salt.to_vec(),
            created_at: Utc::now(),
            argon2_params: StoredArgon2Params {
                memory_kib: argon2_params.memory_kib,
                iterations: argon2_params.iterations,
                parallelism: argon2_params.parallelism,
            },
        };

        let store = Self {
            state: RwLock::new(State::default()),
            persistence: Some(Persistence {
                path: path.to_path_buf(),
                header,
                unlock,
            }),
            offline: AtomicBool::new(false),
        };
        store.persist()?;
        Ok(store)
    }

    /// Open an existing keystore file, verifying its integrity before
    /// unsealing any entry.
    pub fn open_file(path: &Path, passphrase: &[u8]) -> Result<Self> {
        let raw = format::read_keystore(path)?;

        let params = Argon2Params {
            memory_kib: raw.header.argon2_params.memory_kib,
            iterations: raw.header.argon2_params.iterations,
            parallelism: raw.header.argon2_params.parallelism,
        };
        let mut unlock_bytes = derive_unlock_key(passphrase, &raw.header.salt, &params)?;
        let unlock = UnlockKey::new(unlock_bytes);
        unlock_bytes.zeroize();

        let mut hmac_key = unlock.file_hmac_key()?;
        let verified = format::verify_hmac(
            &hmac_key,
            &raw.header_bytes,
            &raw.entries_bytes,
            &raw.stored_hmac,
        );
        hmac_key.zeroize();
        // A bad passphrase and a tampered file are indistinguishable here.
        verified.map_err(|_| DukptError::OpenFailed)?;

        let mut state = State::default();
        Self::populate(&mut state, &raw, &unlock)?;

        Ok(Self {
            state: RwLock::new(state),
            persistence: Some(Persistence {
                path: path.to_path_buf(),
                header: raw.header,
                unlock,
            }),
            offline: AtomicBool::new(false),
        })
    }

    fn populate(state: &mut State, raw: &RawKeystore, unlock: &UnlockKey) -> Result<()> {
        for entry in &raw.entries {
            let mut entry_key = unlock.entry_key(&entry.label)?;
            let opened = open(&entry_key, &entry.label, &entry.sealed);
            entry_key.zeroize();
            let key = key32(opened?, &entry.label)?;

            match entry.label.split_once(':') {
                Some(("bdk", environment)) => {
                    let handle_id = state.issue_handle(HandleTarget::Bdk(environment.to_string()));
                    state.bdks.insert(
                        environment.to_string(),
                        SecretKey {
                            handle_id,
                            bytes: key,
                            created_at: entry.created_at,
                        },
                    );
                }
                Some(("ik", hex)) => {
                    let ikid = Ikid::from_hex(hex).map_err(|_| {
                        DukptError::InvalidKeystoreFormat(format!("bad IK label '{}'", entry.label))
                    })?;
                    let handle_id = state.issue_handle(HandleTarget::Ik(ikid));
                    state.iks.insert(
                        ikid,
                        SecretKey {
                            handle_id,
                            bytes: key,
                            created_at: entry.created_at,
                        },
                    );
                }
                Some(("officer", id)) => {
                    state.officers.insert(id.to_string(), key);
                }
                None if entry.label == "kbpk" => {
                    state.kbpk = Some(key);
                }
                _ => {
                    return Err(DukptError::InvalidKeystoreFormat(format!(
                        "unknown entry label '{}'",
                        entry.label
                    )));
                }
            }
        }
        Ok(())
    }

    /// Re-seal every entry and write the keystore file.  No-op for an
    /// in-memory store.
    fn persist(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        let state = self.state.read();
        let mut entries = Vec::new();

        for (environment, secret) in &state.bdks {
            entries.push(Self::sealed_entry(
                &persistence.unlock,
                &format!("bdk:{environment}"),
                &secret.bytes,
                secret.created_at,
            )?);
        }
        for (ikid, secret) in &state.iks {
            entries.push(Self::sealed_entry(
                &persistence.unlock,
                &format!("ik:{}", ikid.to_hex()),
                &secret.bytes,
                secret.created_at,
            )?);
        }
        if let Some(kbpk) = &state.kbpk {
            entries.push(Self::sealed_entry(
                &persistence.unlock,
                "kbpk",
                kbpk,
                persistence.header.created_at,
            )?);
        }
        for (id, key) in &state.officers {
            entries.push(Self::sealed_entry(
                &persistence.unlock,
                &format!("officer:{id}"),
                key,
                persistence.header.created_at,
            )?);
        }
        // Deterministic file output regardless of map iteration order.
        entries.sort_by(|a, b| a.label.cmp(&b.label));

        let mut hmac_key = persistence.unlock.file_hmac_key()?;
        let result = format::write_keystore(
            &persistence.path,
            &persistence.header,
            &entries,
            &hmac_key,
        );
        hmac_key.zeroize();
        result
    }

    fn sealed_entry(
        unlock: &UnlockKey,
        label: &str,
        key: &Zeroizing<[u8; 32]>,
        created_at: DateTime<Utc>,
    ) -> Result<StoredEntry> {
        let mut entry_key = unlock.entry_key(label)?;
        let sealed = seal(&entry_key, label, key.as_ref());
        entry_key.zeroize();
        Ok(StoredEntry {
            label: label.to_string(),
            sealed: sealed?,
            created_at,
        })
    }

    /// Register the key-block protection key used to unwrap imported BDKs.
    pub fn set_kbpk(&self, key: Zeroizing<[u8; 32]>) -> Result<()> {
        self.ensure_online()?;
        self.state.write().kbpk = Some(key);
        self.persist()
    }

    /// Register an officer's approval key for dual-control imports.
    pub fn register_officer(&self, id: &str, key: Zeroizing<[u8; 32]>) -> Result<()> {
        self.ensure_online()?;
        if id.is_empty() || id.contains(':') {
            return Err(DukptError::CommandFailed(format!(
                "invalid officer id '{id}'"
            )));
        }
        self.state.write().officers.insert(id.to_string(), key);
        self.persist()
    }

    /// Environments with an active BDK, with each key's check value.
    pub fn environments(&self) -> Vec<(String, [u8; 3])> {
        let state = self.state.read();
        let mut list: Vec<_> = state
            .bdks
            .iter()
            .map(|(environment, secret)| (environment.clone(), key_check_value(&secret.bytes)))
            .collect();
        list.sort();
        list
    }

    /// Number of cached Initial Keys.
    pub fn cached_ik_count(&self) -> usize {
        self.state.read().iks.len()
    }

    /// Simulate store outage: while offline, every boundary call fails
    /// with `HsmUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DukptError::HsmUnavailable("key store is offline".into()));
        }
        Ok(())
    }
}

impl SecureKeyStore for SoftwareKeyStore {
    fn active_bdk(&self, environment: &str) -> Result<KeyHandle> {
        self.ensure_online()?;
        let state = self.state.read();
        let secret = state
            .bdks
            .get(environment)
            .ok_or_else(|| DukptError::KeyNotFound(environment.to_string()))?;
        Ok(KeyHandle::new(secret.handle_id, KeyClass::Bdk))
    }

    fn find_ik(&self, ikid: &Ikid) -> Result<Option<KeyHandle>> {
        self.ensure_online()?;
        let state = self.state.read();
        Ok(state
            .iks
            .get(ikid)
            .map(|secret| KeyHandle::new(secret.handle_id, KeyClass::InitialKey)))
    }

    fn store_ik(&self, ikid: &Ikid, key: Zeroizing<[u8; 32]>) -> Result<KeyHandle> {
        self.ensure_online()?;
        {
            let mut state = self.state.write();
            if let Some(existing) = state.iks.get(ikid) {
                // IK derivation is deterministic; keep the first copy.
                return Ok(KeyHandle::new(existing.handle_id, KeyClass::InitialKey));
            }
            let handle_id = state.issue_handle(HandleTarget::Ik(*ikid));
            state.iks.insert(
                *ikid,
                SecretKey {
                    handle_id,
                    bytes: key,
                    created_at: Utc::now(),
                },
            );
        }
        self.persist()?;
        let state = self.state.read();
        let secret = state
            .iks
            .get(ikid)
            .ok_or_else(|| DukptError::HsmUnavailable("IK vanished during store".into()))?;
        Ok(KeyHandle::new(secret.handle_id, KeyClass::InitialKey))
    }

    fn encrypt_block(&self, handle: &KeyHandle, block: &[u8; 16]) -> Result<[u8; 16]> {
        self.ensure_online()?;
        let state = self.state.read();

        let target = state.handles.get(&handle.id()).ok_or_else(|| {
            DukptError::SecurityViolation(format!("unknown key handle {}", handle.id()))
        })?;

        let secret = match (target, handle.class()) {
            (HandleTarget::Bdk(environment), KeyClass::Bdk) => state.bdks.get(environment),
            (HandleTarget::Ik(ikid), KeyClass::InitialKey) => state.iks.get(ikid),
            _ => {
                return Err(DukptError::SecurityViolation(
                    "key handle class mismatch".into(),
                ))
            }
        }
        .ok_or_else(|| {
            DukptError::SecurityViolation(format!("stale key handle {}", handle.id()))
        })?;

        Ok(ecb_encrypt(&secret.bytes, block))
    }

    fn decommission(&self, ikid: &Ikid) -> Result<()> {
        self.ensure_online()?;
        {
            let mut state = self.state.write();
            if let Some(secret) = state.iks.remove(ikid) {
                state.handles.remove(&secret.handle_id);
            }
        }
        self.persist()
    }

    fn import_bdk(
        &self,
        environment: &str,
        block: &WrappedKeyBlock,
        approvals: &[Authorization],
    ) -> Result<()> {
        self.ensure_online()?;

        if block.header().environment != environment {
            return Err(DukptError::InvalidKeyBlock(format!(
                "key block is for environment '{}', not '{environment}'",
                block.header().environment
            )));
        }

        // Dual control: at least two distinct registered officers, each
        // with a valid MAC over the envelope.  A single authorization is
        // never sufficient, whoever presents it.
        let mut seen = std::collections::HashSet::new();
        {
            let state = self.state.read();
            for approval in approvals {
                let key = state.officers.get(&approval.officer).ok_or_else(|| {
                    DukptError::SecurityViolation(format!(
                        "unknown approving officer '{}'",
                        approval.officer
                    ))
                })?;
                if !approval.verify(key, block) {
                    return Err(DukptError::SecurityViolation(format!(
                        "invalid approval from officer '{}'",
                        approval.officer
                    )));
                }
                seen.insert(approval.officer.as_str());
            }
        }
        if seen.len() < MIN_APPROVALS {
            return Err(DukptError::SecurityViolation(format!(
                "BDK import requires {MIN_APPROVALS} distinct officer approvals, got {}",
                seen.len()
            )));
        }

        {
            let mut state = self.state.write();
            if state.bdks.contains_key(environment) {
                return Err(DukptError::SecurityViolation(format!(
                    "environment '{environment}' already has an active BDK"
                )));
            }

            let kbpk = state.kbpk.as_ref().ok_or_else(|| {
                DukptError::SecurityViolation(
                    "no key-block protection key registered".into(),
                )
            })?;
            let key = block.unwrap_key(kbpk)?;

            let handle_id = state.issue_handle(HandleTarget::Bdk(environment.to_string()));
            state.bdks.insert(
                environment.to_string(),
                SecretKey {
                    handle_id,
                    bytes: key,
                    created_at: Utc::now(),
                },
            );
        }
        debug!(environment, "BDK activated");
        self.persist()
    }
}

fn key32(mut opened: Vec<u8>, label: &str) -> Result<Zeroizing<[u8; 32]>> {
    if opened.len() != 32 {
        opened.zeroize();
        return Err(DukptError::InvalidKeystoreFormat(format!(
            "entry '{label}' is not a 256-bit key"
        )));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&opened);
    opened.zeroize();
    Ok(key)
}
