//! Key-ceremony and persistence scenarios for the software key store.

use std::sync::Arc;

use tempfile::TempDir;
use zeroize::Zeroizing;

use dukpt_engine::audit::{AuditSink, MemoryAuditLog};
use dukpt_engine::crypto::Argon2Params;
use dukpt_engine::engine::{DerivationEngine, DeriveRequest};
use dukpt_engine::derive::KeyUsage;
use dukpt_engine::errors::DukptError;
use dukpt_engine::keystore::{
    Authorization, SecureKeyStore, SoftwareKeyStore, WrappedKeyBlock,
};
use dukpt_engine::ksn::Ksn;

const KBPK: [u8; 32] = [0x11; 32];
const BDK: [u8; 32] = [0x22; 32];
const ALICE_KEY: [u8; 32] = [0x33; 32];
const BOB_KEY: [u8; 32] = [0x44; 32];

fn fast_params() -> Argon2Params {
    Argon2Params {
        memory_kib: 8_192,
        iterations: 1,
        parallelism: 1,
    }
}

fn provision(store: &SoftwareKeyStore) {
    store.set_kbpk(Zeroizing::new(KBPK)).unwrap();
    store
        .register_officer("alice", Zeroizing::new(ALICE_KEY))
        .unwrap();
    store
        .register_officer("bob", Zeroizing::new(BOB_KEY))
        .unwrap();
}

fn ceremony(store: &SoftwareKeyStore, environment: &str) {
    let block = WrappedKeyBlock::wrap(&KBPK, environment, &Zeroizing::new(BDK)).unwrap();
    let approvals = vec![
        Authorization::issue("alice", &ALICE_KEY, &block).unwrap(),
        Authorization::issue("bob", &BOB_KEY, &block).unwrap(),
    ];
    store.import_bdk(environment, &block, &approvals).unwrap();
}

fn sample_ksn(counter: u32) -> Vec<u8> {
    Ksn {
        derivation_id: [0xDE, 0xAD, 0xBE, 0xEF, 0x01],
        ikid_tail: [0x10, 0x20, 0x30],
        counter,
    }
    .encode()
    .unwrap()
    .to_vec()
}

#[test]
fn full_ceremony_to_derivation_over_a_file_backed_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keystore.dukpt");

    let first_key = {
        let store =
            Arc::new(SoftwareKeyStore::create(&path, b"open sesame!", &fast_params()).unwrap());
        provision(&store);
        ceremony(&store, "prod");

        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditLog::new());
        let engine = DerivationEngine::new(Arc::clone(&store) as Arc<dyn SecureKeyStore>, audit, "prod");
        engine
            .derive(&DeriveRequest {
                ksn: sample_ksn(1),
                usage: KeyUsage::DataRequest,
            })
            .unwrap()
    };

    // Reopen: BDK and the cached IK survive, and derivation for the same
    // KSN yields the same key on the reopened store.
    let reopened = Arc::new(SoftwareKeyStore::open_file(&path, b"open sesame!").unwrap());
    assert_eq!(reopened.environments().len(), 1);
    assert_eq!(reopened.cached_ik_count(), 1);

    let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditLog::new());
    let engine = DerivationEngine::new(Arc::clone(&reopened) as Arc<dyn SecureKeyStore>, audit, "prod");
    let replayed_key = engine
        .derive(&DeriveRequest {
            ksn: sample_ksn(1),
            usage: KeyUsage::DataRequest,
        })
        .unwrap();

    // A fresh engine has a fresh counter table, so counter 1 derives
    // again — deterministically.
    assert_eq!(first_key.as_bytes(), replayed_key.as_bytes());
}

#[test]
fn environments_are_isolated_key_sets() {
    let store = SoftwareKeyStore::in_memory();
    provision(&store);
    ceremony(&store, "prod");

    // Importing the same key block under another environment name is
    // refused outright.
    let block = WrappedKeyBlock::wrap(&KBPK, "prod", &Zeroizing::new(BDK)).unwrap();
    let approvals = vec![
        Authorization::issue("alice", &ALICE_KEY, &block).unwrap(),
        Authorization::issue("bob", &BOB_KEY, &block).unwrap(),
    ];
    assert!(matches!(
        store.import_bdk("pre-prod", &block, &approvals),
        Err(DukptError::InvalidKeyBlock(_))
    ));

    assert!(matches!(
        store.active_bdk("pre-prod"),
        Err(DukptError::KeyNotFound(_))
    ));
}

#[test]
fn approvals_from_one_ceremony_do_not_transfer() {
    let store = SoftwareKeyStore::in_memory();
    provision(&store);

    let first = WrappedKeyBlock::wrap(&KBPK, "prod", &Zeroizing::new(BDK)).unwrap();
    let second = WrappedKeyBlock::wrap(&KBPK, "prod", &Zeroizing::new([0x99; 32])).unwrap();

    // MACs were issued over `first`; presenting them with `second` must
    // fail.
    let stolen = vec![
        Authorization::issue("alice", &ALICE_KEY, &first).unwrap(),
        Authorization::issue("bob", &BOB_KEY, &first).unwrap(),
    ];
    assert!(matches!(
        store.import_bdk("prod", &second, &stolen),
        Err(DukptError::SecurityViolation(_))
    ));
}

#[test]
fn tampered_keystore_file_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keystore.dukpt");

    {
        let store = SoftwareKeyStore::create(&path, b"open sesame!", &fast_params()).unwrap();
        provision(&store);
        ceremony(&store, "prod");
    }

    let mut data = std::fs::read(&path).unwrap();
    let mid = data.len() / 2;
    data[mid] ^= 0x01;
    std::fs::write(&path, &data).unwrap();

    let result = SoftwareKeyStore::open_file(&path, b"open sesame!");
    assert!(result.is_err());
}

#[test]
fn key_block_tamper_is_caught_at_import() {
    let store = SoftwareKeyStore::in_memory();
    provision(&store);

    let block = WrappedKeyBlock::wrap(&KBPK, "prod", &Zeroizing::new(BDK)).unwrap();
    let mut bytes = block.as_bytes().to_vec();
    let sealed_region = bytes.len() - 40; // inside the sealed payload
    bytes[sealed_region] ^= 0x01;

    let parsed = WrappedKeyBlock::from_bytes(bytes);
    let result = parsed.and_then(|tampered| {
        let approvals = vec![
            Authorization::issue("alice", &ALICE_KEY, &tampered).unwrap(),
            Authorization::issue("bob", &BOB_KEY, &tampered).unwrap(),
        ];
        store.import_bdk("prod", &tampered, &approvals)
    });
    assert!(result.is_err());
    assert!(matches!(
        store.active_bdk("prod"),
        Err(DukptError::KeyNotFound(_))
    ));
}
