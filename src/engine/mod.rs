//! The derivation engine — client-facing API over the whole hierarchy.
//!
//! A request carries raw KSN bytes and a usage type.  The engine decodes
//! the KSN, validates and advances the terminal's counter, resolves (or
//! derives and caches) the terminal's Initial Key inside the key-store
//! boundary, derives the per-transaction working key, and returns only
//! the requested usage key.  Exactly one audit entry is recorded per
//! attempt — success or failure — before the caller sees the result.
//!
//! The engine is `Send + Sync` and stateless apart from the counter
//! table: requests for distinct terminals share no lock.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::audit::{AuditEntry, AuditSink};
use crate::counter::{CounterTable, TerminalStatus};
use crate::derive::{derive_initial_key, derive_usage_key, derive_working_key, KeyUsage, UsageKey};
use crate::errors::{DeriveStatus, DukptError, Result};
use crate::keystore::{KeyClass, KeyHandle, SecureKeyStore};
use crate::ksn::{Ikid, Ksn};

/// A client derivation request.
#[derive(Debug, Clone)]
pub struct DeriveRequest {
    /// Raw 12-byte KSN as received from the terminal.
    pub ksn: Vec<u8>,
    /// Which usage key the caller wants.
    pub usage: KeyUsage,
}

/// Status-carrying response envelope for transport bindings that cannot
/// use `Result` directly.
#[derive(Debug)]
pub struct DeriveResponse {
    /// The derived key on success.
    pub key: Option<UsageKey>,
    /// Outcome status, identical to the audit record.
    pub status: DeriveStatus,
}

/// The DUKPT derivation engine.
pub struct DerivationEngine {
    store: Arc<dyn SecureKeyStore>,
    audit: Arc<dyn AuditSink>,
    counters: CounterTable,
    environment: String,
}

impl DerivationEngine {
    /// Build an engine over a key store and an audit sink.
    ///
    /// `environment` selects which BDK the store resolves for initial-key
    /// derivation.
    pub fn new(
        store: Arc<dyn SecureKeyStore>,
        audit: Arc<dyn AuditSink>,
        environment: &str,
    ) -> Self {
        Self {
            store,
            audit,
            counters: CounterTable::new(),
            environment: environment.to_string(),
        }
    }

    /// Environment this engine derives for.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Derive a usage key for one transaction.
    ///
    /// The audit entry is recorded before this returns; if the sink
    /// rejects it the request fails with `AuditUnavailable` even when
    /// derivation itself succeeded.
    pub fn derive(&self, request: &DeriveRequest) -> Result<UsageKey> {
        let result = self.derive_inner(&request.ksn, request.usage);

        let outcome = match &result {
            Ok(_) => DeriveStatus::Ok,
            Err(e) => e.status(),
        };
        let entry = AuditEntry::new(
            "derive",
            Some(hex(&request.ksn)),
            Some(request.usage.as_str().to_string()),
            outcome,
        );
        self.audit.record(&entry)?;

        result
    }

    /// Derive with the usage type still in its wire spelling.
    ///
    /// An unknown spelling is rejected with `UnsupportedUsageType` — and
    /// audited like any other failed attempt.
    pub fn derive_named(&self, ksn_bytes: &[u8], usage: &str) -> Result<UsageKey> {
        match KeyUsage::parse(usage) {
            Ok(parsed) => self.derive(&DeriveRequest {
                ksn: ksn_bytes.to_vec(),
                usage: parsed,
            }),
            Err(e) => {
                let entry = AuditEntry::new(
                    "derive",
                    Some(hex(ksn_bytes)),
                    Some(usage.to_string()),
                    e.status(),
                );
                self.audit.record(&entry)?;
                Err(e)
            }
        }
    }

    /// [`derive`](Self::derive) wrapped into the status envelope.
    pub fn derive_response(&self, request: &DeriveRequest) -> DeriveResponse {
        match self.derive(request) {
            Ok(key) => DeriveResponse {
                key: Some(key),
                status: DeriveStatus::Ok,
            },
            Err(e) => DeriveResponse {
                key: None,
                status: e.status(),
            },
        }
    }

    fn derive_inner(&self, ksn_bytes: &[u8], usage: KeyUsage) -> Result<UsageKey> {
        let ksn = Ksn::decode(ksn_bytes)?;
        let ikid = ksn.ikid();

        let grant = self.counters.validate(&ikid, ksn.counter)?;

        let ik = self.initial_key_handle(&ikid)?;
        let working_key = derive_working_key(self.store.as_ref(), &ik, &grant)?;
        let key = derive_usage_key(&working_key, usage, ksn.unique_id(), grant.counter())?;

        debug!(
            ikid = %ikid.to_hex(),
            counter = grant.counter(),
            usage = %usage,
            "usage key derived"
        );
        Ok(key)
    }

    /// Resolve the terminal's IK handle, deriving and caching it on first
    /// sight.  The engine retains no copy: the fresh IK goes straight
    /// back into the store and the local buffer scrubs itself.
    fn initial_key_handle(&self, ikid: &Ikid) -> Result<KeyHandle> {
        if let Some(handle) = self.store.find_ik(ikid)? {
            return Ok(handle);
        }

        let bdk = self.store.active_bdk(&self.environment)?;
        let ik = derive_initial_key(self.store.as_ref(), &bdk, ikid)?;
        debug!(ikid = %ikid.to_hex(), "initial key derived");
        self.store.store_ik(ikid, ik)
    }

    /// Key export is not a supported operation.
    ///
    /// Always fails with `SecurityViolation` and always produces an audit
    /// entry with that outcome, regardless of caller privilege.  The
    /// violation outranks a concurrent audit failure: if the sink is down
    /// the caller still sees `SecurityViolation`, not `AuditUnavailable`.
    pub fn export_key(&self, class: KeyClass) -> Result<Vec<u8>> {
        error!(%class, "key export attempted");

        let entry = AuditEntry::new("export-key", None, None, DeriveStatus::SecurityViolation);
        if let Err(audit_err) = self.audit.record(&entry) {
            error!(%audit_err, "failed to audit export attempt");
        }

        Err(DukptError::SecurityViolation(format!(
            "{class} export is not a supported operation"
        )))
    }

    /// Lifecycle state of a terminal's counter.
    pub fn terminal_status(&self, ikid: &Ikid) -> TerminalStatus {
        self.counters.status(ikid)
    }

    /// Last counter accepted for a terminal, if any.
    pub fn last_accepted_counter(&self, ikid: &Ikid) -> Option<u32> {
        self.counters.last_accepted(ikid)
    }

    /// Snapshot of all terminal counter state, for persistence.
    pub fn counter_snapshot(&self) -> Vec<(Ikid, u32)> {
        self.counters.snapshot()
    }

    /// Restore a terminal's counter high-water mark from a snapshot.
    pub fn restore_counter(&self, ikid: &Ikid, last_accepted: u32) {
        self.counters.restore(ikid, last_accepted);
    }

    /// Destroy a terminal's cached IK and reset its counter entry.
    ///
    /// This is the `Exhausted → Provisioned` transition hook: after the
    /// terminal is re-injected with a new IK, its counter space starts
    /// over.  The counter entry is only cleared once the store confirms
    /// the old IK is gone.
    pub fn decommission_terminal(&self, ikid: &Ikid) -> Result<()> {
        let result = self.store.decommission(ikid).map(|()| {
            self.counters.reset(ikid);
            warn!(ikid = %ikid.to_hex(), "terminal decommissioned");
        });

        let outcome = match &result {
            Ok(()) => DeriveStatus::Ok,
            Err(e) => e.status(),
        };
        let entry = AuditEntry::new("decommission", None, None, outcome);
        self.audit.record(&entry)?;

        result
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
