//! Audit trail — one immutable record per derivation attempt.
//!
//! Recording is part of the request contract, not an advisory side
//! channel: the engine writes exactly one entry per attempt (success or
//! failure) *before* the caller sees the result, and a sink failure
//! fails the request with `AuditUnavailable`.  There are no silent
//! failures by construction.
//!
//! Two sinks ship with the crate: an in-memory log (tests, embedding)
//! and a SQLite-backed log behind the `audit-log` feature (default on).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::errors::{DeriveStatus, Result};

/// A single audit entry.  Append-only once recorded.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    /// Operation name, e.g. `derive`, `export-key`, `decommission`.
    pub operation: String,
    /// Hex rendering of the request KSN, when one was presented.
    pub ksn: Option<String>,
    /// Requested usage type, when one was presented.
    pub usage: Option<String>,
    /// Outcome status, identical to what the caller received.
    pub outcome: DeriveStatus,
}

impl AuditEntry {
    /// Build an entry stamped with the current time.
    pub fn new(
        operation: &str,
        ksn: Option<String>,
        usage: Option<String>,
        outcome: DeriveStatus,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            ksn,
            usage,
            outcome,
        }
    }
}

/// Destination for audit entries.
///
/// Implementations must be durable enough for their deployment: a sink
/// that cannot accept an entry returns an error and thereby fails the
/// request it belongs to.
pub trait AuditSink: Send + Sync {
    /// Append one entry.  Must not reorder or drop entries.
    fn record(&self, entry: &AuditEntry) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// In-memory audit log for tests and embedded use.
///
/// Carries a fault-injection switch so the engine's strict
/// record-before-return behavior can be tested.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make `record` fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::errors::DukptError::AuditUnavailable(
                "audit sink rejected the entry".into(),
            ));
        }
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite sink
// ---------------------------------------------------------------------------

#[cfg(feature = "audit-log")]
pub use sqlite::{SqliteAuditLog, StoredAuditEntry};

#[cfg(feature = "audit-log")]
mod sqlite {
    use std::path::{Path, PathBuf};

    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use rusqlite::Connection;

    use super::{AuditEntry, AuditSink};
    use crate::errors::{DukptError, Result};

    /// An entry read back from the database, with its row id.
    #[derive(Debug, Clone)]
    pub struct StoredAuditEntry {
        pub id: i64,
        pub timestamp: DateTime<Utc>,
        pub operation: String,
        pub ksn: Option<String>,
        pub usage: Option<String>,
        pub outcome: String,
    }

    /// SQLite-backed audit log at `<keystore_dir>/audit.db`.
    pub struct SqliteAuditLog {
        conn: Mutex<Connection>,
    }

    impl SqliteAuditLog {
        /// Open (or create) the audit database in `dir`.
        ///
        /// Unlike an advisory log this is strict: any failure here is an
        /// error, because an engine without a working audit sink must not
        /// serve derivations.
        pub fn open(dir: &Path) -> Result<Self> {
            let db_path = Self::db_path(dir);
            let conn = Connection::open(&db_path)
                .map_err(|e| DukptError::AuditUnavailable(format!("open {db_path:?}: {e}")))?;

            // Restrictive permissions: the log names terminals and outcomes.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o600);
                let _ = std::fs::set_permissions(&db_path, perms);
            }

            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS audit_log (
                    id        INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    operation TEXT NOT NULL,
                    ksn       TEXT,
                    usage     TEXT,
                    outcome   TEXT NOT NULL
                );",
            )
            .map_err(|e| DukptError::AuditUnavailable(format!("schema: {e}")))?;

            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        /// Query recent entries, most recent first.
        ///
        /// - `limit`: maximum number of entries to return.
        /// - `since`: if provided, only entries newer than this timestamp.
        pub fn query(
            &self,
            limit: usize,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<StoredAuditEntry>> {
            let conn = self.conn.lock();
            let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);

            let (sql, params): (&str, Vec<Box<dyn rusqlite::types::ToSql>>) = match since {
                Some(ref ts) => (
                    "SELECT id, timestamp, operation, ksn, usage, outcome
                     FROM audit_log
                     WHERE timestamp >= ?1
                     ORDER BY id DESC
                     LIMIT ?2",
                    vec![
                        Box::new(ts.to_rfc3339()) as Box<dyn rusqlite::types::ToSql>,
                        Box::new(limit_i64),
                    ],
                ),
                None => (
                    "SELECT id, timestamp, operation, ksn, usage, outcome
                     FROM audit_log
                     ORDER BY id DESC
                     LIMIT ?1",
                    vec![Box::new(limit_i64) as Box<dyn rusqlite::types::ToSql>],
                ),
            };

            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| DukptError::AuditUnavailable(format!("query prepare: {e}")))?;

            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| &**p).collect();

            let rows = stmt
                .query_map(params_refs.as_slice(), |row| {
                    let ts_str: String = row.get(1)?;
                    let timestamp = DateTime::parse_from_rfc3339(&ts_str)
                        .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));

                    Ok(StoredAuditEntry {
                        id: row.get(0)?,
                        timestamp,
                        operation: row.get(2)?,
                        ksn: row.get(3)?,
                        usage: row.get(4)?,
                        outcome: row.get(5)?,
                    })
                })
                .map_err(|e| DukptError::AuditUnavailable(format!("query exec: {e}")))?;

            let mut entries = Vec::new();
            for row in rows {
                entries
                    .push(row.map_err(|e| DukptError::AuditUnavailable(format!("row: {e}")))?);
            }
            Ok(entries)
        }

        /// Path of the audit database inside a keystore directory.
        pub fn db_path(dir: &Path) -> PathBuf {
            dir.join("audit.db")
        }
    }

    impl AuditSink for SqliteAuditLog {
        fn record(&self, entry: &AuditEntry) -> Result<()> {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO audit_log (timestamp, operation, ksn, usage, outcome)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    entry.timestamp.to_rfc3339(),
                    entry.operation,
                    entry.ksn,
                    entry.usage,
                    entry.outcome.as_str(),
                ],
            )
            .map_err(|e| DukptError::AuditUnavailable(format!("insert: {e}")))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DukptError;

    fn entry(outcome: DeriveStatus) -> AuditEntry {
        AuditEntry::new("derive", Some("00".repeat(12)), Some("pin-enc".into()), outcome)
    }

    #[test]
    fn memory_log_records_in_order() {
        let log = MemoryAuditLog::new();
        log.record(&entry(DeriveStatus::Ok)).unwrap();
        log.record(&entry(DeriveStatus::ReplayDetected)).unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, DeriveStatus::Ok);
        assert_eq!(entries[1].outcome, DeriveStatus::ReplayDetected);
    }

    #[test]
    fn failing_memory_log_rejects() {
        let log = MemoryAuditLog::new();
        log.set_failing(true);
        assert!(matches!(
            log.record(&entry(DeriveStatus::Ok)),
            Err(DukptError::AuditUnavailable(_))
        ));
        assert!(log.is_empty());

        log.set_failing(false);
        assert!(log.record(&entry(DeriveStatus::Ok)).is_ok());
    }

    #[cfg(feature = "audit-log")]
    mod sqlite_tests {
        use super::*;
        use tempfile::TempDir;

        #[test]
        fn open_creates_database() {
            let dir = TempDir::new().unwrap();
            let _log = SqliteAuditLog::open(dir.path()).unwrap();
            assert!(dir.path().join("audit.db").exists());
        }

        #[test]
        fn record_and_query_roundtrip() {
            let dir = TempDir::new().unwrap();
            let log = SqliteAuditLog::open(dir.path()).unwrap();

            log.record(&entry(DeriveStatus::Ok)).unwrap();
            log.record(&entry(DeriveStatus::SecurityViolation)).unwrap();

            let entries = log.query(10, None).unwrap();
            assert_eq!(entries.len(), 2);
            // Most recent first.
            assert_eq!(entries[0].outcome, "SECURITY_VIOLATION");
            assert_eq!(entries[1].outcome, "OK");
            assert_eq!(entries[1].usage.as_deref(), Some("pin-enc"));
        }

        #[test]
        fn query_with_limit_and_since() {
            let dir = TempDir::new().unwrap();
            let log = SqliteAuditLog::open(dir.path()).unwrap();

            for _ in 0..5 {
                log.record(&entry(DeriveStatus::Ok)).unwrap();
            }

            assert_eq!(log.query(2, None).unwrap().len(), 2);

            let past = Utc::now() - chrono::Duration::hours(1);
            assert_eq!(log.query(10, Some(past)).unwrap().len(), 5);

            let future = Utc::now() + chrono::Duration::hours(1);
            assert_eq!(log.query(10, Some(future)).unwrap().len(), 0);
        }

        #[cfg(unix)]
        #[test]
        fn audit_db_has_restrictive_permissions() {
            use std::os::unix::fs::PermissionsExt;

            let dir = TempDir::new().unwrap();
            let _log = SqliteAuditLog::open(dir.path()).unwrap();

            let perms = std::fs::metadata(dir.path().join("audit.db"))
                .unwrap()
                .permissions();
            assert_eq!(perms.mode() & 0o777, 0o600);
        }
    }
}
