//! Per-terminal transaction-counter management.
//!
//! Each terminal (identified by its IKID) carries a 21-bit monotonic
//! transaction counter.  A counter value is accepted at most once, and
//! only if it is strictly greater than the last accepted value — this is
//! the replay-detection guarantee the rest of the engine relies on.
//!
//! The table keeps one entry per terminal behind its own lock so that
//! validate-and-advance is atomic for a given terminal while requests for
//! distinct terminals proceed fully in parallel.  The outer map takes a
//! write lock only on first sight of a terminal.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::errors::{DukptError, Result};
use crate::ksn::Ikid;

/// Maximum value of the 21-bit transaction counter.
pub const MAX_COUNTER: u32 = 0x1F_FFFF;

/// Lifecycle state of a terminal's counter entry.
///
/// `Exhausted` is terminal until an external re-provisioning (new IK
/// injection) resets the entry back to `Provisioned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    /// No counter accepted yet (fresh or re-keyed terminal).
    Provisioned,
    /// At least one counter accepted, headroom remaining.
    Active,
    /// The maximum counter has been consumed; rotation required.
    Exhausted,
}

/// Proof that a counter value passed validation for a terminal.
///
/// Only [`CounterTable::validate`] can mint one (the fields are private),
/// so the key-hierarchy engine can demand a grant and be certain it never
/// derives from an unvalidated counter.
#[derive(Debug)]
pub struct CounterGrant {
    ikid: Ikid,
    counter: u32,
}

impl CounterGrant {
    /// The terminal this grant was issued for.
    pub fn ikid(&self) -> &Ikid {
        &self.ikid
    }

    /// The validated counter value.
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

#[derive(Debug)]
struct TerminalEntry {
    last_accepted: u32,
}

/// Table of per-terminal counter state.
#[derive(Default)]
pub struct CounterTable {
    terminals: RwLock<HashMap<Ikid, Arc<Mutex<TerminalEntry>>>>,
}

impl CounterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `counter` for `ikid` and atomically advance the terminal's
    /// high-water mark.
    ///
    /// - `CounterOverflow` when the value exceeds [`MAX_COUNTER`] — the
    ///   caller must treat this as a rotation-required signal; the table
    ///   itself never rotates keys.
    /// - `ReplayDetected` when the value is not strictly greater than the
    ///   last accepted one (counter 0 therefore always replays).
    ///
    /// Two concurrent calls carrying the same counter for the same
    /// terminal cannot both succeed: the per-entry lock is held across the
    /// check and the advance.
    pub fn validate(&self, ikid: &Ikid, counter: u32) -> Result<CounterGrant> {
        if counter > MAX_COUNTER {
            warn!(ikid = %ikid.to_hex(), counter, "counter overflow — rotation required");
            return Err(DukptError::CounterOverflow {
                counter,
                max: MAX_COUNTER,
            });
        }

        let entry = self.entry(ikid);
        let mut state = entry.lock();

        if counter <= state.last_accepted {
            warn!(ikid = %ikid.to_hex(), counter, "replayed counter rejected");
            return Err(DukptError::ReplayDetected { counter });
        }

        state.last_accepted = counter;
        Ok(CounterGrant {
            ikid: *ikid,
            counter,
        })
    }

    /// Current lifecycle state of a terminal.
    pub fn status(&self, ikid: &Ikid) -> TerminalStatus {
        let terminals = self.terminals.read();
        match terminals.get(ikid) {
            None => TerminalStatus::Provisioned,
            Some(entry) => {
                let state = entry.lock();
                match state.last_accepted {
                    0 => TerminalStatus::Provisioned,
                    MAX_COUNTER.. => TerminalStatus::Exhausted,
                    _ => TerminalStatus::Active,
                }
            }
        }
    }

    /// Last accepted counter for a terminal, if any was accepted.
    pub fn last_accepted(&self, ikid: &Ikid) -> Option<u32> {
        let terminals = self.terminals.read();
        let entry = terminals.get(ikid)?;
        let state = entry.lock();
        (state.last_accepted > 0).then_some(state.last_accepted)
    }

    /// Clear a terminal's entry after re-provisioning (new IK injected).
    ///
    /// Resetting without a re-key would re-open the replay window, which
    /// is why only the decommission path calls this.
    pub fn reset(&self, ikid: &Ikid) {
        let mut terminals = self.terminals.write();
        terminals.remove(ikid);
    }

    /// Snapshot of every terminal's last accepted counter.
    ///
    /// Used to persist replay state across process restarts; terminals
    /// with nothing accepted yet are omitted.
    pub fn snapshot(&self) -> Vec<(Ikid, u32)> {
        let terminals = self.terminals.read();
        terminals
            .iter()
            .filter_map(|(ikid, entry)| {
                let state = entry.lock();
                (state.last_accepted > 0).then_some((*ikid, state.last_accepted))
            })
            .collect()
    }

    /// Restore a terminal's high-water mark from a snapshot.
    ///
    /// Never lowers an existing mark, so restoring a stale snapshot
    /// cannot re-open the replay window.
    pub fn restore(&self, ikid: &Ikid, last_accepted: u32) {
        let entry = self.entry(ikid);
        let mut state = entry.lock();
        if last_accepted > state.last_accepted {
            state.last_accepted = last_accepted.min(MAX_COUNTER);
        }
    }

    fn entry(&self, ikid: &Ikid) -> Arc<Mutex<TerminalEntry>> {
        {
            let terminals = self.terminals.read();
            if let Some(entry) = terminals.get(ikid) {
                return Arc::clone(entry);
            }
        }

        let mut terminals = self.terminals.write();
        Arc::clone(
            terminals
                .entry(*ikid)
                .or_insert_with(|| Arc::new(Mutex::new(TerminalEntry { last_accepted: 0 }))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ikid(n: u8) -> Ikid {
        Ikid([n, 0, 0, 0, 0, 0, 0, n])
    }

    #[test]
    fn accepts_increasing_counters() {
        let table = CounterTable::new();
        let terminal = ikid(1);
        assert!(table.validate(&terminal, 1).is_ok());
        assert!(table.validate(&terminal, 2).is_ok());
        assert!(table.validate(&terminal, 100).is_ok());
        assert_eq!(table.last_accepted(&terminal), Some(100));
    }

    #[test]
    fn rejects_overflow() {
        let table = CounterTable::new();
        let result = table.validate(&ikid(1), MAX_COUNTER + 1);
        assert!(matches!(result, Err(DukptError::CounterOverflow { .. })));
        // 0x200000 specifically, per the published bound.
        assert!(matches!(
            table.validate(&ikid(1), 0x0020_0000),
            Err(DukptError::CounterOverflow { .. })
        ));
    }

    #[test]
    fn accepts_max_counter_once() {
        let table = CounterTable::new();
        let terminal = ikid(2);
        assert!(table.validate(&terminal, MAX_COUNTER).is_ok());
        assert_eq!(table.status(&terminal), TerminalStatus::Exhausted);
        assert!(matches!(
            table.validate(&terminal, MAX_COUNTER),
            Err(DukptError::ReplayDetected { .. })
        ));
    }

    #[test]
    fn rejects_replay() {
        let table = CounterTable::new();
        let terminal = ikid(3);
        table.validate(&terminal, 5).unwrap();
        assert!(matches!(
            table.validate(&terminal, 5),
            Err(DukptError::ReplayDetected { counter: 5 })
        ));
        assert!(matches!(
            table.validate(&terminal, 4),
            Err(DukptError::ReplayDetected { .. })
        ));
    }

    #[test]
    fn counter_zero_always_replays() {
        let table = CounterTable::new();
        assert!(matches!(
            table.validate(&ikid(4), 0),
            Err(DukptError::ReplayDetected { counter: 0 })
        ));
    }

    #[test]
    fn terminals_are_independent() {
        let table = CounterTable::new();
        table.validate(&ikid(5), 7).unwrap();
        // Same counter value on a different terminal is fine.
        assert!(table.validate(&ikid(6), 7).is_ok());
    }

    #[test]
    fn status_transitions() {
        let table = CounterTable::new();
        let terminal = ikid(7);
        assert_eq!(table.status(&terminal), TerminalStatus::Provisioned);
        table.validate(&terminal, 1).unwrap();
        assert_eq!(table.status(&terminal), TerminalStatus::Active);
        table.validate(&terminal, MAX_COUNTER).unwrap();
        assert_eq!(table.status(&terminal), TerminalStatus::Exhausted);
        table.reset(&terminal);
        assert_eq!(table.status(&terminal), TerminalStatus::Provisioned);
        // After a reset (re-key) the counter space is fresh again.
        assert!(table.validate(&terminal, 1).is_ok());
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let table = CounterTable::new();
        table.validate(&ikid(10), 17).unwrap();
        table.validate(&ikid(11), 3).unwrap();

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);

        let restored = CounterTable::new();
        for (terminal, counter) in snapshot {
            restored.restore(&terminal, counter);
        }
        assert!(matches!(
            restored.validate(&ikid(10), 17),
            Err(DukptError::ReplayDetected { .. })
        ));
        assert!(restored.validate(&ikid(10), 18).is_ok());
    }

    #[test]
    fn restore_never_lowers_the_mark() {
        let table = CounterTable::new();
        table.validate(&ikid(12), 50).unwrap();
        table.restore(&ikid(12), 10);
        assert!(matches!(
            table.validate(&ikid(12), 50),
            Err(DukptError::ReplayDetected { .. })
        ));
    }

    #[test]
    fn grant_carries_terminal_and_counter() {
        let table = CounterTable::new();
        let terminal = ikid(8);
        let grant = table.validate(&terminal, 42).unwrap();
        assert_eq!(grant.ikid(), &terminal);
        assert_eq!(grant.counter(), 42);
    }

    #[test]
    fn concurrent_same_counter_single_winner() {
        let table = Arc::new(CounterTable::new());
        let terminal = ikid(9);
        let successes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let successes = Arc::clone(&successes);
                std::thread::spawn(move || {
                    if table.validate(&terminal, 5).is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }
}
