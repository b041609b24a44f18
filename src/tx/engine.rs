use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::types::{CommandId, IsolationLevel, TransactionId};

use super::{CommitLog, Transaction, TxSnapshot};

struct TxRecord {
    command_id: CommandId,
    snapshot: Arc<TxSnapshot>,
    isolation: IsolationLevel,
}

struct EngineInner {
    /// Last id handed out; also the total number of transactions started.
    counter: u64,
    active: BTreeSet<TransactionId>,
    registry: FxHashMap<TransactionId, TxRecord>,
}

/// Issues transaction ids, tracks the active set, and drives commit/abort.
///
/// All mutating operations serialize behind one mutex: the id counter, the
/// active set, and the registry must change as a unit so no two
/// transactions ever observe conflicting active sets for the same id.
/// Begin/commit/abort are not the hot path; reads inside a transaction
/// are, and those never take this lock.
pub struct TransactionEngine {
    commit_log: Arc<CommitLog>,
    default_isolation: IsolationLevel,
    inner: Mutex<EngineInner>,
}

impl TransactionEngine {
    /// Creates an engine writing outcomes to `commit_log`.
    pub fn new(commit_log: Arc<CommitLog>, default_isolation: IsolationLevel) -> Self {
        Self {
            commit_log,
            default_isolation,
            inner: Mutex::new(EngineInner {
                counter: 0,
                active: BTreeSet::new(),
                registry: FxHashMap::default(),
            }),
        }
    }

    /// The commit log this engine finalizes into.
    pub fn commit_log(&self) -> &Arc<CommitLog> {
        &self.commit_log
    }

    /// Opens a new transaction under the engine's default isolation level.
    pub fn begin(&self) -> Transaction {
        self.begin_with_isolation(self.default_isolation)
    }

    /// Opens a new transaction reading under `isolation`.
    ///
    /// Allocates the next id, snapshots the current active set, and
    /// registers the transaction, all atomically.
    pub fn begin_with_isolation(&self, isolation: IsolationLevel) -> Transaction {
        let mut inner = self.inner.lock();
        inner.counter += 1;
        let id = TransactionId(inner.counter);
        let snapshot = Arc::new(TxSnapshot::new(inner.active.iter().copied().collect()));
        inner.active.insert(id);
        inner.registry.insert(
            id,
            TxRecord {
                command_id: 1,
                snapshot: Arc::clone(&snapshot),
                isolation,
            },
        );
        debug!(tx_id = id.0, active = inner.active.len(), "tx.begin");
        Transaction {
            id,
            command_id: 1,
            snapshot,
            isolation,
        }
    }

    /// Starts a new logical command within the transaction identified by
    /// `id` and returns a refreshed handle.
    pub fn advance(&self, id: TransactionId) -> Result<Transaction> {
        let mut inner = self.inner.lock();
        let record = inner
            .registry
            .get_mut(&id)
            .ok_or(StoreError::NoSuchTransaction(id.0))?;
        record.command_id += 1;
        Ok(Transaction {
            id,
            command_id: record.command_id,
            snapshot: Arc::clone(&record.snapshot),
            isolation: record.isolation,
        })
    }

    /// Commits the transaction: records the outcome, then deactivates it.
    ///
    /// The outcome is written before the id leaves the active set so no
    /// concurrent visibility check can conclude "unknown" for a
    /// transaction it no longer considers active.
    pub fn commit(&self, tx: &Transaction) -> Result<()> {
        self.finalize(tx.id, true)
    }

    /// Aborts the transaction; all of its versions become garbage.
    pub fn abort(&self, tx: &Transaction) -> Result<()> {
        self.finalize(tx.id, false)
    }

    fn finalize(&self, id: TransactionId, committed: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.registry.contains_key(&id) {
            return Err(StoreError::NoSuchTransaction(id.0));
        }
        if committed {
            self.commit_log.set_committed(id);
        } else {
            self.commit_log.set_aborted(id);
        }
        inner.active.remove(&id);
        inner.registry.remove(&id);
        debug!(tx_id = id.0, committed, "tx.finalize");
        Ok(())
    }

    /// Lower bound of all possibly-relevant version stamps, or the next
    /// unissued id when nothing is active.
    ///
    /// For each active transaction the bound accounts for the oldest id in
    /// its snapshot, not just its own id: a writer that committed after a
    /// reader began is still relevant to that reader. Every version
    /// expired by a committed transaction below this bound is invisible to
    /// all current and future transactions, which makes it the garbage
    /// collection horizon.
    pub fn last_known_active(&self) -> TransactionId {
        let inner = self.inner.lock();
        inner
            .active
            .iter()
            .map(|id| {
                inner
                    .registry
                    .get(id)
                    .and_then(|record| record.snapshot.oldest())
                    .unwrap_or(*id)
            })
            .min()
            .unwrap_or(TransactionId(inner.counter + 1))
    }

    /// Total number of transactions ever started.
    pub fn count(&self) -> u64 {
        self.inner.lock().counter
    }

    /// Number of currently active transactions.
    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TransactionEngine {
        TransactionEngine::new(Arc::new(CommitLog::new()), IsolationLevel::SnapshotIsolation)
    }

    #[test]
    fn begin_snapshots_active_set() {
        let engine = engine();
        let t1 = engine.begin();
        assert!(t1.snapshot().is_empty());
        let t2 = engine.begin();
        assert!(t2.snapshot().contains(t1.id()));
        assert!(!t2.snapshot().contains(t2.id()));
        assert_eq!(engine.active_count(), 2);
        assert_eq!(engine.count(), 2);
    }

    #[test]
    fn advance_bumps_command_id() {
        let engine = engine();
        let tx = engine.begin();
        assert_eq!(tx.command_id(), 1);
        let tx = engine.advance(tx.id()).unwrap();
        assert_eq!(tx.command_id(), 2);
        let tx = engine.advance(tx.id()).unwrap();
        assert_eq!(tx.command_id(), 3);
    }

    #[test]
    fn advance_unknown_id_fails() {
        let engine = engine();
        let err = engine.advance(TransactionId(42)).unwrap_err();
        assert!(matches!(err, StoreError::NoSuchTransaction(42)));
    }

    #[test]
    fn commit_records_outcome_and_deactivates() {
        let engine = engine();
        let tx = engine.begin();
        engine.commit(&tx).unwrap();
        assert!(engine.commit_log().is_committed(tx.id()));
        assert_eq!(engine.active_count(), 0);
        assert!(engine.advance(tx.id()).is_err());
    }

    #[test]
    fn second_finalize_fails_without_flipping() {
        let engine = engine();
        let tx = engine.begin();
        engine.commit(&tx).unwrap();
        let err = engine.abort(&tx).unwrap_err();
        assert!(matches!(err, StoreError::NoSuchTransaction(_)));
        assert!(engine.commit_log().is_committed(tx.id()));
    }

    #[test]
    fn last_known_active_tracks_oldest() {
        let engine = engine();
        let t1 = engine.begin();
        let t2 = engine.begin();
        assert_eq!(engine.last_known_active(), t1.id());
        engine.commit(&t1).unwrap();
        // t2 began while t1 was active, so t1's versions stay relevant.
        assert_eq!(engine.last_known_active(), t1.id());
        engine.abort(&t2).unwrap();
        // Nothing active: bound is the next unissued id.
        assert_eq!(engine.last_known_active(), TransactionId(3));

        let t3 = engine.begin();
        assert_eq!(engine.last_known_active(), t3.id());
        engine.commit(&t3).unwrap();
    }
}
