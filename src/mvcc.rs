//! Per-entity version chains and the snapshot visibility rule.
//!
//! Every vertex and edge owns one [`VersionChain`]: an ordered sequence of
//! immutable versions stamped with the creating and (once superseded)
//! expiring transaction. Readers walk the chain newest-first and pick the
//! single version whose stamps are visible under their isolation level;
//! writers expire the live head and push a replacement. Chains are plain
//! owned vectors resolved through id-keyed tables, so links are indices
//! and reclamation never races a dangling pointer.

use crate::error::{Result, StoreError};
use crate::tx::{CommitLog, Transaction};
use crate::types::{CommandId, IsolationLevel, TransactionId};

/// Identifies the write that created or expired a version: the
/// transaction plus the command within it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stamp {
    /// Writing transaction.
    pub tx: TransactionId,
    /// Command counter of the transaction at write time.
    pub cmd: CommandId,
}

impl Stamp {
    /// Stamp for the current command of `tx`.
    pub fn of(tx: &Transaction) -> Self {
        Self {
            tx: tx.id(),
            cmd: tx.command_id(),
        }
    }
}

/// One immutable version of an entity's state.
#[derive(Clone, Debug)]
pub struct Version<T> {
    /// Entity payload at this point of the chain.
    pub data: T,
    /// A visible tombstone means the entity is deleted.
    pub tombstone: bool,
    /// Write that produced this version.
    pub created: Stamp,
    /// Write that superseded this version, once one has.
    pub expired: Option<Stamp>,
}

/// Whether the write stamped `stamp` is visible to `tx`.
///
/// Self-writes are visible to self regardless of commit state, bounded by
/// the command counter so a command never observes its own in-progress
/// output. For foreign writers:
///
/// - `ReadUncommitted` sees every writer, including ones that later
///   abort; that transient dirty read matches the level's name and is
///   deliberate.
/// - `ReadCommitted` consults the commit log live, so a concurrently
///   committing writer becomes visible immediately.
/// - `SnapshotIsolation` additionally requires the writer to have begun
///   and committed before `tx` began.
fn stamp_visible(stamp: Stamp, tx: &Transaction, log: &CommitLog) -> bool {
    if stamp.tx == tx.id() {
        return stamp.cmd <= tx.command_id();
    }
    match tx.isolation() {
        IsolationLevel::ReadUncommitted => true,
        IsolationLevel::ReadCommitted => log.is_committed(stamp.tx),
        IsolationLevel::SnapshotIsolation => {
            stamp.tx < tx.id() && !tx.snapshot().contains(stamp.tx) && log.is_committed(stamp.tx)
        }
    }
}

/// Newest-last sequence of an entity's versions.
///
/// Ownership is exclusive to the entity's table slot; concurrent access
/// goes through the table's per-entity lock. At most one version is
/// unexpired as seen by a single writer, and `created` always precedes
/// `expired` in commit order once both are set.
#[derive(Clone, Debug)]
pub struct VersionChain<T> {
    versions: Vec<Version<T>>,
}

impl<T: Clone> VersionChain<T> {
    /// Starts a chain with an initial version written by `by`.
    pub fn new(data: T, by: Stamp) -> Self {
        Self {
            versions: vec![Version {
                data,
                tombstone: false,
                created: by,
                expired: None,
            }],
        }
    }

    /// Number of versions currently held.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether the chain holds no versions at all.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Resolves the version visible to `tx`, tombstones included.
    ///
    /// Walks newest-first; under correct operation at most one version
    /// satisfies the rule at a given instant.
    pub fn visible(&self, tx: &Transaction, log: &CommitLog) -> Option<&Version<T>> {
        self.versions.iter().rev().find(|v| {
            stamp_visible(v.created, tx, log)
                && !v.expired.is_some_and(|exp| stamp_visible(exp, tx, log))
        })
    }

    /// Resolves the visible payload, treating a tombstone as nonexistent.
    pub fn visible_data(&self, tx: &Transaction, log: &CommitLog) -> Option<&T> {
        match self.visible(tx, log) {
            Some(v) if !v.tombstone => Some(&v.data),
            _ => None,
        }
    }

    /// Applies `mutate` to the entity on behalf of `tx`.
    ///
    /// If the live head was written by `tx` itself it is updated in
    /// place; otherwise the head is expired with `tx`'s stamp and a
    /// mutated copy is pushed as the new head.
    pub fn update_with<F>(&mut self, tx: &Transaction, log: &CommitLog, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        let idx = self.prepare_head(tx, log)?;
        if self.versions[idx].tombstone {
            return Err(StoreError::RecordDeleted("cannot mutate a deleted record"));
        }
        if self.versions[idx].created.tx == tx.id() {
            mutate(&mut self.versions[idx].data);
            return Ok(());
        }
        let stamp = Stamp::of(tx);
        self.versions[idx].expired = Some(stamp);
        let mut data = self.versions[idx].data.clone();
        mutate(&mut data);
        self.versions.push(Version {
            data,
            tombstone: false,
            created: stamp,
            expired: None,
        });
        Ok(())
    }

    /// Marks the entity deleted on behalf of `tx` by pushing a tombstone
    /// version (or tombstoning `tx`'s own head in place).
    pub fn delete(&mut self, tx: &Transaction, log: &CommitLog) -> Result<()> {
        let idx = self.prepare_head(tx, log)?;
        if self.versions[idx].tombstone {
            return Err(StoreError::RecordDeleted("record is already deleted"));
        }
        if self.versions[idx].created.tx == tx.id() {
            self.versions[idx].tombstone = true;
            return Ok(());
        }
        let stamp = Stamp::of(tx);
        self.versions[idx].expired = Some(stamp);
        let data = self.versions[idx].data.clone();
        self.versions.push(Version {
            data,
            tombstone: true,
            created: stamp,
            expired: None,
        });
        Ok(())
    }

    /// Validates and returns the index of the head version `tx` may write.
    ///
    /// Trailing versions created by aborted transactions are unlinked
    /// first, and a stale expirer left by an aborted writer is cleared so
    /// the head counts as live again. A head expired or created by a
    /// foreign transaction whose outcome is not Aborted is a write-write
    /// conflict, as is (under snapshot isolation) a head committed after
    /// `tx` began, which would otherwise be a lost update.
    fn prepare_head(&mut self, tx: &Transaction, log: &CommitLog) -> Result<usize> {
        while let Some(head) = self.versions.last() {
            if head.created.tx != tx.id() && log.is_aborted(head.created.tx) {
                self.versions.pop();
            } else {
                break;
            }
        }
        let idx = self
            .versions
            .len()
            .checked_sub(1)
            .ok_or(StoreError::RecordDeleted("record has no surviving version"))?;
        let head = &mut self.versions[idx];
        if let Some(exp) = head.expired {
            if exp.tx == tx.id() {
                return Err(StoreError::Corruption(
                    "head version expired by its own writer".into(),
                ));
            }
            if log.is_aborted(exp.tx) {
                head.expired = None;
            } else {
                return Err(StoreError::Serialization(
                    "record already superseded by a concurrent transaction",
                ));
            }
        }
        if head.created.tx != tx.id() {
            if !log.is_committed(head.created.tx) {
                return Err(StoreError::Serialization(
                    "record is being written by a concurrent transaction",
                ));
            }
            if tx.isolation() == IsolationLevel::SnapshotIsolation
                && (head.created.tx > tx.id() || tx.snapshot().contains(head.created.tx))
            {
                return Err(StoreError::Serialization(
                    "record changed after this transaction began",
                ));
            }
        }
        Ok(idx)
    }

    /// Unlinks versions no current or future transaction can observe.
    ///
    /// Reclaims versions created by aborted transactions, and versions
    /// expired by a committed transaction below `horizon`. Stale expirers
    /// from aborted writers are cleared so the surviving version reads as
    /// live. Returns the number of versions removed.
    pub fn prune(&mut self, horizon: TransactionId, log: &CommitLog) -> usize {
        let before = self.versions.len();
        for v in &mut self.versions {
            if let Some(exp) = v.expired {
                if log.is_aborted(exp.tx) {
                    v.expired = None;
                }
            }
        }
        self.versions.retain(|v| {
            if log.is_aborted(v.created.tx) {
                return false;
            }
            match v.expired {
                Some(exp) => !(log.is_committed(exp.tx) && exp.tx < horizon),
                None => true,
            }
        });
        before - self.versions.len()
    }

    /// Whether nothing meaningful survives: the chain is empty, or every
    /// remaining version is a committed tombstone below `horizon`. A
    /// defunct chain's entity can be physically destroyed.
    pub fn is_defunct(&self, horizon: TransactionId, log: &CommitLog) -> bool {
        self.versions.iter().all(|v| {
            v.tombstone && log.is_committed(v.created.tx) && v.created.tx < horizon
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TransactionEngine;
    use std::sync::Arc;

    fn setup() -> (Arc<CommitLog>, TransactionEngine) {
        let log = Arc::new(CommitLog::new());
        let engine = TransactionEngine::new(Arc::clone(&log), IsolationLevel::SnapshotIsolation);
        (log, engine)
    }

    #[test]
    fn own_writes_are_visible_before_commit() {
        let (log, engine) = setup();
        let t1 = engine.begin();
        let chain = VersionChain::new(1u32, Stamp::of(&t1));
        assert_eq!(chain.visible_data(&t1, &log), Some(&1));
    }

    #[test]
    fn snapshot_isolation_ignores_later_commits() {
        let (log, engine) = setup();
        let t1 = engine.begin();
        let chain = VersionChain::new(7u32, Stamp::of(&t1));
        let t2 = engine.begin();
        assert_eq!(chain.visible_data(&t2, &log), None);
        engine.commit(&t1).unwrap();
        // Snapshot fixed at begin: still invisible.
        assert_eq!(chain.visible_data(&t2, &log), None);
        let t3 = engine.begin();
        assert_eq!(chain.visible_data(&t3, &log), Some(&7));
    }

    #[test]
    fn read_committed_sees_commits_live() {
        let log = Arc::new(CommitLog::new());
        let engine = TransactionEngine::new(Arc::clone(&log), IsolationLevel::ReadCommitted);
        let t1 = engine.begin();
        let chain = VersionChain::new(7u32, Stamp::of(&t1));
        let t2 = engine.begin();
        assert_eq!(chain.visible_data(&t2, &log), None);
        engine.commit(&t1).unwrap();
        assert_eq!(chain.visible_data(&t2, &log), Some(&7));
    }

    #[test]
    fn read_uncommitted_sees_everything() {
        let log = Arc::new(CommitLog::new());
        let engine = TransactionEngine::new(Arc::clone(&log), IsolationLevel::ReadUncommitted);
        let t1 = engine.begin();
        let chain = VersionChain::new(7u32, Stamp::of(&t1));
        let t2 = engine.begin();
        assert_eq!(chain.visible_data(&t2, &log), Some(&7));
    }

    #[test]
    fn update_creates_version_and_preserves_old_reader_view() {
        let (log, engine) = setup();
        let t1 = engine.begin();
        let mut chain = VersionChain::new(1u32, Stamp::of(&t1));
        engine.commit(&t1).unwrap();

        let reader = engine.begin();
        let writer = engine.begin();
        chain.update_with(&writer, &log, |v| *v = 2).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.visible_data(&reader, &log), Some(&1));
        assert_eq!(chain.visible_data(&writer, &log), Some(&2));
        engine.commit(&writer).unwrap();
        // Old snapshot keeps the old view even after commit.
        assert_eq!(chain.visible_data(&reader, &log), Some(&1));
    }

    #[test]
    fn own_head_is_updated_in_place() {
        let (log, engine) = setup();
        let t1 = engine.begin();
        let mut chain = VersionChain::new(1u32, Stamp::of(&t1));
        chain.update_with(&t1, &log, |v| *v = 2).unwrap();
        chain.update_with(&t1, &log, |v| *v = 3).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.visible_data(&t1, &log), Some(&3));
    }

    #[test]
    fn concurrent_update_is_a_serialization_error() {
        let (log, engine) = setup();
        let t0 = engine.begin();
        let mut chain = VersionChain::new(1u32, Stamp::of(&t0));
        engine.commit(&t0).unwrap();

        let t1 = engine.begin();
        let t2 = engine.begin();
        chain.update_with(&t1, &log, |v| *v = 2).unwrap();
        let err = chain.update_with(&t2, &log, |v| *v = 3).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn aborted_writer_leaves_record_writable() {
        let (log, engine) = setup();
        let t0 = engine.begin();
        let mut chain = VersionChain::new(1u32, Stamp::of(&t0));
        engine.commit(&t0).unwrap();

        let t1 = engine.begin();
        let t2 = engine.begin();
        chain.update_with(&t1, &log, |v| *v = 2).unwrap();
        engine.abort(&t1).unwrap();
        // The stale expirer and orphaned version are cleared on retry.
        chain.update_with(&t2, &log, |v| *v = 3).unwrap();
        assert_eq!(chain.visible_data(&t2, &log), Some(&3));
    }

    #[test]
    fn snapshot_isolation_rejects_lost_update() {
        let (log, engine) = setup();
        let t0 = engine.begin();
        let mut chain = VersionChain::new(1u32, Stamp::of(&t0));
        engine.commit(&t0).unwrap();

        let t1 = engine.begin();
        let t2 = engine.begin();
        chain.update_with(&t1, &log, |v| *v = 2).unwrap();
        engine.commit(&t1).unwrap();
        // t2's snapshot predates t1's commit; overwriting would lose it.
        let err = chain.update_with(&t2, &log, |v| *v = 3).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn delete_pushes_tombstone() {
        let (log, engine) = setup();
        let t0 = engine.begin();
        let mut chain = VersionChain::new(1u32, Stamp::of(&t0));
        engine.commit(&t0).unwrap();

        let t1 = engine.begin();
        chain.delete(&t1, &log).unwrap();
        assert_eq!(chain.visible_data(&t1, &log), None);
        let err = chain.update_with(&t1, &log, |v| *v = 9).unwrap_err();
        assert!(matches!(err, StoreError::RecordDeleted(_)));
        engine.commit(&t1).unwrap();

        let t2 = engine.begin();
        assert_eq!(chain.visible_data(&t2, &log), None);
    }

    #[test]
    fn prune_reclaims_superseded_and_aborted_versions() {
        let (log, engine) = setup();
        let t0 = engine.begin();
        let mut chain = VersionChain::new(1u32, Stamp::of(&t0));
        engine.commit(&t0).unwrap();

        let t1 = engine.begin();
        chain.update_with(&t1, &log, |v| *v = 2).unwrap();
        engine.commit(&t1).unwrap();

        let t2 = engine.begin();
        chain.update_with(&t2, &log, |v| *v = 3).unwrap();
        engine.abort(&t2).unwrap();

        assert_eq!(chain.len(), 3);
        let horizon = engine.last_known_active();
        let removed = chain.prune(horizon, &log);
        assert_eq!(removed, 2);
        assert_eq!(chain.len(), 1);
        let t3 = engine.begin();
        assert_eq!(chain.visible_data(&t3, &log), Some(&2));
    }

    #[test]
    fn prune_keeps_versions_needed_by_active_snapshots() {
        let (log, engine) = setup();
        let t0 = engine.begin();
        let mut chain = VersionChain::new(1u32, Stamp::of(&t0));
        engine.commit(&t0).unwrap();

        let writer = engine.begin();
        let reader = engine.begin(); // holds writer in its snapshot
        chain.update_with(&writer, &log, |v| *v = 2).unwrap();
        engine.commit(&writer).unwrap();

        let horizon = engine.last_known_active();
        chain.prune(horizon, &log);
        // The reader began while the writer was active and must keep
        // seeing the original version.
        assert_eq!(chain.visible_data(&reader, &log), Some(&1));
        engine.commit(&reader).unwrap();
    }

    #[test]
    fn defunct_detection_for_committed_tombstones() {
        let (log, engine) = setup();
        let t0 = engine.begin();
        let mut chain = VersionChain::new(1u32, Stamp::of(&t0));
        engine.commit(&t0).unwrap();

        let t1 = engine.begin();
        chain.delete(&t1, &log).unwrap();
        engine.commit(&t1).unwrap();

        let horizon = engine.last_known_active();
        assert!(!chain.is_defunct(horizon, &log));
        chain.prune(horizon, &log);
        assert!(chain.is_defunct(horizon, &log));
    }
}
