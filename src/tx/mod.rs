//! Transaction engine: id allocation, active-set snapshots, commit/abort
//! bookkeeping against the commit log.

mod commit_log;
mod engine;

pub use commit_log::{CommitLog, TxOutcome};
pub use engine::TransactionEngine;

use std::sync::Arc;

use crate::types::{CommandId, IsolationLevel, TransactionId};

/// Set of transaction ids that were active when a transaction began.
///
/// Ids are kept sorted; membership is a binary search. The snapshot is
/// immutable and shared between the engine's registry and every handle
/// cloned from the transaction.
#[derive(Clone, Debug, Default)]
pub struct TxSnapshot {
    active: Vec<TransactionId>,
}

impl TxSnapshot {
    pub(crate) fn new(active: Vec<TransactionId>) -> Self {
        debug_assert!(active.windows(2).all(|w| w[0] < w[1]));
        Self { active }
    }

    /// Whether `id` was active at snapshot time.
    pub fn contains(&self, id: TransactionId) -> bool {
        self.active.binary_search(&id).is_ok()
    }

    /// Oldest id in the snapshot, if any.
    pub fn oldest(&self) -> Option<TransactionId> {
        self.active.first().copied()
    }

    /// Number of ids captured.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no transaction was active at snapshot time.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Handle to an open transaction.
///
/// Owned exclusively by the issuing session until committed or aborted.
/// The handle is a value: `advance` returns a refreshed copy with the
/// incremented command counter, while the snapshot stays fixed for the
/// transaction's lifetime.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub(crate) id: TransactionId,
    pub(crate) command_id: CommandId,
    pub(crate) snapshot: Arc<TxSnapshot>,
    pub(crate) isolation: IsolationLevel,
}

impl Transaction {
    /// The transaction's unique id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Current command counter within the transaction.
    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// The active-id set captured at begin time.
    pub fn snapshot(&self) -> &TxSnapshot {
        &self.snapshot
    }

    /// Isolation level this transaction reads under.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}
