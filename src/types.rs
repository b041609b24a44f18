//! Identifier newtypes, property values, and isolation levels.

use std::fmt;

/// Monotonically increasing 64-bit transaction identifier.
///
/// Doubles as a logical timestamp: engine-issued ids are totally ordered
/// by begin time, and every visibility decision compares them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Counter of logical sub-steps (commands) within one transaction.
pub type CommandId = u32;

/// Stable identifier of a vertex record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VertexId(pub u64);

/// Stable identifier of an edge record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EdgeId(pub u64);

/// Interned label name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LabelId(pub u32);

/// Interned property name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PropertyId(pub u32);

/// Interned edge-type name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EdgeTypeId(pub u32);

/// Value stored under a property name on a vertex or an edge.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw byte blob.
    Bytes(Vec<u8>),
}

/// Isolation level applied when resolving version visibility.
///
/// The level decides which creator/expirer transactions count as visible;
/// see [`crate::mvcc`] for the exact rule.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum IsolationLevel {
    /// Any writer is visible, even uncommitted ones. A later-aborted
    /// transaction's writes can be transiently observed; this matches the
    /// level's name and is intentional.
    ReadUncommitted,
    /// Writers become visible the instant their commit is recorded,
    /// re-checked live on every read.
    ReadCommitted,
    /// Only transactions that had committed before this transaction began
    /// are visible, fixed for the transaction's lifetime.
    #[default]
    SnapshotIsolation,
}
