//! Tenebra: an embedded transactional graph storage engine.
//!
//! Vertices and edges are multi-versioned; every read and write happens
//! inside a [`Transaction`] whose isolation level decides which versions
//! it can see. Commit outcomes live in a lock-free [`CommitLog`], a
//! garbage collector reclaims versions no transaction can reach, and an
//! optional snapshot engine gives point-in-time durability.
//!
//! ```
//! use tenebra::{Config, GraphDb, PropertyValue};
//!
//! let db = GraphDb::open(Config::ephemeral())?;
//! let tx = db.begin();
//! let ada = db.create_vertex(&tx);
//! let vertex = db.vertex(&tx, ada).unwrap();
//! vertex.add_label("Person")?;
//! vertex.set_property("name", PropertyValue::String("Ada".into()))?;
//! db.commit(&tx)?;
//! # Ok::<(), tenebra::StoreError>(())
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod db;
pub mod error;
pub mod mvcc;
pub mod snapshot;
pub mod storage;
pub mod tx;
pub mod types;

pub use config::Config;
pub use db::GraphDb;
pub use error::{Result, StoreError};
pub use snapshot::{SnapshotEngine, SnapshotKind};
pub use storage::{
    EdgeAccessor, GarbageCollector, GcHandle, GcStats, GraphStore, IndexDefinition, VertexAccessor,
};
pub use tx::{CommitLog, Transaction, TransactionEngine, TxOutcome, TxSnapshot};
pub use types::{
    EdgeId, EdgeTypeId, IsolationLevel, LabelId, PropertyId, PropertyValue, TransactionId,
    VertexId,
};
