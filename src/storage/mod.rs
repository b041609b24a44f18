//! Graph storage: entity tables, name dictionaries, label index, and the
//! record accessors the execution layer reads and writes through.
//!
//! Vertices and edges live in id-keyed tables; each entry owns the
//! entity's [`VersionChain`] behind a per-entity `RwLock` that doubles as
//! the entity-level write lock. Readers take the read side briefly to
//! clone the visible version out, so the garbage collector can never pull
//! a version from under an in-flight accessor.

mod edge;
mod gc;
mod vertex;

pub use edge::{Edge, EdgeAccessor};
pub use gc::{GarbageCollector, GcHandle, GcStats};
pub use vertex::{Vertex, VertexAccessor};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::mvcc::{Stamp, VersionChain};
use crate::tx::{CommitLog, Transaction};
use crate::types::{EdgeId, EdgeTypeId, LabelId, PropertyId, VertexId};

/// Declaration of an index over a label, optionally narrowed to one
/// property. Definitions are part of the durable state; contents are
/// rebuilt from the data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexDefinition {
    /// Indexed label.
    pub label: LabelId,
    /// Indexed property, for label+property indexes.
    pub property: Option<PropertyId>,
}

/// Interned `name <-> u32` dictionary. Ids are dense and never reused.
pub(crate) struct NameDict {
    inner: RwLock<DictInner>,
}

#[derive(Default)]
struct DictInner {
    by_name: FxHashMap<String, u32>,
    names: Vec<String>,
}

impl NameDict {
    fn new() -> Self {
        Self {
            inner: RwLock::new(DictInner::default()),
        }
    }

    /// Returns the id for `name`, interning it if unseen.
    pub(crate) fn intern(&self, name: &str) -> u32 {
        if let Some(id) = self.inner.read().by_name.get(name) {
            return *id;
        }
        let mut inner = self.inner.write();
        if let Some(id) = inner.by_name.get(name) {
            return *id;
        }
        let id = inner.names.len() as u32;
        inner.names.push(name.to_owned());
        inner.by_name.insert(name.to_owned(), id);
        id
    }

    pub(crate) fn id_of(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    pub(crate) fn name_of(&self, id: u32) -> Option<String> {
        self.inner.read().names.get(id as usize).cloned()
    }

    /// Snapshot of all `(id, name)` pairs in id order.
    pub(crate) fn entries(&self) -> Vec<(u32, String)> {
        self.inner
            .read()
            .names
            .iter()
            .enumerate()
            .map(|(id, name)| (id as u32, name.clone()))
            .collect()
    }
}

type ChainTable<I, T> = RwLock<FxHashMap<I, Arc<RwLock<VersionChain<T>>>>>;

/// The storage layer: owns all entity version chains and dictionaries.
///
/// Thread-safe; transactions interact through [`VertexAccessor`] /
/// [`EdgeAccessor`] handles obtained from [`GraphStore::vertex`] and
/// [`GraphStore::edge`].
pub struct GraphStore {
    commit_log: Arc<CommitLog>,
    pub(crate) lock_timeout: Duration,

    pub(crate) vertices: ChainTable<VertexId, Vertex>,
    pub(crate) edges: ChainTable<EdgeId, Edge>,
    next_vertex_id: AtomicU64,
    next_edge_id: AtomicU64,

    pub(crate) property_names: NameDict,
    pub(crate) label_names: NameDict,
    pub(crate) edge_type_names: NameDict,

    pub(crate) label_index: RwLock<FxHashMap<LabelId, BTreeSet<VertexId>>>,
    index_defs: RwLock<Vec<IndexDefinition>>,
}

impl GraphStore {
    /// Creates an empty store finalizing against `commit_log`.
    pub fn new(commit_log: Arc<CommitLog>, lock_timeout: Duration) -> Self {
        Self {
            commit_log,
            lock_timeout,
            vertices: RwLock::new(FxHashMap::default()),
            edges: RwLock::new(FxHashMap::default()),
            next_vertex_id: AtomicU64::new(1),
            next_edge_id: AtomicU64::new(1),
            property_names: NameDict::new(),
            label_names: NameDict::new(),
            edge_type_names: NameDict::new(),
            label_index: RwLock::new(FxHashMap::default()),
            index_defs: RwLock::new(Vec::new()),
        }
    }

    /// The commit log visibility checks consult.
    pub fn commit_log(&self) -> &CommitLog {
        &self.commit_log
    }

    /// Creates a new vertex owned by `tx` and returns its id.
    pub fn create_vertex(&self, tx: &Transaction) -> VertexId {
        let id = VertexId(self.next_vertex_id.fetch_add(1, Ordering::Relaxed));
        let chain = Arc::new(RwLock::new(VersionChain::new(
            Vertex::default(),
            Stamp::of(tx),
        )));
        self.vertices.write().insert(id, chain);
        debug!(tx_id = tx.id().0, vertex = id.0, "storage.vertex.created");
        id
    }

    /// Returns an accessor for the vertex if it is visible to `tx`.
    pub fn vertex<'a>(&'a self, tx: &'a Transaction, id: VertexId) -> Option<VertexAccessor<'a>> {
        let chain = Arc::clone(self.vertices.read().get(&id)?);
        if chain.read().visible_data(tx, &self.commit_log).is_none() {
            return None;
        }
        Some(VertexAccessor {
            store: self,
            tx,
            id,
            chain,
        })
    }

    /// Returns an accessor for the edge if it is visible to `tx`.
    pub fn edge<'a>(&'a self, tx: &'a Transaction, id: EdgeId) -> Option<EdgeAccessor<'a>> {
        let chain = Arc::clone(self.edges.read().get(&id)?);
        if chain.read().visible_data(tx, &self.commit_log).is_none() {
            return None;
        }
        Some(EdgeAccessor {
            store: self,
            tx,
            id,
            chain,
        })
    }

    /// Creates an edge of type `edge_type` between two visible vertices.
    ///
    /// Adjacency lives inside the endpoint vertex versions, so both
    /// endpoints are updated under their entity locks, taken in ascending
    /// id order to avoid deadlock cycles across multi-entity writes.
    pub fn create_edge(
        &self,
        tx: &Transaction,
        from: VertexId,
        to: VertexId,
        edge_type: &str,
    ) -> Result<EdgeId> {
        let type_id = EdgeTypeId(self.edge_type_names.intern(edge_type));
        let id = EdgeId(self.next_edge_id.fetch_add(1, Ordering::Relaxed));
        let chain = Arc::new(RwLock::new(VersionChain::new(
            Edge {
                from,
                to,
                edge_type: type_id,
                properties: Default::default(),
            },
            Stamp::of(tx),
        )));
        self.edges.write().insert(id, chain);

        let result = self.link_endpoints(tx, id, from, to);
        if let Err(err) = result {
            // The half-linked edge was only ever visible to `tx`, but the
            // error is recoverable and `tx` may continue and commit: undo
            // any adjacency entry already applied before dropping the
            // chain, or the committed vertex would carry a dangling id.
            self.unlink_endpoints(tx, id, from, to);
            self.edges.write().remove(&id);
            return Err(err);
        }
        debug!(
            tx_id = tx.id().0,
            edge = id.0,
            from = from.0,
            to = to.0,
            "storage.edge.created"
        );
        Ok(id)
    }

    fn link_endpoints(
        &self,
        tx: &Transaction,
        edge: EdgeId,
        from: VertexId,
        to: VertexId,
    ) -> Result<()> {
        let mut endpoints = [from, to];
        endpoints.sort();
        for endpoint in endpoints {
            let accessor = self.vertex(tx, endpoint).ok_or(StoreError::RecordDeleted(
                "edge endpoint is not visible to this transaction",
            ))?;
            if endpoint == from {
                accessor.adjacency_add(edge, true)?;
            }
            if endpoint == to {
                accessor.adjacency_add(edge, false)?;
            }
        }
        Ok(())
    }

    fn unlink_endpoints(&self, tx: &Transaction, edge: EdgeId, from: VertexId, to: VertexId) {
        let mut endpoints = vec![from, to];
        endpoints.sort();
        endpoints.dedup();
        for endpoint in endpoints {
            if let Some(vertex) = self.vertex(tx, endpoint) {
                // Removing `tx`'s own in-place adjacency write cannot
                // conflict; a missing entry is a no-op.
                let _ = vertex.adjacency_remove(edge);
            }
        }
    }

    /// Deletes the edge and removes it from both endpoints' adjacency.
    pub fn delete_edge(&self, tx: &Transaction, id: EdgeId) -> Result<()> {
        let accessor = self
            .edge(tx, id)
            .ok_or(StoreError::RecordDeleted("edge is not visible"))?;
        let edge = accessor.current()?;
        let mut endpoints = vec![edge.from, edge.to];
        endpoints.sort();
        endpoints.dedup();
        for endpoint in endpoints {
            if let Some(vertex) = self.vertex(tx, endpoint) {
                vertex.adjacency_remove(id)?;
            }
        }
        let mut chain = accessor
            .chain
            .try_write_for(self.lock_timeout)
            .ok_or(StoreError::LockTimeout("edge entity lock"))?;
        chain.delete(tx, &self.commit_log)
    }

    /// Deletes the vertex; fails while incident edges are still visible.
    pub fn delete_vertex(&self, tx: &Transaction, id: VertexId) -> Result<()> {
        let accessor = self
            .vertex(tx, id)
            .ok_or(StoreError::RecordDeleted("vertex is not visible"))?;
        let vertex = accessor.current()?;
        if !vertex.in_edges.is_empty() || !vertex.out_edges.is_empty() {
            return Err(StoreError::InvalidArgument(
                "vertex still has incident edges; use detach_delete_vertex".into(),
            ));
        }
        let mut chain = accessor
            .chain
            .try_write_for(self.lock_timeout)
            .ok_or(StoreError::LockTimeout("vertex entity lock"))?;
        chain.delete(tx, &self.commit_log)
    }

    /// Deletes the vertex together with all visible incident edges.
    pub fn detach_delete_vertex(&self, tx: &Transaction, id: VertexId) -> Result<()> {
        let accessor = self
            .vertex(tx, id)
            .ok_or(StoreError::RecordDeleted("vertex is not visible"))?;
        let vertex = accessor.current()?;
        let mut incident: Vec<EdgeId> = vertex
            .in_edges
            .iter()
            .chain(vertex.out_edges.iter())
            .copied()
            .collect();
        incident.sort();
        incident.dedup();
        for edge in incident {
            self.delete_edge(tx, edge)?;
        }
        self.delete_vertex(tx, id)
    }

    /// Ids of all vertices visible to `tx`, in id order.
    pub fn vertices(&self, tx: &Transaction) -> Vec<VertexId> {
        let chains: Vec<_> = self
            .vertices
            .read()
            .iter()
            .map(|(id, chain)| (*id, Arc::clone(chain)))
            .collect();
        let mut ids: Vec<_> = chains
            .into_iter()
            .filter(|(_, chain)| chain.read().visible_data(tx, &self.commit_log).is_some())
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Ids of all edges visible to `tx`, in id order.
    pub fn edges(&self, tx: &Transaction) -> Vec<EdgeId> {
        let chains: Vec<_> = self
            .edges
            .read()
            .iter()
            .map(|(id, chain)| (*id, Arc::clone(chain)))
            .collect();
        let mut ids: Vec<_> = chains
            .into_iter()
            .filter(|(_, chain)| chain.read().visible_data(tx, &self.commit_log).is_some())
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Number of vertices visible to `tx`.
    pub fn vertex_count(&self, tx: &Transaction) -> usize {
        self.vertices(tx).len()
    }

    /// Number of edges visible to `tx`.
    pub fn edge_count(&self, tx: &Transaction) -> usize {
        self.edges(tx).len()
    }

    /// Declares an index; returns whether the definition is new.
    pub fn create_index(&self, label: &str, property: Option<&str>) -> bool {
        let definition = IndexDefinition {
            label: LabelId(self.label_names.intern(label)),
            property: property.map(|p| PropertyId(self.property_names.intern(p))),
        };
        let mut defs = self.index_defs.write();
        if defs.contains(&definition) {
            return false;
        }
        defs.push(definition);
        true
    }

    /// Snapshot of all index definitions.
    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.index_defs.read().clone()
    }

    /// Resolved `(label, property)` names of all index definitions.
    pub fn index_definition_names(&self) -> Vec<(String, Option<String>)> {
        self.index_definitions()
            .into_iter()
            .filter_map(|def| {
                let label = self.label_names.name_of(def.label.0)?;
                let property = match def.property {
                    Some(p) => Some(self.property_names.name_of(p.0)?),
                    None => None,
                };
                Some((label, property))
            })
            .collect()
    }

    /// Vertices carrying `label`, visible to `tx`.
    ///
    /// Index entries are candidates only; each one is re-checked through
    /// the accessor so uncommitted or since-removed labels never leak.
    pub fn vertices_with_label(&self, tx: &Transaction, label: &str) -> Vec<VertexId> {
        let Some(label_id) = self.label_names.id_of(label) else {
            return Vec::new();
        };
        let candidates: Vec<VertexId> = self
            .label_index
            .read()
            .get(&LabelId(label_id))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        candidates
            .into_iter()
            .filter(|id| {
                self.vertex(tx, *id)
                    .and_then(|v| v.has_label(label).ok())
                    .unwrap_or(false)
            })
            .collect()
    }

    pub(crate) fn index_label(&self, label: LabelId, vertex: VertexId) {
        self.label_index.write().entry(label).or_default().insert(vertex);
    }

    /// Resolved label name, for serialization.
    pub fn label_name(&self, id: LabelId) -> Option<String> {
        self.label_names.name_of(id.0)
    }

    /// Resolved property name, for serialization.
    pub fn property_name(&self, id: PropertyId) -> Option<String> {
        self.property_names.name_of(id.0)
    }

    /// Resolved edge-type name, for serialization.
    pub fn edge_type_name(&self, id: EdgeTypeId) -> Option<String> {
        self.edge_type_names.name_of(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TransactionEngine;
    use crate::types::{IsolationLevel, PropertyValue};

    fn setup() -> (Arc<GraphStore>, Arc<TransactionEngine>) {
        let log = Arc::new(CommitLog::new());
        let store = Arc::new(GraphStore::new(
            Arc::clone(&log),
            Duration::from_millis(100),
        ));
        let engine = Arc::new(TransactionEngine::new(
            log,
            IsolationLevel::SnapshotIsolation,
        ));
        (store, engine)
    }

    #[test]
    fn dictionary_interns_once() {
        let dict = NameDict::new();
        let a = dict.intern("name");
        let b = dict.intern("name");
        assert_eq!(a, b);
        assert_eq!(dict.intern("age"), 1);
        assert_eq!(dict.name_of(a), Some("name".to_owned()));
        assert_eq!(dict.id_of("missing"), None);
        assert_eq!(dict.entries().len(), 2);
    }

    #[test]
    fn vertex_properties_and_labels_roundtrip() {
        let (store, engine) = setup();
        let tx = engine.begin();
        let id = store.create_vertex(&tx);
        let vertex = store.vertex(&tx, id).unwrap();
        vertex
            .set_property("name", PropertyValue::String("ada".into()))
            .unwrap();
        assert!(vertex.add_label("Person").unwrap());
        assert!(!vertex.add_label("Person").unwrap());
        assert!(vertex.has_label("Person").unwrap());
        assert_eq!(
            vertex.get_property("name").unwrap(),
            Some(PropertyValue::String("ada".into()))
        );
        assert_eq!(vertex.get_property("missing").unwrap(), None);
        assert_eq!(vertex.remove_label("Person").unwrap(), 1);
        assert_eq!(vertex.remove_label("Person").unwrap(), 0);
        engine.commit(&tx).unwrap();
    }

    #[test]
    fn edges_maintain_adjacency() {
        let (store, engine) = setup();
        let tx = engine.begin();
        let a = store.create_vertex(&tx);
        let b = store.create_vertex(&tx);
        let e = store.create_edge(&tx, a, b, "KNOWS").unwrap();

        let va = store.vertex(&tx, a).unwrap();
        let vb = store.vertex(&tx, b).unwrap();
        assert_eq!(va.out_edges().unwrap(), vec![e]);
        assert!(va.in_edges().unwrap().is_empty());
        assert_eq!(vb.in_edges().unwrap(), vec![e]);

        let edge = store.edge(&tx, e).unwrap();
        assert_eq!(edge.from().unwrap(), a);
        assert_eq!(edge.to().unwrap(), b);
        assert_eq!(edge.type_name().unwrap(), "KNOWS");

        store.delete_edge(&tx, e).unwrap();
        assert!(store.edge(&tx, e).is_none());
        let va = store.vertex(&tx, a).unwrap();
        assert!(va.out_edges().unwrap().is_empty());
        engine.commit(&tx).unwrap();
    }

    #[test]
    fn delete_vertex_requires_detach() {
        let (store, engine) = setup();
        let tx = engine.begin();
        let a = store.create_vertex(&tx);
        let b = store.create_vertex(&tx);
        store.create_edge(&tx, a, b, "KNOWS").unwrap();

        let err = store.delete_vertex(&tx, a).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        store.detach_delete_vertex(&tx, a).unwrap();
        assert!(store.vertex(&tx, a).is_none());
        assert_eq!(store.edge_count(&tx), 0);
        assert_eq!(store.vertex_count(&tx), 1);
        engine.commit(&tx).unwrap();
    }

    #[test]
    fn self_loop_edges_delete_cleanly() {
        let (store, engine) = setup();
        let tx = engine.begin();
        let a = store.create_vertex(&tx);
        let e = store.create_edge(&tx, a, a, "SELF").unwrap();
        let va = store.vertex(&tx, a).unwrap();
        assert_eq!(va.out_edges().unwrap(), vec![e]);
        assert_eq!(va.in_edges().unwrap(), vec![e]);

        store.delete_edge(&tx, e).unwrap();
        let va = store.vertex(&tx, a).unwrap();
        assert_eq!(va.out_degree().unwrap(), 0);
        assert_eq!(va.in_degree().unwrap(), 0);
        store.delete_vertex(&tx, a).unwrap();
        engine.commit(&tx).unwrap();
    }

    #[test]
    fn failed_edge_creation_leaves_no_adjacency() {
        let (store, engine) = setup();
        let init = engine.begin();
        let a = store.create_vertex(&init);
        let b = store.create_vertex(&init);
        engine.commit(&init).unwrap();

        let tx = engine.begin();
        store.delete_vertex(&tx, b).unwrap();
        let err = store.create_edge(&tx, a, b, "KNOWS").unwrap_err();
        assert!(matches!(err, StoreError::RecordDeleted(_)));

        // The failed edge must not linger in the surviving endpoint.
        let va = store.vertex(&tx, a).unwrap();
        assert_eq!(va.out_degree().unwrap(), 0);
        store.delete_vertex(&tx, a).unwrap();
        engine.commit(&tx).unwrap();

        let check = engine.begin();
        assert_eq!(store.vertex_count(&check), 0);
        assert_eq!(store.edge_count(&check), 0);
        engine.commit(&check).unwrap();
    }

    #[test]
    fn contended_entity_lock_times_out() {
        let (store, engine) = setup();
        let tx = engine.begin();
        let id = store.create_vertex(&tx);
        engine.commit(&tx).unwrap();

        let t2 = engine.begin();
        let accessor = store.vertex(&t2, id).unwrap();
        let chain = Arc::clone(store.vertices.read().get(&id).unwrap());
        let guard = chain.write();
        let err = accessor
            .set_property("v", PropertyValue::Int(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        assert!(err.is_retryable());

        drop(guard);
        accessor.set_property("v", PropertyValue::Int(1)).unwrap();
        engine.commit(&t2).unwrap();
    }

    #[test]
    fn remove_property_reports_presence() {
        let (store, engine) = setup();
        let tx = engine.begin();
        let a = store.create_vertex(&tx);
        let b = store.create_vertex(&tx);
        let vertex = store.vertex(&tx, a).unwrap();
        vertex
            .set_property("name", PropertyValue::String("ada".into()))
            .unwrap();
        assert!(vertex.remove_property("name").unwrap());
        assert!(!vertex.remove_property("name").unwrap());
        assert!(!vertex.remove_property("never_set").unwrap());
        assert_eq!(vertex.get_property("name").unwrap(), None);

        let e = store.create_edge(&tx, a, b, "KNOWS").unwrap();
        let edge = store.edge(&tx, e).unwrap();
        edge.set_property("weight", PropertyValue::Int(3)).unwrap();
        assert!(edge.remove_property("weight").unwrap());
        assert!(!edge.remove_property("weight").unwrap());
        assert_eq!(edge.get_property("weight").unwrap(), None);
        engine.commit(&tx).unwrap();
    }

    #[test]
    fn label_index_filters_by_visibility() {
        let (store, engine) = setup();
        let t1 = engine.begin();
        let id = store.create_vertex(&t1);
        store.vertex(&t1, id).unwrap().add_label("Person").unwrap();

        // Uncommitted label never leaks to a snapshot reader.
        let t2 = engine.begin();
        assert!(store.vertices_with_label(&t2, "Person").is_empty());
        engine.commit(&t1).unwrap();
        engine.abort(&t2).unwrap();

        let t3 = engine.begin();
        assert_eq!(store.vertices_with_label(&t3, "Person"), vec![id]);
        engine.commit(&t3).unwrap();
    }

    #[test]
    fn uncommitted_vertex_invisible_to_others() {
        let (store, engine) = setup();
        let t1 = engine.begin();
        let id = store.create_vertex(&t1);
        let t2 = engine.begin();
        assert!(store.vertex(&t2, id).is_none());
        assert_eq!(store.vertex_count(&t2), 0);
        assert_eq!(store.vertex_count(&t1), 1);
        engine.commit(&t1).unwrap();
        engine.commit(&t2).unwrap();
    }
}
