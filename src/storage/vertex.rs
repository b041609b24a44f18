use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::error::{Result, StoreError};
use crate::mvcc::VersionChain;
use crate::tx::Transaction;
use crate::types::{EdgeId, LabelId, PropertyId, PropertyValue, VertexId};

use super::GraphStore;

/// Versioned payload of a vertex: label set, properties, and non-owning
/// adjacency (ids of incident edges, owned by the central edge table).
#[derive(Clone, Debug, Default)]
pub struct Vertex {
    pub(crate) labels: SmallVec<[LabelId; 4]>,
    pub(crate) properties: BTreeMap<PropertyId, PropertyValue>,
    pub(crate) in_edges: SmallVec<[EdgeId; 4]>,
    pub(crate) out_edges: SmallVec<[EdgeId; 4]>,
}

impl Vertex {
    pub(crate) fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }
}

/// MVCC-aware handle to one vertex, bound to a transaction.
///
/// Every read resolves the version visible to the owning transaction at
/// call time; every write goes through the entity lock with the
/// configured bounded wait.
pub struct VertexAccessor<'a> {
    pub(crate) store: &'a GraphStore,
    pub(crate) tx: &'a Transaction,
    pub(crate) id: VertexId,
    pub(crate) chain: Arc<RwLock<VersionChain<Vertex>>>,
}

impl<'a> VertexAccessor<'a> {
    /// Stable id of the vertex.
    pub fn id(&self) -> VertexId {
        self.id
    }

    pub(crate) fn current(&self) -> Result<Vertex> {
        self.chain
            .read()
            .visible_data(self.tx, self.store.commit_log())
            .cloned()
            .ok_or(StoreError::RecordDeleted(
                "vertex is not visible to this transaction",
            ))
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vertex),
    {
        let mut chain = self
            .chain
            .try_write_for(self.store.lock_timeout)
            .ok_or(StoreError::LockTimeout("vertex entity lock"))?;
        chain.update_with(self.tx, self.store.commit_log(), f)
    }

    /// Returns the property stored under `name`, if any.
    pub fn get_property(&self, name: &str) -> Result<Option<PropertyValue>> {
        let Some(prop) = self.store.property_names.id_of(name) else {
            return Ok(None);
        };
        Ok(self.current()?.properties.get(&PropertyId(prop)).cloned())
    }

    /// Sets (or replaces) the property `name`.
    pub fn set_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        let prop = PropertyId(self.store.property_names.intern(name));
        self.mutate(|v| {
            v.properties.insert(prop, value);
        })
    }

    /// Removes the property `name`; returns whether it was present.
    pub fn remove_property(&self, name: &str) -> Result<bool> {
        let Some(prop) = self.store.property_names.id_of(name) else {
            return Ok(false);
        };
        let prop = PropertyId(prop);
        if !self.current()?.properties.contains_key(&prop) {
            return Ok(false);
        }
        self.mutate(|v| {
            v.properties.remove(&prop);
        })?;
        Ok(true)
    }

    /// Adds a label; returns whether the vertex gained it.
    pub fn add_label(&self, name: &str) -> Result<bool> {
        let label = LabelId(self.store.label_names.intern(name));
        if self.current()?.has_label(label) {
            return Ok(false);
        }
        self.mutate(|v| {
            if !v.has_label(label) {
                v.labels.push(label);
            }
        })?;
        self.store.index_label(label, self.id);
        Ok(true)
    }

    /// Removes a label; returns the number of labels removed (0 or 1).
    pub fn remove_label(&self, name: &str) -> Result<usize> {
        let Some(label) = self.store.label_names.id_of(name) else {
            return Ok(0);
        };
        let label = LabelId(label);
        if !self.current()?.has_label(label) {
            return Ok(0);
        }
        self.mutate(|v| {
            v.labels.retain(|l| *l != label);
        })?;
        Ok(1)
    }

    /// Whether the vertex carries the label.
    pub fn has_label(&self, name: &str) -> Result<bool> {
        match self.store.label_names.id_of(name) {
            Some(label) => Ok(self.current()?.has_label(LabelId(label))),
            None => Ok(false),
        }
    }

    /// Resolved names of all labels on the vertex.
    pub fn labels(&self) -> Result<Vec<String>> {
        self.current()?
            .labels
            .iter()
            .map(|l| {
                self.store
                    .label_names
                    .name_of(l.0)
                    .ok_or_else(|| StoreError::Corruption("label id without a name".into()))
            })
            .collect()
    }

    /// All properties of the vertex with resolved names.
    pub fn properties(&self) -> Result<Vec<(String, PropertyValue)>> {
        self.current()?
            .properties
            .iter()
            .map(|(id, value)| {
                let name = self
                    .store
                    .property_names
                    .name_of(id.0)
                    .ok_or_else(|| StoreError::Corruption("property id without a name".into()))?;
                Ok((name, value.clone()))
            })
            .collect()
    }

    /// Ids of incoming edges.
    pub fn in_edges(&self) -> Result<Vec<EdgeId>> {
        Ok(self.current()?.in_edges.to_vec())
    }

    /// Ids of outgoing edges.
    pub fn out_edges(&self) -> Result<Vec<EdgeId>> {
        Ok(self.current()?.out_edges.to_vec())
    }

    /// Number of incoming edges.
    pub fn in_degree(&self) -> Result<usize> {
        Ok(self.current()?.in_edges.len())
    }

    /// Number of outgoing edges.
    pub fn out_degree(&self) -> Result<usize> {
        Ok(self.current()?.out_edges.len())
    }

    pub(crate) fn adjacency_add(&self, edge: EdgeId, outgoing: bool) -> Result<()> {
        self.mutate(|v| {
            let list = if outgoing { &mut v.out_edges } else { &mut v.in_edges };
            if !list.contains(&edge) {
                list.push(edge);
            }
        })
    }

    pub(crate) fn adjacency_remove(&self, edge: EdgeId) -> Result<()> {
        self.mutate(|v| {
            v.out_edges.retain(|e| *e != edge);
            v.in_edges.retain(|e| *e != edge);
        })
    }
}
