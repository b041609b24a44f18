use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::mvcc::VersionChain;
use crate::tx::Transaction;
use crate::types::{EdgeId, EdgeTypeId, PropertyId, PropertyValue, VertexId};

use super::GraphStore;

/// Versioned payload of an edge. Endpoints are non-owning vertex ids;
/// the edge record itself is owned by the central edge table.
#[derive(Clone, Debug)]
pub struct Edge {
    pub(crate) from: VertexId,
    pub(crate) to: VertexId,
    pub(crate) edge_type: EdgeTypeId,
    pub(crate) properties: BTreeMap<PropertyId, PropertyValue>,
}

/// MVCC-aware handle to one edge, bound to a transaction.
pub struct EdgeAccessor<'a> {
    pub(crate) store: &'a GraphStore,
    pub(crate) tx: &'a Transaction,
    pub(crate) id: EdgeId,
    pub(crate) chain: Arc<RwLock<VersionChain<Edge>>>,
}

impl<'a> EdgeAccessor<'a> {
    /// Stable id of the edge.
    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub(crate) fn current(&self) -> Result<Edge> {
        self.chain
            .read()
            .visible_data(self.tx, self.store.commit_log())
            .cloned()
            .ok_or(StoreError::RecordDeleted(
                "edge is not visible to this transaction",
            ))
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Edge),
    {
        let mut chain = self
            .chain
            .try_write_for(self.store.lock_timeout)
            .ok_or(StoreError::LockTimeout("edge entity lock"))?;
        chain.update_with(self.tx, self.store.commit_log(), f)
    }

    /// Source vertex id.
    pub fn from(&self) -> Result<VertexId> {
        Ok(self.current()?.from)
    }

    /// Destination vertex id.
    pub fn to(&self) -> Result<VertexId> {
        Ok(self.current()?.to)
    }

    /// Interned edge-type id.
    pub fn type_id(&self) -> Result<EdgeTypeId> {
        Ok(self.current()?.edge_type)
    }

    /// Resolved edge-type name.
    pub fn type_name(&self) -> Result<String> {
        let id = self.type_id()?;
        self.store
            .edge_type_names
            .name_of(id.0)
            .ok_or_else(|| StoreError::Corruption("edge type id without a name".into()))
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
        self.mutate(|e| {
            e.properties.insert(prop, value);
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
        self.mutate(|e| {
            e.properties.remove(&prop);
        })?;
        Ok(true)
    }

    /// All properties of the edge with resolved names.
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
}
