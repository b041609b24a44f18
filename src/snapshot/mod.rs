//! Durability: point-in-time snapshot files and recovery.
//!
//! A snapshot is a consistent serialization of the committed graph taken
//! under its own snapshot-isolated read transaction, framed with a magic
//! prefix and a crc32 trailer. Finished snapshots are registered in a
//! commit file (one file name per line, oldest first); a file that is
//! not registered there never existed as far as recovery is concerned,
//! which is what makes a torn write on crash harmless.

mod decoder;
mod encoder;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::storage::GraphStore;
use crate::tx::{Transaction, TransactionEngine};
use crate::types::{IsolationLevel, VertexId};

use decoder::SnapshotDecoder;
use encoder::{
    SnapshotEncoder, SECTION_EDGES, SECTION_END, SECTION_INDEXES, SECTION_NAMES, SECTION_VERTICES,
};

const COMMIT_FILE: &str = "snapshot_commit.txt";

/// Why a snapshot was taken. Recorded in the file name only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotKind {
    /// Requested through the public API.
    Manual,
    /// Taken by the background snapshot thread.
    Periodic,
    /// Taken while shutting the database down.
    Shutdown,
}

impl SnapshotKind {
    fn as_str(self) -> &'static str {
        match self {
            SnapshotKind::Manual => "manual",
            SnapshotKind::Periodic => "periodic",
            SnapshotKind::Shutdown => "shutdown",
        }
    }
}

/// Writes and restores snapshot files under a fixed directory.
pub struct SnapshotEngine {
    dir: PathBuf,
    retention: usize,
    engine: Arc<TransactionEngine>,
    store: Arc<GraphStore>,
    // Serializes snapshot and import runs; neither blocks normal
    // transactions, which proceed under their own MVCC reads/writes.
    guard: Mutex<()>,
    sequence: AtomicU64,
}

impl SnapshotEngine {
    /// Creates an engine writing into `dir`, keeping at most `retention`
    /// registered snapshots (0 means keep everything).
    pub fn new(
        dir: impl Into<PathBuf>,
        retention: usize,
        engine: Arc<TransactionEngine>,
        store: Arc<GraphStore>,
    ) -> Self {
        Self {
            dir: dir.into(),
            retention,
            engine,
            store,
            guard: Mutex::new(()),
            sequence: AtomicU64::new(1),
        }
    }

    fn commit_file_path(&self) -> PathBuf {
        self.dir.join(COMMIT_FILE)
    }

    /// Serializes the committed graph to a new snapshot file and
    /// registers it in the commit file. Returns the file path.
    pub fn make_snapshot(&self, kind: SnapshotKind) -> Result<PathBuf> {
        let _guard = self.guard.lock();
        fs::create_dir_all(&self.dir)?;

        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        // The sequence restarts on reopen; skip names an earlier run of
        // the same second already claimed.
        let (name, path) = loop {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            let name = format!("{secs}_{seq}_{}.snap", kind.as_str());
            let path = self.dir.join(&name);
            if !path.exists() {
                break (name, path);
            }
        };

        let tx = self
            .engine
            .begin_with_isolation(IsolationLevel::SnapshotIsolation);
        let written = self
            .write_snapshot(&tx, &path)
            .and_then(|_| self.register(&name));
        match written {
            Ok(()) => {
                self.engine.commit(&tx)?;
                info!(path = %path.display(), kind = kind.as_str(), "snapshot.created");
                if let Err(err) = self.apply_retention() {
                    warn!(error = %err, "snapshot.retention.failed");
                }
                Ok(path)
            }
            Err(err) => {
                self.engine.abort(&tx)?;
                // Unregistered file; remove the partial write.
                let _ = fs::remove_file(&path);
                warn!(path = %path.display(), error = %err, "snapshot.failed");
                Err(err)
            }
        }
    }

    fn write_snapshot(&self, tx: &Transaction, path: &Path) -> Result<()> {
        let mut enc = SnapshotEncoder::new();

        enc.names(
            &self.store.property_names.entries(),
            &self.store.label_names.entries(),
            &self.store.edge_type_names.entries(),
        )?;

        let vertex_ids = self.store.vertices(tx);
        enc.start_vertices(vertex_ids.len() as u64);
        for id in vertex_ids {
            let Some(accessor) = self.store.vertex(tx, id) else {
                return Err(StoreError::Corruption(
                    "vertex vanished under an active snapshot read".into(),
                ));
            };
            let vertex = accessor.current()?;
            enc.write_u64(id.0);
            enc.write_u32(vertex.labels.len() as u32);
            for label in &vertex.labels {
                enc.write_u32(label.0);
            }
            enc.write_u32(vertex.properties.len() as u32);
            for (prop, value) in &vertex.properties {
                enc.write_u32(prop.0);
                enc.write_value(value)?;
            }
        }

        let edge_ids = self.store.edges(tx);
        enc.start_edges(edge_ids.len() as u64);
        for id in edge_ids {
            let Some(accessor) = self.store.edge(tx, id) else {
                return Err(StoreError::Corruption(
                    "edge vanished under an active snapshot read".into(),
                ));
            };
            let edge = accessor.current()?;
            enc.write_u64(id.0);
            enc.write_u64(edge.from.0);
            enc.write_u64(edge.to.0);
            enc.write_u32(edge.edge_type.0);
            enc.write_u32(edge.properties.len() as u32);
            for (prop, value) in &edge.properties {
                enc.write_u32(prop.0);
                enc.write_value(value)?;
            }
        }

        let defs = self.store.index_definitions();
        enc.start_indexes(defs.len() as u32);
        for def in defs {
            enc.write_u32(def.label.0);
            match def.property {
                Some(p) => {
                    enc.write_u8(1);
                    enc.write_u32(p.0);
                }
                None => enc.write_u8(0),
            }
        }

        let bytes = enc.finish();
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Appends `name` to the commit file and flushes it. Only after this
    /// returns does the snapshot exist for recovery purposes.
    fn register(&self, name: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.commit_file_path())?;
        writeln!(file, "{name}")?;
        file.sync_all()?;
        Ok(())
    }

    fn registered(&self) -> Result<Vec<String>> {
        let path = self.commit_file_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn apply_retention(&self) -> Result<()> {
        if self.retention == 0 {
            return Ok(());
        }
        let names = self.registered()?;
        if names.len() <= self.retention {
            return Ok(());
        }
        let split = names.len() - self.retention;
        let (expired, kept) = names.split_at(split);
        for name in expired {
            let _ = fs::remove_file(self.dir.join(name));
        }
        let tmp = self.dir.join(format!("{COMMIT_FILE}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            for name in kept {
                writeln!(file, "{name}")?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, self.commit_file_path())?;
        info!(removed = expired.len(), kept = kept.len(), "snapshot.retention.applied");
        Ok(())
    }

    /// Restores the newest restorable registered snapshot into the store.
    ///
    /// Candidates are tried newest first; a snapshot that fails to decode
    /// is skipped after its partially applied writes are aborted, and the
    /// next older one is tried. Returns the path restored from, `None`
    /// when nothing is registered, or an error when snapshots are
    /// registered but every candidate failed to restore.
    pub fn import(&self) -> Result<Option<PathBuf>> {
        let _guard = self.guard.lock();
        let names = self.registered()?;
        if names.is_empty() {
            return Ok(None);
        }
        for name in names.iter().rev() {
            let path = self.dir.join(name);
            let tx = self.engine.begin();
            match self.load_snapshot(&tx, &path) {
                Ok(()) => {
                    self.engine.commit(&tx)?;
                    info!(path = %path.display(), "snapshot.restored");
                    return Ok(Some(path));
                }
                Err(err) => {
                    // Aborted writes are invisible and reclaimed by gc.
                    self.engine.abort(&tx)?;
                    warn!(path = %path.display(), error = %err, "snapshot.restore.failed");
                }
            }
        }
        Err(StoreError::Corruption(
            "no registered snapshot could be restored".into(),
        ))
    }

    fn load_snapshot(&self, tx: &Transaction, path: &Path) -> Result<()> {
        let bytes = fs::read(path)?;
        let mut dec = SnapshotDecoder::new(&bytes)?;

        dec.expect_section(SECTION_NAMES)?;
        let properties: FxHashMap<u32, String> = dec.read_dict()?.into_iter().collect();
        let labels: FxHashMap<u32, String> = dec.read_dict()?.into_iter().collect();
        let edge_types: FxHashMap<u32, String> = dec.read_dict()?.into_iter().collect();

        let resolve = |dict: &FxHashMap<u32, String>, id: u32, what: &str| {
            dict.get(&id)
                .cloned()
                .ok_or_else(|| StoreError::Corruption(format!("snapshot references unknown {what} id {id}")))
        };

        // Ids are reassigned on restore; edges resolve endpoints through
        // this remap table.
        dec.expect_section(SECTION_VERTICES)?;
        let vertex_count = dec.read_u64()?;
        let mut vertex_remap: FxHashMap<u64, VertexId> = FxHashMap::default();
        for _ in 0..vertex_count {
            let old_id = dec.read_u64()?;
            let new_id = self.store.create_vertex(tx);
            if vertex_remap.insert(old_id, new_id).is_some() {
                return Err(StoreError::Corruption(format!(
                    "snapshot repeats vertex id {old_id}"
                )));
            }
            let accessor = self.store.vertex(tx, new_id).ok_or_else(|| {
                StoreError::Corruption("fresh vertex invisible to its creator".into())
            })?;
            let label_count = dec.read_u32()?;
            for _ in 0..label_count {
                let label = dec.read_u32()?;
                accessor.add_label(&resolve(&labels, label, "label")?)?;
            }
            let prop_count = dec.read_u32()?;
            for _ in 0..prop_count {
                let prop = dec.read_u32()?;
                let value = dec.read_value()?;
                accessor.set_property(&resolve(&properties, prop, "property")?, value)?;
            }
        }

        dec.expect_section(SECTION_EDGES)?;
        let edge_count = dec.read_u64()?;
        for _ in 0..edge_count {
            let _old_id = dec.read_u64()?;
            let from = dec.read_u64()?;
            let to = dec.read_u64()?;
            let edge_type = dec.read_u32()?;
            let from = *vertex_remap.get(&from).ok_or_else(|| {
                StoreError::Corruption(format!("edge references unknown vertex {from}"))
            })?;
            let to = *vertex_remap.get(&to).ok_or_else(|| {
                StoreError::Corruption(format!("edge references unknown vertex {to}"))
            })?;
            let type_name = resolve(&edge_types, edge_type, "edge type")?;
            let edge = self.store.create_edge(tx, from, to, &type_name)?;
            let accessor = self.store.edge(tx, edge).ok_or_else(|| {
                StoreError::Corruption("fresh edge invisible to its creator".into())
            })?;
            let prop_count = dec.read_u32()?;
            for _ in 0..prop_count {
                let prop = dec.read_u32()?;
                let value = dec.read_value()?;
                accessor.set_property(&resolve(&properties, prop, "property")?, value)?;
            }
        }

        dec.expect_section(SECTION_INDEXES)?;
        let def_count = dec.read_u32()?;
        for _ in 0..def_count {
            let label = dec.read_u32()?;
            let label = resolve(&labels, label, "label")?;
            let property = match dec.read_u8()? {
                0 => None,
                1 => Some(resolve(&properties, dec.read_u32()?, "property")?),
                other => {
                    return Err(StoreError::Corruption(format!(
                        "invalid property presence flag {other}"
                    )))
                }
            };
            self.store.create_index(&label, property.as_deref());
        }

        dec.expect_section(SECTION_END)?;
        Ok(())
    }
}
