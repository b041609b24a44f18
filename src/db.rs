//! Top-level database handle wiring the engine, store, collector, and
//! snapshot machinery together.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::snapshot::{SnapshotEngine, SnapshotKind};
use crate::storage::{
    EdgeAccessor, GarbageCollector, GcHandle, GcStats, GraphStore, VertexAccessor,
};
use crate::tx::{CommitLog, Transaction, TransactionEngine};
use crate::types::{EdgeId, IsolationLevel, TransactionId, VertexId};

/// An embedded transactional graph database.
///
/// Opening one wires a fresh [`GraphStore`] to a [`TransactionEngine`]
/// over a shared commit log, restores the newest snapshot when a
/// snapshot directory is configured, and starts the background workers
/// the [`Config`] asks for. Dropping the handle stops the workers and,
/// when configured, takes a final shutdown snapshot.
pub struct GraphDb {
    config: Config,
    engine: Arc<TransactionEngine>,
    store: Arc<GraphStore>,
    snapshots: Option<Arc<SnapshotEngine>>,
    gc: Option<GcHandle>,
    snapshot_thread: Option<SnapshotThread>,
}

impl GraphDb {
    /// Opens a database with the given configuration.
    pub fn open(config: Config) -> Result<Self> {
        let log = Arc::new(CommitLog::new());
        let store = Arc::new(GraphStore::new(Arc::clone(&log), config.lock_timeout));
        let engine = Arc::new(TransactionEngine::new(log, config.isolation_level));

        let snapshots = config.snapshots_path.as_ref().map(|path| {
            Arc::new(SnapshotEngine::new(
                path,
                config.snapshot_retention_count,
                Arc::clone(&engine),
                Arc::clone(&store),
            ))
        });
        if let Some(snapshots) = &snapshots {
            if let Some(path) = snapshots.import()? {
                info!(path = %path.display(), "db.recovered");
            }
        }

        let gc = config.gc_enabled.then(|| {
            GarbageCollector::new(Arc::clone(&store), Arc::clone(&engine))
                .spawn(config.gc_interval)
        });
        let snapshot_thread = match (&snapshots, config.snapshot_interval) {
            (Some(snapshots), Some(interval)) => {
                Some(SnapshotThread::spawn(Arc::clone(snapshots), interval))
            }
            _ => None,
        };

        Ok(Self {
            config,
            engine,
            store,
            snapshots,
            gc,
            snapshot_thread,
        })
    }

    /// The transaction engine.
    pub fn engine(&self) -> &Arc<TransactionEngine> {
        &self.engine
    }

    /// The storage layer.
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Opens a transaction under the configured default isolation level.
    pub fn begin(&self) -> Transaction {
        self.engine.begin()
    }

    /// Opens a transaction under an explicit isolation level.
    pub fn begin_with_isolation(&self, isolation: IsolationLevel) -> Transaction {
        self.engine.begin_with_isolation(isolation)
    }

    /// Starts the next logical command of an open transaction.
    pub fn advance(&self, id: TransactionId) -> Result<Transaction> {
        self.engine.advance(id)
    }

    /// Commits an open transaction.
    pub fn commit(&self, tx: &Transaction) -> Result<()> {
        self.engine.commit(tx)
    }

    /// Aborts an open transaction.
    pub fn abort(&self, tx: &Transaction) -> Result<()> {
        self.engine.abort(tx)
    }

    /// Creates a vertex owned by `tx`.
    pub fn create_vertex(&self, tx: &Transaction) -> VertexId {
        self.store.create_vertex(tx)
    }

    /// Accessor for a vertex visible to `tx`.
    pub fn vertex<'a>(&'a self, tx: &'a Transaction, id: VertexId) -> Option<VertexAccessor<'a>> {
        self.store.vertex(tx, id)
    }

    /// Accessor for an edge visible to `tx`.
    pub fn edge<'a>(&'a self, tx: &'a Transaction, id: EdgeId) -> Option<EdgeAccessor<'a>> {
        self.store.edge(tx, id)
    }

    /// Creates an edge between two visible vertices.
    pub fn create_edge(
        &self,
        tx: &Transaction,
        from: VertexId,
        to: VertexId,
        edge_type: &str,
    ) -> Result<EdgeId> {
        self.store.create_edge(tx, from, to, edge_type)
    }

    /// Takes a manual snapshot; fails when durability is disabled.
    pub fn snapshot(&self) -> Result<PathBuf> {
        match &self.snapshots {
            Some(snapshots) => snapshots.make_snapshot(SnapshotKind::Manual),
            None => Err(crate::error::StoreError::InvalidArgument(
                "snapshots are disabled; configure snapshots_path".into(),
            )),
        }
    }

    /// Runs one synchronous garbage collection pass.
    pub fn collect_garbage(&self) -> Result<GcStats> {
        GarbageCollector::new(Arc::clone(&self.store), Arc::clone(&self.engine)).collect()
    }
}

impl Drop for GraphDb {
    fn drop(&mut self) {
        // Stop the workers before the shutdown snapshot so it captures a
        // quiescent store.
        self.snapshot_thread.take();
        self.gc.take();
        if self.config.snapshot_on_shutdown {
            if let Some(snapshots) = &self.snapshots {
                if let Err(err) = snapshots.make_snapshot(SnapshotKind::Shutdown) {
                    warn!(error = %err, "db.shutdown_snapshot.failed");
                }
            }
        }
    }
}

/// Background periodic snapshot worker; dropping stops and joins it.
struct SnapshotThread {
    shared: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl SnapshotThread {
    fn spawn(snapshots: Arc<SnapshotEngine>, interval: Duration) -> Self {
        let shared = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("tenebra-snapshot".into())
            .spawn(move || {
                let (stop_flag, condvar) = &*thread_shared;
                loop {
                    let mut stop = stop_flag.lock();
                    if !*stop {
                        condvar.wait_for(&mut stop, interval);
                    }
                    if *stop {
                        break;
                    }
                    drop(stop);
                    if let Err(err) = snapshots.make_snapshot(SnapshotKind::Periodic) {
                        warn!(error = %err, "snapshot.periodic.failed");
                    }
                }
            })
            .expect("failed to spawn snapshot thread");
        Self {
            shared,
            thread: Some(thread),
        }
    }
}

impl Drop for SnapshotThread {
    fn drop(&mut self) {
        let (stop_flag, condvar) = &*self.shared;
        *stop_flag.lock() = true;
        condvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
