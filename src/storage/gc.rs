use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::tx::TransactionEngine;
use crate::types::TransactionId;

use super::GraphStore;

/// Outcome of one garbage collection pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct GcStats {
    /// Reclamation bound the pass ran with.
    pub horizon: TransactionId,
    /// Versions unlinked from vertex and edge chains.
    pub versions_pruned: u64,
    /// Vertex records physically destroyed.
    pub vertices_removed: u64,
    /// Edge records physically destroyed.
    pub edges_removed: u64,
    /// Label index entries swept for destroyed vertices.
    pub index_entries_swept: u64,
    /// Chains left untouched because their lock was contended.
    pub chains_skipped: u64,
    /// Whole commit log chunks compacted away.
    pub commit_log_chunks_dropped: u64,
    /// Wall-clock duration of the pass in milliseconds.
    pub run_millis: u64,
}

/// Reclaims versions no current or future transaction can observe.
///
/// Never runs on the hot read/write path: passes are periodic or manual.
/// A contended chain is simply skipped and retried next cycle; a stalled
/// collector only grows memory, it never corrupts data.
pub struct GarbageCollector {
    store: Arc<GraphStore>,
    engine: Arc<TransactionEngine>,
}

impl GarbageCollector {
    /// Creates a collector over `store`, bounded by `engine`'s horizon.
    pub fn new(store: Arc<GraphStore>, engine: Arc<TransactionEngine>) -> Self {
        Self { store, engine }
    }

    /// Runs one full collection pass.
    pub fn collect(&self) -> Result<GcStats> {
        let started = Instant::now();
        let horizon = self.engine.last_known_active();
        let log = self.store.commit_log();
        let mut stats = GcStats {
            horizon,
            ..GcStats::default()
        };

        // Vertex chains.
        let vertex_chains: Vec<_> = self
            .store
            .vertices
            .read()
            .iter()
            .map(|(id, chain)| (*id, Arc::clone(chain)))
            .collect();
        let mut defunct_vertices = Vec::new();
        for (id, chain) in vertex_chains {
            let Some(mut guard) = chain.try_write() else {
                stats.chains_skipped += 1;
                continue; // contended; next cycle
            };
            stats.versions_pruned += guard.prune(horizon, log) as u64;
            if guard.is_defunct(horizon, log) {
                defunct_vertices.push(id);
            }
        }
        if !defunct_vertices.is_empty() {
            let mut table = self.store.vertices.write();
            for id in defunct_vertices {
                let still_defunct = table
                    .get(&id)
                    .is_some_and(|chain| chain.read().is_defunct(horizon, log));
                if still_defunct {
                    table.remove(&id);
                    stats.vertices_removed += 1;
                }
            }
        }

        // Edge chains.
        let edge_chains: Vec<_> = self
            .store
            .edges
            .read()
            .iter()
            .map(|(id, chain)| (*id, Arc::clone(chain)))
            .collect();
        let mut defunct_edges = Vec::new();
        for (id, chain) in edge_chains {
            let Some(mut guard) = chain.try_write() else {
                stats.chains_skipped += 1;
                continue;
            };
            stats.versions_pruned += guard.prune(horizon, log) as u64;
            if guard.is_defunct(horizon, log) {
                defunct_edges.push(id);
            }
        }
        if !defunct_edges.is_empty() {
            let mut table = self.store.edges.write();
            for id in defunct_edges {
                let still_defunct = table
                    .get(&id)
                    .is_some_and(|chain| chain.read().is_defunct(horizon, log));
                if still_defunct {
                    table.remove(&id);
                    stats.edges_removed += 1;
                }
            }
        }

        stats.index_entries_swept = self.sweep_label_index();
        // Ids below the compaction floor read as committed, which is only
        // exact once every chain has been pruned under this horizon. A
        // skipped chain may still hold aborted stamps, so compaction waits
        // for a pass that touched everything.
        if stats.chains_skipped == 0 {
            stats.commit_log_chunks_dropped = log.compact_below(horizon) as u64;
        }
        stats.run_millis = started.elapsed().as_millis() as u64;

        if stats.versions_pruned > 0 || stats.vertices_removed > 0 || stats.edges_removed > 0 {
            info!(
                horizon = stats.horizon.0,
                versions = stats.versions_pruned,
                vertices = stats.vertices_removed,
                edges = stats.edges_removed,
                index_entries = stats.index_entries_swept,
                run_millis = stats.run_millis,
                "gc.pass.completed"
            );
        } else {
            debug!(horizon = stats.horizon.0, "gc.pass.noop");
        }
        Ok(stats)
    }

    /// Drops label index entries for vertices that no longer exist.
    fn sweep_label_index(&self) -> u64 {
        let live = self.store.vertices.read();
        let mut index = self.store.label_index.write();
        let mut swept = 0u64;
        for entries in index.values_mut() {
            let before = entries.len();
            entries.retain(|id| live.contains_key(id));
            swept += (before - entries.len()) as u64;
        }
        index.retain(|_, entries| !entries.is_empty());
        swept
    }

    /// Starts a background thread running [`collect`](Self::collect)
    /// every `interval` until the returned handle is dropped.
    pub fn spawn(self, interval: Duration) -> GcHandle {
        let shared = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("tenebra-gc".into())
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
                    if let Err(err) = self.collect() {
                        // Retried on the next cycle.
                        warn!(error = %err, "gc.pass.failed");
                    }
                }
            })
            .expect("failed to spawn gc thread");
        GcHandle {
            shared,
            thread: Some(thread),
        }
    }
}

/// Owner handle of the background collection thread; dropping it stops
/// the thread and joins it.
pub struct GcHandle {
    shared: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        let (stop_flag, condvar) = &*self.shared;
        *stop_flag.lock() = true;
        condvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::CommitLog;
    use crate::types::IsolationLevel;

    fn setup() -> (Arc<GraphStore>, Arc<TransactionEngine>, GarbageCollector) {
        let log = Arc::new(CommitLog::new());
        let store = Arc::new(GraphStore::new(
            Arc::clone(&log),
            Duration::from_millis(100),
        ));
        let engine = Arc::new(TransactionEngine::new(
            log,
            IsolationLevel::SnapshotIsolation,
        ));
        let gc = GarbageCollector::new(Arc::clone(&store), Arc::clone(&engine));
        (store, engine, gc)
    }

    #[test]
    fn reclaims_aborted_creations() {
        let (store, engine, gc) = setup();
        let tx = engine.begin();
        let id = store.create_vertex(&tx);
        engine.abort(&tx).unwrap();

        let stats = gc.collect().unwrap();
        assert_eq!(stats.vertices_removed, 1);
        let check = engine.begin();
        assert!(store.vertex(&check, id).is_none());
        engine.commit(&check).unwrap();
    }

    #[test]
    fn destroys_committed_tombstones_below_horizon() {
        let (store, engine, gc) = setup();
        let t1 = engine.begin();
        let id = store.create_vertex(&t1);
        store.vertex(&t1, id).unwrap().add_label("Gone").unwrap();
        engine.commit(&t1).unwrap();

        let t2 = engine.begin();
        store.delete_vertex(&t2, id).unwrap();
        engine.commit(&t2).unwrap();

        let stats = gc.collect().unwrap();
        assert_eq!(stats.vertices_removed, 1);
        assert!(stats.index_entries_swept >= 1);
        assert!(store.vertices.read().is_empty());
    }

    #[test]
    fn keeps_entities_reachable_by_active_snapshots() {
        let (store, engine, gc) = setup();
        let t1 = engine.begin();
        let id = store.create_vertex(&t1);
        engine.commit(&t1).unwrap();

        let reader = engine.begin();
        let t2 = engine.begin();
        store.delete_vertex(&t2, id).unwrap();
        engine.commit(&t2).unwrap();

        let stats = gc.collect().unwrap();
        assert_eq!(stats.vertices_removed, 0);
        // The reader began before the delete committed and still sees it.
        assert!(store.vertex(&reader, id).is_some());
        engine.commit(&reader).unwrap();

        let stats = gc.collect().unwrap();
        assert_eq!(stats.vertices_removed, 1);
    }

    #[test]
    fn background_thread_collects_and_stops() {
        let (store, engine, gc) = setup();
        let tx = engine.begin();
        store.create_vertex(&tx);
        engine.abort(&tx).unwrap();

        let handle = gc.spawn(Duration::from_millis(5));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !store.vertices.read().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        drop(handle);
        assert!(store.vertices.read().is_empty());
    }
}
