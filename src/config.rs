//! Database tuning knobs.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::IsolationLevel;

/// Configuration for a [`GraphDb`](crate::db::GraphDb) instance.
///
/// [`Config::default`] suits tests and embedded use; the presets adjust
/// the knobs that actually matter in each deployment shape.
#[derive(Clone, Debug)]
pub struct Config {
    /// Isolation level used by [`begin`](crate::db::GraphDb::begin).
    pub isolation_level: IsolationLevel,
    /// Bounded wait on a contended entity lock before the write fails
    /// with [`LockTimeout`](crate::error::StoreError::LockTimeout).
    pub lock_timeout: Duration,

    /// Whether the background garbage collector thread runs.
    pub gc_enabled: bool,
    /// Pause between background collection passes.
    pub gc_interval: Duration,

    /// Directory snapshots are written to; `None` disables durability.
    pub snapshots_path: Option<PathBuf>,
    /// Pause between periodic snapshots; `None` means manual only.
    pub snapshot_interval: Option<Duration>,
    /// Registered snapshots kept on disk; 0 keeps everything.
    pub snapshot_retention_count: usize,
    /// Take a final snapshot when the database is dropped.
    pub snapshot_on_shutdown: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            lock_timeout: Duration::from_millis(250),
            gc_enabled: true,
            gc_interval: Duration::from_millis(500),
            snapshots_path: None,
            snapshot_interval: None,
            snapshot_retention_count: 3,
            snapshot_on_shutdown: false,
        }
    }
}

impl Config {
    /// In-memory profile: no durability, aggressive collection.
    pub fn ephemeral() -> Self {
        Self {
            gc_interval: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Durable profile: periodic snapshots under `path`, snapshot on
    /// shutdown, longer gc pause.
    pub fn durable(path: impl Into<PathBuf>) -> Self {
        Self {
            gc_interval: Duration::from_secs(1),
            snapshots_path: Some(path.into()),
            snapshot_interval: Some(Duration::from_secs(300)),
            snapshot_on_shutdown: true,
            ..Self::default()
        }
    }

    /// Sets the default isolation level.
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation_level = isolation;
        self
    }

    /// Sets the entity lock wait bound.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Enables or disables the background collector.
    pub fn with_gc(mut self, enabled: bool) -> Self {
        self.gc_enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_snapshot_isolation_without_durability() {
        let config = Config::default();
        assert_eq!(config.isolation_level, IsolationLevel::SnapshotIsolation);
        assert!(config.snapshots_path.is_none());
        assert!(config.gc_enabled);
    }

    #[test]
    fn durable_preset_snapshots_on_shutdown() {
        let config = Config::durable("/tmp/graph");
        assert!(config.snapshots_path.is_some());
        assert!(config.snapshot_on_shutdown);
        assert!(config.snapshot_interval.is_some());
    }

    #[test]
    fn builders_override_fields() {
        let config = Config::ephemeral()
            .with_isolation(IsolationLevel::ReadCommitted)
            .with_lock_timeout(Duration::from_millis(10))
            .with_gc(false);
        assert_eq!(config.isolation_level, IsolationLevel::ReadCommitted);
        assert_eq!(config.lock_timeout, Duration::from_millis(10));
        assert!(!config.gc_enabled);
    }
}
