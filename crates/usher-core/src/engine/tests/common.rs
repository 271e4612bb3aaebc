pub(super) use std::time::Duration;

pub(super) use crate::config::EngineConfig;
pub(super) use crate::engine::QueueEngine;
pub(super) use crate::error::EngineError;
pub(super) use crate::queue::PriorityQueue;

use std::path::{Path, PathBuf};

use crate::engine::{SNAPSHOT_SUFFIX, WAL_SUFFIX};
use crate::snapshot::sibling;

/// Engine with no persistence and default config.
pub(super) fn engine() -> QueueEngine {
    QueueEngine::in_memory(EngineConfig::default())
}

/// Persistent engine under a fresh temp dir. The `TempDir` must be kept
/// alive for the duration of the test.
pub(super) fn persistent_engine() -> (QueueEngine, PathBuf, tempfile::TempDir) {
    persistent_engine_with(EngineConfig::default())
}

pub(super) fn persistent_engine_with(
    config: EngineConfig,
) -> (QueueEngine, PathBuf, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("queue");
    let engine = QueueEngine::persistent(config, &prefix).unwrap();
    (engine, prefix, dir)
}

/// Re-open a persistent engine on the same prefix, as after a crash.
pub(super) fn reopen(prefix: &Path) -> QueueEngine {
    QueueEngine::persistent(EngineConfig::default(), prefix).unwrap()
}

pub(super) fn snapshot_path(prefix: &Path) -> PathBuf {
    sibling(prefix, SNAPSHOT_SUFFIX)
}

pub(super) fn wal_path(prefix: &Path) -> PathBuf {
    sibling(prefix, WAL_SUFFIX)
}
