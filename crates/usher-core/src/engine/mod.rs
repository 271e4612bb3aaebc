//! The in-memory queue engine.
//!
//! One mutex serialises every operation. Its critical section covers the
//! promotion sweep, the heap mutation, and the log append for that
//! operation, so log order matches memory order matches recovery order.

mod ops;
mod persist;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::heap::Heap;
use crate::item::{DelayedItem, QueueItem, Reservation};
use crate::snapshot::sibling;

use persist::PersistState;

/// Channels are independent priority lanes identified by `0..MAX_CHANNEL`.
pub const MAX_CHANNEL: usize = 100;

/// Snapshot file suffix appended to the persistence prefix.
pub const SNAPSHOT_SUFFIX: &str = ".sav";
/// Log file suffix appended to the persistence prefix.
pub const WAL_SUFFIX: &str = ".wal";

fn priority_order(a: &QueueItem, b: &QueueItem) -> bool {
    a.priority < b.priority
}

fn release_order(a: &DelayedItem, b: &DelayedItem) -> bool {
    a.release_at() < b.release_at()
}

/// Multi-channel priority queue with delayed delivery, reservations, and
/// optional write-ahead-log + snapshot persistence.
pub struct QueueEngine {
    config: EngineConfig,
    inner: Mutex<EngineInner>,
}

impl std::fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine").finish_non_exhaustive()
    }
}

pub(crate) struct EngineInner {
    /// Ready heap per channel, ordered by effective priority.
    channels: Vec<Heap<QueueItem>>,
    /// Items waiting out their not-before time, across all channels.
    delayed: Heap<DelayedItem>,
    /// Live reservations by id.
    reserved: HashMap<Uuid, Reservation>,
    /// Present only for persistent engines.
    persist: Option<PersistState>,
}

impl EngineInner {
    fn fresh() -> Self {
        Self {
            channels: (0..MAX_CHANNEL).map(|_| Heap::new(priority_order)).collect(),
            delayed: Heap::new(release_order),
            reserved: HashMap::new(),
            persist: None,
        }
    }

    fn clear(&mut self) {
        self.channels = (0..MAX_CHANNEL).map(|_| Heap::new(priority_order)).collect();
        self.delayed = Heap::new(release_order);
        self.reserved.clear();
    }
}

impl QueueEngine {
    /// A volatile engine: no files are read or written.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(EngineInner::fresh()),
        }
    }

    /// Open (or create) a persistent engine rooted at `<prefix>.sav` and
    /// `<prefix>.wal`, recovering any state found there: the snapshot is
    /// decoded first, then the log is replayed over it. Fails when the
    /// persisted state cannot be reconstructed.
    pub fn persistent(config: EngineConfig, prefix: impl AsRef<Path>) -> Result<Self> {
        let prefix = prefix.as_ref();
        let snapshot_path = sibling(prefix, SNAPSHOT_SUFFIX);
        let wal_path = sibling(prefix, WAL_SUFFIX);

        let mut inner = EngineInner::fresh();
        inner.persist = Some(PersistState::new(
            wal_path,
            snapshot_path,
            config.sync_on_append,
        ));
        let replayed = inner.recover()?;

        let ready: usize = inner.channels.iter().map(Heap::len).sum();
        info!(
            prefix = %prefix.display(),
            replayed,
            ready,
            delayed = inner.delayed.len(),
            reserved = inner.reserved.len(),
            "persistent queue opened"
        );

        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current wall-clock time; promotion eligibility is judged against it.
    fn now() -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests;
