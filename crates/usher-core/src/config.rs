use serde::Deserialize;

/// Engine tuning knobs, deserializable so embedders can load them from a
/// config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `true` orders every channel as a min-queue (least priority first).
    /// `false` requests a max-queue: caller priorities are negated at
    /// insertion so the same min-heap machinery serves both polarities.
    pub min_queue: bool,

    /// Number of log records between checkpoints. When the counter reaches
    /// this value the full state is snapshotted and the log removed.
    pub checkpoint_every: usize,

    /// Fsync the log after every append. Off by default: durability is
    /// grouped at checkpoint, where the snapshot is always fsynced.
    pub sync_on_append: bool,

    /// Minimum interval between idle-reset checks. When the check runs and
    /// the queue is fully drained, the on-disk files are safely deleted.
    pub idle_reset_interval_ms: u64,
}

impl EngineConfig {
    pub const DEFAULT_CHECKPOINT_EVERY: usize = 10_000;

    /// Default idle-reset interval: 10 minutes.
    pub const DEFAULT_IDLE_RESET_INTERVAL_MS: u64 = 600_000;
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_queue: true,
            checkpoint_every: Self::DEFAULT_CHECKPOINT_EVERY,
            sync_on_append: false,
            idle_reset_interval_ms: Self::DEFAULT_IDLE_RESET_INTERVAL_MS,
        }
    }
}
