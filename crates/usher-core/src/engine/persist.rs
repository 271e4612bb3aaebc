//! Persistence plumbing for the engine: log appends, checkpointing,
//! recovery, and the idle-reset file dance.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::{EngineInner, MAX_CHANNEL};
use crate::config::EngineConfig;
use crate::error::{EngineError, PersistError, PersistResult, Result};
use crate::heap::Heap;
use crate::item::{DelayedItem, Reservation};
use crate::snapshot::{sibling, Snapshot};
use crate::wal::{self, WalOp, WalRecord, WalWriter};

/// Suffix given to files mid-deletion during an idle reset.
pub(super) const DELETEME_SUFFIX: &str = ".deleteme";

pub(super) struct PersistState {
    pub(super) wal: WalWriter,
    pub(super) snapshot_path: PathBuf,
    /// Log records appended since the last checkpoint. Primed with the
    /// replayed record count at startup so a long-lived log still fuses.
    pub(super) records_since_checkpoint: usize,
    pub(super) last_idle_check: DateTime<Utc>,
}

impl PersistState {
    pub(super) fn new(wal_path: PathBuf, snapshot_path: PathBuf, sync_on_append: bool) -> Self {
        Self {
            wal: WalWriter::new(wal_path, sync_on_append),
            snapshot_path,
            records_since_checkpoint: 0,
            last_idle_check: Utc::now(),
        }
    }
}

impl EngineInner {
    /// Append one record. A volatile engine appends nothing and always
    /// succeeds; on failure the caller must skip its in-memory mutation.
    pub(super) fn append_wal(&mut self, record: WalRecord) -> Result<()> {
        let Some(p) = self.persist.as_mut() else {
            return Ok(());
        };
        p.wal.append(&record)?;
        p.records_since_checkpoint += 1;
        Ok(())
    }

    /// Append two records in a single write (see `WalWriter::append_pair`).
    pub(super) fn append_wal_pair(&mut self, first: WalRecord, second: WalRecord) -> Result<()> {
        let Some(p) = self.persist.as_mut() else {
            return Ok(());
        };
        p.wal.append_pair(&first, &second)?;
        p.records_since_checkpoint += 2;
        Ok(())
    }

    /// Fuse the log into a snapshot once enough records have accumulated,
    /// and run the idle-reset check at its configured interval. Failures
    /// are logged, never surfaced: the triggering operation already
    /// succeeded and the log still holds its record.
    pub(super) fn maybe_checkpoint(&mut self, config: &EngineConfig) {
        let Some(p) = self.persist.as_ref() else {
            return;
        };
        if p.records_since_checkpoint >= config.checkpoint_every {
            self.checkpoint();
        }

        let idle_due = self.persist.as_ref().is_some_and(|p| {
            Utc::now().signed_duration_since(p.last_idle_check)
                >= chrono::Duration::milliseconds(config.idle_reset_interval_ms as i64)
        });
        if idle_due {
            if let Some(p) = self.persist.as_mut() {
                p.last_idle_check = Utc::now();
            }
            self.reset_if_idle();
        }
    }

    fn checkpoint(&mut self) {
        let snapshot = self.build_snapshot();
        let Some(p) = self.persist.as_mut() else {
            return;
        };
        if let Err(e) = snapshot.write_to(&p.snapshot_path) {
            warn!(error = %e, "checkpoint failed, log retained");
            return;
        }
        match p.wal.remove_file() {
            Ok(()) => {
                p.records_since_checkpoint = 0;
                debug!("checkpoint complete, log removed");
            }
            Err(e) => {
                // A stale log alongside the new snapshot would double-apply
                // on recovery; truncating is just as good as removing.
                if fs::write(p.wal.path(), b"").is_ok() {
                    p.records_since_checkpoint = 0;
                    warn!(error = %e, "log removal failed, truncated instead");
                } else {
                    error!(error = %e, "log removal and truncation both failed after snapshot");
                }
            }
        }
    }

    fn build_snapshot(&self) -> Snapshot {
        Snapshot {
            channels: self.channels.iter().map(Heap::to_sorted_vec).collect(),
            delayed: self.delayed.to_sorted_vec(),
            reservations: self
                .reserved
                .iter()
                .map(|(id, r)| (*id, r.clone()))
                .collect(),
        }
    }

    /// When the queue is fully drained, delete both files via the
    /// rename-to-sidecar dance so a concurrent-looking failure can never
    /// leave a half-deleted pair behind.
    fn reset_if_idle(&mut self) {
        if self.channels.iter().any(|h| !h.is_empty())
            || !self.delayed.is_empty()
            || !self.reserved.is_empty()
        {
            return;
        }
        let Some(p) = self.persist.as_mut() else {
            return;
        };
        p.wal.release_handle();
        match delete_safely(p.wal.path(), &p.snapshot_path) {
            Ok(()) => {
                p.records_since_checkpoint = 0;
                debug!("idle queue, persistence files removed");
            }
            Err(e) => warn!(error = %e, "safe deletion of idle persistence files failed"),
        }
    }

    /// Remove both files outright. Used by reset, which is an explicit
    /// caller action rather than a background sweep.
    pub(super) fn remove_files(&mut self) -> Result<()> {
        let Some(p) = self.persist.as_mut() else {
            return Ok(());
        };
        remove_if_exists(&p.snapshot_path)?;
        p.wal.remove_file()?;
        p.records_since_checkpoint = 0;
        Ok(())
    }

    /// Rebuild state from disk: snapshot first, then log replay. Returns
    /// the number of replayed records.
    pub(super) fn recover(&mut self) -> Result<usize> {
        let Some(p) = self.persist.as_ref() else {
            return Ok(0);
        };
        let snapshot_path = p.snapshot_path.clone();
        let wal_path = p.wal.path().to_path_buf();

        let snapshot = match Snapshot::read_from(&snapshot_path) {
            Ok(s) => s,
            Err(PersistError::Codec(msg)) => {
                return Err(EngineError::CorruptPersistence(format!("snapshot: {msg}")))
            }
            Err(e) => return Err(e.into()),
        };

        for (channel, items) in snapshot.channels.into_iter().enumerate() {
            if channel >= MAX_CHANNEL {
                if items.is_empty() {
                    continue;
                }
                return Err(EngineError::CorruptPersistence(format!(
                    "snapshot channel {channel} out of range"
                )));
            }
            for item in items {
                self.channels[channel].push(item);
            }
        }
        for entry in snapshot.delayed {
            if entry.channel >= MAX_CHANNEL {
                return Err(EngineError::CorruptPersistence(format!(
                    "snapshot delayed channel {} out of range",
                    entry.channel
                )));
            }
            self.delayed.push(entry);
        }
        for (id, reservation) in snapshot.reservations {
            if reservation.channel >= MAX_CHANNEL {
                return Err(EngineError::CorruptPersistence(format!(
                    "snapshot reservation channel {} out of range",
                    reservation.channel
                )));
            }
            self.reserved.insert(id, reservation);
        }

        let records = match wal::read_records(&wal_path) {
            Ok(r) => r,
            Err(PersistError::Codec(msg)) => {
                return Err(EngineError::CorruptPersistence(format!("log: {msg}")))
            }
            Err(e) => return Err(e.into()),
        };
        let replayed = records.len();
        for record in records {
            self.apply_record(record)?;
        }
        if replayed > 0 {
            info!(replayed, "log replayed over snapshot");
        }

        if let Some(p) = self.persist.as_mut() {
            p.records_since_checkpoint = replayed;
        }
        Ok(replayed)
    }

    fn apply_record(&mut self, record: WalRecord) -> Result<()> {
        match record.op {
            WalOp::Enqueue => {
                let (channel, item) = channel_and_item(record.channel, record.item, "enqueue")?;
                // A record for an item carrying a not-before is a promotion
                // out of the delayed heap; cancel the delayed twin so the
                // item does not end up in both structures.
                if item.not_before.is_some() {
                    self.delayed
                        .remove_first(|d| d.channel == channel && d.item == item);
                }
                self.channels[channel].push(item);
            }
            WalOp::EnqueueNotbefore => {
                let (channel, item) =
                    channel_and_item(record.channel, record.item, "enqueue_notbefore")?;
                self.delayed.push(DelayedItem { item, channel });
            }
            WalOp::Dequeue => {
                let channel = in_range(record.channel, "dequeue")?;
                let _ = self.channels[channel].pop();
            }
            WalOp::Reserve => {
                let channel = in_range(record.channel, "reserve")?;
                let res_id = record.res_id.ok_or_else(|| {
                    EngineError::CorruptPersistence("reserve record missing res_id".to_string())
                })?;
                if let Some(item) = self.channels[channel].pop() {
                    self.reserved.insert(
                        res_id,
                        Reservation {
                            item,
                            channel,
                            reserved_at: record.time,
                        },
                    );
                }
            }
            WalOp::Confirm => {
                let res_id = record.res_id.ok_or_else(|| {
                    EngineError::CorruptPersistence("confirm record missing res_id".to_string())
                })?;
                self.reserved.remove(&res_id);
            }
            WalOp::DeleteReserved => {
                let (channel, item) =
                    channel_and_item(record.channel, record.item, "delete_reserved")?;
                let matched = self
                    .reserved
                    .iter()
                    .find(|(_, r)| r.channel == channel && r.item == item)
                    .map(|(id, _)| *id);
                if let Some(id) = matched {
                    self.reserved.remove(&id);
                }
            }
        }
        Ok(())
    }
}

fn in_range(channel: Option<usize>, op: &str) -> Result<usize> {
    let channel = channel.ok_or_else(|| {
        EngineError::CorruptPersistence(format!("{op} record missing channel"))
    })?;
    if channel >= MAX_CHANNEL {
        return Err(EngineError::CorruptPersistence(format!(
            "{op} record channel {channel} out of range"
        )));
    }
    Ok(channel)
}

fn channel_and_item(
    channel: Option<usize>,
    item: Option<crate::item::QueueItem>,
    op: &str,
) -> Result<(usize, crate::item::QueueItem)> {
    let channel = in_range(channel, op)?;
    let item = item.ok_or_else(|| {
        EngineError::CorruptPersistence(format!("{op} record missing item"))
    })?;
    Ok((channel, item))
}

fn remove_if_exists(path: &Path) -> PersistResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Rename both files to `.deleteme` siblings, rolling the first rename back
/// if the second fails, then remove the renamed pair. Either file being
/// absent already is fine.
fn delete_safely(wal_path: &Path, snapshot_path: &Path) -> PersistResult<()> {
    let snap_tmp = sibling(snapshot_path, DELETEME_SUFFIX);
    let wal_tmp = sibling(wal_path, DELETEME_SUFFIX);

    let snap_renamed = match fs::rename(snapshot_path, &snap_tmp) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };

    match fs::rename(wal_path, &wal_tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            if snap_renamed {
                if let Err(rollback) = fs::rename(&snap_tmp, snapshot_path) {
                    error!(error = %rollback, "failed to roll back snapshot rename");
                }
            }
            return Err(e.into());
        }
    }

    remove_if_exists(&snap_tmp)?;
    remove_if_exists(&wal_tmp)?;
    Ok(())
}
