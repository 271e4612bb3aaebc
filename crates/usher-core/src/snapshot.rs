//! Checkpoint snapshot: a bincode-encoded dump of the full engine state.
//!
//! Written to a temp sibling and renamed into place, so a crash mid-write
//! leaves the previous snapshot intact and the full log still recovers.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PersistError, PersistResult};
use crate::item::{DelayedItem, QueueItem, Reservation};

/// Full engine state as written at a checkpoint. Channel contents are in
/// ascending effective-priority order; the delayed entries in ascending
/// release order.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub channels: Vec<Vec<QueueItem>>,
    pub delayed: Vec<DelayedItem>,
    pub reservations: Vec<(Uuid, Reservation)>,
}

impl Snapshot {
    /// Write to `path` via temp-then-rename. The temp file is fsynced
    /// before the rename, making every checkpoint a durability barrier.
    pub fn write_to(&self, path: &Path) -> PersistResult<()> {
        let bytes =
            bincode::serialize(self).map_err(|e| PersistError::Codec(e.to_string()))?;

        let tmp = sibling(path, ".tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load from `path`. A missing or empty file is a fresh start: the
    /// engine has simply never checkpointed.
    pub fn read_from(path: &Path) -> PersistResult<Snapshot> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Snapshot::default())
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(Snapshot::default());
        }
        bincode::deserialize(&bytes).map_err(|e| PersistError::Codec(e.to_string()))
    }
}

/// `path` with `suffix` appended to the file name (`q.sav` -> `q.sav.tmp`).
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
