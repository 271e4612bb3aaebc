//! Write-ahead log: one newline-delimited JSON record per mutation.
//!
//! Records are appended before the in-memory mutation they describe, so the
//! log replayed over the latest snapshot reconstructs the exact state every
//! successful caller observed.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{PersistError, PersistResult};
use crate::item::QueueItem;

/// Mutation kind. `Enqueue` covers both direct enqueues and promotions out
/// of the delayed heap; replay tells them apart by the item's not-before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalOp {
    Enqueue,
    EnqueueNotbefore,
    Dequeue,
    Reserve,
    Confirm,
    DeleteReserved,
}

/// One log record. Fields irrelevant to the op are omitted from the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub op: WalOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<QueueItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res_id: Option<Uuid>,
    pub time: DateTime<Utc>,
}

impl WalRecord {
    fn new(op: WalOp) -> Self {
        Self {
            op,
            channel: None,
            item: None,
            res_id: None,
            time: Utc::now(),
        }
    }

    pub fn enqueue(channel: usize, item: QueueItem) -> Self {
        Self {
            channel: Some(channel),
            item: Some(item),
            ..Self::new(WalOp::Enqueue)
        }
    }

    pub fn enqueue_notbefore(channel: usize, item: QueueItem) -> Self {
        Self {
            channel: Some(channel),
            item: Some(item),
            ..Self::new(WalOp::EnqueueNotbefore)
        }
    }

    pub fn dequeue(channel: usize, item: QueueItem) -> Self {
        Self {
            channel: Some(channel),
            item: Some(item),
            ..Self::new(WalOp::Dequeue)
        }
    }

    pub fn reserve(channel: usize, item: QueueItem, res_id: Uuid) -> Self {
        Self {
            channel: Some(channel),
            item: Some(item),
            res_id: Some(res_id),
            ..Self::new(WalOp::Reserve)
        }
    }

    pub fn confirm(res_id: Uuid) -> Self {
        Self {
            res_id: Some(res_id),
            ..Self::new(WalOp::Confirm)
        }
    }

    pub fn delete_reserved(channel: usize, item: QueueItem) -> Self {
        Self {
            channel: Some(channel),
            item: Some(item),
            ..Self::new(WalOp::DeleteReserved)
        }
    }
}

/// Append-only writer over the log file. The handle is opened lazily and
/// dropped whenever the file is removed (checkpoint, reset, idle reset), so
/// the next append recreates the file.
pub struct WalWriter {
    path: PathBuf,
    file: Option<File>,
    sync_on_append: bool,
}

impl WalWriter {
    pub fn new(path: PathBuf, sync_on_append: bool) -> Self {
        Self {
            path,
            file: None,
            sync_on_append,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &WalRecord) -> PersistResult<()> {
        let line = encode_line(record)?;
        self.write_all(&line)
    }

    /// Append two records in a single write so the pair cannot be split by
    /// a failed append. Used by expired-reservation requeue, whose
    /// delete-then-enqueue pair must land together.
    pub fn append_pair(&mut self, first: &WalRecord, second: &WalRecord) -> PersistResult<()> {
        let mut buf = encode_line(first)?;
        buf.extend_from_slice(&encode_line(second)?);
        self.write_all(&buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> PersistResult<()> {
        let file = match &mut self.file {
            Some(f) => f,
            slot @ None => slot.insert(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?,
            ),
        };
        file.write_all(buf)?;
        if self.sync_on_append {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Close the handle and remove the log file. A missing file is fine.
    pub fn remove_file(&mut self) -> PersistResult<()> {
        self.file = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the open handle without touching the file. Needed before the
    /// idle-reset rename dance takes ownership of the path.
    pub fn release_handle(&mut self) {
        self.file = None;
    }
}

fn encode_line(record: &WalRecord) -> PersistResult<Vec<u8>> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

/// Read every record in the log, in order. A missing file is an empty log.
///
/// A record that fails to decode at the very end of the file is the residue
/// of an append that crashed mid-write; it was never acknowledged, so it is
/// discarded with a warning. A decode failure anywhere earlier means the
/// log cannot be trusted and surfaces as a codec error.
pub fn read_records(path: &Path) -> PersistResult<Vec<WalRecord>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<String>>>()?;

    let mut records = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WalRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                let only_blank_after = lines[idx + 1..].iter().all(|l| l.trim().is_empty());
                if only_blank_after {
                    warn!(error = %e, line = idx + 1, "discarding torn record at end of log");
                    break;
                }
                return Err(PersistError::Codec(format!(
                    "log record {}: {e}",
                    idx + 1
                )));
            }
        }
    }
    Ok(records)
}
