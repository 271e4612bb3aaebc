//! SQLite-backed implementation of the queue contract.
//!
//! One row per item. Priority ordering is `ORDER BY priority ASC/DESC`, the
//! delayed gate is `not_before <= now`, and a reservation is a flagged row
//! with its id and timestamp. Dequeue and reserve run select-then-mutate
//! inside a transaction so concurrent consumers never double-deliver.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::engine::MAX_CHANNEL;
use crate::error::{EngineError, PersistError, Result};
use crate::item::Reservation;
use crate::queue::PriorityQueue;

pub const DEFAULT_TABLE: &str = "queue_items";

const CREATE_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY,
    priority DOUBLE NOT NULL,
    payload TEXT NOT NULL,
    channel INTEGER NOT NULL,
    not_before INTEGER NOT NULL DEFAULT 0,
    reserved INTEGER NOT NULL DEFAULT 0,
    reserved_id TEXT,
    reserved_at INTEGER
)";

pub struct SqliteQueue {
    conn: Mutex<Connection>,
    table: String,
    min_queue: bool,
}

impl SqliteQueue {
    /// Open (or create) the database at `path` and ensure the queue table
    /// exists. An empty `table` falls back to `queue_items`.
    pub fn open(path: impl AsRef<Path>, table: &str, min_queue: bool) -> Result<Self> {
        let conn = Connection::open(path).map_err(PersistError::from)?;
        let table = if table.is_empty() {
            DEFAULT_TABLE.to_string()
        } else {
            table.to_string()
        };
        let queue = Self {
            conn: Mutex::new(conn),
            table,
            min_queue,
        };
        queue.create_table()?;
        Ok(queue)
    }

    fn create_table(&self) -> Result<()> {
        self.lock()
            .execute(&CREATE_TABLE_SQL.replace("{table}", &self.table), [])
            .map_err(PersistError::from)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn order(&self) -> &'static str {
        if self.min_queue {
            "ASC"
        } else {
            "DESC"
        }
    }

    /// `SELECT` shared by dequeue, reserve, and peek: the best eligible row
    /// on a channel as of `now`.
    fn select_head_sql(&self) -> String {
        format!(
            "SELECT id, payload FROM {} \
             WHERE reserved = 0 AND channel = ?1 AND not_before <= ?2 \
             ORDER BY priority {} LIMIT 1",
            self.table,
            self.order()
        )
    }
}

impl PriorityQueue for SqliteQueue {
    fn enqueue(
        &self,
        payload: &str,
        priority: f64,
        channel: usize,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if channel >= MAX_CHANNEL {
            return Err(EngineError::InvalidChannel(channel));
        }
        let nb = not_before.map(|t| t.timestamp()).unwrap_or(0);
        self.lock()
            .execute(
                &format!(
                    "INSERT INTO {} (priority, payload, channel, not_before, reserved) \
                     VALUES (?1, ?2, ?3, ?4, 0)",
                    self.table
                ),
                params![priority, payload, channel as i64, nb],
            )
            .map_err(PersistError::from)?;
        Ok(())
    }

    fn dequeue(&self, channel: usize) -> Result<String> {
        if channel >= MAX_CHANNEL {
            return Err(EngineError::InvalidChannel(channel));
        }
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(PersistError::from)?;

        let row: Option<(i64, String)> = tx
            .query_row(
                &self.select_head_sql(),
                params![channel as i64, Utc::now().timestamp()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(PersistError::from)?;
        let Some((id, payload)) = row else {
            return Err(EngineError::EmptyQueue);
        };

        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table),
            params![id],
        )
        .map_err(PersistError::from)?;
        tx.commit().map_err(PersistError::from)?;
        Ok(payload)
    }

    fn peek(&self, channel: usize) -> Result<String> {
        if channel >= MAX_CHANNEL {
            return Err(EngineError::InvalidChannel(channel));
        }
        let payload: Option<String> = self
            .lock()
            .query_row(
                &self.select_head_sql(),
                params![channel as i64, Utc::now().timestamp()],
                |r| r.get(1),
            )
            .optional()
            .map_err(PersistError::from)?;
        payload.ok_or(EngineError::EmptyQueue)
    }

    fn dequeue_with_reservation(&self, channel: usize) -> Result<(String, String)> {
        if channel >= MAX_CHANNEL {
            return Err(EngineError::InvalidChannel(channel));
        }
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(PersistError::from)?;

        let row: Option<(i64, String)> = tx
            .query_row(
                &self.select_head_sql(),
                params![channel as i64, Utc::now().timestamp()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(PersistError::from)?;
        let Some((id, payload)) = row else {
            return Err(EngineError::EmptyQueue);
        };

        let res_id = Reservation::new_id().to_string();
        tx.execute(
            &format!(
                "UPDATE {} SET reserved = 1, reserved_id = ?1, reserved_at = ?2 WHERE id = ?3",
                self.table
            ),
            params![res_id, Utc::now().timestamp(), id],
        )
        .map_err(PersistError::from)?;
        tx.commit().map_err(PersistError::from)?;
        Ok((payload, res_id))
    }

    fn confirm_reservation(&self, reservation_id: &str) -> Result<()> {
        // Reject ids that were never issued without touching the table.
        if Uuid::parse_str(reservation_id).is_err() {
            return Err(EngineError::InvalidReservation(reservation_id.to_string()));
        }
        let changed = self
            .lock()
            .execute(
                &format!(
                    "DELETE FROM {} WHERE reserved = 1 AND reserved_id = ?1",
                    self.table
                ),
                params![reservation_id],
            )
            .map_err(PersistError::from)?;
        if changed == 0 {
            return Err(EngineError::InvalidReservation(reservation_id.to_string()));
        }
        Ok(())
    }

    fn requeue_expired_reservations(&self, timeout: Duration) -> (usize, Option<EngineError>) {
        let cutoff = Utc::now().timestamp() - timeout.as_secs() as i64;
        let result = self.lock().execute(
            &format!(
                "UPDATE {} SET reserved = 0, reserved_id = NULL, reserved_at = NULL \
                 WHERE reserved = 1 AND reserved_at <= ?1",
                self.table
            ),
            params![cutoff],
        );
        match result {
            Ok(changed) => (changed, None),
            Err(e) => (0, Some(PersistError::from(e).into())),
        }
    }

    fn size(&self, channel: usize) -> Result<usize> {
        if channel >= MAX_CHANNEL {
            return Ok(0);
        }
        let count: i64 = self
            .lock()
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} \
                     WHERE reserved = 0 AND channel = ?1 AND not_before <= ?2",
                    self.table
                ),
                params![channel as i64, Utc::now().timestamp()],
                |r| r.get(0),
            )
            .map_err(PersistError::from)?;
        Ok(count as usize)
    }

    fn is_empty(&self, channel: usize) -> Result<bool> {
        if channel >= MAX_CHANNEL {
            return Ok(true);
        }
        let found: Option<i64> = self
            .lock()
            .query_row(
                &format!(
                    "SELECT 1 FROM {} \
                     WHERE reserved = 0 AND channel = ?1 AND not_before <= ?2 LIMIT 1",
                    self.table
                ),
                params![channel as i64, Utc::now().timestamp()],
                |r| r.get(0),
            )
            .optional()
            .map_err(PersistError::from)?;
        Ok(found.is_none())
    }

    fn reset(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute(&format!("DROP TABLE IF EXISTS {}", self.table), [])
            .map_err(PersistError::from)?;
        conn.execute(&CREATE_TABLE_SQL.replace("{table}", &self.table), [])
            .map_err(PersistError::from)?;
        Ok(())
    }
}
