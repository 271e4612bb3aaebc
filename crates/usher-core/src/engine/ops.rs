//! The queue operations contract, implemented over the engine state.
//!
//! Mutation ordering: the log append comes first, and only on success is
//! memory touched. Dequeue and reserve pop first (the record needs the item
//! identity) and re-push on append failure, which is equivalent: no caller
//! can observe the window because the engine mutex is held throughout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{EngineInner, QueueEngine, MAX_CHANNEL};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::item::{DelayedItem, QueueItem, Reservation};
use crate::queue::PriorityQueue;
use crate::wal::WalRecord;

impl PriorityQueue for QueueEngine {
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
        let mut inner = self.lock();

        // Stored priority is always the min-heap key; a max-queue negates.
        let stored = if self.config.min_queue { priority } else { -priority };
        let item = QueueItem {
            payload: payload.to_string(),
            priority: stored,
            not_before,
        };

        let now = Self::now();
        if matches!(not_before, Some(nb) if nb > now) {
            inner.append_wal(WalRecord::enqueue_notbefore(channel, item.clone()))?;
            inner.delayed.push(DelayedItem { item, channel });
        } else {
            inner.append_wal(WalRecord::enqueue(channel, item.clone()))?;
            inner.channels[channel].push(item);
        }
        inner.maybe_checkpoint(&self.config);
        Ok(())
    }

    fn dequeue(&self, channel: usize) -> Result<String> {
        if channel >= MAX_CHANNEL {
            return Err(EngineError::InvalidChannel(channel));
        }
        let mut inner = self.lock();
        inner.promote_due(Self::now(), &self.config);

        let item = inner.channels[channel]
            .pop()
            .ok_or(EngineError::EmptyQueue)?;
        if let Err(e) = inner.append_wal(WalRecord::dequeue(channel, item.clone())) {
            inner.channels[channel].push(item);
            return Err(e);
        }
        inner.maybe_checkpoint(&self.config);
        Ok(item.payload)
    }

    fn peek(&self, channel: usize) -> Result<String> {
        if channel >= MAX_CHANNEL {
            return Err(EngineError::InvalidChannel(channel));
        }
        let mut inner = self.lock();
        inner.promote_due(Self::now(), &self.config);
        inner.channels[channel]
            .peek()
            .map(|item| item.payload.clone())
            .ok_or(EngineError::EmptyQueue)
    }

    fn dequeue_with_reservation(&self, channel: usize) -> Result<(String, String)> {
        if channel >= MAX_CHANNEL {
            return Err(EngineError::InvalidChannel(channel));
        }
        let mut inner = self.lock();
        inner.promote_due(Self::now(), &self.config);

        let item = inner.channels[channel]
            .pop()
            .ok_or(EngineError::EmptyQueue)?;
        let res_id = Reservation::new_id();
        if let Err(e) = inner.append_wal(WalRecord::reserve(channel, item.clone(), res_id)) {
            inner.channels[channel].push(item);
            return Err(e);
        }

        let payload = item.payload.clone();
        inner.reserved.insert(
            res_id,
            Reservation {
                item,
                channel,
                reserved_at: Self::now(),
            },
        );
        inner.maybe_checkpoint(&self.config);
        debug!(channel, res_id = %res_id, "item reserved");
        Ok((payload, res_id.to_string()))
    }

    fn confirm_reservation(&self, reservation_id: &str) -> Result<()> {
        let res_id = Uuid::parse_str(reservation_id)
            .map_err(|_| EngineError::InvalidReservation(reservation_id.to_string()))?;

        let mut inner = self.lock();
        if !inner.reserved.contains_key(&res_id) {
            return Err(EngineError::InvalidReservation(reservation_id.to_string()));
        }
        inner.append_wal(WalRecord::confirm(res_id))?;
        inner.reserved.remove(&res_id);
        inner.maybe_checkpoint(&self.config);
        debug!(res_id = %res_id, "reservation confirmed");
        Ok(())
    }

    fn requeue_expired_reservations(&self, timeout: Duration) -> (usize, Option<EngineError>) {
        let mut inner = self.lock();
        let now = Self::now();
        let cutoff =
            chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);

        let expired: Vec<Uuid> = inner
            .reserved
            .iter()
            .filter(|(_, r)| now - r.reserved_at > cutoff)
            .map(|(id, _)| *id)
            .collect();

        let mut requeued = 0;
        for res_id in expired {
            let Some(reservation) = inner.reserved.get(&res_id).cloned() else {
                continue;
            };
            // The delete/enqueue pair lands in one append so a failure
            // cannot split it; on error the reservation is left untouched.
            if let Err(e) = inner.append_wal_pair(
                WalRecord::delete_reserved(reservation.channel, reservation.item.clone()),
                WalRecord::enqueue(reservation.channel, reservation.item.clone()),
            ) {
                warn!(error = %e, res_id = %res_id, requeued, "requeue stopped on log failure");
                return (requeued, Some(e));
            }
            inner.channels[reservation.channel].push(reservation.item);
            inner.reserved.remove(&res_id);
            requeued += 1;
            inner.maybe_checkpoint(&self.config);
        }
        (requeued, None)
    }

    fn size(&self, channel: usize) -> Result<usize> {
        if channel >= MAX_CHANNEL {
            return Ok(0);
        }
        let mut inner = self.lock();
        inner.promote_due(Self::now(), &self.config);
        Ok(inner.channels[channel].len())
    }

    fn is_empty(&self, channel: usize) -> Result<bool> {
        if channel >= MAX_CHANNEL {
            return Ok(true);
        }
        let mut inner = self.lock();
        inner.promote_due(Self::now(), &self.config);
        Ok(inner.channels[channel].is_empty())
    }

    fn reset(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.clear();
        inner.remove_files()?;
        Ok(())
    }
}

impl EngineInner {
    /// Drain every due entry from the delayed heap into its channel's ready
    /// heap, logging each promotion. Runs ahead of every operation that
    /// reads or mutates a ready heap; skipping it would leave size and peek
    /// reporting stale values.
    pub(super) fn promote_due(&mut self, now: DateTime<Utc>, config: &EngineConfig) {
        loop {
            match self.delayed.peek() {
                Some(entry) if entry.release_at() <= now => {}
                _ => return,
            }
            let Some(entry) = self.delayed.pop() else { return };

            if let Err(e) =
                self.append_wal(WalRecord::enqueue(entry.channel, entry.item.clone()))
            {
                warn!(error = %e, channel = entry.channel, "failed to log promotion, item stays delayed");
                self.delayed.push(entry);
                return;
            }
            self.channels[entry.channel].push(entry.item);
            self.maybe_checkpoint(config);
        }
    }
}
