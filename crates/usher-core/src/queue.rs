use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};

/// The queue operations contract. Implementations must be thread-safe; the
/// trait is object-safe so transports can hold `Arc<dyn PriorityQueue>`.
///
/// Channel arguments are identifiers in `[0, MAX_CHANNEL)`. Out-of-range
/// channels are rejected with `InvalidChannel` by the operations that touch
/// an item; `size` and `is_empty` treat them as empty instead.
pub trait PriorityQueue: Send + Sync {
    /// Store an item. With a future `not_before` the item is withheld until
    /// that time; otherwise it is immediately eligible on `channel`.
    fn enqueue(
        &self,
        payload: &str,
        priority: f64,
        channel: usize,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Remove and return the least-priority eligible item on `channel`, or
    /// `EmptyQueue` if there is none.
    fn dequeue(&self, channel: usize) -> Result<String>;

    /// The least-priority eligible payload on `channel` without removing it.
    fn peek(&self, channel: usize) -> Result<String>;

    /// Like `dequeue`, but the item is held in the reservation table
    /// instead of destroyed. Returns the payload and the reservation id;
    /// the item is re-delivered if the reservation is never confirmed.
    fn dequeue_with_reservation(&self, channel: usize) -> Result<(String, String)>;

    /// Destroy a reserved item. Fails with `InvalidReservation` when the id
    /// is unknown (never issued, already confirmed, or already requeued).
    fn confirm_reservation(&self, reservation_id: &str) -> Result<()>;

    /// Return every reservation older than `timeout` to the ready heap of
    /// its original channel, at its original priority. Returns the count
    /// requeued together with the first error encountered, if any; the
    /// count is valid either way.
    fn requeue_expired_reservations(&self, timeout: Duration) -> (usize, Option<EngineError>);

    /// Number of eligible items on `channel`. Out-of-range channels count 0.
    fn size(&self, channel: usize) -> Result<usize>;

    /// Whether `channel` has no eligible item. Out-of-range channels are empty.
    fn is_empty(&self, channel: usize) -> Result<bool>;

    /// Drop all state. Persistent implementations also delete their
    /// on-disk files; subsequent operations see an empty queue.
    fn reset(&self) -> Result<()>;
}
