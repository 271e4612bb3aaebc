use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Core item domain type: an opaque payload, its effective priority, and an
/// optional release time. This is the internal representation shared by the
/// heaps, the log, and the snapshot, distinct from the HTTP wire shapes.
///
/// The stored priority is always the min-heap ordering key: when the engine
/// is configured as a max-queue, the caller's priority is negated at
/// insertion and `priority` holds the negated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub payload: String,
    pub priority: f64,
    pub not_before: Option<DateTime<Utc>>,
}

/// Entry in the delayed heap: an item waiting out its not-before time,
/// together with the channel it will be promoted into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedItem {
    pub item: QueueItem,
    pub channel: usize,
}

impl DelayedItem {
    /// The wall-clock time at which this entry becomes eligible for
    /// promotion. An unset not-before is already due.
    pub fn release_at(&self) -> DateTime<Utc> {
        self.item.not_before.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// A tentatively dequeued item: withheld from its ready heap, not yet
/// destroyed. Confirmed by the consumer or requeued after a timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub item: QueueItem,
    pub channel: usize,
    pub reserved_at: DateTime<Utc>,
}

impl Reservation {
    /// Generate a fresh reservation id.
    pub fn new_id() -> Uuid {
        Uuid::new_v4()
    }
}
