pub mod config;
pub mod engine;
pub mod error;
pub mod heap;
pub mod item;
pub mod queue;
pub mod snapshot;
pub mod sqlite;
pub mod telemetry;
pub mod wal;

pub use config::EngineConfig;
pub use engine::{QueueEngine, MAX_CHANNEL};
pub use error::{EngineError, PersistError, PersistResult, Result};
pub use item::{DelayedItem, QueueItem, Reservation};
pub use queue::PriorityQueue;
pub use sqlite::SqliteQueue;
