/// Infrastructure errors from the persistence layer (file I/O, encoding,
/// SQLite). Operations on the persistence layer can only fail with these,
/// never with domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("sqlite error: {0}")]
    Sqlite(String),
}

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        PersistError::Codec(err.to_string())
    }
}

impl From<rusqlite::Error> for PersistError {
    fn from(err: rusqlite::Error) -> Self {
        PersistError::Sqlite(err.to_string())
    }
}

/// Domain-level errors for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Channel outside `[0, MAX_CHANNEL)` on an operation that targets one.
    #[error("invalid channel: {0}")]
    InvalidChannel(usize),

    /// The targeted ready heap has no item after the promotion sweep.
    #[error("queue is empty")]
    EmptyQueue,

    #[error("invalid or expired reservation id: {0}")]
    InvalidReservation(String),

    /// The snapshot or log on disk could not be decoded during recovery.
    /// Fatal: an engine must not start over state it cannot reconstruct.
    #[error("corrupt persisted state: {0}")]
    CorruptPersistence(String),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

pub type PersistResult<T> = std::result::Result<T, PersistError>;
pub type Result<T> = std::result::Result<T, EngineError>;
