use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Storage errors
    #[error(transparent)]
    Store(#[from] StoreError),

    // Audio errors
    #[error("Audio source failed to load for song {song_id}: {reason}")]
    AudioLoad { song_id: i64, reason: String },

    // Cross-window errors
    #[error("Window is closed")]
    WindowClosed,

    #[error("Failed to open player window: {reason}")]
    WindowOpen { reason: String },

    #[error("Invalid origin {origin:?}: {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("Failed to encode window message: {0}")]
    MessageEncode(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors reported by song and settings stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The write was rejected because it would break a store constraint.
    #[error("Constraint violation: {reason}")]
    ConstraintViolation { reason: String },

    /// The underlying database or filesystem failed.
    #[error("Store I/O failure: {0}")]
    Io(#[from] tokio_rusqlite::Error),

    /// A stored document could not be encoded or decoded.
    #[error("Store serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Io(tokio_rusqlite::Error::Rusqlite(error))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
