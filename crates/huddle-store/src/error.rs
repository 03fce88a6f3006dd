use huddle_types::ChatError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The aggregate's version advanced since it was loaded; the caller
    /// may re-load and retry.
    #[error("optimistic lock conflict")]
    Conflict,

    #[error("database lock poisoned")]
    Poisoned,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => ChatError::Conflict,
            other => ChatError::Storage(other.to_string()),
        }
    }
}
