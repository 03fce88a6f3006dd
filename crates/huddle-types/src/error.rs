use thiserror::Error;

/// Error taxonomy shared by every layer of the group-channel core.
///
/// Only `Conflict` is ever retried (by the service, with backoff); every
/// other variant aborts the current operation and is surfaced to the caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("user does not exist")]
    UserDoesNotExist,

    #[error("channel does not exist")]
    ChannelDoesNotExist,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("optimistic lock conflict")]
    Conflict,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("bus failure: {0}")]
    Bus(String),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        ChatError::InvalidOperation(message.into())
    }
}
