use uuid::Uuid;

use crate::dto::PageRequest;
use crate::error::ChatError;

pub const MAX_CHANNEL_NAME_LEN: usize = 128;
pub const MAX_MESSAGE_TEXT_LEN: usize = 4096;

/// Channel names are trimmed, non-empty, and length-bounded.
pub fn channel_name(raw: &str) -> Result<String, ChatError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ChatError::validation("channel name must not be empty"));
    }
    if name.chars().count() > MAX_CHANNEL_NAME_LEN {
        return Err(ChatError::validation(format!(
            "channel name must be at most {MAX_CHANNEL_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

pub fn message_text(raw: &str) -> Result<String, ChatError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ChatError::validation("message must not be empty"));
    }
    if text.chars().count() > MAX_MESSAGE_TEXT_LEN {
        return Err(ChatError::validation(format!(
            "message must be at most {MAX_MESSAGE_TEXT_LEN} characters"
        )));
    }
    Ok(text.to_string())
}

/// Identifier inputs arrive as strings and must parse as UUIDs before any
/// I/O happens.
pub fn uuid(raw: &str) -> Result<Uuid, ChatError> {
    Uuid::try_parse(raw.trim())
        .map_err(|_| ChatError::validation(format!("not a valid uuid: {raw}")))
}

pub fn page_request(page: &PageRequest) -> Result<(), ChatError> {
    if page.size == 0 {
        return Err(ChatError::validation("page size must be >= 1"));
    }
    Ok(())
}
