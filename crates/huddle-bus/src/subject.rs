//! Subject codec for per-user group-channel traffic.
//!
//! Group subjects live in their own `chat.group.user.` namespace,
//! disjoint by prefix from the `chat.private.*` and `chat.system.*`
//! families. Encoded subjects are ASCII, fixed-bounded in length, and
//! contain no wildcard characters.

use uuid::Uuid;

const GROUP_USER_PREFIX: &str = "chat.group.user.";

/// Bus subject carrying group-channel messages addressed to one user.
pub fn group_user_subject(user_id: Uuid) -> String {
    format!("{GROUP_USER_PREFIX}{user_id}")
}

/// Inverse of [`group_user_subject`]; `None` for subjects outside the
/// group namespace.
pub fn user_of_group_subject(subject: &str) -> Option<Uuid> {
    subject
        .strip_prefix(GROUP_USER_PREFIX)
        .and_then(|raw| Uuid::try_parse(raw).ok())
}
