use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{GroupChannel, GroupMessage, MessageKind, User};

/// The public face of a user inside channel payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublicProfile {
    pub id: Uuid,
    pub name: String,
}

impl From<&User> for UserPublicProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.username.clone(),
        }
    }
}

/// Wire form of a group message: what the bus carries and what transports
/// push to clients. `createdAt` serializes as RFC 3339 with UTC offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageDto {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub from: Option<UserPublicProfile>,
    pub kind: MessageKind,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl From<&GroupMessage> for GroupMessageDto {
    fn from(message: &GroupMessage) -> Self {
        Self {
            id: message.id,
            channel_id: message.channel_id,
            from: message.from.as_ref().map(UserPublicProfile::from),
            kind: message.kind,
            payload: message.payload.clone(),
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChannelProfile {
    pub id: Uuid,
    pub name: String,
    pub members: Vec<UserPublicProfile>,
    pub invited: Vec<UserPublicProfile>,
    pub updated_at: DateTime<Utc>,
}

impl From<&GroupChannel> for GroupChannelProfile {
    fn from(channel: &GroupChannel) -> Self {
        let mut members: Vec<UserPublicProfile> =
            channel.members.iter().map(UserPublicProfile::from).collect();
        let mut invited: Vec<UserPublicProfile> =
            channel.invited.iter().map(UserPublicProfile::from).collect();
        // HashSet iteration order is arbitrary; keep payloads deterministic.
        members.sort_by(|a, b| a.name.cmp(&b.name));
        invited.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            id: channel.id,
            name: channel.name.clone(),
            members,
            invited,
            updated_at: channel.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

/// A page of results without a total count: enough to keep iterating
/// (`has_next`) but nothing more.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice<T> {
    pub current_page: u32,
    pub page_size: u32,
    pub has_next: bool,
    pub items: Vec<T>,
}

impl<T> Slice<T> {
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Slice<U> {
        Slice {
            current_page: self.current_page,
            page_size: self.page_size,
            has_next: self.has_next,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}
