use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use huddle_types::dto::{PageRequest, Slice};
use huddle_types::models::{GroupChannel, GroupMessage, MessageKind, User};

use crate::users::parse_uuid;
use crate::{fmt_ts, parse_ts, Database, StoreError};

const MEMBERS_SQL: &str = "SELECT u.id, u.username, u.created_at
     FROM channel_members cm JOIN users u ON u.id = cm.user_id
     WHERE cm.channel_id = ?1";

const INVITED_SQL: &str = "SELECT u.id, u.username, u.created_at
     FROM channel_invited ci JOIN users u ON u.id = ci.user_id
     WHERE ci.channel_id = ?1";

const MESSAGE_SELECT: &str = "SELECT m.id, m.channel_id, m.from_user_id, u.username, u.created_at,
            m.kind, m.payload, m.created_at
     FROM messages m LEFT JOIN users u ON u.id = m.from_user_id";

impl Database {
    pub fn find_channel_by_id(&self, id: Uuid) -> Result<Option<GroupChannel>, StoreError> {
        self.with_conn(|conn| load_channel(conn, id))
    }

    /// Persist the aggregate: channel row, membership sets, and the
    /// messages appended since load, all in one transaction. Fails with
    /// `Conflict` when the stored version is no longer the one the
    /// aggregate was loaded at. On success the in-memory version is
    /// advanced and the pending messages are drained (they now live in
    /// the log; `last_message` keeps the latest).
    pub fn save_channel(&self, channel: &mut GroupChannel) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            match persist_channel(conn, channel) {
                Ok(()) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(())
                }
                Err(e) => {
                    conn.execute_batch("ROLLBACK").ok();
                    Err(e)
                }
            }
        })?;

        channel.version += 1;
        channel.messages.clear();
        Ok(())
    }

    /// Channels the user is a member of, updated at or after `since`,
    /// newest first. Fetches one row past the page to compute `has_next`.
    /// Empty channels never match the membership join.
    pub fn find_channels_by_membership(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Slice<GroupChannel>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id FROM channels c
                 JOIN channel_members cm ON cm.channel_id = c.id
                 WHERE cm.user_id = ?1 AND c.updated_at >= ?2
                 ORDER BY c.updated_at DESC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let ids: Vec<String> = stmt
                .query_map(
                    params![
                        user_id.to_string(),
                        fmt_ts(since),
                        page.size as i64 + 1,
                        page.page as i64 * page.size as i64
                    ],
                    |row| row.get(0),
                )?
                .collect::<Result<_, _>>()?;

            let has_next = ids.len() > page.size as usize;
            let mut items = Vec::with_capacity(ids.len().min(page.size as usize));
            for id in ids.into_iter().take(page.size as usize) {
                if let Some(channel) = load_channel(conn, parse_uuid(&id)?)? {
                    items.push(channel);
                }
            }
            Ok(Slice {
                current_page: page.page,
                page_size: page.size,
                has_next,
                items,
            })
        })
    }

    /// Paged message history of a channel, newest first. Message ids are
    /// time-ordered, so they break ties between equal timestamps.
    pub fn find_messages_by_channel(
        &self,
        channel_id: Uuid,
        page: PageRequest,
    ) -> Result<Slice<GroupMessage>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.channel_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<MessageRow> = stmt
                .query_map(
                    params![
                        channel_id.to_string(),
                        page.size as i64 + 1,
                        page.page as i64 * page.size as i64
                    ],
                    read_message_row,
                )?
                .collect::<Result<_, _>>()?;

            let has_next = rows.len() > page.size as usize;
            let items = rows
                .into_iter()
                .take(page.size as usize)
                .map(message_from_raw)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Slice {
                current_page: page.page,
                page_size: page.size,
                has_next,
                items,
            })
        })
    }
}

fn persist_channel(conn: &Connection, channel: &GroupChannel) -> Result<(), StoreError> {
    let key = channel.id.to_string();

    if channel.version == 0 {
        conn.execute(
            "INSERT INTO channels (id, name, version, last_message_id, updated_at)
             VALUES (?1, ?2, 1, NULL, ?3)",
            params![key, channel.name, fmt_ts(channel.updated_at)],
        )?;
    } else {
        let changed = conn.execute(
            "UPDATE channels SET name = ?2, updated_at = ?3, version = version + 1
             WHERE id = ?1 AND version = ?4",
            params![key, channel.name, fmt_ts(channel.updated_at), channel.version],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict);
        }
    }

    conn.execute("DELETE FROM channel_members WHERE channel_id = ?1", [&key])?;
    let mut insert_member =
        conn.prepare("INSERT INTO channel_members (channel_id, user_id) VALUES (?1, ?2)")?;
    for user in &channel.members {
        insert_member.execute(params![key, user.id.to_string()])?;
    }

    conn.execute("DELETE FROM channel_invited WHERE channel_id = ?1", [&key])?;
    let mut insert_invited =
        conn.prepare("INSERT INTO channel_invited (channel_id, user_id) VALUES (?1, ?2)")?;
    for user in &channel.invited {
        insert_invited.execute(params![key, user.id.to_string()])?;
    }

    let mut insert_message = conn.prepare(
        "INSERT INTO messages (id, channel_id, from_user_id, kind, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for message in &channel.messages {
        insert_message.execute(params![
            message.id.to_string(),
            key,
            message.from.as_ref().map(|u| u.id.to_string()),
            message.kind.as_str(),
            message.payload,
            fmt_ts(message.created_at)
        ])?;
    }

    if let Some(last) = channel.messages.last() {
        conn.execute(
            "UPDATE channels SET last_message_id = ?2 WHERE id = ?1",
            params![key, last.id.to_string()],
        )?;
    }

    Ok(())
}

fn load_channel(conn: &Connection, id: Uuid) -> Result<Option<GroupChannel>, StoreError> {
    let key = id.to_string();
    let header = conn
        .query_row(
            "SELECT name, version, last_message_id, updated_at FROM channels WHERE id = ?1",
            [&key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((name, version, last_message_id, updated_at)) = header else {
        return Ok(None);
    };

    let members = query_user_set(conn, &key, MEMBERS_SQL)?;
    let invited = query_user_set(conn, &key, INVITED_SQL)?;
    let last_message = match last_message_id {
        Some(message_id) => query_message_by_id(conn, &message_id)?,
        None => None,
    };

    Ok(Some(GroupChannel {
        id,
        name,
        members,
        invited,
        messages: Vec::new(),
        last_message,
        updated_at: parse_ts(&updated_at)?,
        version,
    }))
}

fn query_user_set(
    conn: &Connection,
    channel_id: &str,
    sql: &str,
) -> Result<HashSet<User>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows: Vec<(String, String, String)> = stmt
        .query_map([channel_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<_, _>>()?;

    rows.into_iter()
        .map(|(id, username, created_at)| {
            Ok(User {
                id: parse_uuid(&id)?,
                username,
                created_at: parse_ts(&created_at)?,
            })
        })
        .collect()
}

type MessageRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
);

fn read_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn message_from_raw(raw: MessageRow) -> Result<GroupMessage, StoreError> {
    let (id, channel_id, from_id, from_name, from_created, kind, payload, created_at) = raw;
    let from = match (from_id, from_name, from_created) {
        (Some(user_id), Some(username), Some(user_created)) => Some(User {
            id: parse_uuid(&user_id)?,
            username,
            created_at: parse_ts(&user_created)?,
        }),
        _ => None,
    };
    let kind = MessageKind::parse(&kind)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown message kind: {kind}")))?;

    Ok(GroupMessage {
        id: parse_uuid(&id)?,
        channel_id: parse_uuid(&channel_id)?,
        from,
        kind,
        payload,
        created_at: parse_ts(&created_at)?,
    })
}

fn query_message_by_id(
    conn: &Connection,
    message_id: &str,
) -> Result<Option<GroupMessage>, StoreError> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    let raw = conn
        .query_row(&sql, [message_id], read_message_row)
        .optional()?;
    raw.map(message_from_raw).transpose()
}
