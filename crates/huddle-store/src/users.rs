use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use huddle_types::models::User;

use crate::{fmt_ts, parse_ts, Database, StoreError};

impl Database {
    pub fn create_user(&self, user: &User) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                (
                    user.id.to_string(),
                    user.username.as_str(),
                    fmt_ts(user.created_at),
                ),
            )?;
            Ok(())
        })
    }

    pub fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.with_conn(|conn| {
            query_user(
                conn,
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                &id.to_string(),
            )
        })
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.with_conn(|conn| {
            query_user(
                conn,
                "SELECT id, username, created_at FROM users WHERE username = ?1",
                username,
            )
        })
    }
}

fn query_user(conn: &Connection, sql: &str, key: &str) -> Result<Option<User>, StoreError> {
    let row = conn
        .query_row(sql, [key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .optional()?;

    row.map(|(id, username, created_at)| {
        Ok(User {
            id: parse_uuid(&id)?,
            username,
            created_at: parse_ts(&created_at)?,
        })
    })
    .transpose()
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::try_parse(raw).map_err(|_| StoreError::Corrupt(format!("bad uuid: {raw}")))
}
