use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

/// Current schema version. Increment this and add a new migration function
/// to the `MIGRATIONS` array when the schema changes.
const CURRENT_VERSION: u32 = 1;

/// Each migration is a function that takes a connection and applies changes.
/// Migrations are applied sequentially starting from the current version + 1.
type MigrationFn = fn(&Connection) -> Result<(), StoreError>;

/// Ordered list of migrations. Index 0 = version 1, index 1 = version 2, etc.
const MIGRATIONS: &[MigrationFn] = &[migrate_v1];

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = get_current_version(conn)?;
    if current >= CURRENT_VERSION {
        return Ok(());
    }

    // Each migration + version bump is wrapped in a transaction.
    // BEGIN IMMEDIATE acquires the write lock up front so concurrent
    // writers cannot interleave; on error the migration rolls back whole.
    for version in (current + 1)..=CURRENT_VERSION {
        let idx = (version - 1) as usize;
        info!("applying migration v{}", version);

        conn.execute_batch("BEGIN IMMEDIATE")?;
        match MIGRATIONS[idx](conn) {
            Ok(()) => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
                conn.execute_batch("COMMIT")?;
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                return Err(e);
            }
        }
    }

    info!("database migrations complete (now at v{})", CURRENT_VERSION);
    Ok(())
}

fn get_current_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Version 1: users, channels with their membership sets, and the
/// append-only message log. `channels.version` backs optimistic locking;
/// `last_message_id` is an id reference resolved on load (the message row
/// itself carries `channel_id`).
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            id               TEXT PRIMARY KEY,
            name             TEXT NOT NULL,
            version          INTEGER NOT NULL DEFAULT 0,
            last_message_id  TEXT,
            updated_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_channels_updated
            ON channels(updated_at);

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_members_user
            ON channel_members(user_id);

        CREATE TABLE IF NOT EXISTS channel_invited (
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id            TEXT PRIMARY KEY,
            channel_id    TEXT NOT NULL REFERENCES channels(id),
            from_user_id  TEXT REFERENCES users(id),
            kind          TEXT NOT NULL,
            payload       TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);
        ",
    )?;
    Ok(())
}
