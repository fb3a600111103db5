use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use time::OffsetDateTime;

const SCHEMA: [&str; 6] = [
    "CREATE TABLE IF NOT EXISTS rooms (
        room_id TEXT PRIMARY KEY,
        name_a TEXT NOT NULL,
        name_b TEXT NOT NULL,
        passcode TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS slots (
        room_id TEXT NOT NULL,
        slot TEXT NOT NULL CHECK(slot IN ('A', 'B')),
        connection_id TEXT,
        username TEXT,
        last_active INTEGER NOT NULL,
        PRIMARY KEY (room_id, slot),
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        room_id TEXT NOT NULL,
        sender_slot TEXT NOT NULL CHECK(sender_slot IN ('A', 'B')),
        sender_id TEXT NOT NULL,
        sender_name TEXT NOT NULL,
        text TEXT NOT NULL,
        ts INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'sent' CHECK(status IN ('sent', 'delivered', 'read')),
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_room_id ON messages(room_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(ts)",
    "CREATE INDEX IF NOT EXISTS idx_slots_connection_id ON slots(connection_id)",
];

/// Opens the pool. Foreign keys are switched on so rooms cascade to their
/// slots and messages.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

pub async fn init(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db_pool).await?;
    }
    Ok(())
}

/// Milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    #[serde(alias = "user1", alias = "a")]
    A,
    #[serde(alias = "user2", alias = "b")]
    B,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::A, Slot::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::A => "A",
            Slot::B => "B",
        }
    }

    pub fn parse(s: &str) -> Option<Slot> {
        match s {
            "A" => Some(Slot::A),
            "B" => Some(Slot::B),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<MessageStatus> {
        match s {
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub room_id: String,
    pub name_a: String,
    pub name_b: String,
    pub passcode: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub room_id: String,
    pub slot: Slot,
    pub connection_id: Option<String>,
    pub username: Option<String>,
    pub last_active: i64,
}

impl SlotRecord {
    pub fn is_available(&self) -> bool {
        self.connection_id.is_none()
    }
}

/// Stored message; serializes as the `message` event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    #[serde(skip)]
    pub room_id: String,
    pub sender_slot: Slot,
    pub sender_id: String,
    #[serde(rename = "from")]
    pub sender_name: String,
    pub text: String,
    pub ts: i64,
    pub status: MessageStatus,
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // one connection, otherwise every pooled connection gets its own empty database
    let db_pool = connect("sqlite::memory:", 1).await.unwrap();
    init(&db_pool).await.unwrap();
    db_pool
}
