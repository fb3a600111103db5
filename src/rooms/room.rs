use sqlx::SqlitePool;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::{
    db::{self, Room, Slot},
    error::{ChatError, ChatResult},
};

pub const MIN_PASSCODE_LEN: usize = 4;

/// Create / lookup / passcode check for rooms.
#[derive(Clone)]
pub struct RoomRegistry {
    db_pool: SqlitePool,
}

impl RoomRegistry {
    pub fn new(db_pool: SqlitePool) -> RoomRegistry {
        RoomRegistry { db_pool }
    }

    /// Persists the room together with both of its slots, empty.
    pub async fn create(
        &self,
        room_id: &str,
        name_a: &str,
        name_b: &str,
        passcode: &str,
    ) -> ChatResult<Room> {
        let room_id = required("roomId", room_id)?;
        let name_a = required("nameA", name_a)?;
        let name_b = required("nameB", name_b)?;
        let passcode = passcode.trim();
        if passcode.chars().count() < MIN_PASSCODE_LEN {
            return Err(ChatError::PasscodeTooShort { min: MIN_PASSCODE_LEN });
        }

        let now = db::now_millis();
        let mut tx = self.db_pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO rooms (room_id,name_a,name_b,passcode,created_at) VALUES (?,?,?,?,?)
             ON CONFLICT(room_id) DO NOTHING",
        )
            .bind(room_id)
            .bind(name_a)
            .bind(name_b)
            .bind(passcode)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        if inserted.rows_affected() == 0 {
            return Err(ChatError::RoomAlreadyExists(room_id.to_owned()));
        }

        for slot in Slot::ALL {
            sqlx::query("INSERT INTO slots (room_id,slot,connection_id,username,last_active) VALUES (?,?,NULL,NULL,?)")
                .bind(room_id)
                .bind(slot.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(room_id, "room created");

        Ok(Room {
            room_id: room_id.to_owned(),
            name_a: name_a.to_owned(),
            name_b: name_b.to_owned(),
            passcode: passcode.to_owned(),
            created_at: now,
        })
    }

    pub async fn get(&self, room_id: &str) -> ChatResult<Option<Room>> {
        let row: Option<(String, String, String, String, i64)> =
            sqlx::query_as("SELECT room_id,name_a,name_b,passcode,created_at FROM rooms WHERE room_id=?")
                .bind(room_id)
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(row.map(|(room_id, name_a, name_b, passcode, created_at)| Room {
            room_id,
            name_a,
            name_b,
            passcode,
            created_at,
        }))
    }

    /// False for an unknown room as well as for a wrong passcode; callers
    /// that care about the difference look the room up first.
    pub async fn verify_passcode(&self, room_id: &str, candidate: &str) -> ChatResult<bool> {
        let stored: Option<(String,)> = sqlx::query_as("SELECT passcode FROM rooms WHERE room_id=?")
            .bind(room_id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(stored.is_some_and(|(passcode,)| passcode_matches(&passcode, candidate)))
    }

    /// Slots and messages go with it.
    pub async fn delete(&self, room_id: &str) -> ChatResult<bool> {
        let deleted = sqlx::query("DELETE FROM rooms WHERE room_id=?")
            .bind(room_id)
            .execute(&self.db_pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    /// Deletes rooms nobody occupies whose most recently active slot is
    /// older than `cutoff` (unix millis).
    pub async fn delete_inactive(&self, cutoff: i64) -> ChatResult<u64> {
        let deleted = sqlx::query(
            "DELETE FROM rooms WHERE room_id IN (
                SELECT room_id FROM slots
                GROUP BY room_id
                HAVING MAX(last_active) < ? AND COUNT(connection_id) = 0
            )",
        )
            .bind(cutoff)
            .execute(&self.db_pool)
            .await?;
        Ok(deleted.rows_affected())
    }
}

pub(crate) fn required<'a>(field: &'static str, value: &'a str) -> ChatResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ChatError::MissingField(field));
    }
    Ok(value)
}

fn passcode_matches(stored: &str, candidate: &str) -> bool {
    stored.as_bytes().ct_eq(candidate.trim().as_bytes()).into()
}
