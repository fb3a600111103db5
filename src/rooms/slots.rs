use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    db::{self, Slot, SlotRecord},
    error::{ChatError, ChatResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AvailableSlots {
    #[serde(rename = "A")]
    pub a: bool,
    #[serde(rename = "B")]
    pub b: bool,
}

impl AvailableSlots {
    pub fn get(&self, slot: Slot) -> bool {
        match slot {
            Slot::A => self.a,
            Slot::B => self.b,
        }
    }

    pub fn set(&mut self, slot: Slot, available: bool) {
        match slot {
            Slot::A => self.a = available,
            Slot::B => self.b = available,
        }
    }
}

/// Bookkeeping for the two identity slots of every room.
///
/// A slot is available when no connection is recorded on it. The records
/// outlive connections, so whether a recorded connection is still alive is
/// a question for the transport, not for this type.
#[derive(Clone)]
pub struct SlotManager {
    db_pool: SqlitePool,
}

impl SlotManager {
    pub fn new(db_pool: SqlitePool) -> SlotManager {
        SlotManager { db_pool }
    }

    pub async fn get(&self, room_id: &str, slot: Slot) -> ChatResult<Option<SlotRecord>> {
        let row: Option<(Option<String>, Option<String>, i64)> =
            sqlx::query_as("SELECT connection_id,username,last_active FROM slots WHERE room_id=? AND slot=?")
                .bind(room_id)
                .bind(slot.as_str())
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(row.map(|(connection_id, username, last_active)| SlotRecord {
            room_id: room_id.to_owned(),
            slot,
            connection_id,
            username,
            last_active,
        }))
    }

    /// Both slots of the room, A first.
    pub async fn all(&self, room_id: &str) -> ChatResult<Vec<SlotRecord>> {
        let rows: Vec<(String, Option<String>, Option<String>, i64)> =
            sqlx::query_as("SELECT slot,connection_id,username,last_active FROM slots WHERE room_id=? ORDER BY slot")
                .bind(room_id)
                .fetch_all(&self.db_pool)
                .await?;

        rows.into_iter()
            .map(|(slot, connection_id, username, last_active)| {
                let slot = Slot::parse(&slot)
                    .ok_or_else(|| ChatError::Store(sqlx::Error::Decode(format!("bad slot {slot:?}").into())))?;
                Ok(SlotRecord {
                    room_id: room_id.to_owned(),
                    slot,
                    connection_id,
                    username,
                    last_active,
                })
            })
            .collect()
    }

    /// A slot missing from the store (unknown room) reports unavailable.
    pub async fn available_slots(&self, room_id: &str) -> ChatResult<AvailableSlots> {
        let mut available = AvailableSlots { a: false, b: false };
        for record in self.all(room_id).await? {
            available.set(record.slot, record.is_available());
        }
        Ok(available)
    }

    pub async fn is_available(&self, room_id: &str, slot: Slot) -> ChatResult<bool> {
        Ok(self
            .get(room_id, slot)
            .await?
            .is_some_and(|record| record.is_available()))
    }

    /// Unconditional: eligibility is the caller's business.
    pub async fn claim(&self, room_id: &str, slot: Slot, connection_id: &str, username: &str) -> ChatResult<()> {
        sqlx::query("UPDATE slots SET connection_id=?, username=?, last_active=? WHERE room_id=? AND slot=?")
            .bind(connection_id)
            .bind(username)
            .bind(db::now_millis())
            .bind(room_id)
            .bind(slot.as_str())
            .execute(&self.db_pool)
            .await?;
        debug!(room_id, %slot, connection_id, "slot claimed");
        Ok(())
    }

    pub async fn release(&self, room_id: &str, slot: Slot) -> ChatResult<()> {
        sqlx::query("UPDATE slots SET connection_id=NULL, last_active=? WHERE room_id=? AND slot=?")
            .bind(db::now_millis())
            .bind(room_id)
            .bind(slot.as_str())
            .execute(&self.db_pool)
            .await?;
        debug!(room_id, %slot, "slot released");
        Ok(())
    }

    /// Releases the slot only while `connection_id` is still the recorded
    /// occupant. Returns whether anything was released.
    pub async fn release_if_held(&self, room_id: &str, slot: Slot, connection_id: &str) -> ChatResult<bool> {
        let released = sqlx::query(
            "UPDATE slots SET connection_id=NULL, last_active=? WHERE room_id=? AND slot=? AND connection_id=?",
        )
            .bind(db::now_millis())
            .bind(room_id)
            .bind(slot.as_str())
            .bind(connection_id)
            .execute(&self.db_pool)
            .await?;
        Ok(released.rows_affected() > 0)
    }

    /// Forgets every recorded occupant in every room. Run once at start-up:
    /// none of the connections recorded by a previous process can be alive.
    pub async fn clear_all(&self) -> ChatResult<u64> {
        let cleared = sqlx::query("UPDATE slots SET connection_id=NULL WHERE connection_id IS NOT NULL")
            .execute(&self.db_pool)
            .await?;
        Ok(cleared.rows_affected())
    }
}
