use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    db::{MessageRecord, MessageStatus, Slot},
    error::{ChatError, ChatResult},
};

type MessageRow = (String, String, String, String, String, String, i64, String);

/// Append-only message log, one ordered history per room.
///
/// `set_status` overwrites blindly; keeping statuses moving forward is up
/// to the caller.
#[derive(Clone)]
pub struct MessageLedger {
    db_pool: SqlitePool,
}

impl MessageLedger {
    pub fn new(db_pool: SqlitePool) -> MessageLedger {
        MessageLedger { db_pool }
    }

    /// Stores the message as `sent`, whatever its status field says.
    pub async fn append(&self, message: &MessageRecord) -> ChatResult<()> {
        sqlx::query(
            "INSERT INTO messages (id,room_id,sender_slot,sender_id,sender_name,text,ts,status) values (?,?,?,?,?,?,?,?)",
        )
            .bind(&message.id)
            .bind(&message.room_id)
            .bind(message.sender_slot.as_str())
            .bind(&message.sender_id)
            .bind(&message.sender_name)
            .bind(&message.text)
            .bind(message.ts)
            .bind(MessageStatus::Sent.as_str())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn by_room(&self, room_id: &str) -> ChatResult<Vec<MessageRecord>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,room_id,sender_slot,sender_id,sender_name,text,ts,status FROM messages
             WHERE room_id=? ORDER BY ts ASC, rowid ASC",
        )
            .bind(room_id)
            .fetch_all(&self.db_pool)
            .await?;

        rows.into_iter().map(msg_from_row).collect()
    }

    pub async fn get(&self, message_id: &str) -> ChatResult<Option<MessageRecord>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT id,room_id,sender_slot,sender_id,sender_name,text,ts,status FROM messages WHERE id=?",
        )
            .bind(message_id)
            .fetch_optional(&self.db_pool)
            .await?;

        row.map(msg_from_row).transpose()
    }

    pub async fn set_status(&self, message_id: &str, status: MessageStatus) -> ChatResult<()> {
        sqlx::query("UPDATE messages SET status=? WHERE id=?")
            .bind(status.as_str())
            .bind(message_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, message_id: &str) -> ChatResult<bool> {
        let deleted = sqlx::query("DELETE FROM messages WHERE id=?")
            .bind(message_id)
            .execute(&self.db_pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    pub async fn clear_by_room(&self, room_id: &str) -> ChatResult<u64> {
        let deleted = sqlx::query("DELETE FROM messages WHERE room_id=?")
            .bind(room_id)
            .execute(&self.db_pool)
            .await?;
        Ok(deleted.rows_affected())
    }

    pub async fn mark_read(&self, message_ids: &[String]) -> ChatResult<()> {
        if message_ids.is_empty() {
            return Ok(());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE messages SET status=");
        query.push_bind(MessageStatus::Read.as_str());
        query.push(" WHERE id IN (");
        let mut ids = query.separated(",");
        for id in message_ids {
            ids.push_bind(id.as_str());
        }
        ids.push_unseparated(")");

        query.build().execute(&self.db_pool).await?;
        Ok(())
    }
}

fn msg_from_row(
    (id, room_id, sender_slot, sender_id, sender_name, text, ts, status): MessageRow,
) -> ChatResult<MessageRecord> {
    let sender_slot = Slot::parse(&sender_slot).ok_or_else(|| corrupt("sender_slot", &sender_slot))?;
    let status = MessageStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?;
    Ok(MessageRecord {
        id,
        room_id,
        sender_slot,
        sender_id,
        sender_name,
        text,
        ts,
        status,
    })
}

fn corrupt(column: &str, value: &str) -> ChatError {
    ChatError::Store(sqlx::Error::Decode(format!("bad {column} {value:?}").into()))
}
