//! Per-connection state machine and the coordinator that drives it.
//!
//! A connection starts [`Session::Unbound`], becomes [`Session::Bound`] by
//! joining a room and ends on disconnect. Slot bookkeeping lives in the
//! store and survives restarts; room membership lives in the transport and
//! does not. Joining reconciles the two.

use std::{collections::HashSet, sync::Arc};

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    hub::{ConnId, Hub, Transport},
    msg::MessageLedger,
    protocol::{self, Reply, Request, ServerEvent},
    room::{required, RoomRegistry},
    slots::{AvailableSlots, SlotManager},
};
use crate::{
    db::{self, MessageRecord, MessageStatus, Slot},
    error::{ChatError, ChatResult, ErrorKind},
};

/// Two members fill a room.
pub const ROOM_CAPACITY: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub room_id: String,
    pub slot: Slot,
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Unbound,
    Bound(Binding),
}

impl Session {
    pub fn binding(&self) -> ChatResult<&Binding> {
        match self {
            Session::Bound(binding) => Ok(binding),
            Session::Unbound => Err(ChatError::NotBound),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Session::Bound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub name_a: String,
    pub name_b: String,
    pub available_slots: AvailableSlots,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    pub participants: usize,
    pub history: Vec<MessageRecord>,
    pub slot: Slot,
}

/// Runs every request flow. Flows that touch shared state hold one dispatch
/// lock for their whole duration, so requests from different connections
/// interleave only at request boundaries.
pub struct Coordinator<T: Transport = Hub> {
    rooms: RoomRegistry,
    slots: SlotManager,
    ledger: MessageLedger,
    transport: Arc<T>,
    dispatch: Mutex<()>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(db_pool: SqlitePool, transport: Arc<T>) -> Coordinator<T> {
        Coordinator {
            rooms: RoomRegistry::new(db_pool.clone()),
            slots: SlotManager::new(db_pool.clone()),
            ledger: MessageLedger::new(db_pool),
            transport,
            dispatch: Mutex::new(()),
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Forgets every slot occupant left over from a previous process. Must
    /// run once, before the first connection is accepted.
    pub async fn reconcile_on_start(&self) -> ChatResult<u64> {
        let _guard = self.dispatch.lock().await;
        let cleared = self.slots.clear_all().await?;
        info!(cleared, "cleared stale slot occupants");
        Ok(cleared)
    }

    pub async fn remove_inactive_rooms(&self, inactive_room_days: u32) -> ChatResult<u64> {
        let _guard = self.dispatch.lock().await;
        let cutoff = super::cleanup::cutoff(db::now_millis(), inactive_room_days);
        self.rooms.delete_inactive(cutoff).await
    }

    /// Routes one request. `None` for requests that are not acknowledged.
    pub async fn handle(
        &self,
        conn: ConnId,
        session: &mut Session,
        request: Request,
    ) -> Option<ChatResult<Option<Reply>>> {
        use Request::*;

        let name = request.name();
        let result = match request {
            CreateRoom(req) => self
                .create_room(req)
                .await
                .map(|room_id| Some(Reply::RoomCreated { room_id })),
            GetRoomInfo(req) => self.get_room_info(req).await.map(|info| {
                Some(Reply::RoomInfo {
                    exists: true,
                    name_a: info.name_a,
                    name_b: info.name_b,
                    available_slots: info.available_slots,
                })
            }),
            JoinRoom(req) => self.join_room(conn, session, req).await.map(|joined| {
                Some(Reply::Joined {
                    participants: joined.participants,
                    history: joined.history,
                    slot: joined.slot,
                })
            }),
            SendMessage(req) => self
                .send_message(conn, session, req)
                .await
                .map(|message_id| Some(Reply::MessageSent { message_id })),
            DeleteMessage(req) => self.delete_message(session, &req.message_id).await.map(|()| None),
            ClearChat {} => self.clear_chat(session).await.map(|_| None),
            UpdateUsername(req) => self.update_username(conn, session, &req.username).await.map(|()| None),
            MarkMessagesRead(req) => self.mark_read(conn, session, req.message_ids).await.map(|_| None),
            Typing(req) => {
                self.typing(conn, session, req.is_typing);
                return None;
            }
        };

        if let Err(e) = &result {
            match e.kind() {
                ErrorKind::Internal => error!(%conn, request = name, error = %e, "request failed"),
                _ => debug!(%conn, request = name, error = %e, "request rejected"),
            }
        }
        Some(result)
    }

    pub async fn create_room(&self, req: protocol::CreateRoom) -> ChatResult<String> {
        let _guard = self.dispatch.lock().await;
        let room = self
            .rooms
            .create(&req.room_id, &req.name_a, &req.name_b, &req.passcode)
            .await?;
        Ok(room.room_id)
    }

    /// Availability here counts a slot held by a dead connection as free,
    /// since joining it would succeed.
    pub async fn get_room_info(&self, req: protocol::GetRoomInfo) -> ChatResult<RoomInfo> {
        let _guard = self.dispatch.lock().await;
        let room_id = required("roomId", &req.room_id)?;
        let passcode = required("passcode", &req.passcode)?;
        let room = self.authorize(room_id, passcode).await?;

        let mut available_slots = self.slots.available_slots(room_id).await?;
        for slot in Slot::ALL {
            if !available_slots.get(slot) && self.holder_is_stale(room_id, slot).await? {
                available_slots.set(slot, true);
            }
        }

        Ok(RoomInfo {
            name_a: room.name_a,
            name_b: room.name_b,
            available_slots,
        })
    }

    pub async fn join_room(
        &self,
        conn: ConnId,
        session: &mut Session,
        req: protocol::JoinRoom,
    ) -> ChatResult<Joined> {
        let _guard = self.dispatch.lock().await;
        let room_id = required("roomId", &req.room_id)?;
        let username = required("username", &req.username)?;
        let passcode = required("passcode", &req.passcode)?;
        if let Session::Bound(binding) = session {
            return Err(ChatError::AlreadyInRoom(binding.room_id.clone()));
        }
        self.authorize(room_id, passcode).await?;

        let (slot, stale) = match req.slot {
            None => self.pick_slot(room_id).await?,
            Some(slot) => {
                let record = self
                    .slots
                    .get(room_id, slot)
                    .await?
                    .ok_or_else(|| ChatError::RoomNotFound(room_id.to_owned()))?;
                match record.connection_id {
                    None => (slot, false),
                    Some(holder) if !self.transport.is_live(&holder) => (slot, true),
                    Some(_) => {
                        return Err(ChatError::SlotTaken { room_id: room_id.to_owned(), slot });
                    }
                }
            }
        };

        // slot records and transport membership are separate sources of truth
        if self.transport.room_size(room_id) >= ROOM_CAPACITY {
            return Err(ChatError::RoomFull(room_id.to_owned()));
        }

        if stale {
            info!(room_id, %slot, "reclaiming stale slot");
            self.slots.release(room_id, slot).await?;
        }
        self.slots.claim(room_id, slot, &conn.to_string(), username).await?;
        self.transport.join(room_id, conn);
        *session = Session::Bound(Binding {
            room_id: room_id.to_owned(),
            slot,
            username: username.to_owned(),
        });

        let participants = self.transport.room_size(room_id);
        let mut history = self.ledger.by_room(room_id).await?;
        self.deliver_pending(room_id, slot, &mut history).await?;
        info!(%conn, room_id, %slot, participants, "joined room");

        self.transport.send_room_except(
            room_id,
            conn,
            &ServerEvent::PeerJoined { username: username.to_owned(), id: conn.to_string() },
        );
        self.transport.send_room(
            room_id,
            &ServerEvent::RoomInfo { room_id: room_id.to_owned(), participants },
        );

        Ok(Joined { participants, history, slot })
    }

    pub async fn send_message(
        &self,
        conn: ConnId,
        session: &Session,
        req: protocol::SendMessage,
    ) -> ChatResult<String> {
        let _guard = self.dispatch.lock().await;
        let binding = session.binding()?;
        if req.text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let message = MessageRecord {
            id: Uuid::now_v7().to_string(),
            room_id: binding.room_id.clone(),
            sender_slot: binding.slot,
            sender_id: conn.to_string(),
            sender_name: binding.username.clone(),
            text: req.text,
            ts: db::now_millis(),
            status: MessageStatus::Sent,
        };
        self.ledger.append(&message).await?;
        self.transport.send_room(&binding.room_id, &ServerEvent::Message(message.clone()));

        if self.transport.room_size(&binding.room_id) > 1 {
            self.ledger.set_status(&message.id, MessageStatus::Delivered).await?;
            self.transport.send_to(
                conn,
                &ServerEvent::MessageStatusUpdated {
                    message_id: message.id.clone(),
                    status: MessageStatus::Delivered,
                },
            );
        }

        Ok(message.id)
    }

    /// Marks the given messages read on behalf of the caller and tells each
    /// author. Messages the caller wrote, messages of other rooms, unknown
    /// ids and messages already read are skipped. Returns how many changed.
    pub async fn mark_read(
        &self,
        conn: ConnId,
        session: &Session,
        message_ids: Vec<String>,
    ) -> ChatResult<usize> {
        let _guard = self.dispatch.lock().await;
        let binding = session.binding()?;
        let me = conn.to_string();

        let mut seen = HashSet::new();
        let mut marked = Vec::new();
        for id in message_ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(message) = self.ledger.get(&id).await? else {
                continue;
            };
            if message.room_id != binding.room_id
                || message.sender_id == me
                || message.sender_slot == binding.slot
                || message.status == MessageStatus::Read
            {
                continue;
            }
            marked.push(message);
        }

        let ids: Vec<String> = marked.iter().map(|message| message.id.clone()).collect();
        self.ledger.mark_read(&ids).await?;
        for message in &marked {
            self.notify_author(
                message,
                &ServerEvent::MessageStatusUpdated {
                    message_id: message.id.clone(),
                    status: MessageStatus::Read,
                },
            )
            .await?;
        }

        Ok(marked.len())
    }

    pub async fn delete_message(&self, session: &Session, message_id: &str) -> ChatResult<()> {
        let _guard = self.dispatch.lock().await;
        let binding = session.binding()?;
        let message_id = required("messageId", message_id)?;

        match self.ledger.get(message_id).await? {
            Some(message) if message.room_id == binding.room_id => {}
            _ => return Err(ChatError::MessageNotFound(message_id.to_owned())),
        }
        self.ledger.delete(message_id).await?;

        self.transport.send_room(
            &binding.room_id,
            &ServerEvent::MessageDeleted { message_id: message_id.to_owned() },
        );
        Ok(())
    }

    pub async fn clear_chat(&self, session: &Session) -> ChatResult<u64> {
        let _guard = self.dispatch.lock().await;
        let binding = session.binding()?;

        let cleared = self.ledger.clear_by_room(&binding.room_id).await?;
        info!(room_id = %binding.room_id, cleared, "chat cleared");

        self.transport.send_room(&binding.room_id, &ServerEvent::ChatCleared {});
        Ok(cleared)
    }

    /// Renames the connection only. The names the room was created with
    /// and the slot records stay as they are.
    pub async fn update_username(
        &self,
        conn: ConnId,
        session: &mut Session,
        username: &str,
    ) -> ChatResult<()> {
        let _guard = self.dispatch.lock().await;
        let Session::Bound(binding) = session else {
            return Err(ChatError::NotBound);
        };
        let username = required("username", username)?;

        let old_username = std::mem::replace(&mut binding.username, username.to_owned());
        self.transport.send_room(
            &binding.room_id,
            &ServerEvent::UsernameChanged {
                socket_id: conn.to_string(),
                old_username,
                new_username: username.to_owned(),
            },
        );
        Ok(())
    }

    pub fn typing(&self, conn: ConnId, session: &Session, is_typing: bool) {
        let Session::Bound(binding) = session else {
            return;
        };
        self.transport.send_room_except(
            &binding.room_id,
            conn,
            &ServerEvent::PeerTyping { username: binding.username.clone(), is_typing },
        );
    }

    /// Tears the binding down: frees the slot (unless someone else has
    /// reclaimed it meanwhile), tells the peer and leaves the group. The
    /// session ends up unbound whatever happens.
    pub async fn disconnect(&self, conn: ConnId, session: &mut Session) -> ChatResult<()> {
        let Session::Bound(binding) = std::mem::take(session) else {
            return Ok(());
        };
        let _guard = self.dispatch.lock().await;

        let released = self
            .slots
            .release_if_held(&binding.room_id, binding.slot, &conn.to_string())
            .await;

        self.transport.send_room_except(
            &binding.room_id,
            conn,
            &ServerEvent::PeerLeft { username: binding.username.clone(), id: conn.to_string() },
        );
        self.transport.leave(&binding.room_id, conn);
        info!(%conn, room_id = %binding.room_id, slot = %binding.slot, "left room");

        match released {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(%conn, room_id = %binding.room_id, slot = %binding.slot, "slot was no longer held");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn authorize(&self, room_id: &str, passcode: &str) -> ChatResult<db::Room> {
        let room = self
            .rooms
            .get(room_id)
            .await?
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_owned()))?;
        if !self.rooms.verify_passcode(room_id, passcode).await? {
            warn!(room_id, "wrong passcode");
            return Err(ChatError::InvalidPasscode(room_id.to_owned()));
        }
        Ok(room)
    }

    async fn holder_is_stale(&self, room_id: &str, slot: Slot) -> ChatResult<bool> {
        Ok(self
            .slots
            .get(room_id, slot)
            .await?
            .and_then(|record| record.connection_id)
            .is_some_and(|holder| !self.transport.is_live(&holder)))
    }

    /// First free slot in A, B order; a slot whose holder is gone counts as
    /// free and is flagged for release.
    async fn pick_slot(&self, room_id: &str) -> ChatResult<(Slot, bool)> {
        for slot in Slot::ALL {
            if self.slots.is_available(room_id, slot).await? {
                return Ok((slot, false));
            }
            if self.holder_is_stale(room_id, slot).await? {
                return Ok((slot, true));
            }
        }
        Err(ChatError::RoomFull(room_id.to_owned()))
    }

    /// The joiner now holds the history, so whatever the other slot sent
    /// while nobody was there counts as delivered, even if its author has
    /// left since.
    async fn deliver_pending(
        &self,
        room_id: &str,
        joined_slot: Slot,
        history: &mut [MessageRecord],
    ) -> ChatResult<()> {
        for message in history.iter_mut() {
            if message.status != MessageStatus::Sent || message.sender_slot == joined_slot {
                continue;
            }
            self.ledger.set_status(&message.id, MessageStatus::Delivered).await?;
            message.status = MessageStatus::Delivered;
            debug!(room_id, message_id = %message.id, "delivered on join");
            self.notify_author(
                message,
                &ServerEvent::MessageStatusUpdated {
                    message_id: message.id.clone(),
                    status: MessageStatus::Delivered,
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Sends to the connection that wrote the message, or, when that one
    /// is gone, to whoever holds the author's slot now.
    async fn notify_author(&self, message: &MessageRecord, event: &ServerEvent) -> ChatResult<()> {
        let target = match ConnId::parse(&message.sender_id) {
            Some(conn) if self.transport.is_live(&message.sender_id) => Some(conn),
            _ => self
                .slots
                .get(&message.room_id, message.sender_slot)
                .await?
                .and_then(|record| record.connection_id)
                .filter(|holder| self.transport.is_live(holder))
                .and_then(|holder| ConnId::parse(&holder)),
        };

        match target {
            Some(conn) => self.transport.send_to(conn, event),
            None => debug!(message_id = %message.id, "author offline, status change not pushed"),
        }
        Ok(())
    }
}
