//! Wire format of the `/ws` endpoint.
//!
//! Requests are JSON objects tagged by `type`, carrying an optional `reqId`
//! that the matching acknowledgement echoes back as `ack`:
//!
//! ```text
//! -> {"type":"join-room","reqId":3,"roomId":"r1","username":"Alice","slot":"A","passcode":"1234"}
//! <- {"ack":3,"ok":true,"participants":1,"history":[],"slot":"A"}
//! ```
//!
//! Events pushed by the server are tagged by `event` with a `data` payload.

use serde::{Deserialize, Serialize};

use crate::{
    db::{MessageRecord, MessageStatus, Slot},
    error::ChatError,
    rooms::slots::AvailableSlots,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientFrame {
    #[serde(default, rename = "reqId")]
    pub req_id: Option<u64>,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    CreateRoom(CreateRoom),
    GetRoomInfo(GetRoomInfo),
    JoinRoom(JoinRoom),
    SendMessage(SendMessage),
    DeleteMessage(DeleteMessage),
    ClearChat {},
    UpdateUsername(UpdateUsername),
    MarkMessagesRead(MarkMessagesRead),
    Typing(Typing),
}

impl Request {
    pub fn name(&self) -> &'static str {
        use Request::*;
        match self {
            CreateRoom(_) => "create-room",
            GetRoomInfo(_) => "get-room-info",
            JoinRoom(_) => "join-room",
            SendMessage(_) => "send-message",
            DeleteMessage(_) => "delete-message",
            ClearChat {} => "clear-chat",
            UpdateUsername(_) => "update-username",
            MarkMessagesRead(_) => "mark-messages-read",
            Typing(_) => "typing",
        }
    }
}

// Missing string fields decode as empty and are rejected by validation, so
// the client learns which field it forgot.

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateRoom {
    pub room_id: String,
    #[serde(alias = "user1Name")]
    pub name_a: String,
    #[serde(alias = "user2Name")]
    pub name_b: String,
    pub passcode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetRoomInfo {
    pub room_id: String,
    pub passcode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinRoom {
    pub room_id: String,
    pub username: String,
    pub slot: Option<Slot>,
    pub passcode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessage {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteMessage {
    pub message_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateUsername {
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkMessagesRead {
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Typing {
    pub is_typing: bool,
}

/// Success payloads, flattened into the acknowledgement next to `ok`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Reply {
    RoomCreated {
        room_id: String,
    },
    RoomInfo {
        exists: bool,
        name_a: String,
        name_b: String,
        available_slots: AvailableSlots,
    },
    Joined {
        participants: usize,
        history: Vec<MessageRecord>,
        slot: Slot,
    },
    MessageSent {
        message_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub ack: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub reply: Option<Reply>,
}

impl Ack {
    pub fn ok(req_id: Option<u64>, reply: Option<Reply>) -> Ack {
        Ack { ack: req_id, ok: true, error: None, reply }
    }

    pub fn err(req_id: Option<u64>, error: impl Into<String>) -> Ack {
        Ack { ack: req_id, ok: false, error: Some(error.into()), reply: None }
    }

    pub fn from_result(req_id: Option<u64>, result: Result<Option<Reply>, ChatError>) -> Ack {
        match result {
            Ok(reply) => Ack::ok(req_id, reply),
            Err(err) => Ack::err(req_id, err.client_message()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    PeerJoined {
        username: String,
        id: String,
    },
    PeerLeft {
        username: String,
        id: String,
    },
    RoomInfo {
        room_id: String,
        participants: usize,
    },
    Message(MessageRecord),
    MessageStatusUpdated {
        message_id: String,
        status: MessageStatus,
    },
    MessageDeleted {
        message_id: String,
    },
    ChatCleared {},
    UsernameChanged {
        socket_id: String,
        old_username: String,
        new_username: String,
    },
    PeerTyping {
        username: String,
        is_typing: bool,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_join_with_and_without_slot() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "join-room", "reqId": 3,
            "roomId": "r1", "username": "Alice", "slot": "A", "passcode": "1234"
        }))
        .unwrap();
        assert_eq!(frame.req_id, Some(3));
        assert_eq!(
            frame.request,
            Request::JoinRoom(JoinRoom {
                room_id: "r1".into(),
                username: "Alice".into(),
                slot: Some(Slot::A),
                passcode: "1234".into(),
            })
        );

        let frame: ClientFrame =
            serde_json::from_value(json!({"type": "join-room", "roomId": "r1", "username": "Bob"})).unwrap();
        let Request::JoinRoom(join) = frame.request else { panic!("not a join") };
        assert_eq!(join.slot, None);
        assert_eq!(join.passcode, "");
        assert_eq!(frame.req_id, None);
    }

    #[test]
    fn parses_legacy_create_room_names() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "create-room", "roomId": "r1", "user1Name": "Alice", "user2Name": "Bob", "passcode": "1234"
        }))
        .unwrap();
        let Request::CreateRoom(create) = frame.request else { panic!("not a create") };
        assert_eq!(create.name_a, "Alice");
        assert_eq!(create.name_b, "Bob");
    }

    #[test]
    fn parses_bare_requests() {
        let frame: ClientFrame = serde_json::from_value(json!({"type": "clear-chat", "reqId": 9})).unwrap();
        assert_eq!(frame.request, Request::ClearChat {});

        let frame: ClientFrame =
            serde_json::from_value(json!({"type": "mark-messages-read", "messageIds": ["m1", "m2"]})).unwrap();
        assert_eq!(frame.request.name(), "mark-messages-read");

        assert!(serde_json::from_value::<ClientFrame>(json!({"type": "self-destruct"})).is_err());
    }

    #[test]
    fn ack_shapes() {
        let ack = Ack::ok(Some(1), Some(Reply::MessageSent { message_id: "m1".into() }));
        assert_eq!(serde_json::to_value(&ack).unwrap(), json!({"ack": 1, "ok": true, "messageId": "m1"}));

        let ack = Ack::ok(None, None);
        assert_eq!(serde_json::to_value(&ack).unwrap(), json!({"ack": null, "ok": true}));

        let ack = Ack::from_result(Some(2), Err(ChatError::InvalidPasscode("r1".into())));
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({"ack": 2, "ok": false, "error": "Invalid passcode"})
        );

        let ack = Ack::ok(
            Some(4),
            Some(Reply::RoomInfo {
                exists: true,
                name_a: "Alice".into(),
                name_b: "Bob".into(),
                available_slots: AvailableSlots { a: true, b: false },
            }),
        );
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({"ack": 4, "ok": true, "exists": true, "nameA": "Alice", "nameB": "Bob",
                   "availableSlots": {"A": true, "B": false}})
        );
    }

    #[test]
    fn event_shapes() {
        let event = ServerEvent::MessageStatusUpdated { message_id: "m1".into(), status: MessageStatus::Read };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "message-status-updated", "data": {"messageId": "m1", "status": "read"}})
        );

        let event = ServerEvent::Message(MessageRecord {
            id: "m1".into(),
            room_id: "r1".into(),
            sender_slot: Slot::B,
            sender_id: "c2".into(),
            sender_name: "Bob".into(),
            text: "hi".into(),
            ts: 5,
            status: MessageStatus::Sent,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "message", "data": {
                "id": "m1", "senderSlot": "B", "senderId": "c2", "from": "Bob",
                "text": "hi", "ts": 5, "status": "sent"
            }})
        );

        assert_eq!(
            serde_json::to_value(ServerEvent::ChatCleared {}).unwrap(),
            json!({"event": "chat-cleared", "data": {}})
        );
    }
}
