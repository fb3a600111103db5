//! Errors reported back to the requesting connection.
//!
//! Every variant is recoverable: the request is rejected, the connection and
//! every other room carry on. Store failures are logged with their details
//! and surface to the client as a generic message.

use thiserror::Error;

use crate::db::Slot;

pub type ChatResult<T> = Result<T, ChatError>;

/// Coarse classification of a [`ChatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    Conflict,
    NotBound,
    Internal,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0} required")]
    MissingField(&'static str),

    #[error("passcode must be at least {min} characters")]
    PasscodeTooShort { min: usize },

    #[error("message text is empty")]
    EmptyMessage,

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("invalid passcode for room {0}")]
    InvalidPasscode(String),

    #[error("room already exists: {0}")]
    RoomAlreadyExists(String),

    #[error("slot {slot} of room {room_id} is taken")]
    SlotTaken { room_id: String, slot: Slot },

    #[error("room is full: {0}")]
    RoomFull(String),

    #[error("connection already bound to room {0}")]
    AlreadyInRoom(String),

    #[error("connection is not in a room")]
    NotBound,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        use ChatError::*;
        match self {
            MissingField(_) | PasscodeTooShort { .. } | EmptyMessage => ErrorKind::Validation,
            RoomNotFound(_) | MessageNotFound(_) => ErrorKind::NotFound,
            InvalidPasscode(_) => ErrorKind::Unauthorized,
            RoomAlreadyExists(_) | SlotTaken { .. } | RoomFull(_) | AlreadyInRoom(_) => {
                ErrorKind::Conflict
            }
            NotBound => ErrorKind::NotBound,
            Store(_) => ErrorKind::Internal,
        }
    }

    /// The text put in the `error` field of a failed acknowledgement.
    pub fn client_message(&self) -> String {
        use ChatError::*;
        match self {
            MissingField(field) => format!("{field} required"),
            PasscodeTooShort { min } => format!("Passcode must be at least {min} characters"),
            EmptyMessage => "Message text is required".to_owned(),
            RoomNotFound(_) => "Room not found".to_owned(),
            MessageNotFound(_) => "Message not found".to_owned(),
            InvalidPasscode(_) => "Invalid passcode".to_owned(),
            RoomAlreadyExists(_) => "Room already exists".to_owned(),
            SlotTaken { .. } => "This slot is already taken".to_owned(),
            RoomFull(_) => "Room is full (2 participants max)".to_owned(),
            AlreadyInRoom(_) => "Already in a room".to_owned(),
            NotBound => "Not in a room".to_owned(),
            Store(_) => "An internal error occurred".to_owned(),
        }
    }
}
