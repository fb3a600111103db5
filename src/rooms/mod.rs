pub mod cleanup;
pub mod hub;
pub mod msg;
pub mod protocol;
pub mod room;
pub mod session;
pub mod slots;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use hub::{ConnId, Hub, Transport};
pub use msg::MessageLedger;
pub use room::RoomRegistry;
pub use session::{Coordinator, Session};
pub use slots::SlotManager;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::room_ws))
}
