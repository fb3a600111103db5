use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    hub::{ConnId, Hub},
    protocol::{Ack, ClientFrame},
    session::{Coordinator, Session},
};

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    State(coordinator): State<Arc<Coordinator>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |stream| serve(coordinator, stream).await)
}

/// Runs one connection to completion. Whatever ends it (close frame, read
/// error, dropped socket) the session is torn down before the connection
/// leaves the hub.
pub(crate) async fn serve(coordinator: Arc<Coordinator>, stream: WebSocket) {
    let hub: &Hub = coordinator.transport();
    let conn = ConnId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    hub.register(conn, tx);
    info!(%conn, "socket connected");

    let (mut sender, mut receiver) = stream.split();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::default();
    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            _ = &mut writer => break,
        };
        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(%conn, error = %e, "socket read failed");
                break;
            }
        };

        let frame: ClientFrame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%conn, error = %e, "unreadable frame");
                reply(hub, conn, &Ack::err(None, "Malformed request"));
                continue;
            }
        };

        let req_id = frame.req_id;
        if let Some(result) = coordinator.handle(conn, &mut session, frame.request).await {
            reply(hub, conn, &Ack::from_result(req_id, result));
        }
    }

    if let Err(e) = coordinator.disconnect(conn, &mut session).await {
        warn!(%conn, error = %e, "disconnect cleanup failed");
    }
    hub.unregister(conn);
    writer.abort();
    info!(%conn, connections = hub.connection_count(), "socket disconnected");
}

fn reply(hub: &Hub, conn: ConnId, ack: &Ack) {
    match serde_json::to_string(ack) {
        Ok(frame) => {
            hub.send_raw(conn, frame);
        }
        Err(e) => warn!(%conn, error = %e, "failed to encode ack"),
    }
}
