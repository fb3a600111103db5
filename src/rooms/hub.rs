use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use super::protocol::ServerEvent;

/// Identity of one transport connection, fresh for every socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> ConnId {
        ConnId(Uuid::now_v7())
    }

    pub fn parse(s: &str) -> Option<ConnId> {
        Uuid::parse_str(s).ok().map(ConnId)
    }
}

impl Default for ConnId {
    fn default() -> ConnId {
        ConnId::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the coordinator needs from the real-time transport: named groups,
/// targeted and group sends, and a way to tell whether a connection
/// recorded somewhere is still there.
pub trait Transport: Send + Sync + 'static {
    /// Live-connection oracle. Unknown or malformed ids are not live.
    fn is_live(&self, connection_id: &str) -> bool;

    fn join(&self, room_id: &str, conn: ConnId);
    fn leave(&self, room_id: &str, conn: ConnId);
    fn room_size(&self, room_id: &str) -> usize;

    fn send_to(&self, conn: ConnId, event: &ServerEvent);
    fn send_room(&self, room_id: &str, event: &ServerEvent);
    fn send_room_except(&self, room_id: &str, except: ConnId, event: &ServerEvent);
}

#[derive(Default)]
struct HubInner {
    conns: HashMap<ConnId, mpsc::UnboundedSender<String>>,
    rooms: HashMap<String, HashSet<ConnId>>,
}

/// In-process [`Transport`]: every registered connection owns an unbounded
/// channel of outbound text frames, drained by its socket writer.
#[derive(Default)]
pub struct Hub {
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new() -> Hub {
        Hub::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, conn: ConnId, tx: mpsc::UnboundedSender<String>) {
        self.lock().conns.insert(conn, tx);
    }

    /// Drops the connection and every group membership it still has.
    pub fn unregister(&self, conn: ConnId) {
        let mut inner = self.lock();
        inner.conns.remove(&conn);
        inner.rooms.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }

    /// Queues an already encoded frame; false once the connection is gone.
    pub fn send_raw(&self, conn: ConnId, frame: String) -> bool {
        match self.lock().conns.get(&conn) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.lock().conns.len()
    }

    fn fan_out(&self, room_id: &str, except: Option<ConnId>, event: &ServerEvent) {
        let Some(frame) = encode(event) else {
            return;
        };

        let inner = self.lock();
        let Some(members) = inner.rooms.get(room_id) else {
            return;
        };
        for conn in members.iter().filter(|conn| Some(**conn) != except) {
            if let Some(tx) = inner.conns.get(conn) {
                let _ = tx.send(frame.clone());
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(error = %e, "failed to encode event");
            None
        }
    }
}

impl Transport for Hub {
    fn is_live(&self, connection_id: &str) -> bool {
        let Some(conn) = ConnId::parse(connection_id) else {
            return false;
        };
        self.lock()
            .conns
            .get(&conn)
            .is_some_and(|tx| !tx.is_closed())
    }

    fn join(&self, room_id: &str, conn: ConnId) {
        let mut inner = self.lock();
        if !inner.conns.contains_key(&conn) {
            warn!(%conn, room_id, "unregistered connection joining a room");
        }
        inner.rooms.entry(room_id.to_owned()).or_default().insert(conn);
    }

    fn leave(&self, room_id: &str, conn: ConnId) {
        let mut inner = self.lock();
        if let Some(members) = inner.rooms.get_mut(room_id) {
            members.remove(&conn);
            if members.is_empty() {
                inner.rooms.remove(room_id);
            }
        }
    }

    fn room_size(&self, room_id: &str) -> usize {
        self.lock().rooms.get(room_id).map_or(0, HashSet::len)
    }

    fn send_to(&self, conn: ConnId, event: &ServerEvent) {
        if let Some(frame) = encode(event) {
            self.send_raw(conn, frame);
        }
    }

    fn send_room(&self, room_id: &str, event: &ServerEvent) {
        self.fan_out(room_id, None, event);
    }

    fn send_room_except(&self, room_id: &str, except: ConnId, event: &ServerEvent) {
        self.fan_out(room_id, Some(except), event);
    }
}
