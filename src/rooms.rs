use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Messages a client sends over its socket. The room id travels with every
/// message; the payloads are opaque to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom { room: String, user: Value },
    DataEdit { room: String, change: Value },
    ChartEdit { room: String, chart: Value },
    Presence { room: String, presence: Value },
}

/// Messages relayed to the other members of a room. Never persisted; an
/// event exists only in transit at the instant of emission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    UserJoined { user: Value },
    DataEdit { change: Value },
    ChartEdit { chart: Value },
    Presence { presence: Value },
}

/// Handle for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// Per-connection outbound channel. Events queued here are written to the
/// socket by the connection's writer task in queue order, which is what
/// gives each sender-room pair its ordered delivery.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct Member {
    conn: ConnectionId,
    sender: EventSender,
}

/// Room-keyed broadcast relay
///
/// An explicit registry owned by the server process and injected into each
/// websocket session, so it can be driven by fake (channel-backed)
/// connections in tests. Rooms exist only while they have members: the
/// first join creates a room, the last disconnect removes it. Nothing here
/// is persisted.
///
/// All sends are fire-and-forget. A peer whose channel is gone is simply
/// skipped; the sender has no way to learn a broadcast didn't reach it.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Vec<Member>>>,
    next_conn: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: RwLock::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a newly accepted connection.
    pub fn connect(&self) -> ConnectionId {
        ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed))
    }

    /// Join a room
    ///
    /// Adds the connection to the room's membership and broadcasts
    /// `user-joined` with the caller's descriptor to every other current
    /// member. The joiner receives no echo about itself.
    pub fn join(&self, room: &str, conn: ConnectionId, sender: EventSender, user: Value) {
        let mut rooms = self.rooms.write().unwrap();
        let members = rooms.entry(room.to_string()).or_default();
        // A re-join replaces the existing membership.
        members.retain(|m| m.conn != conn);
        for member in members.iter() {
            let _ = member.sender.send(ServerEvent::UserJoined { user: user.clone() });
        }
        members.push(Member { conn, sender });
        log::debug!("connection {:?} joined room {room}", conn);
    }

    /// Relay an event to every other member of the room. The sender never
    /// receives its own emission back.
    pub fn emit(&self, room: &str, conn: ConnectionId, event: ServerEvent) {
        let rooms = self.rooms.read().unwrap();
        let Some(members) = rooms.get(room) else {
            return;
        };
        for member in members {
            if member.conn != conn {
                let _ = member.sender.send(event.clone());
            }
        }
    }

    /// Drop a connection from every room it joined. No `user-left` event is
    /// broadcast; membership just ends with the transport.
    pub fn disconnect(&self, conn: ConnectionId) {
        let mut rooms = self.rooms.write().unwrap();
        for members in rooms.values_mut() {
            members.retain(|m| m.conn != conn);
        }
        rooms.retain(|_, members| !members.is_empty());
        log::debug!("connection {:?} disconnected", conn);
    }

    /// Current member count of a room (0 if the room does not exist).
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .unwrap()
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
