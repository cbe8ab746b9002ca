//! Room registry and fan-out. Rooms are keyed by join code; each connection
//! holds a bounded outbound channel of encoded frames. A session actor is the
//! only broadcaster for its room, which makes the per-room total order fall
//! out of the command queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use quizdeck_core::net::messages::ServerMessage;
use quizdeck_core::net::protocol::encode_server_message;
use quizdeck_core::player::PlayerId;

pub type SharedHub = Arc<RwLock<Hub>>;

/// Per-connection sender for outbound frames. Bounded to keep a slow client
/// from buffering the server into the ground; overflow closes the connection.
pub type ConnSender = tokio::sync::mpsc::Sender<Bytes>;

pub type ConnId = u64;

/// Who is on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnRole {
    Host,
    Player(PlayerId),
    /// A player connection that has not joined yet (pre-`PLAYER_JOIN`).
    Pending,
    Display,
}

struct Member {
    role: ConnRole,
    sender: ConnSender,
}

struct Room {
    members: HashMap<ConnId, Member>,
    /// Bounded tail of recent broadcasts, replayed on reconnect.
    tail: VecDeque<Bytes>,
}

pub struct Hub {
    rooms: HashMap<String, Room>,
    next_conn_id: ConnId,
    tail_limit: usize,
}

impl Hub {
    pub fn new(tail_limit: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            next_conn_id: 1,
            tail_limit,
        }
    }

    pub fn create_room(&mut self, code: &str) {
        self.rooms.entry(code.to_string()).or_insert_with(|| Room {
            members: HashMap::new(),
            tail: VecDeque::new(),
        });
    }

    /// Drop a room and every member channel in it, closing the sockets.
    pub fn remove_room(&mut self, code: &str) {
        self.rooms.remove(code);
    }

    pub fn room_exists(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    /// Register a connection with a room. `None` when the room is gone.
    pub fn register(&mut self, code: &str, role: ConnRole, sender: ConnSender) -> Option<ConnId> {
        let room = self.rooms.get_mut(code)?;
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;
        room.members.insert(conn_id, Member { role, sender });
        Some(conn_id)
    }

    pub fn unregister(&mut self, code: &str, conn_id: ConnId) -> Option<ConnRole> {
        let room = self.rooms.get_mut(code)?;
        room.members.remove(&conn_id).map(|m| m.role)
    }

    /// Rebind a pending connection to its player id after a successful join.
    pub fn bind_player(&mut self, code: &str, conn_id: ConnId, player_id: PlayerId) {
        if let Some(room) = self.rooms.get_mut(code)
            && let Some(member) = room.members.get_mut(&conn_id)
        {
            member.role = ConnRole::Player(player_id);
        }
    }

    /// Broadcast to every member of a room, recording the frame in the
    /// replay tail. A member whose queue is full is dropped — closing its
    /// socket — and catches up by reconnecting.
    pub fn broadcast(&mut self, code: &str, msg: &ServerMessage) {
        let encoded = match encode_server_message(msg) {
            Ok(text) => Bytes::from(text),
            Err(e) => {
                tracing::error!(room = code, error = %e, "Failed to encode broadcast");
                return;
            }
        };
        let Some(room) = self.rooms.get_mut(code) else {
            return;
        };

        room.tail.push_back(encoded.clone());
        while room.tail.len() > self.tail_limit {
            room.tail.pop_front();
        }

        let mut overflowed = Vec::new();
        for (&conn_id, member) in &room.members {
            if member.sender.try_send(encoded.clone()).is_err() {
                overflowed.push(conn_id);
            }
        }
        for conn_id in overflowed {
            room.members.remove(&conn_id);
            tracing::warn!(
                room = code,
                conn_id,
                "Outbound queue overflow, closing connection"
            );
        }
    }

    /// Point-to-point send. Not recorded in the replay tail.
    pub fn send_to_conn(&self, code: &str, conn_id: ConnId, msg: &ServerMessage) {
        let Some(room) = self.rooms.get(code) else {
            return;
        };
        let Some(member) = room.members.get(&conn_id) else {
            return;
        };
        match encode_server_message(msg) {
            Ok(text) => {
                if member.sender.try_send(Bytes::from(text)).is_err() {
                    tracing::debug!(room = code, conn_id, "Dropped point-to-point send");
                }
            }
            Err(e) => tracing::error!(room = code, error = %e, "Failed to encode message"),
        }
    }

    /// Replay the recorded broadcast tail to one connection, oldest first.
    pub fn replay_tail(&self, code: &str, conn_id: ConnId) {
        let Some(room) = self.rooms.get(code) else {
            return;
        };
        let Some(member) = room.members.get(&conn_id) else {
            return;
        };
        for frame in &room.tail {
            if member.sender.try_send(frame.clone()).is_err() {
                tracing::debug!(room = code, conn_id, "Replay truncated by full queue");
                break;
            }
        }
    }

    /// (room count, connection count) for the health endpoint.
    pub fn stats(&self) -> (usize, usize) {
        let connections = self.rooms.values().map(|r| r.members.len()).sum();
        (self.rooms.len(), connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizdeck_core::net::messages::{EmptyMsg, ServerMessage};
    use quizdeck_core::net::protocol::decode_server_envelope;
    use tokio::sync::mpsc;

    fn make_conn(buffer: usize) -> (ConnSender, mpsc::Receiver<Bytes>) {
        mpsc::channel(buffer)
    }

    fn probe_msg() -> ServerMessage {
        ServerMessage::HideScoreboard(EmptyMsg {})
    }

    #[test]
    fn register_requires_room() {
        let mut hub = Hub::new(50);
        let (tx, _rx) = make_conn(8);
        assert!(hub.register("ABCDEF", ConnRole::Display, tx.clone()).is_none());
        hub.create_room("ABCDEF");
        assert!(hub.register("ABCDEF", ConnRole::Display, tx).is_some());
    }

    #[test]
    fn broadcast_reaches_all_members() {
        let mut hub = Hub::new(50);
        hub.create_room("ABCDEF");
        let (tx1, mut rx1) = make_conn(8);
        let (tx2, mut rx2) = make_conn(8);
        hub.register("ABCDEF", ConnRole::Display, tx1);
        hub.register("ABCDEF", ConnRole::Host, tx2);

        hub.broadcast("ABCDEF", &probe_msg());

        for rx in [&mut rx1, &mut rx2] {
            let frame = rx.try_recv().expect("frame delivered");
            let envelope = decode_server_envelope(std::str::from_utf8(&frame).unwrap()).unwrap();
            assert_eq!(envelope.msg, probe_msg());
        }
    }

    fn numbered_msg(n: u32) -> ServerMessage {
        ServerMessage::AnswerCountUpdated(quizdeck_core::net::messages::AnswerCountUpdatedMsg {
            item_id: uuid::Uuid::nil(),
            answered: n,
            online: 0,
        })
    }

    fn frame_number(frame: &Bytes) -> u32 {
        let envelope = decode_server_envelope(std::str::from_utf8(frame).unwrap()).unwrap();
        match envelope.msg {
            ServerMessage::AnswerCountUpdated(msg) => msg.answered,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn per_room_order_preserved() {
        let mut hub = Hub::new(50);
        hub.create_room("ABCDEF");
        let (tx, mut rx) = make_conn(64);
        hub.register("ABCDEF", ConnRole::Display, tx);

        for n in 0..10 {
            hub.broadcast("ABCDEF", &numbered_msg(n));
        }

        let mut seen = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            seen.push(frame_number(&frame));
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn overflowing_member_is_dropped() {
        let mut hub = Hub::new(50);
        hub.create_room("ABCDEF");
        let (tx, _rx) = make_conn(2);
        hub.register("ABCDEF", ConnRole::Display, tx);

        for _ in 0..5 {
            hub.broadcast("ABCDEF", &probe_msg());
        }
        let (_, connections) = hub.stats();
        assert_eq!(connections, 0, "overflowed member should be dropped");
    }

    #[test]
    fn replay_tail_is_bounded_and_ordered() {
        let mut hub = Hub::new(3);
        hub.create_room("ABCDEF");

        for n in 0..6 {
            hub.broadcast("ABCDEF", &numbered_msg(n));
        }

        let (tx, mut rx) = make_conn(8);
        let conn = hub.register("ABCDEF", ConnRole::Display, tx).unwrap();
        hub.replay_tail("ABCDEF", conn);

        let mut seen = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            seen.push(frame_number(&frame));
        }
        // Oldest-first, bounded at the configured limit.
        assert_eq!(seen, vec![3, 4, 5]);
    }

    #[test]
    fn send_to_conn_skips_tail() {
        let mut hub = Hub::new(50);
        hub.create_room("ABCDEF");
        let (tx, mut rx) = make_conn(8);
        let conn = hub.register("ABCDEF", ConnRole::Player(uuid::Uuid::nil()), tx).unwrap();

        hub.send_to_conn("ABCDEF", conn, &probe_msg());
        assert!(rx.try_recv().is_ok());

        // A later joiner replaying the tail sees nothing.
        let (tx2, mut rx2) = make_conn(8);
        let conn2 = hub.register("ABCDEF", ConnRole::Display, tx2).unwrap();
        hub.replay_tail("ABCDEF", conn2);
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn bind_player_updates_role() {
        let mut hub = Hub::new(50);
        hub.create_room("ABCDEF");
        let (tx, _rx) = make_conn(8);
        let conn = hub.register("ABCDEF", ConnRole::Pending, tx).unwrap();
        let pid = uuid::Uuid::from_u128(5);
        hub.bind_player("ABCDEF", conn, pid);
        assert_eq!(hub.unregister("ABCDEF", conn), Some(ConnRole::Player(pid)));
    }

    #[test]
    fn remove_room_disconnects_everyone() {
        let mut hub = Hub::new(50);
        hub.create_room("ABCDEF");
        let (tx, mut rx) = make_conn(8);
        hub.register("ABCDEF", ConnRole::Display, tx);
        hub.remove_room("ABCDEF");
        // Sender dropped → receiver observes closure.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(!hub.room_exists("ABCDEF"));
    }
}
