// ============================
// crates/backend-lib/src/rooms.rs
// ============================
//! Room membership registry and broadcaster.
//!
//! Maps `roomId -> live sessions`. The registry holds only weak
//! bookkeeping for sessions: removing a member never tears down the
//! connection, and a dead connection is skipped (not removed) during
//! broadcast. Removal happens solely through explicit leave and
//! disconnect handling.
use dashmap::DashMap;
use tokio::sync::mpsc;
use typerace_common::{RoomPeer, ServerMessage};
use uuid::Uuid;

/// One live session's entry in a room
#[derive(Clone)]
pub struct RoomMember {
    pub session_id: Uuid,
    pub user_id: String,
    pub username: String,
    pub tx: mpsc::Sender<ServerMessage>,
}

/// Live membership sets, one per room with at least one member
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Vec<RoomMember>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to a room, creating the set if absent.
    /// Idempotent per session: a rejoin replaces the previous entry.
    pub fn insert(&self, room_id: &str, member: RoomMember) {
        let mut members = self.rooms.entry(room_id.to_string()).or_default();
        members.retain(|m| m.session_id != member.session_id);
        members.push(member);
    }

    /// Remove a session from a room; drops the set once empty.
    /// Returns whether the session was present.
    pub fn remove(&self, room_id: &str, session_id: Uuid) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(mut members) => {
                let before = members.len();
                members.retain(|m| m.session_id != session_id);
                before != members.len()
            },
            None => false,
        };
        self.rooms.remove_if(room_id, |_, members| members.is_empty());
        removed
    }

    /// Live member identities for the `join_room` reply
    pub fn peers(&self, room_id: &str) -> Vec<RoomPeer> {
        self.rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .map(|m| RoomPeer {
                        user_id: m.user_id.clone(),
                        username: m.username.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Member identities as (user_id, username) pairs, for snapshotting
    /// race participants at start time.
    pub fn member_identities(&self, room_id: &str) -> Vec<(String, String)> {
        self.rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .map(|m| (m.user_id.clone(), m.username.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |members| members.len())
    }

    /// Fan a message out to every live member of a room, best-effort.
    /// Closed or saturated recipients are skipped without error and
    /// without removal from the set.
    pub fn broadcast(&self, room_id: &str, message: &ServerMessage, exclude: Option<Uuid>) {
        let Some(members) = self.rooms.get(room_id) else {
            return;
        };
        for member in members.iter() {
            if exclude == Some(member.session_id) {
                continue;
            }
            if let Err(err) = member.tx.try_send(message.clone()) {
                tracing::trace!(
                    room_id,
                    user_id = %member.user_id,
                    %err,
                    "skipping unreachable room member"
                );
            }
        }
    }
}
