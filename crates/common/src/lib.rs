// ================
// crates/common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between the typing-race client and server.
//! This module defines the WebSocket protocol messages and supporting types.
//!
//! Every frame on the wire is a JSON object of the shape
//! `{"type": <message type>, "payload": <object>}`, carried here as
//! adjacently tagged serde enums so that unknown or malformed shapes
//! fail at deserialization instead of deep inside a handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Present a bearer token; must precede every other message type
    Authenticate { token: String },
    /// Enter a room (leaving the current one, if any)
    JoinRoom { room_id: String },
    /// Leave the current room
    LeaveRoom {},
    /// Start a race in the current room (admin only)
    /// # Fields
    /// * `text_content` - Text to type; server picks a default when absent
    StartRace {
        #[serde(default)]
        text_content: Option<String>,
    },
    /// Report the sender's own standing in an active race
    RaceProgress {
        race_id: String,
        progress: u8,
        wpm: u32,
        accuracy: u8,
        is_finished: bool,
    },
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Authentication confirmation
    Authenticate {
        success: bool,
        user_id: String,
        username: String,
    },
    /// Reply to a successful `join_room`: room summary, live member
    /// list, and the in-memory snapshot of the active race if one exists
    JoinRoom {
        room: RoomSummary,
        participants: Vec<RoomPeer>,
        race: Option<RaceSummary>,
    },
    /// Reply to a successful `leave_room`
    LeaveRoom { success: bool },
    /// Broadcast to a room when another member joins
    UserJoined { user_id: String, username: String },
    /// Broadcast to a room when a member leaves or disconnects
    UserLeft { user_id: String, username: String },
    /// Broadcast when the admin starts a race; `start_time` is
    /// `countdown_seconds` in the future and advisory for clients
    RaceStarted {
        race_id: String,
        start_time: DateTime<Utc>,
        text_content: String,
        countdown_seconds: u32,
    },
    /// Full current standings of a race; the only delivery mechanism
    /// for a room's standings
    RaceProgress {
        race_id: String,
        participants: Vec<Participant>,
    },
    /// Terminal broadcast for a race. Result ordering depends on the
    /// finish path: finish order for a naturally completed race,
    /// progress-descending for a timed-out or swept one.
    RaceFinished {
        race_id: String,
        results: Vec<Participant>,
    },
    /// Recoverable failure, sent only to the offending session
    Error { message: String, code: ErrorCode },
}

/// A user's live standing within a specific race
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub username: String,
    /// Completion percentage, 0-100
    pub progress: u8,
    /// Reported typing speed, words per minute
    pub wpm: u32,
    /// Reported accuracy, 0-100
    pub accuracy: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<DateTime<Utc>>,
    /// Finish rank, assigned once in finish order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl Participant {
    /// A participant that has not typed anything yet
    pub fn fresh(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            progress: 0,
            wpm: 0,
            accuracy: 100,
            finish_time: None,
            position: None,
        }
    }
}

/// A live room member as shown in the `join_room` reply
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomPeer {
    pub user_id: String,
    pub username: String,
}

/// Room directory summary
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub is_private: bool,
    pub admin: AdminInfo,
    pub has_active_race: bool,
}

/// The room's admin identity
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdminInfo {
    pub id: String,
    pub name: String,
}

/// Snapshot of an in-progress race, sent to late joiners
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RaceSummary {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub text_content: String,
    pub participants: Vec<Participant>,
}

/// Wire error codes, sent in `error` payloads
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthFailed,
    NotAuthenticated,
    RoomNotFound,
    NotInRoom,
    NotAdmin,
    RaceInProgress,
    RaceNotFound,
    RaceNotActive,
    InvalidFormat,
    InternalError,
}
