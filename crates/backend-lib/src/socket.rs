// ============================
// crates/backend-lib/src/socket.rs
// ============================
//! Per-connection session state and message dispatch.
//!
//! One `SocketHandler` exists per live connection and owns that
//! connection's identity: unauthenticated until the credential
//! verifier accepts a token, and a member of at most one room. Every
//! message type other than `authenticate` is rejected with
//! `NOT_AUTHENTICATED` until then, with no side effect. There is no
//! re-authentication limit or lockout, and a failed attempt does not
//! close the connection.
use std::sync::Arc;
use tokio::sync::mpsc;
use typerace_common::{AdminInfo, ClientMessage, RoomSummary, ServerMessage};
use uuid::Uuid;

use crate::error::AppError;
use crate::race::{self, ProgressReport};
use crate::rooms::RoomMember;
use crate::store::Store;
use crate::AppState;

/// Handler for one connection's messages
pub struct SocketHandler<S> {
    state: Arc<AppState<S>>,
    session_id: Uuid,
    /// Outbound channel of this connection, registered into rooms the
    /// session joins
    tx: mpsc::Sender<ServerMessage>,
    authenticated: bool,
    user_id: Option<String>,
    username: Option<String>,
    room_id: Option<String>,
}

impl<S: Store + 'static> SocketHandler<S> {
    pub fn new(state: Arc<AppState<S>>, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            state,
            session_id: Uuid::new_v4(),
            tx,
            authenticated: false,
            user_id: None,
            username: None,
            room_id: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Route one inbound message. Returns the direct reply, if the
    /// operation has one; broadcasts go out through the room registry.
    pub async fn handle_message(
        &mut self,
        msg: ClientMessage,
    ) -> Result<Option<ServerMessage>, AppError> {
        match msg {
            ClientMessage::Authenticate { token } => self.authenticate(&token).await,
            _ if !self.authenticated => Err(AppError::NotAuthenticated),
            ClientMessage::JoinRoom { room_id } => self.join_room(room_id).await,
            ClientMessage::LeaveRoom {} => self.leave_room(),
            ClientMessage::StartRace { text_content } => self.start_race(text_content).await,
            ClientMessage::RaceProgress {
                race_id,
                progress,
                wpm,
                accuracy,
                is_finished,
            } => {
                self.race_progress(ProgressReport {
                    race_id,
                    progress,
                    wpm,
                    accuracy,
                    is_finished,
                })
                .await
            },
        }
    }

    /// Connection closed: same bookkeeping as `leave_room`, no reply.
    pub fn handle_disconnect(&mut self) {
        let Some(room_id) = self.room_id.take() else {
            return;
        };
        let Ok((user_id, username)) = self.identity() else {
            return;
        };
        self.state.rooms.remove(&room_id, self.session_id);
        self.state.rooms.broadcast(
            &room_id,
            &ServerMessage::UserLeft {
                user_id: user_id.clone(),
                username,
            },
            None,
        );
        self.state.races.remove_participant(&room_id, &user_id);
        tracing::debug!(%self.session_id, room_id, "session disconnected");
    }

    fn identity(&self) -> Result<(String, String), AppError> {
        match (&self.user_id, &self.username) {
            (Some(user_id), Some(username)) => Ok((user_id.clone(), username.clone())),
            _ => Err(AppError::NotAuthenticated),
        }
    }

    async fn authenticate(&mut self, token: &str) -> Result<Option<ServerMessage>, AppError> {
        let identity = self.state.verifier.verify(token).await?;
        self.authenticated = true;
        self.user_id = Some(identity.user_id.clone());
        self.username = Some(identity.username.clone());
        tracing::info!(user_id = %identity.user_id, username = %identity.username, "session authenticated");
        Ok(Some(ServerMessage::Authenticate {
            success: true,
            user_id: identity.user_id,
            username: identity.username,
        }))
    }

    async fn join_room(&mut self, room_id: String) -> Result<Option<ServerMessage>, AppError> {
        let (user_id, username) = self.identity()?;

        let room = self
            .state
            .store
            .find_room(&room_id)
            .await?
            .filter(|room| room.is_active)
            .ok_or(AppError::RoomNotFound)?;

        // Switching rooms: leave the previous one first. The user stays
        // in the old room's race, if any; only leave/disconnect removes
        // race participants.
        if let Some(old_room) = self.room_id.take() {
            if old_room != room_id {
                self.state.rooms.remove(&old_room, self.session_id);
                self.state.rooms.broadcast(
                    &old_room,
                    &ServerMessage::UserLeft {
                        user_id: user_id.clone(),
                        username: username.clone(),
                    },
                    None,
                );
            }
        }

        self.state.rooms.insert(
            &room_id,
            RoomMember {
                session_id: self.session_id,
                user_id: user_id.clone(),
                username: username.clone(),
                tx: self.tx.clone(),
            },
        );
        self.room_id = Some(room_id.clone());

        // The reply carries the in-memory race snapshot, taken before
        // this user is added to it (they see themselves only from the
        // next progress broadcast on).
        let race = self.state.races.room_snapshot(&room_id);
        let reply = ServerMessage::JoinRoom {
            room: RoomSummary {
                id: room.id,
                name: room.name,
                is_private: room.is_private,
                admin: AdminInfo {
                    id: room.admin_id,
                    name: room.admin_name,
                },
                has_active_race: race.is_some(),
            },
            participants: self.state.rooms.peers(&room_id),
            race,
        };

        self.state.rooms.broadcast(
            &room_id,
            &ServerMessage::UserJoined {
                user_id: user_id.clone(),
                username: username.clone(),
            },
            Some(self.session_id),
        );

        // Late joiners enter an in-progress race with a fresh standing.
        self.state
            .races
            .add_participant_if_absent(&room_id, &user_id, &username);

        tracing::debug!(%self.session_id, room_id, user_id, "joined room");
        Ok(Some(reply))
    }

    fn leave_room(&mut self) -> Result<Option<ServerMessage>, AppError> {
        let (user_id, username) = self.identity()?;
        let room_id = self.room_id.take().ok_or(AppError::NotInRoom)?;

        self.state.rooms.remove(&room_id, self.session_id);
        self.state.rooms.broadcast(
            &room_id,
            &ServerMessage::UserLeft {
                user_id: user_id.clone(),
                username,
            },
            None,
        );
        self.state.races.remove_participant(&room_id, &user_id);

        tracing::debug!(%self.session_id, room_id, user_id, "left room");
        Ok(Some(ServerMessage::LeaveRoom { success: true }))
    }

    async fn start_race(
        &mut self,
        text_content: Option<String>,
    ) -> Result<Option<ServerMessage>, AppError> {
        let (user_id, _) = self.identity()?;
        let room_id = self.room_id.clone().ok_or(AppError::NotInRoom)?;
        race::start_race(&self.state, &room_id, &user_id, text_content).await?;
        Ok(None)
    }

    async fn race_progress(
        &mut self,
        report: ProgressReport,
    ) -> Result<Option<ServerMessage>, AppError> {
        let (user_id, username) = self.identity()?;
        let room_id = self.room_id.clone().ok_or(AppError::NotInRoom)?;
        race::report_progress(&self.state, &room_id, &user_id, &username, report).await?;
        Ok(None)
    }
}
