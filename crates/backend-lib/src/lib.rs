// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core library for the typing-race WebSocket coordinator.
//!
//! One lightweight handler runs per inbound message; shared state (room
//! membership, active races) lives behind serialized-access boundaries
//! in [`AppState`] and is only touched synchronously between awaits.

pub mod auth;
pub mod config;
pub mod error;
pub mod race;
pub mod rooms;
pub mod socket;
pub mod store;
pub mod sweeper;
pub mod ws_router;

use std::sync::Arc;

use crate::auth::CredentialVerifier;
use crate::race::RaceRegistry;
use crate::rooms::RoomRegistry;
use crate::store::Store;

/// Application state shared across all connections
pub struct AppState<S> {
    /// Credential verifier (external collaborator)
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Persistence gateway (external collaborator)
    pub store: S,
    /// Live room membership sets
    pub rooms: RoomRegistry,
    /// All races currently not finished
    pub races: RaceRegistry,
}

impl<S: Store> AppState<S> {
    pub fn new(store: S, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            verifier,
            store,
            rooms: RoomRegistry::new(),
            races: RaceRegistry::new(),
        }
    }
}
