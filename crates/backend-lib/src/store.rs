// ============================
// crates/backend-lib/src/store.rs
// ============================
//! Persistence gateway abstraction with flat-file implementation.
//!
//! The external directory owns rooms; this gateway reads them and
//! issues durable Race and RaceHistory records. Durable records
//! outlive the in-memory race objects.
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokio::{fs as tokio_fs, io::AsyncWriteExt};

/// Durable room record, as issued by the room directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: String,
    pub name: String,
    pub admin_id: String,
    pub admin_name: String,
    pub is_active: bool,
    pub is_private: bool,
    /// Owned and checked by the directory, never read here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Durable race record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceRecord {
    pub id: String,
    pub room_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub text_content: String,
    pub is_active: bool,
}

/// Durable per-user race result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceHistoryRecord {
    pub id: String,
    pub race_id: String,
    pub user_id: String,
    pub room_id: String,
    pub wpm: u32,
    pub accuracy: u8,
    /// Seconds from race start to the user's finish
    pub race_time: i64,
    pub created_at: DateTime<Utc>,
}

/// Trait for persistence backends
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a room in the directory
    async fn find_room(&self, room_id: &str) -> Result<Option<RoomRecord>, AppError>;

    /// Write a room record (directory-side operation, used for seeding)
    async fn upsert_room(&self, room: &RoomRecord) -> Result<(), AppError>;

    /// Issue a durable record for a newly started race
    async fn create_race(&self, race: &RaceRecord) -> Result<(), AppError>;

    /// Mark a race finished at `end_time`
    async fn finish_race(&self, race_id: &str, end_time: DateTime<Utc>) -> Result<(), AppError>;

    /// Append a per-user result to the race history log
    async fn append_history(&self, entry: &RaceHistoryRecord) -> Result<(), AppError>;
}

/// Flat-file implementation of the [`Store`] trait
#[derive(Clone)]
pub struct FlatFileStore {
    root: PathBuf,
}

impl FlatFileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("rooms"))?;
        fs::create_dir_all(root.join("races"))?;
        Ok(Self { root })
    }

    fn room_path(&self, room_id: &str) -> PathBuf {
        self.root.join("rooms").join(format!("{room_id}.json"))
    }

    fn race_path(&self, race_id: &str) -> PathBuf {
        self.root.join("races").join(format!("{race_id}.json"))
    }

    fn history_path(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }
}

#[async_trait]
impl Store for FlatFileStore {
    async fn find_room(&self, room_id: &str) -> Result<Option<RoomRecord>, AppError> {
        let path = self.room_path(room_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio_fs::read_to_string(&path).await?;
        let room: RoomRecord = serde_json::from_str(&content)?;
        Ok(Some(room))
    }

    async fn upsert_room(&self, room: &RoomRecord) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(room)?;
        tokio_fs::write(self.room_path(&room.id), json).await?;
        Ok(())
    }

    async fn create_race(&self, race: &RaceRecord) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(race)?;
        tokio_fs::write(self.race_path(&race.id), json).await?;
        Ok(())
    }

    async fn finish_race(&self, race_id: &str, end_time: DateTime<Utc>) -> Result<(), AppError> {
        let path = self.race_path(race_id);
        if !path.exists() {
            return Err(AppError::RaceNotFound);
        }
        let content = tokio_fs::read_to_string(&path).await?;
        let mut race: RaceRecord = serde_json::from_str(&content)?;
        race.is_active = false;
        race.end_time = Some(end_time);
        tokio_fs::write(&path, serde_json::to_string_pretty(&race)?).await?;
        Ok(())
    }

    /// Append a JSON line to `history.jsonl`.
    async fn append_history(&self, entry: &RaceHistoryRecord) -> Result<(), AppError> {
        let json = serde_json::to_string(entry)?;
        let mut file = tokio_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}
