// ============================
// crates/backend-lib/src/race.rs
// ============================
//! Race lifecycle manager.
//!
//! Owns every race that is not yet finished. A room has at most one
//! active race at any time. Races move `start -> active -> finished`;
//! the COUNTDOWN and ACTIVE phases share one in-memory representation
//! (`is_active = true`), the countdown being purely advisory for
//! clients.
//!
//! Three finish paths exist: all active participants finished, the
//! per-race auto-finish timer, and the staleness sweeper. Each is
//! idempotent: the `is_active` flag is flipped synchronously before the
//! persistence await, so a racing second path observes FINISHED and
//! no-ops. A failed persistence write flips the flag back and restores
//! the timer cancel handle, leaving memory as it was.
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Duration;
use typerace_common::{Participant, RaceSummary, ServerMessage};
use uuid::Uuid;

use crate::error::AppError;
use crate::store::{RaceHistoryRecord, RaceRecord, Store};
use crate::AppState;

/// Advisory delay before a race's text becomes active
pub const COUNTDOWN_SECONDS: u32 = 10;
/// A race is force-finished this long after `start_race`
pub const RACE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Race text used when the admin supplies none
pub const DEFAULT_TEXT: &str =
    "The quick brown fox jumps over the lazy dog. This is a sample text for typing race.";

/// In-memory state of one not-yet-finished race
pub struct ActiveRace {
    pub race_id: String,
    pub room_id: String,
    pub text_content: String,
    pub start_time: DateTime<Utc>,
    pub is_active: bool,
    /// userId -> live standing; disjoint keys are written by disjoint
    /// senders, so ordinary updates never contend
    pub participants: HashMap<String, Participant>,
    /// Cancel handle for the auto-finish timer; taken exactly once, by
    /// whichever finish path runs first
    pub(crate) cancel: Option<oneshot::Sender<()>>,
}

/// Which path finished a race; decides the result ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishPath {
    /// Every active participant finished: finishers only, by position
    Completed,
    /// Per-race auto-finish timer: everyone, by progress descending
    Timeout,
    /// Staleness sweeper: everyone, by progress descending
    Sweep,
}

impl FinishPath {
    fn label(self) -> &'static str {
        match self {
            FinishPath::Completed => "completed",
            FinishPath::Timeout => "timeout",
            FinishPath::Sweep => "sweep",
        }
    }
}

/// The set of races currently not finished, behind one lock.
///
/// Handlers interleave only at external-call awaits; every mutation of
/// this map happens synchronously under the lock, which is never held
/// across an await.
#[derive(Default)]
pub struct RaceRegistry {
    races: Mutex<HashMap<String, ActiveRace>>,
}

impl RaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveRace>> {
        self.races.lock()
    }

    /// Id of the room's active race, if any
    pub fn active_race_id_for_room(&self, room_id: &str) -> Option<String> {
        self.races
            .lock()
            .values()
            .find(|race| race.room_id == room_id)
            .map(|race| race.race_id.clone())
    }

    /// Insert a new race, re-checking the one-active-race-per-room
    /// invariant at the moment of insertion (the caller's earlier check
    /// may have been overtaken during a persistence await).
    fn insert_if_room_vacant(&self, race: ActiveRace) -> Result<(), AppError> {
        let mut races = self.races.lock();
        if let Some(existing) = races.values().find(|r| r.room_id == race.room_id) {
            return Err(AppError::RaceInProgress {
                race_id: existing.race_id.clone(),
            });
        }
        races.insert(race.race_id.clone(), race);
        Ok(())
    }

    /// Snapshot of a room's active race for the `join_room` reply
    pub fn room_snapshot(&self, room_id: &str) -> Option<RaceSummary> {
        self.races
            .lock()
            .values()
            .find(|race| race.room_id == room_id)
            .map(|race| RaceSummary {
                id: race.race_id.clone(),
                start_time: race.start_time,
                text_content: race.text_content.clone(),
                participants: race.participants.values().cloned().collect(),
            })
    }

    /// Current participant list of a race
    pub fn participants_snapshot(&self, race_id: &str) -> Option<Vec<Participant>> {
        self.races
            .lock()
            .get(race_id)
            .map(|race| race.participants.values().cloned().collect())
    }

    /// Late joiners may enter a race already in progress: add a fresh
    /// participant unless the user is already in the map.
    pub fn add_participant_if_absent(&self, room_id: &str, user_id: &str, username: &str) {
        let mut races = self.races.lock();
        if let Some(race) = races.values_mut().find(|race| race.room_id == room_id) {
            race.participants
                .entry(user_id.to_string())
                .or_insert_with(|| Participant::fresh(user_id, username));
        }
    }

    /// Drop a user from their room's active race (leave or disconnect).
    /// Mid-race departure does not trigger a finish check.
    pub fn remove_participant(&self, room_id: &str, user_id: &str) {
        let mut races = self.races.lock();
        if let Some(race) = races.values_mut().find(|race| race.room_id == room_id) {
            race.participants.remove(user_id);
        }
    }

    /// Active races whose start time lies before `cutoff`
    pub fn stale_race_ids(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.races
            .lock()
            .values()
            .filter(|race| race.is_active && race.start_time < cutoff)
            .map(|race| race.race_id.clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.races.lock().len()
    }
}

/// A participant's self-reported standing, as carried by `race_progress`
#[derive(Debug, Clone)]
pub struct ProgressReport {
    pub race_id: String,
    pub progress: u8,
    pub wpm: u32,
    pub accuracy: u8,
    pub is_finished: bool,
}

/// Start a race in `room_id` on behalf of `user_id`.
///
/// Fails `NOT_ADMIN` unless the directory names the caller as the
/// room's admin, and `RACE_IN_PROGRESS` when the room already has an
/// active race. Persists the durable record, snapshots the room's
/// membership as participants, arms the auto-finish timer, and
/// broadcasts `race_started` to the room.
pub async fn start_race<S: Store + 'static>(
    state: &Arc<AppState<S>>,
    room_id: &str,
    user_id: &str,
    text_content: Option<String>,
) -> Result<(), AppError> {
    let room = state
        .store
        .find_room(room_id)
        .await?
        .ok_or(AppError::RoomNotFound)?;
    if room.admin_id != user_id {
        return Err(AppError::NotAdmin);
    }
    if let Some(race_id) = state.races.active_race_id_for_room(room_id) {
        return Err(AppError::RaceInProgress { race_id });
    }

    let race_id = Uuid::new_v4().to_string();
    let start_time = Utc::now() + ChronoDuration::seconds(i64::from(COUNTDOWN_SECONDS));
    let text_content = text_content.unwrap_or_else(|| DEFAULT_TEXT.to_string());

    state
        .store
        .create_race(&RaceRecord {
            id: race_id.clone(),
            room_id: room_id.to_string(),
            start_time,
            end_time: None,
            text_content: text_content.clone(),
            is_active: true,
        })
        .await?;

    // Everyone present in the room at start time races.
    let participants = state
        .rooms
        .member_identities(room_id)
        .into_iter()
        .map(|(uid, name)| (uid.clone(), Participant::fresh(uid, name)))
        .collect();

    // Dropping the sender cancels the timer, so a failed insert below
    // disarms it implicitly.
    let cancel = arm_timeout(Arc::clone(state), race_id.clone());
    state.races.insert_if_room_vacant(ActiveRace {
        race_id: race_id.clone(),
        room_id: room_id.to_string(),
        text_content: text_content.clone(),
        start_time,
        is_active: true,
        participants,
        cancel: Some(cancel),
    })?;

    counter!("races_started_total").increment(1);
    tracing::info!(room_id, race_id, "race started");

    state.rooms.broadcast(
        room_id,
        &ServerMessage::RaceStarted {
            race_id,
            start_time,
            text_content,
            countdown_seconds: COUNTDOWN_SECONDS,
        },
        None,
    );
    Ok(())
}

/// Apply a participant's `race_progress` report.
///
/// The race must belong to the sender's current room; otherwise the
/// report fails `RACE_NOT_FOUND` regardless of the race id.
/// Upserts the sender into the participant map (a room member who
/// joined after start is treated as an implicit join-and-update) and
/// overwrites progress, wpm and accuracy unconditionally. The first
/// report with `is_finished` stamps the finish time, assigns the next
/// contiguous position and persists a RaceHistory record; when no
/// active participants remain the race finishes via the completed
/// path. The full standings are always broadcast afterwards.
pub async fn report_progress<S: Store + 'static>(
    state: &Arc<AppState<S>>,
    room_id: &str,
    user_id: &str,
    username: &str,
    report: ProgressReport,
) -> Result<(), AppError> {
    let ProgressReport {
        race_id,
        progress,
        wpm,
        accuracy,
        is_finished,
    } = report;

    let (start_time, newly_finished, mut standings) = {
        let mut races = state.races.lock();
        let race = races.get_mut(&race_id).ok_or(AppError::RaceNotFound)?;
        // A race is only addressable from its own room; reports against
        // another room's race look the same as an unknown race.
        if race.room_id != room_id {
            return Err(AppError::RaceNotFound);
        }
        if !race.is_active {
            return Err(AppError::RaceNotActive);
        }
        let participant = race
            .participants
            .entry(user_id.to_string())
            .or_insert_with(|| Participant::fresh(user_id, username));
        participant.progress = progress;
        participant.wpm = wpm;
        participant.accuracy = accuracy;
        let newly_finished = is_finished && participant.finish_time.is_none();
        (
            race.start_time,
            newly_finished,
            race.participants.values().cloned().collect::<Vec<_>>(),
        )
    };

    if newly_finished {
        let finish_time = Utc::now();
        // History is written before the in-memory stamp: a failed write
        // must leave no finish mark behind (the race stays finishable).
        state
            .store
            .append_history(&RaceHistoryRecord {
                id: Uuid::new_v4().to_string(),
                race_id: race_id.clone(),
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                wpm,
                accuracy,
                race_time: (finish_time - start_time).num_seconds(),
                created_at: finish_time,
            })
            .await?;

        let all_done = {
            let mut races = state.races.lock();
            match races.get_mut(&race_id) {
                Some(race) if race.is_active => {
                    let finished_so_far = race
                        .participants
                        .values()
                        .filter(|p| p.finish_time.is_some())
                        .count() as u32;
                    if let Some(p) = race.participants.get_mut(user_id) {
                        if p.finish_time.is_none() {
                            p.finish_time = Some(finish_time);
                            p.position = Some(finished_so_far + 1);
                        }
                    }
                    standings = race.participants.values().cloned().collect();
                    // Participants who never typed don't hold the race open.
                    race.participants
                        .values()
                        .all(|p| p.finish_time.is_some() || p.progress == 0)
                },
                // Finished by another path while history was being written
                _ => false,
            }
        };

        if all_done {
            finish(state, &race_id, FinishPath::Completed).await?;
        }
    }

    // The progress broadcast is the only delivery mechanism for full
    // standings, so it goes out even when a finish just occurred.
    state.rooms.broadcast(
        room_id,
        &ServerMessage::RaceProgress {
            race_id,
            participants: standings,
        },
        None,
    );
    Ok(())
}

/// Transition a race to FINISHED, once.
///
/// Returns `Ok(false)` when the race is unknown or already finished by
/// another path. On success the race leaves the registry, its timer is
/// cancelled, the durable record gets its end time, and the room
/// receives `race_finished` with results ranked per `path`.
pub(crate) async fn finish<S: Store>(
    state: &Arc<AppState<S>>,
    race_id: &str,
    path: FinishPath,
) -> Result<bool, AppError> {
    let (room_id, cancel) = {
        let mut races = state.races.lock();
        let Some(race) = races.get_mut(race_id) else {
            return Ok(false);
        };
        if !race.is_active {
            return Ok(false);
        }
        race.is_active = false;
        (race.room_id.clone(), race.cancel.take())
    };

    if let Err(err) = state.store.finish_race(race_id, Utc::now()).await {
        // Roll the gate back: the race was not finished.
        let mut races = state.races.lock();
        if let Some(race) = races.get_mut(race_id) {
            race.is_active = true;
            race.cancel = cancel;
        }
        return Err(err);
    }

    let results = {
        let mut races = state.races.lock();
        match races.remove(race_id) {
            Some(race) => {
                let participants: Vec<Participant> =
                    race.participants.into_values().collect();
                match path {
                    FinishPath::Completed => rank_finishers(participants),
                    FinishPath::Timeout | FinishPath::Sweep => rank_by_progress(participants),
                }
            },
            None => Vec::new(),
        }
    };
    drop(cancel); // disarms the pending auto-finish timer, if any

    counter!("races_finished_total", "path" => path.label()).increment(1);
    tracing::info!(race_id, ?path, "race finished");

    state.rooms.broadcast(
        &room_id,
        &ServerMessage::RaceFinished {
            race_id: race_id.to_string(),
            results,
        },
        None,
    );
    Ok(true)
}

/// Finishers only, in finish order
fn rank_finishers(participants: Vec<Participant>) -> Vec<Participant> {
    let mut finishers: Vec<Participant> = participants
        .into_iter()
        .filter(|p| p.finish_time.is_some())
        .collect();
    finishers.sort_by_key(|p| p.position.unwrap_or(u32::MAX));
    finishers
}

/// Everyone, by progress descending, positions reassigned as index+1.
/// This can disagree with finish-order positions and includes
/// non-finishers; both quirks are inherited behavior.
fn rank_by_progress(mut participants: Vec<Participant>) -> Vec<Participant> {
    participants.sort_by(|a, b| b.progress.cmp(&a.progress));
    for (idx, p) in participants.iter_mut().enumerate() {
        p.position = Some(idx as u32 + 1);
    }
    participants
}

/// Arm the per-race auto-finish timer. The returned sender is the
/// cancel handle: dropping it (or sending on it) disarms the timer.
fn arm_timeout<S: Store + 'static>(
    state: Arc<AppState<S>>,
    race_id: String,
) -> oneshot::Sender<()> {
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(RACE_TIMEOUT) => {
                match finish(&state, &race_id, FinishPath::Timeout).await {
                    Ok(true) => tracing::info!(race_id, "race force-finished after timeout"),
                    Ok(false) => {},
                    Err(err) => tracing::warn!(race_id, %err, "timeout finish failed"),
                }
            }
            _ = cancel_rx => {}
        }
    });
    cancel_tx
}
