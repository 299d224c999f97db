// ============================
// crates/backend-lib/src/sweeper.rs
// ============================
//! Cleanup sweeper.
//!
//! A periodic background pass that force-finishes stale races. It is a
//! safety net on top of the per-race auto-finish timer: the timer
//! normally fires first, and the sweep no-ops on anything already
//! finished.
use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::race::{self, FinishPath};
use crate::store::Store;
use crate::AppState;

/// How often the sweeper runs
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Races whose start time is older than this are force-finished
pub const STALE_AFTER_SECS: i64 = 10 * 60;

/// Spawn the sweep loop for the lifetime of the server
pub fn spawn<S: Store + 'static>(state: Arc<AppState<S>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; harmless, nothing is
        // stale at startup.
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    })
}

/// Run one sweep pass; returns how many races were force-finished.
pub async fn sweep<S: Store>(state: &Arc<AppState<S>>) -> usize {
    let cutoff = Utc::now() - ChronoDuration::seconds(STALE_AFTER_SECS);
    let stale = state.races.stale_race_ids(cutoff);
    let mut finished = 0;
    for race_id in stale {
        match race::finish(state, &race_id, FinishPath::Sweep).await {
            Ok(true) => {
                tracing::warn!(race_id, "sweeper force-finished stale race");
                finished += 1;
            },
            Ok(false) => {},
            Err(err) => tracing::warn!(race_id, %err, "sweep finish failed"),
        }
    }
    counter!("sweeps_total").increment(1);
    finished
}
