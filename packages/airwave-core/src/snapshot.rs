//! Externally observable state, derived from the engine's internals.
//!
//! The derivation is pure and runs inside the engine's lock, so `current`,
//! its `started_at` and the listener count always come from one atomic
//! section. The pause-adjusted track copy is produced here transiently and
//! never stored back.

use serde::Serialize;

use crate::engine::{EngineInner, PlayStatus};
use crate::track::Track;

/// Wire shape of `/api/status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    /// The playing track (pause-adjusted start time), the last-played one
    /// while briefly between tracks, or null once the queue has drained.
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub listeners: usize,
    pub paused: bool,
}

/// Shifts a track's reported start time forward by the committed pause
/// time, so `(now - startedAt) / 1000` equals audible seconds elapsed.
///
/// The in-progress pause is intentionally not included: the accumulator is
/// only committed on resume, which freezes the reported value (and with it
/// the client's progress bar) for the whole duration of a pause.
fn pause_adjusted(mut track: Track, total_paused_ms: u64) -> Track {
    if let Some(started_at) = track.started_at {
        track.started_at = Some(started_at + total_paused_ms);
    }
    track
}

pub(crate) fn derive(inner: &EngineInner) -> StreamState {
    let current = inner
        .current
        .clone()
        .or_else(|| inner.last_played.clone())
        .map(|t| pause_adjusted(t, inner.total_paused_ms));

    StreamState {
        current,
        queue: inner.queue.snapshot(),
        listeners: inner.listeners.len(),
        paused: inner.status == PlayStatus::Paused,
    }
}
