//! Broadcast engine: the serial controller driving one-track-at-a-time
//! playback from the shared queue out to every listener sink.
//!
//! All mutable state (queue, status, current track, pause bookkeeping,
//! listener set) lives behind one coarse lock, because the invariants span
//! fields: exactly one pipeline exists at a time, the currently playing
//! track is never in the queue, and a snapshot's listener count must be
//! consistent with its paused flag.
//!
//! Pipeline lifecycle arrives as messages on a channel rather than
//! callbacks. Every pipeline gets a session id; killing a pipeline bumps
//! the engine's session so late events from the corpse are discarded, which
//! is what makes a skip advance the queue exactly once.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::bus::ListenerSet;
use crate::encoder::{EncoderEvent, EncoderHandle, FfmpegLauncher, PipelineLauncher};
use crate::fetch::{Fetcher, SourceFetcher};
use crate::protocol_constants::{
    ENCODER_FIRST_DATA_TIMEOUT_SECS, FETCH_RETRY_DELAY_MS, IDLE_SILENCE_INTERVAL_MS,
    SKIP_COOLDOWN_MS, TRACK_ADVANCE_DELAY_MS,
};
use crate::queue::TrackQueue;
use crate::snapshot::{self, StreamState};
use crate::state::Config;
use crate::track::{Track, TrackSource};
use crate::utils::now_millis;

/// Engine playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStatus {
    /// Nothing playing; the queue may or may not be empty.
    Idle,
    /// A track has been dequeued; fetcher/encoder are starting up.
    Starting,
    /// Audio is flowing.
    Playing,
    /// Mid-track, encoder suspended, listeners hear silence.
    Paused,
    /// A skip's cooldown window; pipeline events are stale.
    Skipping,
}

/// Per-source cache of the current track's thumbnail URL, read by the
/// thumbnail proxy endpoints.
#[derive(Debug, Default)]
struct ThumbnailCache {
    youtube: Option<String>,
    soundcloud: Option<String>,
}

impl ThumbnailCache {
    /// Records the thumbnail for a freshly started track and clears the
    /// other source's entry.
    fn record(&mut self, source: TrackSource, url: Option<String>) {
        match source {
            TrackSource::Youtube => {
                self.youtube = url;
                self.soundcloud = None;
            }
            TrackSource::Soundcloud => {
                self.soundcloud = url;
                self.youtube = None;
            }
        }
    }

    fn get(&self, source: TrackSource) -> Option<String> {
        match source {
            TrackSource::Youtube => self.youtube.clone(),
            TrackSource::Soundcloud => self.soundcloud.clone(),
        }
    }
}

/// Everything behind the engine's one lock.
pub(crate) struct EngineInner {
    pub(crate) queue: TrackQueue,
    pub(crate) listeners: ListenerSet,
    pub(crate) status: PlayStatus,
    /// Current pipeline session. Events tagged with an older session are
    /// from a pipeline that has already been torn down.
    session: u64,
    pub(crate) current: Option<Track>,
    /// Shown as `current` while briefly between tracks; cleared once the
    /// queue fully drains.
    pub(crate) last_played: Option<Track>,
    /// Wall-clock moment the in-progress pause began.
    pub(crate) paused_at: Option<u64>,
    /// Committed pause time for the current track (ms). Only updated on
    /// resume, so the reported start time freezes while paused.
    pub(crate) total_paused_ms: u64,
    thumbnails: ThumbnailCache,
    encoder: Option<EncoderHandle>,
}

impl EngineInner {
    pub(crate) fn new(sink_capacity: usize) -> Self {
        Self {
            queue: TrackQueue::new(),
            listeners: ListenerSet::new(sink_capacity),
            status: PlayStatus::Idle,
            session: 0,
            current: None,
            last_played: None,
            paused_at: None,
            total_paused_ms: 0,
            thumbnails: ThumbnailCache::default(),
            encoder: None,
        }
    }

    /// Track-boundary bookkeeping shared by the end, error and skip paths:
    /// gap silence, last-played handoff, pipeline invalidation.
    fn finish_current(&mut self) {
        self.listeners.broadcast_silence();
        let finished = self.current.take();
        self.last_played = if self.queue.is_empty() { None } else { finished };
        self.paused_at = None;
        self.session += 1;
        if let Some(handle) = self.encoder.take() {
            handle.kill();
        }
    }

    /// Teardown for a track that never produced audio (fetch failure,
    /// stuck pipeline). Unlike [`finish_current`](Self::finish_current) the
    /// track is dropped without becoming the last-played one.
    fn drop_current(&mut self) {
        self.listeners.broadcast_silence();
        self.current = None;
        self.paused_at = None;
        self.session += 1;
        if let Some(handle) = self.encoder.take() {
            handle.kill();
        }
    }
}

/// The broadcast engine. One instance per process, owned by the HTTP layer.
pub struct BroadcastEngine {
    inner: Mutex<EngineInner>,
    events_tx: mpsc::UnboundedSender<(u64, EncoderEvent)>,
    /// Taken once by `start_background_tasks`.
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<(u64, EncoderEvent)>>>,
    fetcher: Arc<dyn Fetcher>,
    launcher: Arc<dyn PipelineLauncher>,
    /// Self-handle for spawning engine tasks from `&self` methods.
    weak: Weak<BroadcastEngine>,
}

impl BroadcastEngine {
    /// Creates an engine with the production fetcher and encoder launcher.
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let fetcher = Arc::new(SourceFetcher::new(Arc::clone(&config)));
        let launcher = Arc::new(FfmpegLauncher::new(&config));
        Self::with_parts(config, fetcher, launcher)
    }

    /// Creates an engine with explicit fetcher and launcher implementations.
    pub fn with_parts(
        config: Arc<Config>,
        fetcher: Arc<dyn Fetcher>,
        launcher: Arc<dyn PipelineLauncher>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(EngineInner::new(config.streaming.sink_capacity)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            fetcher,
            launcher,
            weak: weak.clone(),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.weak.upgrade().expect("engine is kept alive by its owner")
    }

    /// Spawns the pipeline event loop and the idle-silence ticker.
    ///
    /// Must be called exactly once before playback is requested.
    pub fn start_background_tasks(&self) {
        let mut rx = self
            .events_rx
            .lock()
            .take()
            .expect("start_background_tasks called twice");

        let engine = self.arc();
        tokio::spawn(async move {
            while let Some((session, event)) = rx.recv().await {
                engine.handle_event(session, event);
            }
        });

        let engine = self.arc();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(IDLE_SILENCE_INTERVAL_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mut inner = engine.inner.lock();
                // Keep-alive whenever real audio is not flowing: idle,
                // between tracks, during startup, and while paused.
                if inner.status != PlayStatus::Playing && !inner.listeners.is_empty() {
                    inner.listeners.broadcast_silence();
                }
            }
        });
    }

    // ───────────────────────────────────────────────────────────────────
    // Queue operations
    // ───────────────────────────────────────────────────────────────────

    /// Appends a fully resolved track and kicks playback if idle.
    pub fn queue_track(&self, track: Track) -> Track {
        {
            let mut inner = self.inner.lock();
            inner.queue.enqueue(track.clone());
            log::info!(
                "[Engine] Queued \"{}\" ({} pending)",
                track.title,
                inner.queue.len()
            );
        }
        self.ensure_playing();
        track
    }

    /// Returns true when the URL is already pending or currently playing.
    pub fn has_url(&self, url: &str) -> bool {
        let inner = self.inner.lock();
        inner.queue.contains_url(url)
            || inner.current.as_ref().is_some_and(|t| t.url == url)
    }

    /// Removes a pending track by id. The currently playing track is not in
    /// the queue and cannot be removed this way.
    pub fn remove_track(&self, id: Uuid) -> bool {
        self.inner.lock().queue.remove(id)
    }

    /// Moves a pending track to the given position (clamped).
    pub fn move_track(&self, id: Uuid, index: i64) -> bool {
        self.inner.lock().queue.move_to(id, index)
    }

    // ───────────────────────────────────────────────────────────────────
    // Playback control
    // ───────────────────────────────────────────────────────────────────

    /// Starts playback if idle and a track is pending. Idempotent: callers
    /// racing each other make at most one pipeline.
    pub fn ensure_playing(&self) {
        let (track, session) = {
            let mut inner = self.inner.lock();
            if inner.status != PlayStatus::Idle {
                return;
            }
            let Some(track) = inner.queue.dequeue() else {
                return;
            };
            inner.status = PlayStatus::Starting;
            inner.session += 1;
            inner.current = Some(track.clone());
            (track, inner.session)
        };

        let engine = self.arc();
        tokio::spawn(async move {
            engine.start_pipeline(track, session).await;
        });
    }

    /// Skips the current track: kill the pipeline now, advance after a
    /// short cooldown that swallows the kill's end/error events.
    pub fn skip_current(&self) {
        {
            let mut inner = self.inner.lock();
            if !matches!(inner.status, PlayStatus::Playing | PlayStatus::Paused) {
                return;
            }
            log::info!(
                "[Engine] Skipping \"{}\"",
                inner.current.as_ref().map(|t| t.title.as_str()).unwrap_or("?")
            );
            inner.finish_current();
            inner.status = PlayStatus::Skipping;
        }

        let engine = self.arc();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(SKIP_COOLDOWN_MS)).await;
            {
                let mut inner = engine.inner.lock();
                if inner.status == PlayStatus::Skipping {
                    inner.status = PlayStatus::Idle;
                }
            }
            engine.ensure_playing();
        });
    }

    /// Pauses or resumes playback. Returns the resulting paused flag.
    ///
    /// Pause both freezes the encoder subprocess (no buffering ahead) and
    /// flushes bulk silence through the sinks (already-buffered audio on
    /// the client is displaced, making the pause audibly immediate). A
    /// refused stop/continue signal is logged but the flag and accumulator
    /// still update, so client timing freezes regardless.
    pub fn set_paused(&self, paused: bool) -> bool {
        let mut inner = self.inner.lock();
        match (paused, inner.status) {
            (true, PlayStatus::Playing) => {
                inner.status = PlayStatus::Paused;
                inner.paused_at = Some(now_millis());
                if let Some(handle) = &inner.encoder {
                    if !handle.suspend() {
                        log::warn!("[Engine] Encoder stop signal failed, relying on silence substitution");
                    }
                }
                inner.listeners.broadcast_pause_flush();
                log::info!("[Engine] Paused");
                true
            }
            (true, PlayStatus::Paused) => true,
            (false, PlayStatus::Paused) => {
                let now = now_millis();
                if let Some(at) = inner.paused_at.take() {
                    inner.total_paused_ms += now.saturating_sub(at);
                }
                inner.status = PlayStatus::Playing;
                if let Some(handle) = &inner.encoder {
                    if !handle.resume() {
                        log::warn!("[Engine] Encoder continue signal failed");
                    }
                }
                log::info!(
                    "[Engine] Resumed ({}s paused so far)",
                    inner.total_paused_ms / 1000
                );
                false
            }
            (_, status) => status == PlayStatus::Paused,
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Listeners & observation
    // ───────────────────────────────────────────────────────────────────

    /// Attaches a listener sink; the receiver feeds one HTTP response body.
    pub fn attach_listener(&self) -> (Uuid, mpsc::Receiver<bytes::Bytes>) {
        self.inner.lock().listeners.attach()
    }

    /// Detaches a listener sink (client disconnect).
    pub fn remove_listener(&self, id: Uuid) {
        self.inner.lock().listeners.remove(id);
    }

    /// Builds a consistent snapshot of the externally observable state.
    pub fn stream_state(&self) -> StreamState {
        snapshot::derive(&self.inner.lock())
    }

    /// The cached thumbnail URL for the given source's current track.
    pub fn thumbnail_for(&self, source: TrackSource) -> Option<String> {
        self.inner.lock().thumbnails.get(source)
    }

    /// Tears down the pipeline and all listeners (process shutdown).
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.session += 1;
        if let Some(handle) = inner.encoder.take() {
            handle.kill();
        }
        inner.listeners.clear();
        inner.current = None;
        inner.status = PlayStatus::Idle;
        log::info!("[Engine] Shut down");
    }

    // ───────────────────────────────────────────────────────────────────
    // Pipeline lifecycle
    // ───────────────────────────────────────────────────────────────────

    async fn start_pipeline(self: Arc<Self>, track: Track, session: u64) {
        log::info!("[Engine] Starting \"{}\" ({})", track.title, track.url);

        let input = match self.fetcher.fetch(&track).await {
            Ok(input) => input,
            Err(e) => {
                log::warn!("[Engine] Fetch failed for \"{}\": {e}", track.title);
                self.fail_start(session, FETCH_RETRY_DELAY_MS);
                return;
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.session != session || inner.status != PlayStatus::Starting {
                // Skipped or shut down while fetching; the input drops here
                // and takes any upstream subprocess with it.
                return;
            }
            match self.launcher.launch(input, session, self.events_tx.clone()) {
                Ok(handle) => inner.encoder = Some(handle),
                Err(e) => {
                    log::error!("[Engine] Encoder launch failed: {e}");
                    drop(inner);
                    self.fail_start(session, FETCH_RETRY_DELAY_MS);
                    return;
                }
            }
        }

        // Stuck-pipeline watchdog: a pipeline that produces nothing is torn
        // down and the queue advances.
        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(ENCODER_FIRST_DATA_TIMEOUT_SECS)).await;
            engine.abort_stuck_pipeline(session);
        });
    }

    fn fail_start(&self, session: u64, delay_ms: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.session != session {
                return;
            }
            inner.drop_current();
            inner.status = PlayStatus::Idle;
        }
        self.schedule_play_next(delay_ms);
    }

    fn abort_stuck_pipeline(&self, session: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.session != session || inner.status != PlayStatus::Starting {
                return;
            }
            log::warn!(
                "[Engine] No encoder output within {ENCODER_FIRST_DATA_TIMEOUT_SECS}s, advancing"
            );
            inner.drop_current();
            inner.status = PlayStatus::Idle;
        }
        self.schedule_play_next(TRACK_ADVANCE_DELAY_MS);
    }

    fn schedule_play_next(&self, delay_ms: u64) {
        let engine = self.arc();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            engine.ensure_playing();
        });
    }

    /// Applies one pipeline event under the engine lock. Events from a
    /// superseded session are discarded.
    pub(crate) fn handle_event(&self, session: u64, event: EncoderEvent) {
        let mut advance_after: Option<u64> = None;
        {
            let mut inner = self.inner.lock();
            if session != inner.session {
                log::trace!("[Engine] Dropping stale pipeline event (session {session})");
                return;
            }
            match event {
                EncoderEvent::Started(pid) => {
                    log::debug!("[Engine] Pipeline up (pid {pid})");
                }
                EncoderEvent::Data(chunk) => match inner.status {
                    PlayStatus::Starting => {
                        inner.status = PlayStatus::Playing;
                        inner.paused_at = None;
                        inner.total_paused_ms = 0;
                        let now = now_millis();
                        if let Some(track) = inner.current.as_mut() {
                            track.started_at = Some(now);
                        }
                        if let Some(track) = inner.current.as_ref() {
                            let thumb = track.thumbnail.clone();
                            let source = track.source;
                            log::info!("[Engine] Now playing \"{}\"", track.title);
                            inner.thumbnails.record(source, thumb);
                        }
                        inner.listeners.broadcast(chunk);
                    }
                    PlayStatus::Playing => inner.listeners.broadcast(chunk),
                    // Encoder is frozen while paused; any chunk already in
                    // flight is replaced by silence.
                    PlayStatus::Paused => inner.listeners.broadcast_silence(),
                    PlayStatus::Idle | PlayStatus::Skipping => {}
                },
                EncoderEvent::End => {
                    if inner.status == PlayStatus::Skipping {
                        return;
                    }
                    if inner.status == PlayStatus::Starting {
                        // Exited before producing any audio.
                        log::warn!("[Engine] Encoder ended without output");
                        inner.drop_current();
                        inner.status = PlayStatus::Idle;
                        advance_after = Some(FETCH_RETRY_DELAY_MS);
                    } else {
                        log::info!(
                            "[Engine] Track finished ({} pending)",
                            inner.queue.len()
                        );
                        inner.finish_current();
                        inner.status = PlayStatus::Idle;
                        advance_after = Some(TRACK_ADVANCE_DELAY_MS);
                    }
                }
                EncoderEvent::Error(e) => {
                    if inner.status == PlayStatus::Skipping {
                        return;
                    }
                    log::warn!("[Engine] Pipeline error: {e}");
                    if inner.status == PlayStatus::Starting {
                        inner.drop_current();
                        inner.status = PlayStatus::Idle;
                        advance_after = Some(FETCH_RETRY_DELAY_MS);
                    } else {
                        inner.finish_current();
                        inner.status = PlayStatus::Idle;
                        advance_after = Some(TRACK_ADVANCE_DELAY_MS);
                    }
                }
            }
        }
        if let Some(delay_ms) = advance_after {
            self.schedule_play_next(delay_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::time::{self, Duration};

    use crate::bus;
    use crate::encoder::{EncoderError, PipelineEvents};
    use crate::fetch::{AudioInput, FetchError};
    use crate::track::{Requester, TrackMeta};

    struct StubFetcher;

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, _track: &Track) -> Result<AudioInput, FetchError> {
            Ok(AudioInput::Remote {
                url: "https://stub.example/audio".into(),
                headers: vec![],
                hls: false,
            })
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, _track: &Track) -> Result<AudioInput, FetchError> {
            Err(FetchError::Upstream("no luck".into()))
        }
    }

    /// Records launched sessions instead of spawning a subprocess.
    #[derive(Default)]
    struct ScriptedLauncher {
        launched: Mutex<Vec<u64>>,
    }

    impl PipelineLauncher for ScriptedLauncher {
        fn launch(
            &self,
            _input: AudioInput,
            session: u64,
            _events: PipelineEvents,
        ) -> Result<EncoderHandle, EncoderError> {
            self.launched.lock().push(session);
            Ok(EncoderHandle::detached(1000 + session as u32))
        }
    }

    fn test_engine(fetcher: Arc<dyn Fetcher>) -> (Arc<BroadcastEngine>, Arc<ScriptedLauncher>) {
        let launcher = Arc::new(ScriptedLauncher::default());
        let engine = BroadcastEngine::with_parts(
            Arc::new(Config::default()),
            fetcher,
            Arc::clone(&launcher) as Arc<dyn PipelineLauncher>,
        );
        (engine, launcher)
    }

    fn track(title: &str) -> Track {
        Track::new(
            TrackSource::Youtube,
            format!("https://youtu.be/{title}"),
            TrackMeta {
                title: title.into(),
                duration: Some(180),
                thumbnail: Some(format!("https://i.ytimg.com/{title}.jpg")),
            },
            Requester {
                id: "u1".into(),
                display_name: "Tester".into(),
                avatar: None,
            },
        )
    }

    /// Lets spawned startup tasks (fetch + launch) run to completion.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn session_of(engine: &BroadcastEngine) -> u64 {
        engine.inner.lock().session
    }

    fn status_of(engine: &BroadcastEngine) -> PlayStatus {
        engine.inner.lock().status
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_playing_with_empty_queue_is_a_noop() {
        let (engine, launcher) = test_engine(Arc::new(StubFetcher));
        engine.ensure_playing();
        settle().await;
        assert_eq!(status_of(&engine), PlayStatus::Idle);
        assert!(launcher.launched.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn playing_track_leaves_the_queue() {
        let (engine, launcher) = test_engine(Arc::new(StubFetcher));
        let queued = engine.queue_track(track("a"));
        settle().await;

        assert_eq!(status_of(&engine), PlayStatus::Starting);
        assert_eq!(launcher.launched.lock().len(), 1);

        let state = engine.stream_state();
        assert_eq!(state.current.as_ref().unwrap().id, queued.id);
        assert!(
            state.queue.iter().all(|t| t.id != queued.id),
            "current track must not also appear in the queue"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_playing_is_idempotent_while_starting() {
        let (engine, launcher) = test_engine(Arc::new(StubFetcher));
        engine.queue_track(track("a"));
        settle().await;
        engine.ensure_playing();
        engine.ensure_playing();
        settle().await;
        assert_eq!(launcher.launched.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_data_chunk_starts_playback_and_reaches_listeners() {
        let (engine, _launcher) = test_engine(Arc::new(StubFetcher));
        let (_id, mut rx) = engine.attach_listener();
        assert_eq!(rx.recv().await.unwrap(), bus::silence_frame()); // kick-start

        engine.queue_track(track("a"));
        settle().await;
        let session = session_of(&engine);

        engine.handle_event(session, EncoderEvent::Data(Bytes::from_static(b"mp3!")));
        assert_eq!(status_of(&engine), PlayStatus::Playing);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"mp3!"));

        let state = engine.stream_state();
        let current = state.current.unwrap();
        assert!(current.started_at.is_some(), "started_at stamped on first chunk");
        assert_eq!(state.listeners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn thumbnail_cache_follows_current_track() {
        let (engine, _launcher) = test_engine(Arc::new(StubFetcher));
        engine.queue_track(track("a"));
        settle().await;
        engine.handle_event(session_of(&engine), EncoderEvent::Data(Bytes::from_static(b"x")));

        assert_eq!(
            engine.thumbnail_for(TrackSource::Youtube),
            Some("https://i.ytimg.com/a.jpg".into())
        );
        assert_eq!(engine.thumbnail_for(TrackSource::Soundcloud), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_reported_start_time_until_resume() {
        let (engine, _launcher) = test_engine(Arc::new(StubFetcher));
        let (_id, mut rx) = engine.attach_listener();
        let _ = rx.recv().await;

        engine.queue_track(track("a"));
        settle().await;
        engine.handle_event(session_of(&engine), EncoderEvent::Data(Bytes::from_static(b"x")));

        assert!(engine.set_paused(true));
        let frozen = engine.stream_state().current.unwrap().started_at;
        assert!(engine.stream_state().paused);

        // Pause flush block arrives after the audio chunk.
        let _ = rx.recv().await; // audio chunk
        assert_eq!(rx.recv().await.unwrap(), bus::pause_flush_block());

        // Chunks arriving while paused are replaced by silence.
        engine.handle_event(session_of(&engine), EncoderEvent::Data(Bytes::from_static(b"y")));
        assert_eq!(rx.recv().await.unwrap(), bus::silence_frame());

        // Successive snapshots while paused report the identical value.
        assert_eq!(engine.stream_state().current.unwrap().started_at, frozen);

        // Pretend the pause lasted 5 seconds, then resume.
        engine.inner.lock().paused_at = Some(now_millis().saturating_sub(5_000));
        assert!(!engine.set_paused(false));
        assert!(!engine.stream_state().paused);

        let shifted = engine.stream_state().current.unwrap().started_at.unwrap();
        let delta = shifted - frozen.unwrap();
        assert!(
            (4_900..=5_100).contains(&delta),
            "reported start shifted by committed pause time, got {delta}ms"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_when_nothing_plays_reports_unpaused() {
        let (engine, _launcher) = test_engine(Arc::new(StubFetcher));
        assert!(!engine.set_paused(true));
        assert_eq!(status_of(&engine), PlayStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_advances_exactly_once_despite_stale_end_event() {
        let (engine, launcher) = test_engine(Arc::new(StubFetcher));
        engine.queue_track(track("a"));
        engine.queue_track(track("b"));
        settle().await;

        let first_session = session_of(&engine);
        engine.handle_event(first_session, EncoderEvent::Data(Bytes::from_static(b"x")));

        engine.skip_current();
        assert_eq!(status_of(&engine), PlayStatus::Skipping);

        // The kill makes the dying pipeline emit End/Error; both are stale.
        engine.handle_event(first_session, EncoderEvent::End);
        engine.handle_event(first_session, EncoderEvent::Error("killed".into()));
        assert_eq!(status_of(&engine), PlayStatus::Skipping);

        settle().await; // let the cooldown task register its timer
        time::advance(Duration::from_millis(SKIP_COOLDOWN_MS + 10)).await;
        settle().await;

        let launched = launcher.launched.lock().clone();
        assert_eq!(launched.len(), 2, "exactly one follow-up pipeline");
        let state = engine.stream_state();
        assert_eq!(state.current.unwrap().title, "b");
        assert!(state.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn track_end_emits_gap_silence_and_advances() {
        let (engine, launcher) = test_engine(Arc::new(StubFetcher));
        let (_id, mut rx) = engine.attach_listener();
        let _ = rx.recv().await;

        engine.queue_track(track("a"));
        engine.queue_track(track("b"));
        settle().await;
        let session = session_of(&engine);
        engine.handle_event(session, EncoderEvent::Data(Bytes::from_static(b"x")));
        let _ = rx.recv().await;

        engine.handle_event(session, EncoderEvent::End);
        assert_eq!(rx.recv().await.unwrap(), bus::silence_frame());

        // Between tracks the snapshot still shows the finished one.
        let between = engine.stream_state();
        assert_eq!(between.current.unwrap().title, "a");

        settle().await; // let the advance task register its timer
        time::advance(Duration::from_millis(TRACK_ADVANCE_DELAY_MS + 10)).await;
        settle().await;
        assert_eq!(launcher.launched.lock().len(), 2);
        assert_eq!(engine.stream_state().current.unwrap().title, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn draining_the_queue_clears_current() {
        let (engine, _launcher) = test_engine(Arc::new(StubFetcher));
        engine.queue_track(track("a"));
        settle().await;
        let session = session_of(&engine);
        engine.handle_event(session, EncoderEvent::Data(Bytes::from_static(b"x")));
        engine.handle_event(session, EncoderEvent::End);

        let state = engine.stream_state();
        assert!(state.current.is_none(), "drained queue reports no current");
        assert_eq!(status_of(&engine), PlayStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_drops_track_and_retries_queue() {
        let (engine, launcher) = test_engine(Arc::new(FailingFetcher));
        engine.queue_track(track("a"));
        settle().await;

        assert_eq!(status_of(&engine), PlayStatus::Idle);
        assert!(engine.stream_state().current.is_none());
        assert!(launcher.launched.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_pipeline_is_aborted_after_timeout() {
        let (engine, launcher) = test_engine(Arc::new(StubFetcher));
        engine.queue_track(track("a"));
        engine.queue_track(track("b"));
        settle().await;
        assert_eq!(status_of(&engine), PlayStatus::Starting);

        // No data ever arrives; the watchdog tears the pipeline down.
        time::advance(Duration::from_secs(ENCODER_FIRST_DATA_TIMEOUT_SECS + 1)).await;
        settle().await;
        time::advance(Duration::from_millis(TRACK_ADVANCE_DELAY_MS + 10)).await;
        settle().await;

        assert_eq!(launcher.launched.lock().len(), 2, "advanced to next track");
        assert_eq!(engine.stream_state().current.unwrap().title, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_silence_ticks_while_listeners_attached() {
        let (engine, _launcher) = test_engine(Arc::new(StubFetcher));
        engine.start_background_tasks();
        let (_id, mut rx) = engine.attach_listener();
        assert_eq!(rx.recv().await.unwrap(), bus::silence_frame());

        for _ in 0..4 {
            time::advance(Duration::from_millis(IDLE_SILENCE_INTERVAL_MS)).await;
            settle().await;
        }

        let mut frames = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame, bus::silence_frame());
            frames += 1;
        }
        assert!(
            frames >= 4,
            "expected at least one silence frame per tick, got {frames}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn has_url_sees_queue_and_current() {
        let (engine, _launcher) = test_engine(Arc::new(StubFetcher));
        engine.queue_track(track("a"));
        engine.queue_track(track("b"));
        settle().await;

        assert!(engine.has_url("https://youtu.be/a"), "currently starting");
        assert!(engine.has_url("https://youtu.be/b"), "pending");
        assert!(!engine.has_url("https://youtu.be/zzz"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_detaches_listeners() {
        let (engine, _launcher) = test_engine(Arc::new(StubFetcher));
        let (_id, mut rx) = engine.attach_listener();
        let _ = rx.recv().await;
        engine.queue_track(track("a"));
        settle().await;

        engine.shutdown();
        assert_eq!(engine.stream_state().listeners, 0);
        assert!(rx.recv().await.is_none(), "sink closed on shutdown");
    }
}
