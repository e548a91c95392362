//! Fan-out bus: one producer, N listener sinks, and the silence generator.
//!
//! Each sink is a bounded byte channel bound to a single HTTP response. The
//! set lives inside the engine's state under its coarse lock, so the
//! listener count is always consistent with the paused flag and current
//! track in any one snapshot. Broadcasting never blocks the producer: a
//! sink that is gone or hopelessly backed up is removed on the spot.

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol_constants::{PAUSE_FLUSH_FRAMES, SILENCE_FRAME};

/// A single silence frame as cheaply cloneable bytes.
pub fn silence_frame() -> Bytes {
    Bytes::from_static(&SILENCE_FRAME)
}

/// The ~1 second bulk silence block written at the instant of pause.
///
/// Built once and cached; clones are reference-count bumps.
pub fn pause_flush_block() -> Bytes {
    static BLOCK: OnceLock<Bytes> = OnceLock::new();
    BLOCK
        .get_or_init(|| Bytes::from(SILENCE_FRAME.repeat(PAUSE_FLUSH_FRAMES)))
        .clone()
}

struct Sink {
    tx: mpsc::Sender<Bytes>,
}

/// The set of attached listener sinks.
pub struct ListenerSet {
    sinks: HashMap<Uuid, Sink>,
    sink_capacity: usize,
}

impl ListenerSet {
    /// Creates an empty set; each attached sink buffers up to
    /// `sink_capacity` chunks before being considered dead.
    pub fn new(sink_capacity: usize) -> Self {
        Self {
            sinks: HashMap::new(),
            sink_capacity,
        }
    }

    /// Attaches a new listener and returns its id and receiving end.
    ///
    /// One silence frame is written immediately to kick-start the client's
    /// decoder before any real audio arrives.
    pub fn attach(&mut self) -> (Uuid, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(self.sink_capacity);
        let id = Uuid::new_v4();
        let _ = tx.try_send(silence_frame());
        self.sinks.insert(id, Sink { tx });
        log::info!("[Bus] Listener {id} attached ({} total)", self.sinks.len());
        (id, rx)
    }

    /// Removes a listener sink. Returns false if it was already gone.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let removed = self.sinks.remove(&id).is_some();
        if removed {
            log::info!("[Bus] Listener {id} detached ({} left)", self.sinks.len());
        }
        removed
    }

    /// Number of attached listeners.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true when no listeners are attached.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Writes a chunk to every sink without blocking.
    ///
    /// A sink whose channel is closed (client disconnected) or full (client
    /// not draining) is removed; neither stalls the pipeline or affects the
    /// other listeners.
    pub fn broadcast(&mut self, chunk: Bytes) {
        let mut dead: Vec<Uuid> = Vec::new();
        for (id, sink) in &self.sinks {
            match sink.tx.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("[Bus] Listener {id} is not draining, dropping it");
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.remove(id);
        }
    }

    /// Broadcasts a single silence frame.
    pub fn broadcast_silence(&mut self) {
        self.broadcast(silence_frame());
    }

    /// Writes the bulk pause-flush block to every sink.
    pub fn broadcast_pause_flush(&mut self) {
        self.broadcast(pause_flush_block());
    }

    /// Drops every sink, ending all listener responses.
    pub fn clear(&mut self) {
        self.sinks.clear();
    }
}
