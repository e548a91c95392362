//! Airwave Core - shared library for the Airwave broadcast service.
//!
//! Airwave is a single-channel, server-authoritative radio: one globally
//! shared MP3 stream that every connected listener hears in lockstep, fed
//! from a shared queue of YouTube and SoundCloud submissions.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`queue`] / [`track`]: the shared track queue and its data model
//! - [`fetch`]: per-source resolution of a URL into an audio input
//! - [`encoder`]: the external MP3 encoder subprocess pipeline
//! - [`bus`]: one-producer-many-listener byte fan-out and silence duties
//! - [`engine`]: the serial controller tying queue, pipeline and listeners
//!   together
//! - [`snapshot`]: the externally observable stream state
//! - [`api`]: axum HTTP layer (status, queue mutation, the stream itself)
//! - [`error`]: centralized error types
//!
//! Data flows one way: queue → engine → fetcher → encoder → fan-out →
//! listener sinks. Control flows back from the API verbs into the engine.

#![warn(clippy::all)]

pub mod access;
pub mod api;
pub mod bus;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod protocol_constants;
pub mod queue;
pub mod snapshot;
pub mod state;
pub mod thumbnail;
pub mod track;
pub mod utils;

// Re-export commonly used types at the crate root
pub use access::{AccessPolicy, UserIdentity};
pub use api::{start_server, AppState, ServerError};
pub use engine::{BroadcastEngine, PlayStatus};
pub use error::{AirwaveError, AirwaveResult};
pub use fetch::{AudioInput, FetchError, Fetcher, SourceFetcher};
pub use queue::TrackQueue;
pub use snapshot::StreamState;
pub use state::{Config, StreamingConfig};
pub use track::{Requester, Track, TrackMeta, TrackSource};
pub use utils::now_millis;
