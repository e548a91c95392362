//! Encoder pipeline: a long-running ffmpeg subprocess producing the
//! constant-bitrate MP3 broadcast stream.
//!
//! The encoder reads its input at native frame rate (`-re`), which is what
//! keeps the broadcast synchronous across listeners. Lifecycle is reported
//! as messages on a channel into the engine's serial loop rather than
//! callbacks; every event carries the pipeline session id so the engine can
//! discard events from a pipeline it has already killed.

use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::fetch::AudioInput;
use crate::protocol_constants::{MP3_BITRATE_KBPS, MP3_CHANNELS, MP3_SAMPLE_RATE};
use crate::state::Config;

/// Encoder binary, resolved via PATH.
const ENCODER_BIN: &str = "ffmpeg";

/// Protocols ffmpeg may open when the input is an HLS playlist.
const HLS_PROTOCOL_WHITELIST: &str = "file,http,https,tcp,tls,crypto";

/// Read buffer for the encoder stdout pipe. Small chunks keep fan-out
/// latency low; `-re` pacing means they arrive continuously anyway.
const STDOUT_CHUNK_BYTES: usize = 4 * 1024;

/// Lifecycle events observed by the engine.
#[derive(Debug)]
pub enum EncoderEvent {
    /// Subprocess spawned; carries its OS process id.
    Started(u32),
    /// One chunk of encoded MP3 bytes.
    Data(Bytes),
    /// The encoder finished its input and exited.
    End,
    /// The encoder failed mid-stream.
    Error(String),
}

/// Channel carrying `(session, event)` pairs into the engine.
pub type PipelineEvents = mpsc::UnboundedSender<(u64, EncoderEvent)>;

/// Errors raised while constructing a pipeline.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("failed to spawn {ENCODER_BIN}: {0}")]
    Spawn(std::io::Error),

    #[error("encoder stdio pipes unavailable")]
    Pipes,
}

/// Control handle for a running pipeline.
///
/// Kill is cooperative (the reader task owns the child and SIGKILLs it when
/// the token fires); suspend/resume go straight to the process as stop and
/// continue signals.
pub struct EncoderHandle {
    pid: u32,
    cancel: CancellationToken,
    has_process: bool,
}

impl EncoderHandle {
    /// Process id of the encoder subprocess.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Terminates the subprocess immediately and releases its pipes.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    /// Freezes encoding without closing pipes. Returns false when the
    /// platform offers no stop signal; the caller still tracks pause time
    /// and the fan-out substitutes silence either way.
    pub fn suspend(&self) -> bool {
        self.signal_stop(true)
    }

    /// Resumes a suspended subprocess.
    pub fn resume(&self) -> bool {
        self.signal_stop(false)
    }

    #[cfg(unix)]
    fn signal_stop(&self, stop: bool) -> bool {
        if !self.has_process {
            return false;
        }
        let sig = if stop { libc::SIGSTOP } else { libc::SIGCONT };
        // Safety: plain kill(2) on a pid we spawned; no memory involved.
        unsafe { libc::kill(self.pid as i32, sig) == 0 }
    }

    #[cfg(not(unix))]
    fn signal_stop(&self, _stop: bool) -> bool {
        false
    }

    /// Handle without a live subprocess, for scripted pipelines in tests.
    pub fn detached(pid: u32) -> Self {
        Self {
            pid,
            cancel: CancellationToken::new(),
            has_process: false,
        }
    }
}

/// Seam between the engine and encoder construction; tests substitute a
/// scripted launcher that feeds events directly.
pub trait PipelineLauncher: Send + Sync {
    /// Builds and starts a pipeline for the given input. Events are tagged
    /// with `session`.
    fn launch(
        &self,
        input: AudioInput,
        session: u64,
        events: PipelineEvents,
    ) -> Result<EncoderHandle, EncoderError>;
}

/// Production launcher spawning ffmpeg.
pub struct FfmpegLauncher {
    user_agent: Option<String>,
}

impl FfmpegLauncher {
    pub fn new(config: &Config) -> Self {
        Self {
            user_agent: config.youtube_user_agent.clone(),
        }
    }
}

impl PipelineLauncher for FfmpegLauncher {
    fn launch(
        &self,
        input: AudioInput,
        session: u64,
        events: PipelineEvents,
    ) -> Result<EncoderHandle, EncoderError> {
        spawn_pipeline(input, session, events, self.user_agent.as_deref())
    }
}

fn build_command(input: &AudioInput, user_agent: Option<&str>) -> Command {
    let mut command = Command::new(ENCODER_BIN);
    command.arg("-hide_banner").arg("-loglevel").arg("error");

    match input {
        AudioInput::Stream(_) => {
            command.arg("-re").arg("-i").arg("pipe:0");
        }
        AudioInput::Remote { url, headers, hls } => {
            if *hls {
                command
                    .arg("-protocol_whitelist")
                    .arg(HLS_PROTOCOL_WHITELIST);
            }
            if !headers.is_empty() {
                let joined: String = headers
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}\r\n"))
                    .collect();
                command.arg("-headers").arg(joined);
            }
            if let Some(ua) = user_agent {
                command.arg("-user_agent").arg(ua);
            }
            command.arg("-re").arg("-i").arg(url);
        }
    }

    command
        .arg("-vn")
        .arg("-sn")
        .arg("-acodec")
        .arg("libmp3lame")
        .arg("-b:a")
        .arg(format!("{MP3_BITRATE_KBPS}k"))
        .arg("-ar")
        .arg(MP3_SAMPLE_RATE.to_string())
        .arg("-ac")
        .arg(MP3_CHANNELS.to_string())
        .arg("-f")
        .arg("mp3")
        .arg("pipe:1");
    command
}

fn spawn_pipeline(
    input: AudioInput,
    session: u64,
    events: PipelineEvents,
    user_agent: Option<&str>,
) -> Result<EncoderHandle, EncoderError> {
    let mut command = build_command(&input, user_agent);
    let feeds_stdin = matches!(input, AudioInput::Stream(_));
    command
        .stdin(if feeds_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(EncoderError::Spawn)?;
    let pid = child.id().unwrap_or(0);
    log::info!("[Encoder] Spawned pid {pid} (session {session})");

    let stdout = child.stdout.take().ok_or(EncoderError::Pipes)?;
    let stderr = child.stderr.take().ok_or(EncoderError::Pipes)?;

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("[Encoder] {ENCODER_BIN}: {line}");
        }
    });

    // Byte-stream inputs are pumped into the encoder's stdin by a writer
    // task. Dropping the input stream (broken pipe after a kill) tears down
    // any upstream subprocess via its own kill-on-drop.
    if let AudioInput::Stream(mut stream) = input {
        let mut stdin = child.stdin.take().ok_or(EncoderError::Pipes)?;
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        log::warn!("[Encoder] Input stream failed: {e}");
                        break;
                    }
                };
                if stdin.write_all(&chunk).await.is_err() {
                    // Encoder exited or was killed; stop feeding.
                    break;
                }
            }
            // Dropping stdin closes the pipe so the encoder can flush and end.
        });
    }

    let cancel = CancellationToken::new();
    let reader_cancel = cancel.clone();
    let reader_events = events.clone();
    tokio::spawn(async move {
        let mut reader = ReaderStream::with_capacity(stdout, STDOUT_CHUNK_BYTES);
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    log::debug!("[Encoder] pid {pid} killed (session {session})");
                    return;
                }
                chunk = reader.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            if reader_events.send((session, EncoderEvent::Data(bytes))).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = reader_events.send((session, EncoderEvent::Error(e.to_string())));
                            break;
                        }
                        None => {
                            let _ = reader_events.send((session, EncoderEvent::End));
                            break;
                        }
                    }
                }
            }
        }
        // Reap; give a slow flush a moment, then force the issue.
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => log::debug!("[Encoder] pid {pid} exited with {status}"),
            Ok(Err(e)) => log::debug!("[Encoder] pid {pid} reap failed: {e}"),
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                log::warn!("[Encoder] pid {pid} lingered after EOF, killed");
            }
        }
    });

    let _ = events.send((session, EncoderEvent::Started(pid)));

    Ok(EncoderHandle {
        pid,
        cancel,
        has_process: true,
    })
}
