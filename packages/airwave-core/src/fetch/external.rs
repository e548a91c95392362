//! External fetcher subprocess (yt-dlp).
//!
//! Slow but thorough fallback: yt-dlp assembles HLS fragments and handles
//! gated videos the in-process client cannot. Audio bytes are read from the
//! subprocess stdout; the child is killed whenever the stream is dropped.

use std::process::Stdio;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::io::ReaderStream;

use crate::fetch::{cookies, AudioInput, FetchError};
use crate::state::Config;

/// Binary name of the external fetcher, resolved via PATH.
const FETCHER_BIN: &str = "yt-dlp";

/// Default format selector: prefer direct (non-HLS) audio.
const DEFAULT_FORMAT: &str = "bestaudio[protocol!*=m3u8]/bestaudio/best";

/// Read buffer for the subprocess stdout pipe.
const STDOUT_CHUNK_BYTES: usize = 16 * 1024;

/// Spawns the external fetcher and returns its stdout as an audio stream.
///
/// Startup means the first byte on stdout; if none arrives within
/// `startup_timeout` the subprocess is killed and the fetch fails.
pub async fn fetch_stream(
    config: &Config,
    url: &str,
    startup_timeout: Duration,
) -> Result<AudioInput, FetchError> {
    let format = config
        .external_fetcher_format
        .as_deref()
        .unwrap_or(DEFAULT_FORMAT);

    let mut command = Command::new(FETCHER_BIN);
    command
        .arg("-o")
        .arg("-")
        .arg("--no-warnings")
        .arg("--no-progress")
        .arg("--no-playlist")
        .arg("-f")
        .arg(format);
    if let Some(cookie_file) = cookies::cookie_file_path(
        config.youtube_cookie_file.as_deref(),
        config.youtube_cookie.as_deref(),
    ) {
        command.arg("--cookies").arg(cookie_file);
    }
    command
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    log::info!("[Fetch] Spawning external fetcher for {url}");
    let mut child = command.spawn().map_err(|e| {
        FetchError::Upstream(format!("failed to spawn {FETCHER_BIN}: {e}"))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| FetchError::Upstream("external fetcher stdout missing".into()))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("[Fetch] {FETCHER_BIN}: {line}");
            }
        });
    }

    let mut reader = ReaderStream::with_capacity(stdout, STDOUT_CHUNK_BYTES);
    let first = match tokio::time::timeout(startup_timeout, reader.next()).await {
        Err(_) => {
            let _ = child.start_kill();
            log::warn!(
                "[Fetch] External fetcher produced no data within {}s, killed",
                startup_timeout.as_secs()
            );
            return Err(FetchError::Timeout(startup_timeout));
        }
        Ok(None) => {
            let status = child.wait().await.ok();
            return Err(FetchError::Upstream(format!(
                "external fetcher exited without output (status: {status:?})"
            )));
        }
        Ok(Some(Err(e))) => {
            let _ = child.start_kill();
            return Err(FetchError::Io(e));
        }
        Ok(Some(Ok(chunk))) => chunk,
    };

    // The child is owned by the stream so a drop (skip, engine teardown)
    // kills the subprocess via kill_on_drop.
    let stream = stream! {
        let mut child = child;
        yield Ok(first);
        while let Some(item) = reader.next().await {
            yield item;
        }
        match child.wait().await {
            Ok(status) if !status.success() => {
                log::warn!("[Fetch] External fetcher exited with {status}");
            }
            Ok(_) => {}
            Err(e) => log::debug!("[Fetch] External fetcher reap failed: {e}"),
        }
    };

    Ok(AudioInput::Stream(Box::pin(stream)))
}
