//! # Playback Engine
//!
//! Drains one stored file into the audio output:
//!
//! 1. open the file (failure ends the session before any output)
//! 2. skip the fixed-size header, decoding it for diagnostics only
//! 3. read one chunk at a time and write it out, retrying the untransmitted
//!    remainder after a backoff whenever the output times out or reports a
//!    transient error
//! 4. flush the output so nothing of this session is emitted after it ends
//!
//! Only one chunk is in memory at any time; the output's blocking write is the
//! only thing that paces the loop.
//!
//! The engine does not take the shared audio lock itself. It is handed the
//! [`AudioResource`] by the session task, which holds the lock for the whole pass.

use crate::audio::coordinator::{ActiveSession, AudioResource};
use crate::audio::header::{HeaderSummary, CANONICAL_HEADER_LEN};
use crate::audio::output::{AudioOutput, OutputError, OutputFormat, OutputStats};
use crate::config::AudioConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Constants the engine streams with, taken from the `audio` config section.
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub header_len: usize,
    pub chunk_size: usize,
    pub write_timeout: Duration,
    pub retry_backoff: Duration,
}

impl From<&AudioConfig> for PlaybackSettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            header_len: config.header_len as usize,
            chunk_size: config.chunk_size,
            write_timeout: config.write_timeout(),
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// How a playback pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PlaybackOutcome {
    /// Reached end of file and flushed the output
    Completed,
    /// The stored file could not be opened; nothing was written
    OpenFailed(String),
    /// Reading the stored file failed part way through
    ReadFailed(String),
    /// The output reported an unrecoverable error
    OutputFailed(String),
}

impl PlaybackOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PlaybackOutcome::Completed)
    }
}

/// Everything known about one finished playback pass.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    pub session_id: Uuid,
    pub file: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub header: Option<HeaderSummary>,
    /// Payload bytes read from storage (header excluded)
    pub bytes_read: u64,
    /// Payload bytes accepted by the output
    pub bytes_written: u64,
    /// Non-empty reads from storage
    pub chunks: u64,
    pub write_calls: u64,
    /// Writes that timed out, failed transiently or made no progress
    pub retries: u64,
    pub output: OutputStats,
    pub outcome: PlaybackOutcome,
}

impl PlaybackReport {
    fn begin(session: &ActiveSession) -> Self {
        let now = Utc::now();
        Self {
            session_id: session.id,
            file: session.file.clone(),
            started_at: now,
            finished_at: now,
            header: None,
            bytes_read: 0,
            bytes_written: 0,
            chunks: 0,
            write_calls: 0,
            retries: 0,
            output: OutputStats::default(),
            outcome: PlaybackOutcome::Completed,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.finished_at
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }
}

pub struct PlaybackEngine {
    settings: PlaybackSettings,
}

impl PlaybackEngine {
    pub fn new(settings: PlaybackSettings) -> Self {
        Self { settings }
    }

    /// Play `session.file` from storage to the output, start to end.
    ///
    /// Never fails: every failure is recorded in the returned report's outcome.
    pub async fn play(&self, resource: &mut AudioResource, session: &ActiveSession) -> PlaybackReport {
        let mut report = PlaybackReport::begin(session);

        let storage = resource.storage().clone();
        let file = match storage.open_read(&session.file).await {
            Ok(file) => file,
            Err(e) => {
                error!(session_id = %session.id, file = %session.file, error = %e, "Failed to open file for reading");
                report.outcome = PlaybackOutcome::OpenFailed(e.to_string());
                report.finished_at = Utc::now();
                return report;
            }
        };

        info!(session_id = %session.id, file = %session.file, "Playback started");

        let output = resource.output_mut();
        let outcome = self.stream(file, output, &mut report).await;
        report.outcome = outcome;

        // Flush even after a failure so the next session starts from a clean buffer.
        if let Err(e) = output.flush().await {
            warn!(session_id = %session.id, error = %e, "Failed to flush audio output");
        }

        report.output = output.stats();
        report.finished_at = Utc::now();

        match &report.outcome {
            PlaybackOutcome::Completed => info!(
                session_id = %session.id,
                bytes = report.bytes_written,
                chunks = report.chunks,
                retries = report.retries,
                duration_ms = report.duration_ms(),
                "Playback finished"
            ),
            outcome => warn!(
                session_id = %session.id,
                bytes = report.bytes_written,
                outcome = ?outcome,
                "Playback ended early"
            ),
        }

        report
    }

    /// Header skip plus the chunk loop.
    async fn stream(
        &self,
        mut file: File,
        output: &mut dyn AudioOutput,
        report: &mut PlaybackReport,
    ) -> PlaybackOutcome {
        match self.skip_header(&mut file).await {
            Ok(header) => {
                if let Some(summary) = &header {
                    log_header(summary, &output.format());
                }
                report.header = header;
            }
            Err(e) => return PlaybackOutcome::ReadFailed(e.to_string()),
        }

        let mut chunk = vec![0u8; self.settings.chunk_size];
        loop {
            let read = match file.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    error!(session_id = %report.session_id, error = %e, "Read from storage failed");
                    return PlaybackOutcome::ReadFailed(e.to_string());
                }
            };

            report.bytes_read += read as u64;
            report.chunks += 1;

            if let Err(e) = self.transmit(output, &chunk[..read], report).await {
                error!(session_id = %report.session_id, error = %e, "Audio output failed");
                return PlaybackOutcome::OutputFailed(e.to_string());
            }

            tokio::task::yield_now().await;
        }

        PlaybackOutcome::Completed
    }

    /// Consume exactly `header_len` bytes (or the whole file if it is shorter).
    async fn skip_header(&self, file: &mut File) -> std::io::Result<Option<HeaderSummary>> {
        let mut header = vec![0u8; self.settings.header_len];
        let mut filled = 0;
        while filled < header.len() {
            match file.read(&mut header[filled..]).await? {
                0 => break,
                n => filled += n,
            }
        }

        if filled < header.len() {
            warn!(header_bytes = filled, expected = header.len(), "File ends inside the header");
        }

        Ok(if filled >= CANONICAL_HEADER_LEN {
            HeaderSummary::decode(&header[..CANONICAL_HEADER_LEN])
        } else {
            None
        })
    }

    /// Write one chunk until every byte is accepted.
    ///
    /// Timeouts, transient errors and zero-length writes back off and retry the
    /// remaining bytes of the same chunk; only a fatal error gives up.
    async fn transmit(
        &self,
        output: &mut dyn AudioOutput,
        chunk: &[u8],
        report: &mut PlaybackReport,
    ) -> Result<(), OutputError> {
        let mut sent = 0;
        while sent < chunk.len() {
            report.write_calls += 1;

            match output.write(&chunk[sent..], self.settings.write_timeout).await {
                Ok(n) if n > 0 => {
                    let n = n.min(chunk.len() - sent);
                    sent += n;
                    report.bytes_written += n as u64;
                    trace!(
                        chunk = report.chunks,
                        read = chunk.len(),
                        written = n,
                        chunk_written = sent,
                        total = report.bytes_written,
                        "Chunk progress"
                    );
                }
                Ok(_) => {
                    report.retries += 1;
                    debug!(chunk = report.chunks, remaining = chunk.len() - sent, "Output accepted nothing, retrying");
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    report.retries += 1;
                    warn!(chunk = report.chunks, remaining = chunk.len() - sent, error = %e, "Audio write error, retrying");
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

fn log_header(summary: &HeaderSummary, format: &OutputFormat) {
    debug!(
        sample_rate = summary.sample_rate,
        bits_per_sample = summary.bits_per_sample,
        channels = summary.channels,
        data_len = summary.data_len,
        "WAV header"
    );

    for problem in summary.mismatches(format) {
        warn!(problem = %problem, "Stored file does not match the output format, playing as raw PCM");
    }
}
