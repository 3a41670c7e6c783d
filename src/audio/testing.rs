//! Test doubles and fixtures for the audio pipeline.

use crate::audio::header::canonical_header;
use crate::audio::output::{AudioOutput, OutputError, OutputFormat, OutputStats};
use crate::config::AppConfig;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// What the next `write` call does.
#[derive(Debug, Clone)]
pub enum Step {
    Accept(usize),
    Timeout,
    Transient,
    Fatal,
}

#[derive(Default)]
struct TapState {
    written: Vec<u8>,
    pending: Vec<u8>,
    segments: Vec<Vec<u8>>,
    write_calls: u64,
    flushes: u64,
    script: VecDeque<Step>,
}

/// Read side of a [`RecordingOutput`], kept by the test after the output is moved away.
#[derive(Clone, Default)]
pub struct OutputTap(Arc<Mutex<TapState>>);

impl OutputTap {
    fn state(&self) -> MutexGuard<'_, TapState> {
        self.0.lock().unwrap()
    }

    /// Every byte accepted, across all sessions.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    /// Bytes accepted between consecutive flushes, one entry per flush.
    pub fn segments(&self) -> Vec<Vec<u8>> {
        self.state().segments.clone()
    }

    /// Bytes accepted since the last flush.
    pub fn pending(&self) -> Vec<u8> {
        self.state().pending.clone()
    }

    pub fn write_calls(&self) -> u64 {
        self.state().write_calls
    }

    pub fn flushes(&self) -> u64 {
        self.state().flushes
    }
}

/// An output that records everything and can be told to misbehave.
pub struct RecordingOutput {
    tap: OutputTap,
    max_per_call: usize,
    gate: Option<watch::Receiver<bool>>,
}

impl RecordingOutput {
    pub fn new() -> (Self, OutputTap) {
        Self::with_script(Vec::new())
    }

    /// Play `steps` for the first writes, then accept everything.
    pub fn with_script(steps: impl IntoIterator<Item = Step>) -> (Self, OutputTap) {
        let tap = OutputTap::default();
        tap.state().script = steps.into_iter().collect();
        let output = Self {
            tap: tap.clone(),
            max_per_call: usize::MAX,
            gate: None,
        };
        (output, tap)
    }

    /// Accept at most `limit` bytes per write.
    pub fn max_per_call(mut self, limit: usize) -> Self {
        self.max_per_call = limit;
        self
    }

    /// Block every write until the returned sender publishes `true`.
    pub fn gated(mut self) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        self.gate = Some(rx);
        (self, tx)
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    fn format(&self) -> OutputFormat {
        OutputFormat::from(&AppConfig::default().audio)
    }

    async fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, OutputError> {
        if let Some(gate) = self.gate.as_mut() {
            let _ = gate.wait_for(|open| *open).await;
        }

        let mut state = self.tap.state();
        state.write_calls += 1;

        let limit = match state.script.pop_front() {
            Some(Step::Timeout) => return Err(OutputError::Timeout),
            Some(Step::Transient) => return Err(OutputError::Transient("injected".into())),
            Some(Step::Fatal) => return Err(OutputError::Fatal("injected".into())),
            Some(Step::Accept(limit)) => limit,
            None => usize::MAX,
        };

        let accepted = data.len().min(limit).min(self.max_per_call);
        state.written.extend_from_slice(&data[..accepted]);
        state.pending.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    async fn flush(&mut self) -> Result<(), OutputError> {
        let mut state = self.tap.state();
        state.flushes += 1;
        let segment = std::mem::take(&mut state.pending);
        state.segments.push(segment);
        Ok(())
    }

    fn stats(&self) -> OutputStats {
        let state = self.tap.state();
        OutputStats {
            bytes_transmitted: state.written.len() as u64,
            silent_frames: 0,
            queued_bytes: state.pending.len(),
        }
    }
}

/// Default configuration rooted at `root`, with a short retry backoff.
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.root_dir = root.to_path_buf();
    config.audio.retry_backoff_ms = 1;
    config
}

/// Deterministic payload bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A canonical WAV file: 44-byte header followed by `payload_len` bytes.
pub fn wav_file(payload_len: usize) -> Vec<u8> {
    let format = OutputFormat::from(&AppConfig::default().audio);
    let mut bytes = canonical_header(&format, payload_len as u32);
    bytes.extend(payload(payload_len));
    bytes
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Application state wired to a recording output, for handler tests.
///
/// Must be called inside a tokio runtime; sessions spawn on the current one.
pub fn app_state(config: AppConfig, output: RecordingOutput) -> crate::state::AppState {
    let storage = crate::storage::Storage::mount(&config.storage.root_dir).unwrap();
    let audio = crate::audio::AudioSubsystem::new(
        storage.clone(),
        Box::new(output),
        &config,
        tokio::runtime::Handle::current(),
    );
    let listener = crate::listener::ListenerControl::new(config.server.exclusion);
    crate::state::AppState::new(config, storage, audio, listener)
}
