//! # Session Coordinator
//!
//! [`AudioSubsystem`] owns the shared audio resource (storage + output) and decides
//! who gets to use it:
//!
//! - **Playback admission**: at most one playback session exists at any time. A play
//!   request while one is active is rejected immediately; it is never queued.
//! - **Mutual exclusion**: uploads and playback passes each hold the resource lock
//!   for their whole duration, so a file is never read while it is being rewritten.
//!   Waiting for the lock has no timeout; both critical sections end on their own.
//!
//! The liveness handle (the active session, if any) lives in a `watch` channel so it
//! can be checked and set in one step and awaited by the listener supervisor.

use crate::audio::engine::{PlaybackEngine, PlaybackReport, PlaybackSettings};
use crate::audio::output::AudioOutput;
use crate::config::AppConfig;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything guarded by the shared audio lock.
pub struct AudioResource {
    storage: Storage,
    output: Box<dyn AudioOutput>,
}

impl AudioResource {
    pub fn new(storage: Storage, output: Box<dyn AudioOutput>) -> Self {
        Self { storage, output }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn output_mut(&mut self) -> &mut dyn AudioOutput {
        self.output.as_mut()
    }
}

/// The liveness handle of a playback session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    pub id: Uuid,
    pub file: String,
    pub requested_at: DateTime<Utc>,
}

impl ActiveSession {
    pub fn new(file: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            requested_at: Utc::now(),
        }
    }
}

/// Answer to a play request.
#[derive(Debug)]
pub enum PlaybackAdmission {
    /// A new session was started; `completion` resolves with its report.
    Accepted {
        session: ActiveSession,
        completion: JoinHandle<PlaybackReport>,
    },
    /// Another session is still running.
    Conflict { active: ActiveSession },
}

/// Lifetime counters for playback and uploads.
#[derive(Debug, Default)]
struct AudioCounters {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    conflicts: AtomicU64,
    uploads_completed: AtomicU64,
    uploads_aborted: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_played: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub conflicts: u64,
    pub uploads_completed: u64,
    pub uploads_aborted: u64,
    pub bytes_uploaded: u64,
    pub bytes_played: u64,
}

impl AudioCounters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            uploads_completed: self.uploads_completed.load(Ordering::Relaxed),
            uploads_aborted: self.uploads_aborted.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_played: self.bytes_played.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view for the status and health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct AudioStatus {
    pub active: Option<ActiveSession>,
    pub last_report: Option<PlaybackReport>,
    pub counters: CounterSnapshot,
}

/// Where uploads land.
#[derive(Debug, Clone)]
struct UploadTarget {
    slot: String,
    staging: String,
    max_bytes: u64,
}

/// The audio context shared by the upload and playback paths.
pub struct AudioSubsystem {
    resource: Arc<Mutex<AudioResource>>,
    session: watch::Sender<Option<ActiveSession>>,
    last_report: std::sync::Mutex<Option<PlaybackReport>>,
    engine: PlaybackEngine,
    upload: UploadTarget,
    counters: Arc<AudioCounters>,
    runtime: Handle,
}

impl AudioSubsystem {
    /// Build the subsystem around a mounted storage root and an installed output.
    ///
    /// Playback sessions are spawned on `runtime`, which must outlive the HTTP
    /// listener (the listener may be stopped and restarted while a session runs).
    pub fn new(
        storage: Storage,
        output: Box<dyn AudioOutput>,
        config: &AppConfig,
        runtime: Handle,
    ) -> Arc<Self> {
        let (session, _) = watch::channel(None);

        Arc::new(Self {
            resource: Arc::new(Mutex::new(AudioResource::new(storage, output))),
            session,
            last_report: std::sync::Mutex::new(None),
            engine: PlaybackEngine::new(PlaybackSettings::from(&config.audio)),
            upload: UploadTarget {
                slot: config.storage.upload_file.clone(),
                staging: config.storage.staging_file(),
                max_bytes: config.storage.max_upload_bytes,
            },
            counters: Arc::new(AudioCounters::default()),
            runtime,
        })
    }

    /// Start playing the stored upload unless a session is already active.
    ///
    /// Returns without waiting for the session; the lock is taken by the session task.
    pub fn request_playback(self: &Arc<Self>) -> PlaybackAdmission {
        let candidate = ActiveSession::new(self.upload.slot.clone());
        let mut running = None;

        self.session.send_if_modified(|slot| match slot {
            Some(active) => {
                running = Some(active.clone());
                false
            }
            None => {
                *slot = Some(candidate.clone());
                true
            }
        });

        if let Some(active) = running {
            self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
            warn!(active_session = %active.id, "Playback already in progress, rejecting request");
            return PlaybackAdmission::Conflict { active };
        }

        self.counters.sessions_started.fetch_add(1, Ordering::Relaxed);
        info!(session_id = %candidate.id, file = %candidate.file, "Playback accepted");

        let subsystem = Arc::clone(self);
        let session = candidate.clone();
        let completion = self.runtime.spawn(async move { subsystem.run_session(session).await });

        PlaybackAdmission::Accepted {
            session: candidate,
            completion,
        }
    }

    /// Body of a playback session task.
    async fn run_session(self: Arc<Self>, session: ActiveSession) -> PlaybackReport {
        // Declared first so it is dropped last: the handle clears after the lock is released.
        let _liveness = LivenessGuard(&self.session);

        debug!(session_id = %session.id, "Waiting for the audio resource");
        let mut resource = self.resource.lock().await;
        let report = self.engine.play(&mut resource, &session).await;
        drop(resource);

        self.record(&report);
        report
    }

    fn record(&self, report: &PlaybackReport) {
        if report.outcome.is_success() {
            self.counters.sessions_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.sessions_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .bytes_played
            .fetch_add(report.bytes_written, Ordering::Relaxed);

        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
    }

    /// Take the resource lock and open the upload staging file.
    ///
    /// Waits for any running playback pass to finish first.
    pub async fn begin_upload(&self) -> io::Result<UploadSession> {
        debug!("Upload waiting for the audio resource");
        let resource = Arc::clone(&self.resource).lock_owned().await;
        let storage = resource.storage().clone();
        let file = storage.create(&self.upload.staging).await?;

        info!(file = %self.upload.slot, "Upload started");

        Ok(UploadSession {
            _resource: resource,
            storage,
            file: Some(file),
            hasher: Sha256::new(),
            bytes: 0,
            target: self.upload.clone(),
            counters: Arc::clone(&self.counters),
            done: false,
        })
    }

    pub fn active_session(&self) -> Option<ActiveSession> {
        self.session.borrow().clone()
    }

    pub fn is_playing(&self) -> bool {
        self.session.borrow().is_some()
    }

    /// Resolves once no playback session is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.session.subscribe();
        let _ = rx.wait_for(|slot| slot.is_none()).await;
    }

    pub fn status(&self) -> AudioStatus {
        AudioStatus {
            active: self.active_session(),
            last_report: self
                .last_report
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            counters: self.counters.snapshot(),
        }
    }

    pub fn upload_file(&self) -> &str {
        &self.upload.slot
    }
}

/// Clears the liveness handle when the session task ends, however it ends.
struct LivenessGuard<'a>(&'a watch::Sender<Option<ActiveSession>>);

impl Drop for LivenessGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(None);
    }
}

/// Why an upload chunk was refused.
#[derive(Debug)]
pub enum UploadError {
    /// The body is larger than the storage limit
    TooLarge { limit: u64 },
    Io(io::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::TooLarge { limit } => write!(f, "upload exceeds {} bytes", limit),
            UploadError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<io::Error> for UploadError {
    fn from(err: io::Error) -> Self {
        UploadError::Io(err)
    }
}

/// Result of a committed upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub file: String,
    pub bytes: u64,
    pub sha256: String,
}

/// An upload in progress. Holds the audio lock until finished, aborted or dropped.
///
/// Bytes go to a staging file; the upload slot is only replaced by [`finish`](Self::finish).
/// Dropping without finishing discards the staging file.
pub struct UploadSession {
    _resource: OwnedMutexGuard<AudioResource>,
    storage: Storage,
    file: Option<File>,
    hasher: Sha256,
    bytes: u64,
    target: UploadTarget,
    counters: Arc<AudioCounters>,
    done: bool,
}

impl UploadSession {
    /// Append one body chunk.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), UploadError> {
        let total = self.bytes + data.len() as u64;
        if total > self.target.max_bytes {
            return Err(UploadError::TooLarge {
                limit: self.target.max_bytes,
            });
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "upload already closed"))?;
        file.write_all(data).await?;
        self.hasher.update(data);
        self.bytes = total;

        debug!(data_len = data.len(), total = total, "Upload chunk stored");
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Make the staged bytes the new stored file and release the lock.
    pub async fn finish(mut self) -> Result<UploadReceipt, UploadError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        self.storage
            .replace(&self.target.staging, &self.target.slot)
            .await?;
        self.done = true;

        let sha256 = format!("{:x}", self.hasher.clone().finalize());
        self.counters.uploads_completed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_uploaded
            .fetch_add(self.bytes, Ordering::Relaxed);

        info!(file = %self.target.slot, bytes = self.bytes, sha256 = %sha256, "Upload finished");

        Ok(UploadReceipt {
            file: self.target.slot.clone(),
            bytes: self.bytes,
            sha256,
        })
    }

    /// Throw the staged bytes away, keep the previous stored file, release the lock.
    pub async fn abort(mut self) {
        self.file.take();
        if let Err(e) = self.storage.remove(&self.target.staging).await {
            warn!(error = %e, "Failed to remove upload staging file");
        }
        self.done = true;
        self.counters.uploads_aborted.fetch_add(1, Ordering::Relaxed);
        warn!(file = %self.target.slot, bytes = self.bytes, "Upload aborted");
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        self.file.take();
        let staging = self.storage.path(&self.target.staging);
        if let Err(e) = std::fs::remove_file(&staging) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove upload staging file");
            }
        }
        self.counters.uploads_aborted.fetch_add(1, Ordering::Relaxed);
        warn!(file = %self.target.slot, bytes = self.bytes, "Upload dropped before completion");
    }
}
