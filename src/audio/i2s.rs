//! # I2S Transmitter Model
//!
//! Software stand-in for a DMA-driven I2S TX peripheral, used when the service runs
//! on a host instead of the board. It keeps the properties the playback pipeline
//! relies on:
//!
//! - a fixed ring of `dma_buf_count × dma_buf_len` frames
//! - a clock that drains the ring at exactly `sample_rate` frames per second
//! - `write` blocks (up to its timeout) while the ring is full
//! - an empty ring clocks out silence instead of stale samples (auto-clear)
//!
//! The drained bytes are discarded; only counters remain.

use crate::audio::output::{AudioOutput, OutputError, OutputFormat, OutputStats};
use crate::config::AudioConfig;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How often the clock moves frames out of the ring.
const TICK: Duration = Duration::from_millis(10);

/// Extra time a flush waits on top of twice the ring's play time.
const DRAIN_SLACK: Duration = Duration::from_millis(100);

struct Ring {
    queued: VecDeque<u8>,
    capacity: usize,
}

struct Shared {
    ring: Mutex<Ring>,
    /// Signalled on every clock tick that moved data
    progress: Notify,
    bytes_transmitted: AtomicU64,
    silent_frames: AtomicU64,
}

impl Shared {
    fn ring(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A DMA ring drained in real time by a background clock task.
///
/// Must be installed from inside a tokio runtime; the clock task stops when the
/// transmitter is dropped.
pub struct I2sTransmitter {
    format: OutputFormat,
    drain_budget: Duration,
    shared: Arc<Shared>,
    clock: JoinHandle<()>,
}

impl I2sTransmitter {
    /// Set up the ring and start clocking.
    pub fn install(config: &AudioConfig) -> Self {
        let capacity = config.dma_capacity_bytes();
        let frame_bytes = config.bytes_per_frame().max(1);

        let shared = Arc::new(Shared {
            ring: Mutex::new(Ring {
                queued: VecDeque::with_capacity(capacity),
                capacity,
            }),
            progress: Notify::new(),
            bytes_transmitted: AtomicU64::new(0),
            silent_frames: AtomicU64::new(0),
        });

        let ring_time = Duration::from_secs_f64(capacity as f64 / config.byte_rate().max(1) as f64);
        let clock = tokio::spawn(run_clock(Arc::clone(&shared), config.sample_rate, frame_bytes));

        info!(
            sample_rate = config.sample_rate,
            bits_per_sample = config.bits_per_sample,
            channels = config.channels,
            dma_buf_count = config.dma_buf_count,
            dma_buf_len = config.dma_buf_len,
            ring_bytes = capacity,
            "I2S transmitter installed"
        );

        Self {
            format: OutputFormat::from(config),
            drain_budget: ring_time * 2 + DRAIN_SLACK,
            shared,
            clock,
        }
    }
}

impl Drop for I2sTransmitter {
    fn drop(&mut self) {
        self.clock.abort();
    }
}

#[async_trait]
impl AudioOutput for I2sTransmitter {
    fn format(&self) -> OutputFormat {
        self.format
    }

    async fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, OutputError> {
        if data.is_empty() {
            return Ok(0);
        }

        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut ring = self.shared.ring();
                let free = ring.capacity - ring.queued.len();
                if free > 0 {
                    let accepted = free.min(data.len());
                    ring.queued.extend(&data[..accepted]);
                    return Ok(accepted);
                }
            }

            // Ring is full: wait for the clock to make room.
            if tokio::time::timeout_at(deadline, self.shared.progress.notified())
                .await
                .is_err()
            {
                return Err(OutputError::Timeout);
            }
        }
    }

    async fn flush(&mut self) -> Result<(), OutputError> {
        let deadline = Instant::now() + self.drain_budget;
        loop {
            let queued = self.shared.ring().queued.len();
            if queued == 0 {
                break;
            }

            if tokio::time::timeout_at(deadline, self.shared.progress.notified())
                .await
                .is_err()
            {
                warn!(queued_bytes = queued, "I2S ring did not drain in time, discarding");
                break;
            }
        }

        self.shared.ring().queued.clear();
        debug!("DMA buffer zeroed");
        Ok(())
    }

    fn stats(&self) -> OutputStats {
        OutputStats {
            bytes_transmitted: self.shared.bytes_transmitted.load(Ordering::Relaxed),
            silent_frames: self.shared.silent_frames.load(Ordering::Relaxed),
            queued_bytes: self.shared.ring().queued.len(),
        }
    }
}

/// Drains the ring at the configured frame rate until aborted.
async fn run_clock(shared: Arc<Shared>, sample_rate: u32, frame_bytes: usize) {
    let started = Instant::now();
    let mut frames_clocked: u64 = 0;
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let due = (started.elapsed().as_micros() * sample_rate as u128 / 1_000_000) as u64;
        let frames = due.saturating_sub(frames_clocked);
        if frames == 0 {
            continue;
        }
        frames_clocked = due;

        let wanted = frames as usize * frame_bytes;
        let sent = {
            let mut ring = shared.ring();
            let sent = wanted.min(ring.queued.len());
            ring.queued.drain(..sent);
            sent
        };

        shared.bytes_transmitted.fetch_add(sent as u64, Ordering::Relaxed);
        shared
            .silent_frames
            .fetch_add(((wanted - sent) / frame_bytes) as u64, Ordering::Relaxed);
        shared.progress.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn audio_config() -> AudioConfig {
        AppConfig::default().audio
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_accepts_up_to_ring_capacity() {
        let config = audio_config();
        let mut tx = I2sTransmitter::install(&config);

        let data = vec![7u8; 4096];
        let accepted = tx.write(&data, Duration::from_millis(100)).await.unwrap();
        assert_eq!(accepted, config.dma_capacity_bytes());
        assert_eq!(tx.stats().queued_bytes, config.dma_capacity_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_ring_times_out() {
        let config = audio_config();
        let mut tx = I2sTransmitter::install(&config);

        let data = vec![7u8; config.dma_capacity_bytes()];
        tx.write(&data, Duration::from_millis(100)).await.unwrap();

        // Shorter than one clock tick: nothing can free up in time
        let result = tx.write(&data, Duration::from_millis(1)).await;
        assert_eq!(result, Err(OutputError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_write_resumes_when_clock_drains() {
        let config = audio_config();
        let mut tx = I2sTransmitter::install(&config);

        let data = vec![7u8; config.dma_capacity_bytes()];
        tx.write(&data, Duration::from_millis(100)).await.unwrap();

        let accepted = tx.write(&data, Duration::from_millis(100)).await.unwrap();
        assert!(accepted > 0);
        assert!(accepted <= config.dma_capacity_bytes());
        assert!(tx.stats().bytes_transmitted >= accepted as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_plays_out_then_empties_ring() {
        let mut tx = I2sTransmitter::install(&audio_config());

        tx.write(&[1u8; 500], Duration::from_millis(100)).await.unwrap();
        tx.flush().await.unwrap();

        let stats = tx.stats();
        assert_eq!(stats.bytes_transmitted, 500);
        assert_eq!(stats.queued_bytes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_line_clocks_silence() {
        let tx = I2sTransmitter::install(&audio_config());

        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = tx.stats();
        assert_eq!(stats.bytes_transmitted, 0);
        assert!(stats.silent_frames > 0);
    }
}
