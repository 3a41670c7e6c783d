//! # Audio Output Interface
//!
//! The seam between the playback engine and whatever actually clocks samples out.
//! An output accepts raw PCM bytes in the fixed [`OutputFormat`] it was set up with;
//! it never converts or resamples.

use crate::config::AudioConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// The static PCM layout an output transmits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl From<&AudioConfig> for OutputFormat {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            bits_per_sample: config.bits_per_sample,
            channels: config.channels,
        }
    }
}

/// Why a write or flush did not go through.
///
/// ## Variants:
/// - **Timeout**: no space freed up within the write timeout (backpressure)
/// - **Transient**: the driver reported an error that is worth retrying
/// - **Fatal**: the device is gone; the session cannot continue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    Timeout,
    Transient(String),
    Fatal(String),
}

impl OutputError {
    /// Timeouts and transient driver errors are retried; fatal errors end the session.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OutputError::Fatal(_))
    }
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::Timeout => write!(f, "write timed out"),
            OutputError::Transient(msg) => write!(f, "transient output error: {}", msg),
            OutputError::Fatal(msg) => write!(f, "fatal output error: {}", msg),
        }
    }
}

impl std::error::Error for OutputError {}

/// Counters an output keeps about what it has clocked out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutputStats {
    /// Payload bytes that left the transmit buffer
    pub bytes_transmitted: u64,
    /// Frames of silence sent because the buffer ran dry
    pub silent_frames: u64,
    /// Bytes still waiting in the transmit buffer
    pub queued_bytes: usize,
}

/// A real-time PCM sink with a bounded transmit buffer.
///
/// ## Contract:
/// - `write` blocks for at most `timeout` waiting for buffer space, then either
///   accepts a non-empty prefix of `data` and returns its length, or fails
/// - bytes accepted by successive writes are transmitted in order
/// - `flush` lets everything queued play out and then clears the buffer, so nothing
///   written before the flush can be emitted after it
#[async_trait]
pub trait AudioOutput: Send {
    fn format(&self) -> OutputFormat;

    async fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, OutputError>;

    async fn flush(&mut self) -> Result<(), OutputError>;

    fn stats(&self) -> OutputStats {
        OutputStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_retryable_errors() {
        assert!(OutputError::Timeout.is_retryable());
        assert!(OutputError::Transient("dma busy".into()).is_retryable());
        assert!(!OutputError::Fatal("driver uninstalled".into()).is_retryable());
    }

    #[test]
    fn test_format_from_config() {
        let format = OutputFormat::from(&AppConfig::default().audio);
        assert_eq!(
            format,
            OutputFormat { sample_rate: 11025, bits_per_sample: 16, channels: 1 }
        );
    }
}
