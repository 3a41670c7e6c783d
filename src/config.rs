//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` environment variables (deployment platforms)
//! 2. Environment variables (APP_SERVER_HOST, APP_AUDIO_CHUNK_SIZE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Audio configuration is static:
//! The `audio` section describes the fixed setup of the output interface.
//! Uploaded files are expected to already match it; nothing is negotiated.

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: where the HTTP listener binds and how playback excludes uploads
/// - `storage`: the directory standing in for the flash filesystem
/// - `audio`: the fixed output format plus the streaming pipeline constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub audio: AudioConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to (e.g., "127.0.0.1", "0.0.0.0")
/// - `port`: TCP port number to listen on
/// - `exclusion`: how a playback pass is kept apart from uploads (see [`ExclusionMode`])
/// - `restart_delay_ms`: pause between stopping and rebinding the listener in restart mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub exclusion: ExclusionMode,
    pub restart_delay_ms: u64,
}

/// How uploads and playback are kept from touching the stored file at the same time.
///
/// ## Variants:
/// - **Lock**: uploads and playback take the shared audio lock; the listener stays up
///   and a second `/play` gets a 409
/// - **ListenerRestart**: the HTTP listener is stopped for the duration of a playback
///   pass and rebound afterwards (the lock is still taken)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionMode {
    Lock,
    ListenerRestart,
}

/// Persistent storage configuration.
///
/// ## Fields:
/// - `root_dir`: directory mounted as the storage root (created when missing)
/// - `upload_file`: name of the single upload slot
/// - `index_file`: UI document served at `/` when present in the root
/// - `max_upload_bytes`: uploads larger than this are aborted with 413
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root_dir: PathBuf,
    pub upload_file: String,
    pub index_file: String,
    pub max_upload_bytes: u64,
}

/// Audio output and streaming pipeline configuration.
///
/// ## Output format (must match the stored files):
/// - `sample_rate`: samples per second per channel (11025 Hz)
/// - `bits_per_sample`: sample width (16)
/// - `channels`: 1 = mono, 2 = interleaved stereo
///
/// ## DMA ring:
/// - `dma_buf_count` × `dma_buf_len` frames form the transmit ring
///
/// ## Streaming pipeline:
/// - `header_len`: bytes skipped at the start of every file (44 for canonical WAV)
/// - `chunk_size`: bytes read from storage per iteration
/// - `write_timeout_ms`: how long a single output write may block
/// - `retry_backoff_ms`: delay before retrying after a timeout or transient error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub dma_buf_count: usize,
    pub dma_buf_len: usize,
    pub header_len: u64,
    pub chunk_size: usize,
    pub write_timeout_ms: u64,
    pub retry_backoff_ms: u64,
}

/// Provides default configuration values.
///
/// These mirror the board setup: 11025 Hz, 16-bit, mono, eight 64-frame DMA buffers.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
                exclusion: ExclusionMode::Lock,
                restart_delay_ms: 50,
            },
            storage: StorageConfig {
                root_dir: PathBuf::from("./data"),
                upload_file: "uploaded.wav".to_string(),
                index_file: "index.html".to_string(),
                max_upload_bytes: 4 * 1024 * 1024,  // 4 MiB flash partition
            },
            audio: AudioConfig {
                sample_rate: 11025,
                bits_per_sample: 16,
                channels: 1,
                dma_buf_count: 8,
                dma_buf_len: 64,
                header_len: 44,
                chunk_size: 1024,
                write_timeout_ms: 100,
                retry_backoff_ms: 10,
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_STORAGE__ROOT_DIR=/mnt/flash`: Override the storage root
    /// - `APP_AUDIO__CHUNK_SIZE=2048`: Override the read chunk size
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix.
            // Field names contain underscores, so sections are split on a double underscore.
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - File names are non-empty plain names (no directories)
    /// - Upload limit, chunk size, DMA ring and sample rate are non-zero
    /// - Bit depth and channel count are ones an I2S transmitter can be set up with
    /// - The header to skip is no longer than one chunk
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        validate_file_name("storage.upload_file", &self.storage.upload_file)?;
        validate_file_name("storage.index_file", &self.storage.index_file)?;

        if self.storage.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Upload limit must be greater than 0"));
        }

        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if !matches!(audio.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(anyhow::anyhow!(
                "Unsupported bit depth {} (expected 8, 16, 24 or 32)",
                audio.bits_per_sample
            ));
        }

        if !matches!(audio.channels, 1 | 2) {
            return Err(anyhow::anyhow!(
                "Unsupported channel count {} (expected 1 or 2)",
                audio.channels
            ));
        }

        if audio.dma_buf_count == 0 || audio.dma_buf_len == 0 {
            return Err(anyhow::anyhow!("DMA buffer count and length must be greater than 0"));
        }

        if audio.chunk_size == 0 {
            return Err(anyhow::anyhow!("Chunk size must be greater than 0"));
        }

        // The engine reads the whole header into one buffer
        if audio.header_len > audio.chunk_size as u64 {
            return Err(anyhow::anyhow!(
                "Header length {} cannot exceed the chunk size {}",
                audio.header_len,
                audio.chunk_size
            ));
        }

        Ok(())  // All validation passed
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl StorageConfig {
    /// Name of the staging file an upload is written to before it replaces the slot.
    pub fn staging_file(&self) -> String {
        format!("{}.part", self.upload_file)
    }
}

impl AudioConfig {
    /// Bytes in one frame (one sample for every channel).
    pub fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }

    /// Payload bytes the output interface consumes per second.
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame() as u64
    }

    /// Capacity of the whole DMA ring in bytes.
    pub fn dma_capacity_bytes(&self) -> usize {
        self.dma_buf_count * self.dma_buf_len * self.bytes_per_frame()
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn validate_file_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("{} cannot be empty", field));
    }

    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(anyhow::anyhow!("{} must be a plain file name, got '{}'", field, name));
    }

    Ok(())
}

/// Tests for the configuration module.
#[cfg(test)]
mod tests {
    use super::*;  // Import everything from the parent module

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.exclusion, ExclusionMode::Lock);
        assert_eq!(config.audio.sample_rate, 11025);
        assert_eq!(config.audio.header_len, 44);
        assert_eq!(config.audio.chunk_size, 1024);
        // Ensure the default config passes validation
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;  // Invalid port
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.upload_file = "../escape.wav".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.bits_per_sample = 12;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_header_len_bounded_by_chunk_size() {
        let mut config = AppConfig::default();
        config.audio.header_len = u64::MAX;
        assert!(config.validate().is_err());

        config.audio.header_len = config.audio.chunk_size as u64 + 1;
        assert!(config.validate().is_err());

        config.audio.header_len = config.audio.chunk_size as u64;
        assert!(config.validate().is_ok());

        config.audio.header_len = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_audio_sizes() {
        let audio = AppConfig::default().audio;
        assert_eq!(audio.bytes_per_frame(), 2);
        assert_eq!(audio.byte_rate(), 22050);
        assert_eq!(audio.dma_capacity_bytes(), 8 * 64 * 2);
        assert_eq!(audio.write_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_exclusion_mode_from_toml() {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .add_source(config::File::from_str(
                "[server]\nexclusion = \"listener_restart\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config: AppConfig = settings.try_deserialize().unwrap();
        assert_eq!(config.server.exclusion, ExclusionMode::ListenerRestart);
        // Untouched sections keep their defaults
        assert_eq!(config.storage.upload_file, "uploaded.wav");
    }

    #[test]
    fn test_staging_file_name() {
        let storage = AppConfig::default().storage;
        assert_eq!(storage.staging_file(), "uploaded.wav.part");
    }
}
