//! # Audio Module
//!
//! Everything between the stored upload and the I2S line.
//!
//! ## Key Components:
//! - **Output** (`output`): the `AudioOutput` seam the playback path writes through
//! - **I2S model** (`i2s`): DMA ring drained in real time at the configured sample rate
//! - **Header** (`header`): fixed-size header skip plus diagnostic decoding
//! - **Engine** (`engine`): one playback pass, chunk by chunk, with retries
//! - **Coordinator** (`coordinator`): single-session admission and the shared audio lock
//!
//! ## Audio Format:
//! - **Sample Rate**: 11,025 Hz by default
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono
//! - **Encoding**: raw bytes after the header are sent to the line unchanged

pub mod coordinator;
pub mod engine;
pub mod header;
pub mod i2s;
pub mod output;

#[cfg(test)]
pub mod testing;

pub use coordinator::{AudioSubsystem, PlaybackAdmission, UploadError, UploadSession};
pub use i2s::I2sTransmitter;
pub use output::OutputFormat;
