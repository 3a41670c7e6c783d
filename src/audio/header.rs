//! # WAV Header Inspection
//!
//! Stored files start with a fixed-size header that playback skips without
//! validating. The decoded fields are only used for diagnostics: a file that does
//! not match the output format is still played, but the mismatch is logged.
//!
//! ## Canonical 44-byte layout (little-endian):
//! | Offset | Field |
//! |---|---|
//! | 0 | `RIFF` |
//! | 8 | `WAVE` |
//! | 20 | format tag (1 = PCM) |
//! | 22 | channels |
//! | 24 | sample rate |
//! | 34 | bits per sample |
//! | 36 | `data` |
//! | 40 | payload length |

use crate::audio::output::OutputFormat;
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

/// Size of a canonical PCM WAV header.
pub const CANONICAL_HEADER_LEN: usize = 44;

const FORMAT_PCM: u16 = 1;

/// Fields decoded from a canonical header. Nothing here is checked on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderSummary {
    pub riff_tag: bool,
    pub wave_tag: bool,
    pub data_tag: bool,
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

impl HeaderSummary {
    /// Decode the canonical fields from the first 44 bytes of a file.
    ///
    /// Returns `None` when fewer than 44 bytes are available.
    pub fn decode(header: &[u8]) -> Option<Self> {
        if header.len() < CANONICAL_HEADER_LEN {
            return None;
        }

        Some(Self {
            riff_tag: &header[0..4] == b"RIFF",
            wave_tag: &header[8..12] == b"WAVE",
            data_tag: &header[36..40] == b"data",
            format_tag: LittleEndian::read_u16(&header[20..22]),
            channels: LittleEndian::read_u16(&header[22..24]),
            sample_rate: LittleEndian::read_u32(&header[24..28]),
            bits_per_sample: LittleEndian::read_u16(&header[34..36]),
            data_len: LittleEndian::read_u32(&header[40..44]),
        })
    }

    /// Human-readable differences between this header and what the output plays.
    ///
    /// An empty list means the file looks like a canonical PCM WAV in the output format.
    pub fn mismatches(&self, format: &OutputFormat) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.riff_tag || !self.wave_tag {
            problems.push("missing RIFF/WAVE signature".to_string());
        }
        if !self.data_tag {
            problems.push("data chunk not at canonical offset".to_string());
        }
        if self.format_tag != FORMAT_PCM {
            problems.push(format!("format tag {} is not PCM", self.format_tag));
        }
        if self.sample_rate != format.sample_rate {
            problems.push(format!(
                "sample rate {} Hz, output runs at {} Hz",
                self.sample_rate, format.sample_rate
            ));
        }
        if self.bits_per_sample != format.bits_per_sample {
            problems.push(format!(
                "{}-bit samples, output expects {}-bit",
                self.bits_per_sample, format.bits_per_sample
            ));
        }
        if self.channels != format.channels {
            problems.push(format!(
                "{} channel(s), output expects {}",
                self.channels, format.channels
            ));
        }

        problems
    }
}

/// Build a canonical header. Used to produce fixtures and test uploads.
#[cfg(test)]
pub fn canonical_header(format: &OutputFormat, data_len: u32) -> Vec<u8> {
    let block_align = format.channels * (format.bits_per_sample / 8);
    let byte_rate = format.sample_rate * block_align as u32;

    let mut header = vec![0u8; CANONICAL_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    LittleEndian::write_u32(&mut header[4..8], 36 + data_len);
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    LittleEndian::write_u32(&mut header[16..20], 16);
    LittleEndian::write_u16(&mut header[20..22], FORMAT_PCM);
    LittleEndian::write_u16(&mut header[22..24], format.channels);
    LittleEndian::write_u32(&mut header[24..28], format.sample_rate);
    LittleEndian::write_u32(&mut header[28..32], byte_rate);
    LittleEndian::write_u16(&mut header[32..34], block_align);
    LittleEndian::write_u16(&mut header[34..36], format.bits_per_sample);
    header[36..40].copy_from_slice(b"data");
    LittleEndian::write_u32(&mut header[40..44], data_len);
    header
}
