//! Minimal RIFF/WAVE reader used to find where audible content starts when
//! no usable envelope is available.

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument, warn};

use crate::envelope::SILENCE_THRESHOLD;

/// Files above this size are not scanned.
pub const MAX_SCAN_BYTES: u64 = 256 * 1024 * 1024;

const FORMAT_PCM: u16 = 0x0001;
const FORMAT_IEEE_FLOAT: u16 = 0x0003;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl SampleEncoding {
    fn from_format(format_tag: u16, bits_per_sample: u16) -> Option<Self> {
        match (format_tag, bits_per_sample) {
            (FORMAT_PCM, 16) => Some(Self::Int16),
            (FORMAT_PCM, 24) => Some(Self::Int24),
            (FORMAT_PCM, 32) => Some(Self::Int32),
            (FORMAT_IEEE_FLOAT, 32) => Some(Self::Float32),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int24 => 3,
            Self::Int32 | Self::Float32 => 4,
        }
    }

    /// Magnitude of one sample normalized to full scale.
    fn magnitude(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Int16 => {
                f32::from(i16::from_le_bytes([bytes[0], bytes[1]])).abs() / 32_768.0
            }
            Self::Int24 => {
                let value = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                value.unsigned_abs() as f32 / 8_388_608.0
            }
            Self::Int32 => {
                let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                value.unsigned_abs() as f32 / 2_147_483_648.0
            }
            Self::Float32 => {
                let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if value.is_finite() { value.abs() } else { 0.0 }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavLayout {
    pub encoding: SampleEncoding,
    pub channels: u16,
    pub sample_rate: u32,
    pub data_offset: usize,
    pub data_len: usize,
}

impl WavLayout {
    #[must_use]
    pub fn frame_bytes(&self) -> usize {
        self.encoding.bytes_per_sample() * usize::from(self.channels)
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.data_len / self.frame_bytes().max(1)
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }
}

struct FormatChunk {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

/// Walks the RIFF chunk list and returns the sample layout of the `data` chunk.
pub fn parse_wav_layout(bytes: &[u8]) -> Result<WavLayout> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        bail!("not a RIFF/WAVE container");
    }

    let mut format: Option<FormatChunk> = None;
    let mut cursor = 12_usize;
    while cursor + 8 <= bytes.len() {
        let id = &bytes[cursor..cursor + 4];
        let size = read_u32(bytes, cursor + 4)? as usize;
        let body_start = cursor + 8;
        let body_end = body_start.saturating_add(size);

        match id {
            b"fmt " => {
                if body_end > bytes.len() {
                    bail!("truncated fmt chunk");
                }
                format = Some(parse_format_chunk(&bytes[body_start..body_end])?);
            }
            b"data" => {
                let format = format.as_ref().context("data chunk before fmt chunk")?;
                let encoding =
                    SampleEncoding::from_format(format.format_tag, format.bits_per_sample)
                        .with_context(|| {
                            format!(
                                "unsupported sample format tag {:#06x} at {} bits",
                                format.format_tag, format.bits_per_sample
                            )
                        })?;
                if format.channels == 0 {
                    bail!("wav declares zero channels");
                }
                // Streams written without a final size leave the data chunk open-ended.
                let data_len = size.min(bytes.len() - body_start);
                return Ok(WavLayout {
                    encoding,
                    channels: format.channels,
                    sample_rate: format.sample_rate,
                    data_offset: body_start,
                    data_len,
                });
            }
            _ => {}
        }

        cursor = body_end.saturating_add(size & 1);
    }

    bail!("no data chunk found")
}

fn parse_format_chunk(body: &[u8]) -> Result<FormatChunk> {
    if body.len() < 16 {
        bail!("fmt chunk too short: {} bytes", body.len());
    }
    let mut format_tag = read_u16(body, 0)?;
    let channels = read_u16(body, 2)?;
    let sample_rate = read_u32(body, 4)?;
    let bits_per_sample = read_u16(body, 14)?;

    if format_tag == FORMAT_EXTENSIBLE {
        // cbSize(2) validBits(2) channelMask(4) then the sub-format GUID,
        // whose first two bytes carry the effective format tag.
        if body.len() < 26 {
            bail!("extensible fmt chunk missing sub-format");
        }
        format_tag = read_u16(body, 24)?;
    }

    Ok(FormatChunk {
        format_tag,
        channels,
        sample_rate,
        bits_per_sample,
    })
}

/// Seconds before the first frame whose peak exceeds the silence threshold.
///
/// Returns 0 for malformed input, oversized input, or when nothing is audible.
#[must_use]
pub fn leading_silence_seconds(bytes: &[u8]) -> f64 {
    if bytes.len() as u64 > MAX_SCAN_BYTES {
        warn!(bytes = bytes.len(), "wav too large for leading-silence scan");
        return 0.0;
    }
    let layout = match parse_wav_layout(bytes) {
        Ok(layout) => layout,
        Err(error) => {
            debug!(error = %error, "wav layout unreadable, assuming no leading silence");
            return 0.0;
        }
    };
    if layout.sample_rate == 0 {
        return 0.0;
    }

    let sample_bytes = layout.encoding.bytes_per_sample();
    let data = &bytes[layout.data_offset..layout.data_offset + layout.data_len];
    data.chunks_exact(layout.frame_bytes())
        .position(|frame| {
            frame
                .chunks_exact(sample_bytes)
                .map(|sample| layout.encoding.magnitude(sample))
                .fold(0.0_f32, f32::max)
                > SILENCE_THRESHOLD
        })
        .map_or(0.0, |frame| frame as f64 / f64::from(layout.sample_rate))
}

#[instrument(fields(path = %path.display()))]
pub fn leading_silence_in_file(path: &Path) -> Result<f64> {
    let size = fs::metadata(path)
        .with_context(|| format!("failed to inspect wav file: {}", path.display()))?
        .len();
    if size > MAX_SCAN_BYTES {
        debug!(size, "skipping leading-silence scan of oversized file");
        return Ok(0.0);
    }
    let bytes =
        fs::read(path).with_context(|| format!("failed to read wav file: {}", path.display()))?;
    Ok(leading_silence_seconds(&bytes))
}

/// Duration from the RIFF header alone, without decoding samples.
pub fn wav_duration_seconds(bytes: &[u8]) -> Result<f64> {
    Ok(parse_wav_layout(bytes)?.duration_seconds())
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|slice| u16::from_le_bytes([slice[0], slice[1]]))
        .context("unexpected end of wav header")
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|slice| u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
        .context("unexpected end of wav header")
}
