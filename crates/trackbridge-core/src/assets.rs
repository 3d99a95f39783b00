use std::{
    fs::{self, File},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use tracing::{debug, instrument, warn};

use crate::{envelope, model::AudioSource, wav};

pub const DEFAULT_ENVELOPE_BUCKETS: usize = 1_024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioAnalysis {
    pub source_path: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub total_frames: u64,
    pub duration_seconds: f64,
    pub peaks: Vec<f32>,
    pub leading_silence_seconds: f64,
    #[serde(default)]
    pub cache_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples.
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        (self.samples.len() / usize::from(self.channels.max(1))) as u64
    }
}

#[instrument(fields(path = %path.display(), max_buckets))]
pub fn analyze_audio_file(path: &Path, max_buckets: usize) -> Result<AudioAnalysis> {
    if max_buckets == 0 {
        return Err(anyhow::anyhow!("max_buckets must be greater than zero"));
    }

    let decoded = decode_audio_file(path)?;
    let total_frames = decoded.frame_count();
    let duration_seconds = if decoded.sample_rate == 0 {
        0.0
    } else {
        total_frames as f64 / f64::from(decoded.sample_rate)
    };
    let peaks = envelope::extract_envelope(
        &decoded.samples,
        usize::from(decoded.channels),
        max_buckets,
    );
    let leading_silence_seconds = envelope::leading_silence_from_envelope(&peaks, duration_seconds);

    Ok(AudioAnalysis {
        source_path: path.display().to_string(),
        sample_rate: decoded.sample_rate,
        channels: decoded.channels,
        total_frames,
        duration_seconds,
        peaks,
        leading_silence_seconds,
        cache_path: None,
    })
}

#[instrument(fields(path = %path.display(), max_buckets, cache_dir = %cache_dir.display()))]
pub fn analyze_audio_file_with_cache(
    path: &Path,
    cache_dir: &Path,
    max_buckets: usize,
) -> Result<AudioAnalysis> {
    if max_buckets == 0 {
        return Err(anyhow::anyhow!("max_buckets must be greater than zero"));
    }

    fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create audio cache dir: {}", cache_dir.display()))?;

    let hash = asset_hash(path)?;
    let cache_path = cache_dir.join(format!("{hash}-{max_buckets}.analysis.json"));
    if cache_path.is_file() {
        let cached_bytes = fs::read(&cache_path)
            .with_context(|| format!("failed to read analysis cache {}", cache_path.display()))?;
        match serde_json::from_slice::<AudioAnalysis>(&cached_bytes) {
            Ok(mut cached) => {
                cached.cache_path = Some(cache_path.display().to_string());
                debug!(path = %cache_path.display(), "analysis cache hit");
                return Ok(cached);
            }
            Err(error) => {
                warn!(
                    path = %cache_path.display(),
                    ?error,
                    "analysis cache parse failed, regenerating"
                );
            }
        }
    }

    let mut analysis = analyze_audio_file(path, max_buckets)?;
    analysis.cache_path = Some(cache_path.display().to_string());
    let json = serde_json::to_vec_pretty(&analysis).context("failed to encode analysis json")?;
    fs::write(&cache_path, json)
        .with_context(|| format!("failed to write analysis cache: {}", cache_path.display()))?;
    Ok(analysis)
}

#[instrument(fields(path = %path.display()))]
pub fn decode_audio_file(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default audio track found in {}", path.display()))?;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
    let mut channels = track
        .codec_params
        .channels
        .map_or(2, |value| value.count() as u16);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(error) => return Err(error.into()),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(error) => return Err(error.into()),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() {
        return Err(anyhow::anyhow!(
            "decoded zero samples from {}",
            path.display()
        ));
    }

    debug!(
        sample_rate,
        channels,
        samples = samples.len(),
        "audio decode complete"
    );

    Ok(DecodedAudio {
        sample_rate,
        channels,
        samples,
    })
}

/// Resolves a stored clip path against the media root.
///
/// Existing absolute paths win; anything else is joined onto `media_root`
/// with leading slashes stripped.
#[must_use]
pub fn resolve_source_path(media_root: &Path, stored: &str) -> Option<PathBuf> {
    let trimmed = stored.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = Path::new(trimmed);
    if candidate.is_absolute() && candidate.exists() {
        return Some(candidate.to_path_buf());
    }
    let relative = trimmed.trim_start_matches('/');
    let joined = media_root.join(relative);
    if joined.exists() {
        return Some(joined);
    }
    candidate.is_absolute().then(|| candidate.to_path_buf())
}

/// Start offset into the source file for a clip, in seconds.
///
/// Prefers a cached offset, then the stored envelope, then a raw WAV scan.
#[instrument(skip(source), fields(path = %resolved.display()))]
pub fn leading_silence_for_source(source: &AudioSource, resolved: &Path) -> f64 {
    if let Some(offset) = source
        .source_offset_seconds
        .filter(|value| value.is_finite() && *value >= 0.0)
    {
        return offset;
    }

    let from_envelope = source
        .duration_seconds
        .map_or(0.0, |duration| {
            envelope::leading_silence_from_envelope(&source.peaks, duration)
        });
    if from_envelope > 0.0 {
        return from_envelope;
    }

    if !is_wav_path(resolved) {
        return 0.0;
    }
    match wav::leading_silence_in_file(resolved) {
        Ok(offset) => offset,
        Err(error) => {
            debug!(error = %format!("{error:#}"), "raw wav scan failed");
            0.0
        }
    }
}

fn is_wav_path(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .is_some_and(|extension| {
            extension.eq_ignore_ascii_case("wav") || extension.eq_ignore_ascii_case("wave")
        })
}

fn asset_hash(path: &Path) -> Result<String> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("failed to canonicalize asset path: {}", path.display()))?;
    let metadata = fs::metadata(&canonical)
        .with_context(|| format!("failed to inspect asset metadata: {}", canonical.display()))?;
    let modified_seconds = metadata
        .modified()
        .ok()
        .and_then(|value| value.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |value| value.as_secs());

    let payload = format!(
        "{}:{}:{}",
        canonical.display(),
        metadata.len(),
        modified_seconds
    );
    let digest = Sha256::digest(payload.as_bytes());
    Ok(format!("{digest:x}"))
}
