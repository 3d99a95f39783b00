//! Peak envelopes: extraction, resampling and the envelope-based
//! leading-silence estimate.

/// Normalized magnitude above which audio counts as audible.
pub const SILENCE_THRESHOLD: f32 = 0.02;

/// Offset of the first bucket above [`SILENCE_THRESHOLD`], scaled to `duration_seconds`.
#[must_use]
pub fn leading_silence_from_envelope(peaks: &[f32], duration_seconds: f64) -> f64 {
    if peaks.is_empty() || !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        return 0.0;
    }
    peaks
        .iter()
        .position(|peak| *peak > SILENCE_THRESHOLD)
        .map_or(0.0, |index| {
            index as f64 / peaks.len() as f64 * duration_seconds
        })
}

/// Block-wise max-abs of interleaved samples into at most `max_buckets` buckets.
#[must_use]
pub fn extract_envelope(samples: &[f32], channels: usize, max_buckets: usize) -> Vec<f32> {
    let channels = channels.max(1);
    let frames = samples.len() / channels;
    if frames == 0 || max_buckets == 0 {
        return Vec::new();
    }

    let frames_per_bucket = frames.div_ceil(max_buckets.min(frames));
    samples[..frames * channels]
        .chunks(frames_per_bucket * channels)
        .map(|block| {
            block
                .iter()
                .copied()
                .map(f32::abs)
                .filter(|value| value.is_finite())
                .fold(0.0_f32, f32::max)
                .clamp(0.0, 1.0)
        })
        .collect()
}

/// Resamples an envelope to `target` buckets.
///
/// Shrinking keeps the block maximum, growing interpolates linearly.
#[must_use]
pub fn resample_envelope(peaks: &[f32], target: usize) -> Vec<f32> {
    if target == 0 {
        return Vec::new();
    }
    if peaks.is_empty() {
        return vec![0.0; target];
    }

    let source = peaks.len();
    if source == target {
        return peaks.iter().copied().map(clamp_unit).collect();
    }

    if source > target {
        return (0..target)
            .map(|bucket| {
                let start = bucket * source / target;
                let end = ((bucket + 1) * source / target).max(start + 1);
                peaks[start..end.min(source)]
                    .iter()
                    .copied()
                    .map(clamp_unit)
                    .fold(0.0_f32, f32::max)
            })
            .collect();
    }

    if source == 1 {
        return vec![clamp_unit(peaks[0]); target];
    }
    let scale = (source - 1) as f64 / (target - 1) as f64;
    (0..target)
        .map(|bucket| {
            let position = bucket as f64 * scale;
            let lower = position.floor() as usize;
            let upper = (lower + 1).min(source - 1);
            let fraction = (position - lower as f64) as f32;
            let low = clamp_unit(peaks[lower]);
            let high = clamp_unit(peaks[upper]);
            clamp_unit(low + (high - low) * fraction)
        })
        .collect()
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
