pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 300.0;
pub const FALLBACK_BPM: f64 = 128.0;
pub const DEFAULT_BEATS_PER_BAR: f64 = 4.0;
pub const STEPS_PER_BEAT: u32 = 4;

#[must_use]
pub fn clamp_bpm(bpm: f64) -> f64 {
    if !bpm.is_finite() {
        return FALLBACK_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

/// Quarter-note beats per bar for a time signature, 4 when the signature is unusable.
#[must_use]
pub fn beats_per_bar(numerator: u32, denominator: u32) -> f64 {
    if numerator == 0 || denominator == 0 {
        return DEFAULT_BEATS_PER_BAR;
    }
    let beats = f64::from(numerator) * 4.0 / f64::from(denominator);
    if beats.is_finite() && beats > 0.0 {
        beats
    } else {
        DEFAULT_BEATS_PER_BAR
    }
}

#[must_use]
pub fn beats_to_seconds(beats: f64, bpm: f64) -> f64 {
    if bpm <= 0.0 || !beats.is_finite() {
        return 0.0;
    }
    beats * (60.0 / bpm)
}

#[must_use]
pub fn seconds_to_beats(seconds: f64, bpm: f64) -> f64 {
    if seconds <= 0.0 || bpm <= 0.0 {
        return 0.0;
    }
    seconds * (bpm / 60.0)
}

#[must_use]
pub fn bars_to_seconds(bars: f64, bpm: f64, beats_per_bar: f64) -> f64 {
    beats_to_seconds(bars * beats_per_bar, bpm)
}

#[must_use]
pub fn seconds_to_bars(seconds: f64, bpm: f64, beats_per_bar: f64) -> f64 {
    if beats_per_bar <= 0.0 {
        return 0.0;
    }
    seconds_to_beats(seconds, bpm) / beats_per_bar
}

#[must_use]
pub fn elapsed_beats(elapsed_ms: f64, bpm: f64) -> f64 {
    elapsed_ms.max(0.0) * (bpm / 60_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_second_round_trip_is_stable() {
        let bpm = 128.0;
        let seconds = bars_to_seconds(3.5, bpm, 4.0);
        let restored = seconds_to_bars(seconds, bpm, 4.0);
        assert!((restored - 3.5).abs() < 1e-12);
    }

    #[test]
    fn beats_per_bar_follows_time_signature() {
        assert_eq!(beats_per_bar(4, 4), 4.0);
        assert_eq!(beats_per_bar(3, 4), 3.0);
        assert_eq!(beats_per_bar(6, 8), 3.0);
        assert_eq!(beats_per_bar(7, 0), 4.0);
        assert_eq!(beats_per_bar(0, 4), 4.0);
    }

    #[test]
    fn bpm_is_clamped() {
        assert_eq!(clamp_bpm(5.0), MIN_BPM);
        assert_eq!(clamp_bpm(999.0), MAX_BPM);
        assert_eq!(clamp_bpm(f64::NAN), FALLBACK_BPM);
        assert_eq!(clamp_bpm(140.0), 140.0);
    }

    #[test]
    fn one_bar_at_120_bpm_is_two_seconds() {
        assert!((bars_to_seconds(1.0, 120.0, 4.0) - 2.0).abs() < 1e-12);
    }
}
