//! Playback position under two timing authorities.
//!
//! In [`ClockMode::Simulated`] the position is derived locally from a start
//! instant, a frozen offset and the tempo. In [`ClockMode::PeerDriven`] it is
//! whatever the peer last reported in a tick. All derivation takes an
//! explicit `Instant` so it never touches I/O.

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    model::TrackId,
    time::{self, STEPS_PER_BEAT},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    Simulated,
    PeerDriven,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TransportSnapshot {
    pub mode: ClockMode,
    pub playing: bool,
    pub bpm: f64,
    pub bar: i64,
    pub beat: i64,
    pub step: i64,
    pub step_index: i64,
    pub position_bars: f64,
    pub position_beats: f64,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrackMeter {
    #[serde(alias = "trackId")]
    pub track_id: TrackId,
    pub level: f32,
}

/// Position report carried by the peer's `transport.tick` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerTick {
    #[serde(default)]
    pub playing: bool,
    #[serde(default = "default_tick_bpm")]
    pub bpm: f64,
    #[serde(default, alias = "positionBeats")]
    pub position_beats: f64,
    #[serde(default)]
    pub meters: Vec<TrackMeter>,
}

#[derive(Debug, Clone)]
pub struct TransportClock {
    mode: ClockMode,
    bpm: f64,
    beats_per_bar: f64,
    offset_beats: f64,
    started_at: Option<Instant>,
    last_peer_tick: Option<PeerTick>,
}

impl TransportClock {
    #[must_use]
    pub fn new(bpm: f64, beats_per_bar: f64) -> Self {
        Self {
            mode: ClockMode::Simulated,
            bpm: time::clamp_bpm(bpm),
            beats_per_bar: sanitize_beats_per_bar(beats_per_bar),
            offset_beats: 0.0,
            started_at: None,
            last_peer_tick: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    #[must_use]
    pub fn bpm(&self) -> f64 {
        match (&self.mode, &self.last_peer_tick) {
            (ClockMode::PeerDriven, Some(tick)) => time::clamp_bpm(tick.bpm),
            _ => self.bpm,
        }
    }

    #[must_use]
    pub fn beats_per_bar(&self) -> f64 {
        self.beats_per_bar
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        match (&self.mode, &self.last_peer_tick) {
            (ClockMode::PeerDriven, Some(tick)) => tick.playing,
            _ => self.started_at.is_some(),
        }
    }

    #[must_use]
    pub fn position_beats_at(&self, now: Instant) -> f64 {
        if let (ClockMode::PeerDriven, Some(tick)) = (&self.mode, &self.last_peer_tick) {
            return tick.position_beats.max(0.0);
        }
        self.simulated_position_at(now)
    }

    fn simulated_position_at(&self, now: Instant) -> f64 {
        let Some(started_at) = self.started_at else {
            return self.offset_beats.max(0.0);
        };
        let elapsed_ms = now.saturating_duration_since(started_at).as_secs_f64() * 1_000.0;
        (self.offset_beats + time::elapsed_beats(elapsed_ms, self.bpm)).max(0.0)
    }

    pub fn play_at(&mut self, now: Instant) {
        if self.started_at.is_some() {
            return;
        }
        self.started_at = Some(now);
        debug!(offset_beats = self.offset_beats, "simulated transport started");
    }

    pub fn pause_at(&mut self, now: Instant) {
        if self.started_at.is_none() {
            return;
        }
        self.offset_beats = self.simulated_position_at(now);
        self.started_at = None;
    }

    pub fn stop_at(&mut self, now: Instant) {
        self.pause_at(now);
        self.offset_beats = 0.0;
    }

    pub fn seek_at(&mut self, position_beats: f64, now: Instant) {
        let position = if position_beats.is_finite() {
            position_beats.max(0.0)
        } else {
            0.0
        };
        self.offset_beats = position;
        if self.started_at.is_some() {
            self.started_at = Some(now);
        }
    }

    /// Changes tempo without rewriting beats that already elapsed.
    pub fn set_bpm_at(&mut self, bpm: f64, now: Instant) {
        let bpm = time::clamp_bpm(bpm);
        if self.started_at.is_some() {
            self.offset_beats = self.simulated_position_at(now);
            self.started_at = Some(now);
        }
        self.bpm = bpm;
    }

    pub fn set_beats_per_bar(&mut self, beats_per_bar: f64) {
        self.beats_per_bar = sanitize_beats_per_bar(beats_per_bar);
    }

    /// Adopts a peer report and switches to peer-driven mode.
    pub fn apply_peer_tick(&mut self, tick: PeerTick) {
        if self.mode == ClockMode::Simulated {
            info!(position_beats = tick.position_beats, "transport now peer driven");
        }
        self.mode = ClockMode::PeerDriven;
        self.last_peer_tick = Some(tick);
    }

    /// Folds the last peer position into the simulated offset without a jump.
    pub fn peer_disconnected_at(&mut self, now: Instant) {
        if self.mode == ClockMode::Simulated {
            return;
        }
        if let Some(tick) = self.last_peer_tick.take() {
            self.offset_beats = tick.position_beats.max(0.0);
            self.bpm = time::clamp_bpm(tick.bpm);
            self.started_at = tick.playing.then_some(now);
        }
        self.mode = ClockMode::Simulated;
        info!(offset_beats = self.offset_beats, "transport handed back to simulated clock");
    }

    #[must_use]
    pub fn last_peer_tick(&self) -> Option<&PeerTick> {
        self.last_peer_tick.as_ref()
    }

    #[must_use]
    pub fn snapshot_at(&self, now: Instant) -> TransportSnapshot {
        let position_beats = self.position_beats_at(now);
        derive_snapshot(
            self.mode,
            self.is_playing(),
            self.bpm(),
            position_beats,
            self.beats_per_bar,
            Utc::now().timestamp_millis(),
        )
    }
}

/// Bar/beat/step fields for a beat position.
#[must_use]
pub fn derive_snapshot(
    mode: ClockMode,
    playing: bool,
    bpm: f64,
    position_beats: f64,
    beats_per_bar: f64,
    timestamp: i64,
) -> TransportSnapshot {
    let beats_per_bar = sanitize_beats_per_bar(beats_per_bar);
    let beats = position_beats.max(0.0);
    let steps_per_beat = f64::from(STEPS_PER_BEAT);
    let steps_per_bar = (beats_per_bar * steps_per_beat).round().max(1.0) as i64;

    let step_index = ((beats * steps_per_beat).floor() as i64).rem_euclid(steps_per_bar);
    TransportSnapshot {
        mode,
        playing,
        bpm,
        bar: (beats / beats_per_bar).floor() as i64 + 1,
        beat: (beats % beats_per_bar).floor() as i64 + 1,
        step: step_index + 1,
        step_index,
        position_bars: beats / beats_per_bar,
        position_beats: beats,
        timestamp,
    }
}

fn sanitize_beats_per_bar(beats_per_bar: f64) -> f64 {
    if beats_per_bar.is_finite() && beats_per_bar > 0.0 {
        beats_per_bar
    } else {
        time::DEFAULT_BEATS_PER_BAR
    }
}

const fn default_tick_bpm() -> f64 {
    time::FALLBACK_BPM
}
