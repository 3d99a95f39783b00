use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time;

pub const DEFAULT_BPM: f64 = 128.0;
pub const DEFAULT_PATTERN_LENGTH: u32 = 16;
pub const DEFAULT_TRACK_VOLUME: f64 = 0.8;
pub const DEFAULT_TRACK_PAN: f64 = 0.0;
pub const DEFAULT_TRACK_COLOR: &str = "#52e1c4";

/// One-based, contiguous track number.
pub type TrackId = u32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub mixer: Vec<MixerEntry>,
    #[serde(default)]
    pub plugin_nodes: Vec<PluginNode>,
    #[serde(default)]
    pub view: ViewPrefs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    #[must_use]
    pub fn new(title: impl Into<String>, bpm: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            bpm: time::clamp_bpm(bpm),
            time_signature: TimeSignature::default(),
            tracks: Vec::new(),
            patterns: Vec::new(),
            mixer: Vec::new(),
            plugin_nodes: Vec::new(),
            view: ViewPrefs::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub fn beats_per_bar(&self) -> f64 {
        self.time_signature.beats_per_bar()
    }

    #[must_use]
    pub fn track(&self, track_id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|track| track.track_id == track_id)
    }

    pub fn track_mut(&mut self, track_id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|track| track.track_id == track_id)
    }

    #[must_use]
    pub fn pattern(&self, pattern_id: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|pattern| pattern.id == pattern_id)
    }

    #[must_use]
    pub fn mixer_entry(&self, track_id: TrackId) -> Option<&MixerEntry> {
        self.mixer.iter().find(|entry| entry.track_id == track_id)
    }

    #[must_use]
    pub fn plugin_node(&self, node_id: &str) -> Option<&PluginNode> {
        self.plugin_nodes.iter().find(|node| node.id == node_id)
    }

    /// Plugin nodes of one track in chain order.
    #[must_use]
    pub fn plugin_chain(&self, track_id: TrackId) -> Vec<&PluginNode> {
        let mut chain: Vec<_> = self
            .plugin_nodes
            .iter()
            .filter(|node| node.track_id == track_id)
            .collect();
        chain.sort_by_key(|node| node.plugin_index);
        chain
    }

    #[must_use]
    pub fn clip_count(&self) -> usize {
        self.tracks.iter().map(|track| track.clips.len()).sum()
    }

    /// Highest track id referenced anywhere in the document.
    #[must_use]
    pub fn max_referenced_track_id(&self) -> TrackId {
        let tracks = self.tracks.iter().map(|track| track.track_id);
        let mixer = self.mixer.iter().map(|entry| entry.track_id);
        let nodes = self.plugin_nodes.iter().map(|node| node.track_id);
        tracks.chain(mixer).chain(nodes).max().unwrap_or_default()
    }

    pub fn audio_clips(&self) -> impl Iterator<Item = (TrackId, &Clip, &AudioSource)> {
        self.tracks.iter().flat_map(|track| {
            track.clips.iter().filter_map(move |clip| match &clip.source {
                ClipSource::Audio(audio) => Some((track.track_id, clip, audio)),
                ClipSource::Pattern { .. } => None,
            })
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl TimeSignature {
    #[must_use]
    pub fn beats_per_bar(&self) -> f64 {
        time::beats_per_bar(self.numerator, self.denominator)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.numerator > 0 && self.denominator > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewPrefs {
    pub zoom: f64,
    pub follow_playhead: bool,
    pub metronome: bool,
    pub snap_bars: f64,
}

impl Default for ViewPrefs {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            follow_playhead: true,
            metronome: false,
            snap_bars: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub track_id: TrackId,
    pub name: String,
    #[serde(default = "default_track_color")]
    pub color: String,
    #[serde(default)]
    pub clips: Vec<Clip>,
}

impl Track {
    #[must_use]
    pub fn new(track_id: TrackId, name: impl Into<String>) -> Self {
        Self {
            track_id,
            name: name.into(),
            color: default_track_color(),
            clips: Vec::new(),
        }
    }

    #[must_use]
    pub fn clip(&self, clip_id: &str) -> Option<&Clip> {
        self.clips.iter().find(|clip| clip.id == clip_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clip {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Start position in bars.
    pub start: f64,
    /// Length in bars.
    pub length: f64,
    pub source: ClipSource,
    #[serde(default)]
    pub fades: Fades,
}

impl Clip {
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.length
    }

    #[must_use]
    pub fn pattern_id(&self) -> Option<&str> {
        match &self.source {
            ClipSource::Pattern { pattern_id } => Some(pattern_id),
            ClipSource::Audio(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClipSource {
    Pattern { pattern_id: String },
    Audio(AudioSource),
}

/// Imported-file metadata as handed over by the upload collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AudioSource {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peaks: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_offset_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FadeCurve {
    #[default]
    Linear,
    Convex,
    Concave,
    SCurve,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Fades {
    pub fade_in: f64,
    pub fade_out: f64,
    pub fade_in_curve: FadeCurve,
    pub fade_out_curve: FadeCurve,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Drum,
    Melodic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pattern {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: PatternKind,
    /// Length in steps.
    pub length: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<DrumStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<PatternNote>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrumStep {
    pub lane: String,
    pub index: u32,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternNote {
    pub pitch: u8,
    pub start: u32,
    pub length: u32,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MixerEntry {
    pub track_id: TrackId,
    pub volume: f64,
    pub pan: f64,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub record_armed: bool,
}

impl MixerEntry {
    #[must_use]
    pub fn new(track_id: TrackId) -> Self {
        Self {
            track_id,
            volume: DEFAULT_TRACK_VOLUME,
            pan: DEFAULT_TRACK_PAN,
            mute: false,
            solo: false,
            record_armed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginNode {
    pub id: String,
    pub track_id: TrackId,
    pub plugin_index: u32,
    /// Explicit catalog identifier; absent when the node was created by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_uid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default)]
    pub bypassed: bool,
    /// Index of the live instance on the peer, folded back after a resync.
    #[serde(skip)]
    pub peer_index: Option<i32>,
}

impl PluginNode {
    /// Identifier used when asking the peer to load this node.
    #[must_use]
    pub fn load_identifier(&self) -> &str {
        self.plugin_uid.as_deref().unwrap_or(&self.name)
    }
}

fn default_track_color() -> String {
    DEFAULT_TRACK_COLOR.to_string()
}

const fn default_velocity() -> u8 {
    100
}
