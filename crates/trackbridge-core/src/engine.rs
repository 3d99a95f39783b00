use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    model::{
        AudioSource, Clip, ClipSource, DEFAULT_BPM, DrumStep, Fades, MixerEntry, Pattern, PatternKind,
        PatternNote, PluginNode, Project, TimeSignature, Track, TrackId, ViewPrefs,
    },
    renumber::{self, TrackSlot},
    time,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("track id must be a positive integer, got {0}")]
    InvalidTrackId(TrackId),
    #[error("track not found: {0}")]
    TrackNotFound(TrackId),
    #[error("invalid track position {position} (track count {count})")]
    InvalidPosition { position: u32, count: usize },
    #[error("invalid reorder from {from} to {to}")]
    InvalidReorder { from: TrackId, to: TrackId },
    #[error("clip not found: {clip_id} on track {track_id}")]
    ClipNotFound { track_id: TrackId, clip_id: String },
    #[error("clip id already used on track {track_id}: {clip_id}")]
    DuplicateClip { track_id: TrackId, clip_id: String },
    #[error("pattern not found: {0}")]
    PatternNotFound(String),
    #[error("pattern id already used: {0}")]
    DuplicatePattern(String),
    #[error("plugin node not found: {0}")]
    PluginNodeNotFound(String),
    #[error("plugin node id already used: {0}")]
    DuplicatePluginNode(String),
    #[error("invalid {field}: {value}")]
    InvalidGeometry { field: &'static str, value: f64 },
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("invalid time signature {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u32, denominator: u32 },
    #[error("malformed project: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTrackRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClipRequest {
    #[serde(alias = "trackId")]
    pub track_id: TrackId,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub start: f64,
    pub length: f64,
    pub source: ClipSource,
    #[serde(default)]
    pub fades: Fades,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePatternRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: PatternKind,
    pub length: u32,
    #[serde(default)]
    pub steps: Vec<DrumStep>,
    #[serde(default)]
    pub notes: Vec<PatternNote>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternPatch {
    pub name: Option<String>,
    pub length: Option<u32>,
    pub steps: Option<Vec<DrumStep>>,
    pub notes: Option<Vec<PatternNote>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPluginRequest {
    #[serde(alias = "trackId")]
    pub track_id: TrackId,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "pluginUid")]
    pub plugin_uid: Option<String>,
    pub name: String,
    /// Desired chain position; appended when absent.
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MixerPatch {
    pub volume: Option<f64>,
    pub pan: Option<f64>,
    pub mute: Option<bool>,
    pub solo: Option<bool>,
    #[serde(alias = "recordArmed")]
    pub record_armed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternRemoval {
    pub pattern: Pattern,
    pub removed_clips: usize,
}

#[derive(Debug, Clone)]
pub struct Engine {
    project: Project,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            project: Project::new("Untitled", DEFAULT_BPM),
        }
    }
}

impl Engine {
    #[must_use]
    pub fn new(project: Project) -> Self {
        Self { project }
    }

    #[must_use]
    pub fn project(&self) -> &Project {
        &self.project
    }

    #[instrument(skip(self, project), fields(project_id = %project.id))]
    pub fn replace_project(&mut self, project: Project) {
        self.project = project;
        info!("project replaced");
    }

    /// Runs `edit` against a draft and commits it only on success.
    fn mutate<T>(
        &mut self,
        edit: impl FnOnce(&mut Project) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut draft = self.project.clone();
        let value = edit(&mut draft)?;
        if draft != self.project {
            draft.touch();
            self.project = draft;
        } else {
            debug!("mutation left project unchanged");
        }
        Ok(value)
    }

    #[instrument(skip(self), fields(project_id = %self.project.id))]
    pub fn create_track(&mut self, request: CreateTrackRequest) -> Result<Track, EngineError> {
        let position = u32::try_from(self.project.tracks.len() + 1).unwrap_or(u32::MAX);
        self.insert_track(position, request)
    }

    /// Inserts a new track so that it ends up with id `position`.
    #[instrument(skip(self), fields(project_id = %self.project.id, position))]
    pub fn insert_track(
        &mut self,
        position: u32,
        request: CreateTrackRequest,
    ) -> Result<Track, EngineError> {
        let count = self.project.tracks.len();
        if position == 0 || position as usize > count + 1 {
            return Err(EngineError::InvalidPosition { position, count });
        }

        let track = self.mutate(|project| {
            let mut track = Track::new(
                position,
                request
                    .name
                    .unwrap_or_else(|| format!("Track {}", project.tracks.len() + 1)),
            );
            if let Some(color) = request.color {
                track.color = color;
            }

            let mut slots = renumber::current_slots(project);
            slots.insert(position as usize - 1, TrackSlot::fresh(track));
            renumber::apply_order(project, slots);
            Ok(project.tracks[position as usize - 1].clone())
        })?;
        info!(track_id = track.track_id, "track inserted");
        Ok(track)
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, track_id))]
    pub fn delete_track(&mut self, track_id: TrackId) -> Result<Track, EngineError> {
        let index = self.track_index(track_id)?;
        let removed = self.mutate(|project| {
            let mut slots = renumber::current_slots(project);
            let removed = slots.remove(index);
            renumber::apply_order(project, slots);
            Ok(removed.track)
        })?;
        info!(remaining = self.project.tracks.len(), "track deleted");
        Ok(removed)
    }

    /// Copies a track (clips, mixer entry, plugin chain) right after the source.
    #[instrument(skip(self), fields(project_id = %self.project.id, track_id))]
    pub fn duplicate_track(&mut self, track_id: TrackId) -> Result<Track, EngineError> {
        let index = self.track_index(track_id)?;
        let duplicate = self.mutate(|project| {
            let source = project.tracks[index].clone();
            let mut copy = source.clone();
            copy.name = format!("{} copy", source.name);
            for clip in &mut copy.clips {
                clip.id = generate_id("clip");
            }

            let mut slots = renumber::current_slots(project);
            slots.insert(index + 1, TrackSlot::fresh(copy));
            let id_map = renumber::apply_order(project, slots);
            let source_id = id_map.get(&track_id).copied().unwrap_or(track_id);
            let copy_id = source_id + 1;

            if let Some(entry) = project.mixer_entry(source_id).cloned() {
                if let Some(target) = project
                    .mixer
                    .iter_mut()
                    .find(|entry| entry.track_id == copy_id)
                {
                    *target = MixerEntry {
                        track_id: copy_id,
                        ..entry
                    };
                }
            }

            let copied_nodes: Vec<_> = project
                .plugin_nodes
                .iter()
                .filter(|node| node.track_id == source_id)
                .map(|node| PluginNode {
                    id: generate_id("node"),
                    track_id: copy_id,
                    peer_index: None,
                    ..node.clone()
                })
                .collect();
            project.plugin_nodes.extend(copied_nodes);
            renumber::normalize_plugin_indices(project);

            Ok(project.tracks[index + 1].clone())
        })?;
        info!(new_track_id = duplicate.track_id, "track duplicated");
        Ok(duplicate)
    }

    /// Moves the track at id `from` so it ends up with id `to`.
    #[instrument(skip(self), fields(project_id = %self.project.id, from, to))]
    pub fn reorder_track(&mut self, from: TrackId, to: TrackId) -> Result<(), EngineError> {
        let count = self.project.tracks.len();
        if from == 0 || to == 0 || from as usize > count || to as usize > count {
            return Err(EngineError::InvalidReorder { from, to });
        }
        if from == to {
            debug!("reorder noop");
            return Ok(());
        }

        self.mutate(|project| {
            let mut slots = renumber::current_slots(project);
            let slot = slots.remove(from as usize - 1);
            slots.insert(to as usize - 1, slot);
            renumber::apply_order(project, slots);
            Ok(())
        })?;
        info!("track reordered");
        Ok(())
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, track_id))]
    pub fn rename_track(&mut self, track_id: TrackId, name: String) -> Result<Track, EngineError> {
        let index = self.track_index(track_id)?;
        self.mutate(|project| {
            project.tracks[index].name = name;
            Ok(project.tracks[index].clone())
        })
    }

    #[instrument(skip(self, request), fields(project_id = %self.project.id, track_id = request.track_id))]
    pub fn create_clip(&mut self, request: CreateClipRequest) -> Result<Clip, EngineError> {
        let index = self.track_index(request.track_id)?;
        validate_start(request.start)?;
        validate_length(request.length)?;
        validate_fades(&request.fades)?;
        if let ClipSource::Pattern { pattern_id } = &request.source {
            if self.project.pattern(pattern_id).is_none() {
                return Err(EngineError::PatternNotFound(pattern_id.clone()));
            }
        }
        if let ClipSource::Audio(audio) = &request.source {
            if audio.path.trim().is_empty() {
                return Err(EngineError::InvalidValue {
                    field: "source.path",
                    reason: "must not be empty".to_string(),
                });
            }
        }

        let clip_id = request.id.unwrap_or_else(|| generate_id("clip"));
        if self.project.tracks[index].clip(&clip_id).is_some() {
            return Err(EngineError::DuplicateClip {
                track_id: request.track_id,
                clip_id,
            });
        }

        let clip = Clip {
            id: clip_id,
            name: request.name.unwrap_or_default(),
            start: request.start,
            length: request.length,
            source: request.source,
            fades: request.fades,
        };
        self.mutate(|project| {
            project.tracks[index].clips.push(clip.clone());
            Ok(())
        })?;
        info!(clip_id = %clip.id, "clip created");
        Ok(clip)
    }

    /// Places a clip that plays `pattern_id`.
    pub fn create_pattern_clip(
        &mut self,
        track_id: TrackId,
        pattern_id: impl Into<String>,
        start: f64,
        length: f64,
    ) -> Result<Clip, EngineError> {
        self.create_clip(CreateClipRequest {
            track_id,
            id: None,
            name: None,
            start,
            length,
            source: ClipSource::Pattern {
                pattern_id: pattern_id.into(),
            },
            fades: Fades::default(),
        })
    }

    pub fn create_audio_clip(
        &mut self,
        track_id: TrackId,
        source: AudioSource,
        start: f64,
        length: f64,
    ) -> Result<Clip, EngineError> {
        self.create_clip(CreateClipRequest {
            track_id,
            id: None,
            name: None,
            start,
            length,
            source: ClipSource::Audio(source),
            fades: Fades::default(),
        })
    }

    /// Moves a clip in time and optionally onto another track.
    #[instrument(skip(self), fields(project_id = %self.project.id, track_id, clip_id = %clip_id))]
    pub fn move_clip(
        &mut self,
        track_id: TrackId,
        clip_id: &str,
        start: f64,
        target_track: Option<TrackId>,
    ) -> Result<Clip, EngineError> {
        validate_start(start)?;
        let (track_index, clip_index) = self.clip_index(track_id, clip_id)?;
        let target_index = match target_track {
            Some(target) if target != track_id => {
                let target_index = self.track_index(target)?;
                if self.project.tracks[target_index].clip(clip_id).is_some() {
                    return Err(EngineError::DuplicateClip {
                        track_id: target,
                        clip_id: clip_id.to_string(),
                    });
                }
                target_index
            }
            _ => track_index,
        };

        let moved = self.mutate(|project| {
            if target_index == track_index {
                let clip = &mut project.tracks[track_index].clips[clip_index];
                clip.start = start;
                return Ok(clip.clone());
            }
            let mut clip = project.tracks[track_index].clips.remove(clip_index);
            clip.start = start;
            project.tracks[target_index].clips.push(clip.clone());
            Ok(clip)
        })?;
        info!("clip moved");
        Ok(moved)
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, track_id, clip_id = %clip_id))]
    pub fn resize_clip(
        &mut self,
        track_id: TrackId,
        clip_id: &str,
        length: f64,
    ) -> Result<Clip, EngineError> {
        validate_length(length)?;
        let (track_index, clip_index) = self.clip_index(track_id, clip_id)?;
        self.mutate(|project| {
            let clip = &mut project.tracks[track_index].clips[clip_index];
            clip.length = length;
            Ok(clip.clone())
        })
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, track_id, clip_id = %clip_id))]
    pub fn set_clip_fades(
        &mut self,
        track_id: TrackId,
        clip_id: &str,
        fades: Fades,
    ) -> Result<Clip, EngineError> {
        validate_fades(&fades)?;
        let (track_index, clip_index) = self.clip_index(track_id, clip_id)?;
        self.mutate(|project| {
            let clip = &mut project.tracks[track_index].clips[clip_index];
            clip.fades = fades;
            Ok(clip.clone())
        })
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, track_id, clip_id = %clip_id))]
    pub fn delete_clip(&mut self, track_id: TrackId, clip_id: &str) -> Result<Clip, EngineError> {
        let (track_index, clip_index) = self.clip_index(track_id, clip_id)?;
        let removed =
            self.mutate(|project| Ok(project.tracks[track_index].clips.remove(clip_index)))?;
        info!("clip deleted");
        Ok(removed)
    }

    #[instrument(skip(self, request), fields(project_id = %self.project.id, kind = ?request.kind))]
    pub fn create_pattern(&mut self, request: CreatePatternRequest) -> Result<Pattern, EngineError> {
        validate_pattern_length(request.length)?;
        let pattern_id = request.id.unwrap_or_else(|| generate_id("pattern"));
        if pattern_id.trim().is_empty() {
            return Err(EngineError::InvalidValue {
                field: "pattern.id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.project.pattern(&pattern_id).is_some() {
            return Err(EngineError::DuplicatePattern(pattern_id));
        }

        let pattern = Pattern {
            name: request.name.unwrap_or_else(|| pattern_id.clone()),
            id: pattern_id,
            kind: request.kind,
            length: request.length,
            steps: request.steps,
            notes: request.notes,
        };
        self.mutate(|project| {
            project.patterns.push(pattern.clone());
            Ok(())
        })?;
        info!(pattern_id = %pattern.id, "pattern created");
        Ok(pattern)
    }

    #[instrument(skip(self, patch), fields(project_id = %self.project.id, pattern_id = %pattern_id))]
    pub fn update_pattern(
        &mut self,
        pattern_id: &str,
        patch: PatternPatch,
    ) -> Result<Pattern, EngineError> {
        if let Some(length) = patch.length {
            validate_pattern_length(length)?;
        }
        let index = self
            .project
            .patterns
            .iter()
            .position(|pattern| pattern.id == pattern_id)
            .ok_or_else(|| EngineError::PatternNotFound(pattern_id.to_string()))?;

        self.mutate(|project| {
            let pattern = &mut project.patterns[index];
            if let Some(name) = patch.name {
                pattern.name = name;
            }
            if let Some(length) = patch.length {
                pattern.length = length;
            }
            if let Some(steps) = patch.steps {
                pattern.steps = steps;
            }
            if let Some(notes) = patch.notes {
                pattern.notes = notes;
            }
            Ok(pattern.clone())
        })
    }

    /// Deletes a pattern together with every clip that references it.
    #[instrument(skip(self), fields(project_id = %self.project.id, pattern_id = %pattern_id))]
    pub fn delete_pattern(&mut self, pattern_id: &str) -> Result<PatternRemoval, EngineError> {
        let index = self
            .project
            .patterns
            .iter()
            .position(|pattern| pattern.id == pattern_id)
            .ok_or_else(|| EngineError::PatternNotFound(pattern_id.to_string()))?;

        let removal = self.mutate(|project| {
            let pattern = project.patterns.remove(index);
            let mut removed_clips = 0;
            for track in &mut project.tracks {
                let before = track.clips.len();
                track
                    .clips
                    .retain(|clip| clip.pattern_id() != Some(pattern_id));
                removed_clips += before - track.clips.len();
            }
            Ok(PatternRemoval {
                pattern,
                removed_clips,
            })
        })?;
        info!(removed_clips = removal.removed_clips, "pattern deleted");
        Ok(removal)
    }

    #[instrument(skip(self, request), fields(project_id = %self.project.id, track_id = request.track_id, name = %request.name))]
    pub fn add_plugin_node(&mut self, request: AddPluginRequest) -> Result<PluginNode, EngineError> {
        self.track_index(request.track_id)?;
        validate_parameters(&request.parameters)?;
        let node_id = request.id.unwrap_or_else(|| generate_id("node"));
        if self.project.plugin_node(&node_id).is_some() {
            return Err(EngineError::DuplicatePluginNode(node_id));
        }

        let chain_len = self.project.plugin_chain(request.track_id).len();
        let position = request
            .position
            .map_or(chain_len, |position| (position as usize).min(chain_len));

        let node = self.mutate(|project| {
            shift_chain(project, request.track_id, position);
            project.plugin_nodes.push(PluginNode {
                id: node_id.clone(),
                track_id: request.track_id,
                plugin_index: u32::try_from(position).unwrap_or(u32::MAX),
                plugin_uid: request.plugin_uid,
                name: request.name,
                parameters: request.parameters,
                bypassed: false,
                peer_index: None,
            });
            renumber::normalize_plugin_indices(project);
            project
                .plugin_node(&node_id)
                .cloned()
                .ok_or_else(|| EngineError::PluginNodeNotFound(node_id.clone()))
        })?;
        info!(node_id = %node.id, plugin_index = node.plugin_index, "plugin node added");
        Ok(node)
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, node_id = %node_id))]
    pub fn remove_plugin_node(&mut self, node_id: &str) -> Result<PluginNode, EngineError> {
        let index = self.node_index(node_id)?;
        let removed = self.mutate(|project| {
            let removed = project.plugin_nodes.remove(index);
            renumber::normalize_plugin_indices(project);
            Ok(removed)
        })?;
        info!("plugin node removed");
        Ok(removed)
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, node_id = %node_id, to_index))]
    pub fn reorder_plugin_node(
        &mut self,
        node_id: &str,
        to_index: u32,
    ) -> Result<PluginNode, EngineError> {
        let index = self.node_index(node_id)?;
        let track_id = self.project.plugin_nodes[index].track_id;
        let chain_len = self.project.plugin_chain(track_id).len();
        let target = (to_index as usize).min(chain_len.saturating_sub(1));

        self.mutate(|project| {
            let node = project.plugin_nodes.remove(index);
            renumber::normalize_plugin_indices(project);
            shift_chain(project, track_id, target);
            project.plugin_nodes.push(PluginNode {
                plugin_index: u32::try_from(target).unwrap_or(u32::MAX),
                ..node
            });
            renumber::normalize_plugin_indices(project);
            project
                .plugin_node(node_id)
                .cloned()
                .ok_or_else(|| EngineError::PluginNodeNotFound(node_id.to_string()))
        })
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, node_id = %node_id, param_id = %param_id))]
    pub fn set_plugin_parameter(
        &mut self,
        node_id: &str,
        param_id: &str,
        value: f64,
    ) -> Result<PluginNode, EngineError> {
        if !value.is_finite() {
            return Err(EngineError::InvalidGeometry {
                field: "parameter value",
                value,
            });
        }
        if param_id.trim().is_empty() {
            return Err(EngineError::InvalidValue {
                field: "param_id",
                reason: "must not be empty".to_string(),
            });
        }
        let index = self.node_index(node_id)?;
        self.mutate(|project| {
            let node = &mut project.plugin_nodes[index];
            node.parameters.insert(param_id.to_string(), value);
            Ok(node.clone())
        })
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, node_id = %node_id, bypassed))]
    pub fn set_plugin_bypass(
        &mut self,
        node_id: &str,
        bypassed: bool,
    ) -> Result<PluginNode, EngineError> {
        let index = self.node_index(node_id)?;
        self.mutate(|project| {
            let node = &mut project.plugin_nodes[index];
            node.bypassed = bypassed;
            Ok(node.clone())
        })
    }

    /// Records the live peer index of a node. Not a structural edit.
    pub fn resolve_plugin_index(&mut self, node_id: &str, peer_index: i32) -> bool {
        match self
            .project
            .plugin_nodes
            .iter_mut()
            .find(|node| node.id == node_id)
        {
            Some(node) => {
                node.peer_index = Some(peer_index);
                true
            }
            None => false,
        }
    }

    /// Follows the peer closing the gap left by a removed live instance.
    pub fn release_peer_index(&mut self, track_id: TrackId, removed: i32) {
        for node in &mut self.project.plugin_nodes {
            if node.track_id != track_id {
                continue;
            }
            node.peer_index = match node.peer_index {
                Some(index) if index > removed => Some(index - 1),
                other => other,
            };
        }
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, track_id))]
    pub fn patch_mixer(
        &mut self,
        track_id: TrackId,
        patch: MixerPatch,
    ) -> Result<MixerEntry, EngineError> {
        self.track_index(track_id)?;
        if let Some(volume) = patch.volume {
            validate_finite("volume", volume)?;
        }
        if let Some(pan) = patch.pan {
            validate_finite("pan", pan)?;
        }

        let entry = self.mutate(|project| {
            renumber::ensure_mixer_coverage(project);
            let entry = project
                .mixer
                .iter_mut()
                .find(|entry| entry.track_id == track_id)
                .ok_or(EngineError::TrackNotFound(track_id))?;
            if let Some(volume) = patch.volume {
                entry.volume = volume.clamp(0.0, 1.0);
            }
            if let Some(pan) = patch.pan {
                entry.pan = pan.clamp(-1.0, 1.0);
            }
            if let Some(mute) = patch.mute {
                entry.mute = mute;
            }
            if let Some(solo) = patch.solo {
                entry.solo = solo;
            }
            if let Some(record_armed) = patch.record_armed {
                entry.record_armed = record_armed;
            }
            Ok(entry.clone())
        })?;
        info!(
            mute = entry.mute,
            solo = entry.solo,
            volume = entry.volume,
            "mixer patched"
        );
        Ok(entry)
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, bpm))]
    pub fn set_bpm(&mut self, bpm: f64) -> Result<f64, EngineError> {
        let bpm = time::clamp_bpm(bpm);
        self.mutate(|project| {
            project.bpm = bpm;
            Ok(bpm)
        })
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, numerator, denominator))]
    pub fn set_time_signature(
        &mut self,
        numerator: u32,
        denominator: u32,
    ) -> Result<TimeSignature, EngineError> {
        let signature = TimeSignature {
            numerator,
            denominator,
        };
        if !signature.is_valid() || numerator > 32 || !denominator.is_power_of_two() {
            return Err(EngineError::InvalidTimeSignature {
                numerator,
                denominator,
            });
        }
        self.mutate(|project| {
            project.time_signature = signature;
            Ok(signature)
        })
    }

    #[instrument(skip(self, view), fields(project_id = %self.project.id))]
    pub fn set_view_prefs(&mut self, view: ViewPrefs) -> Result<ViewPrefs, EngineError> {
        validate_finite("view.zoom", view.zoom)?;
        validate_finite("view.snap_bars", view.snap_bars)?;
        self.mutate(|project| {
            project.view = view.clone();
            Ok(view)
        })
    }

    fn track_index(&self, track_id: TrackId) -> Result<usize, EngineError> {
        if track_id == 0 {
            return Err(EngineError::InvalidTrackId(track_id));
        }
        self.project
            .tracks
            .iter()
            .position(|track| track.track_id == track_id)
            .ok_or(EngineError::TrackNotFound(track_id))
    }

    fn clip_index(&self, track_id: TrackId, clip_id: &str) -> Result<(usize, usize), EngineError> {
        let track_index = self.track_index(track_id)?;
        let clip_index = self.project.tracks[track_index]
            .clips
            .iter()
            .position(|clip| clip.id == clip_id)
            .ok_or_else(|| EngineError::ClipNotFound {
                track_id,
                clip_id: clip_id.to_string(),
            })?;
        Ok((track_index, clip_index))
    }

    fn node_index(&self, node_id: &str) -> Result<usize, EngineError> {
        self.project
            .plugin_nodes
            .iter()
            .position(|node| node.id == node_id)
            .ok_or_else(|| EngineError::PluginNodeNotFound(node_id.to_string()))
    }
}

/// Checks the cross-collection invariants a document must satisfy before it
/// can become authoritative.
pub fn validate_project(project: &Project) -> Result<(), EngineError> {
    let malformed = |message: String| Err(EngineError::Malformed(message));

    if !project.bpm.is_finite() {
        return malformed("bpm is not finite".to_string());
    }
    if !project.time_signature.is_valid() {
        return malformed(format!(
            "time signature {}/{} is invalid",
            project.time_signature.numerator, project.time_signature.denominator
        ));
    }

    for (position, track) in project.tracks.iter().enumerate() {
        if track.track_id as usize != position + 1 {
            return malformed(format!(
                "track ids must be contiguous from 1, found {} at position {}",
                track.track_id,
                position + 1
            ));
        }
    }

    let mut pattern_ids = BTreeSet::new();
    for pattern in &project.patterns {
        if !pattern_ids.insert(pattern.id.as_str()) {
            return malformed(format!("duplicate pattern id {}", pattern.id));
        }
        if pattern.length == 0 {
            return malformed(format!("pattern {} has zero length", pattern.id));
        }
    }

    for track in &project.tracks {
        let mut clip_ids = BTreeSet::new();
        for clip in &track.clips {
            if !clip_ids.insert(clip.id.as_str()) {
                return malformed(format!(
                    "duplicate clip id {} on track {}",
                    clip.id, track.track_id
                ));
            }
            if !clip.start.is_finite() || clip.start < 0.0 {
                return malformed(format!("clip {} has invalid start", clip.id));
            }
            if !clip.length.is_finite() || clip.length <= 0.0 {
                return malformed(format!("clip {} has invalid length", clip.id));
            }
            if let Some(pattern_id) = clip.pattern_id() {
                if !pattern_ids.contains(pattern_id) {
                    return malformed(format!(
                        "clip {} references missing pattern {pattern_id}",
                        clip.id
                    ));
                }
            }
        }
    }

    let mixer_ids: Vec<_> = project.mixer.iter().map(|entry| entry.track_id).collect();
    let track_ids: Vec<_> = project.tracks.iter().map(|track| track.track_id).collect();
    if mixer_ids != track_ids {
        return malformed(format!(
            "mixer entries {mixer_ids:?} do not match tracks {track_ids:?}"
        ));
    }

    let mut node_ids = BTreeSet::new();
    let mut chains: BTreeMap<TrackId, Vec<u32>> = BTreeMap::new();
    for node in &project.plugin_nodes {
        if !node_ids.insert(node.id.as_str()) {
            return malformed(format!("duplicate plugin node id {}", node.id));
        }
        if project.track(node.track_id).is_none() {
            return malformed(format!(
                "plugin node {} references missing track {}",
                node.id, node.track_id
            ));
        }
        if node.parameters.values().any(|value| !value.is_finite()) {
            return malformed(format!("plugin node {} has non-finite parameters", node.id));
        }
        chains
            .entry(node.track_id)
            .or_default()
            .push(node.plugin_index);
    }
    for (track_id, mut indices) in chains {
        indices.sort_unstable();
        let contiguous = indices
            .iter()
            .enumerate()
            .all(|(expected, &index)| index as usize == expected);
        if !contiguous {
            return malformed(format!(
                "plugin indices on track {track_id} are not contiguous: {indices:?}"
            ));
        }
    }

    Ok(())
}

/// Makes room at `position` in a track chain by bumping later indices.
fn shift_chain(project: &mut Project, track_id: TrackId, position: usize) {
    for node in &mut project.plugin_nodes {
        if node.track_id == track_id && node.plugin_index as usize >= position {
            node.plugin_index += 1;
        }
    }
}

fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), EngineError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EngineError::InvalidGeometry { field, value })
    }
}

fn validate_start(start: f64) -> Result<(), EngineError> {
    if start.is_finite() && start >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidGeometry {
            field: "start",
            value: start,
        })
    }
}

fn validate_length(length: f64) -> Result<(), EngineError> {
    if length.is_finite() && length > 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidGeometry {
            field: "length",
            value: length,
        })
    }
}

fn validate_fades(fades: &Fades) -> Result<(), EngineError> {
    for (field, value) in [("fade_in", fades.fade_in), ("fade_out", fades.fade_out)] {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::InvalidGeometry { field, value });
        }
    }
    Ok(())
}

fn validate_pattern_length(length: u32) -> Result<(), EngineError> {
    if length == 0 {
        return Err(EngineError::InvalidValue {
            field: "pattern.length",
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

fn validate_parameters(parameters: &BTreeMap<String, f64>) -> Result<(), EngineError> {
    for value in parameters.values() {
        validate_finite("parameter value", *value)?;
    }
    Ok(())
}
