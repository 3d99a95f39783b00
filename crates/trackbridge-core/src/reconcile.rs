//! Brings the native peer in line with a project snapshot.
//!
//! A pass is an ordered pipeline of best-effort steps. Each step records what
//! it managed and what failed in the [`ResyncReport`]; no single failure stops
//! the pass. Running the same pass twice leaves the peer in the same state.

use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Instant,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    assets,
    bridge::{BridgeError, ClipImport, Command, Peer},
    model::{Clip, ClipSource, MixerEntry, PluginNode, Project, TrackId},
    time,
};

/// Instrument loaded when a node created by name is missing from the peer catalog.
pub const DEFAULT_INSTRUMENT_UID: &str = "internal:tracktion:4osc";
pub const MAX_REPORTED_ERRORS: usize = 10;

/// Which steps a pass runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResyncPlan {
    pub reset_structure: bool,
    pub plugins: bool,
    pub clips: bool,
    pub mixer: bool,
}

impl ResyncPlan {
    /// Everything, starting from an empty edit.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            reset_structure: true,
            plugins: true,
            clips: true,
            mixer: true,
        }
    }

    #[must_use]
    pub const fn clips_only() -> Self {
        Self {
            reset_structure: false,
            plugins: false,
            clips: true,
            mixer: false,
        }
    }

    #[must_use]
    pub const fn mixer_only() -> Self {
        Self {
            reset_structure: false,
            plugins: false,
            clips: false,
            mixer: true,
        }
    }

    #[must_use]
    pub const fn nothing() -> Self {
        Self {
            reset_structure: false,
            plugins: false,
            clips: false,
            mixer: false,
        }
    }

    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            reset_structure: self.reset_structure || other.reset_structure,
            plugins: self.plugins || other.plugins,
            clips: self.clips || other.clips,
            mixer: self.mixer || other.mixer,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::nothing()
    }
}

/// Transport state taken before a pass, restored at the end of it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TransportCapture {
    pub position_beats: f64,
    pub playing: bool,
    pub bpm: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipSyncSummary {
    pub total: usize,
    pub synced: usize,
    pub failed: usize,
    pub last_errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginRestoreSummary {
    pub restored: usize,
    pub failed: usize,
    pub fallbacks: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MixerSyncSummary {
    pub applied: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Peer-side index of a restored node, to be folded back into the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginResolution {
    pub node_id: String,
    pub track_id: TrackId,
    pub peer_index: i32,
    pub loaded_uid: String,
    pub fallback: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResyncReport {
    pub reset_track_count: Option<u32>,
    pub reset_error: Option<String>,
    pub plugins: PluginRestoreSummary,
    pub resolutions: Vec<PluginResolution>,
    pub clear_error: Option<String>,
    pub clips: ClipSyncSummary,
    pub mixer: MixerSyncSummary,
    pub transport_errors: Vec<String>,
    pub transport_restored: bool,
    pub duration_ms: u64,
}

impl ResyncReport {
    /// True when every attempted step and item succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.reset_error.is_none()
            && self.clear_error.is_none()
            && self.plugins.failed == 0
            && self.plugins.errors.is_empty()
            && self.clips.failed == 0
            && self.mixer.failed == 0
            && self.transport_errors.is_empty()
    }
}

/// Runs one reconciliation pass of `project` against `peer`.
#[instrument(skip(peer, project, capture), fields(project_id = %project.id))]
pub async fn resync<P: Peer>(
    peer: &P,
    project: &Project,
    media_root: &Path,
    plan: ResyncPlan,
    capture: Option<TransportCapture>,
) -> ResyncReport {
    let started = Instant::now();
    let mut report = ResyncReport::default();

    if plan.reset_structure {
        reset_structure(peer, project, &mut report).await;
    }
    if plan.plugins {
        restore_plugins(peer, project, &mut report).await;
    }
    if plan.clips {
        sync_audio_clips(peer, project, media_root, &mut report).await;
    }
    if plan.mixer {
        sync_mixer(peer, project, &mut report).await;
    }
    restore_transport(peer, capture, &mut report).await;

    report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        clips_synced = report.clips.synced,
        clips_failed = report.clips.failed,
        plugins_restored = report.plugins.restored,
        plugins_failed = report.plugins.failed,
        mixer_failed = report.mixer.failed,
        duration_ms = report.duration_ms,
        "resync complete"
    );
    report
}

/// Track count for `edit:reset`, covering every id the document mentions.
#[must_use]
pub fn reset_track_count(project: &Project) -> u32 {
    let count = u32::try_from(project.tracks.len()).unwrap_or(u32::MAX);
    count.max(project.max_referenced_track_id()).max(1)
}

async fn reset_structure<P: Peer>(peer: &P, project: &Project, report: &mut ResyncReport) {
    let track_count = reset_track_count(project);
    match peer.request(Command::EditReset { track_count }).await {
        Ok(_) => {
            report.reset_track_count = Some(track_count);
            debug!(track_count, "peer edit reset");
        }
        Err(error) => {
            warn!(%error, "peer edit reset failed");
            report.reset_error = Some(error.to_string());
        }
    }
}

async fn restore_plugins<P: Peer>(peer: &P, project: &Project, report: &mut ResyncReport) {
    let mut nodes: Vec<&PluginNode> = project.plugin_nodes.iter().collect();
    nodes.sort_by_key(|node| (node.track_id, node.plugin_index));

    for node in nodes {
        let resolution = match load_node(peer, node).await {
            Ok(resolution) => resolution,
            Err(error) => {
                warn!(node_id = %node.id, %error, "plugin restore failed");
                report.plugins.failed += 1;
                report
                    .plugins
                    .errors
                    .push(format!("{} ({}): {error}", node.name, node.id));
                continue;
            }
        };

        replay_node_state(peer, node, resolution.peer_index, &mut report.plugins).await;
        report.plugins.restored += 1;
        if resolution.fallback {
            report.plugins.fallbacks += 1;
        }
        report.resolutions.push(resolution);
    }
}

async fn load_node<P: Peer>(peer: &P, node: &PluginNode) -> Result<PluginResolution, BridgeError> {
    let requested = node.load_identifier().to_string();
    let (payload, loaded_uid, fallback) = match peer
        .request(Command::VstLoad {
            plugin_uid: requested.clone(),
            track_id: node.track_id,
        })
        .await
    {
        Ok(payload) => (payload, requested, false),
        Err(error) if error.is_not_found() && node.plugin_uid.is_none() => {
            info!(node_id = %node.id, %requested, "plugin missing, loading default instrument");
            let payload = peer
                .request(Command::VstLoad {
                    plugin_uid: DEFAULT_INSTRUMENT_UID.to_string(),
                    track_id: node.track_id,
                })
                .await?;
            (payload, DEFAULT_INSTRUMENT_UID.to_string(), true)
        }
        Err(error) => return Err(error),
    };

    let peer_index = reported_plugin_index(&payload)
        .unwrap_or_else(|| i32::try_from(node.plugin_index).unwrap_or(i32::MAX));
    Ok(PluginResolution {
        node_id: node.id.clone(),
        track_id: node.track_id,
        peer_index,
        loaded_uid,
        fallback,
    })
}

fn reported_plugin_index(payload: &Value) -> Option<i32> {
    let plugin = payload.get("plugin").unwrap_or(payload);
    plugin
        .get("pluginIndex")
        .or_else(|| plugin.get("plugin_index"))
        .and_then(Value::as_i64)
        .and_then(|index| i32::try_from(index).ok())
}

async fn replay_node_state<P: Peer>(
    peer: &P,
    node: &PluginNode,
    peer_index: i32,
    summary: &mut PluginRestoreSummary,
) {
    for (param_id, value) in &node.parameters {
        let command = Command::VstParamSet {
            track_id: node.track_id,
            plugin_index: peer_index,
            param_id: param_id.clone(),
            value: *value,
        };
        if let Err(error) = peer.request(command).await {
            summary
                .errors
                .push(format!("{} param {param_id}: {error}", node.id));
        }
    }

    if node.bypassed {
        let command = Command::VstBypass {
            track_id: node.track_id,
            plugin_index: peer_index,
            bypassed: true,
        };
        if let Err(error) = peer.request(command).await {
            summary.errors.push(format!("{} bypass: {error}", node.id));
        }
    }
}

/// One audio clip ready to hand to the peer, or the reason it is not.
type PreparedClip = Result<ClipImport, String>;

struct ClipJob {
    track_id: TrackId,
    clip: Clip,
}

async fn sync_audio_clips<P: Peer>(
    peer: &P,
    project: &Project,
    media_root: &Path,
    report: &mut ResyncReport,
) {
    if let Err(error) = peer.request(Command::EditClearAudioClips).await {
        warn!(%error, "clearing peer audio clips failed");
        report.clear_error = Some(error.to_string());
    }

    let jobs: Vec<ClipJob> = project
        .audio_clips()
        .map(|(track_id, clip, _)| ClipJob {
            track_id,
            clip: clip.clone(),
        })
        .collect();
    let summary = &mut report.clips;
    summary.total = jobs.len();
    if jobs.is_empty() {
        return;
    }

    let bpm = project.bpm;
    let beats_per_bar = project.beats_per_bar();
    let media_root = media_root.to_path_buf();
    let job_count = jobs.len();
    let prepared = tokio::task::spawn_blocking(move || {
        jobs.iter()
            .map(|job| prepare_clip(job, &media_root, bpm, beats_per_bar))
            .collect::<Vec<PreparedClip>>()
    })
    .await
    .unwrap_or_else(|error| vec![Err(format!("clip preparation panicked: {error}")); job_count]);

    for prepared in prepared {
        let outcome = match prepared {
            Ok(import) => {
                let label = import.source_path.clone();
                peer.request(Command::ClipImportFile(import))
                    .await
                    .map_err(|error| format!("{label}: {error}"))
            }
            Err(reason) => Err(reason),
        };
        match outcome {
            Ok(_) => summary.synced += 1,
            Err(reason) => {
                debug!(%reason, "audio clip not synced");
                summary.failed += 1;
                push_bounded_error(&mut summary.last_errors, reason);
            }
        }
    }
}

fn prepare_clip(job: &ClipJob, media_root: &Path, bpm: f64, beats_per_bar: f64) -> PreparedClip {
    let ClipSource::Audio(source) = &job.clip.source else {
        return Err(format!("clip {} has no audio source", job.clip.id));
    };
    let resolved: PathBuf = assets::resolve_source_path(media_root, &source.path)
        .ok_or_else(|| format!("clip {}: no source path", job.clip.id))?;
    File::open(&resolved)
        .map_err(|error| format!("clip {}: {}: {error}", job.clip.id, resolved.display()))?;

    let source_offset_seconds = assets::leading_silence_for_source(source, &resolved);
    Ok(ClipImport {
        track_id: job.track_id,
        source_path: resolved.display().to_string(),
        start: job.clip.start,
        length: job.clip.length,
        start_seconds: time::bars_to_seconds(job.clip.start, bpm, beats_per_bar),
        length_seconds: time::bars_to_seconds(job.clip.length, bpm, beats_per_bar),
        source_offset_seconds,
        fade_in: job.clip.fades.fade_in,
        fade_out: job.clip.fades.fade_out,
        fade_in_curve: job.clip.fades.fade_in_curve,
        fade_out_curve: job.clip.fades.fade_out_curve,
        kind: "audio",
    })
}

async fn sync_mixer<P: Peer>(peer: &P, project: &Project, report: &mut ResyncReport) {
    for track in &project.tracks {
        let entry = project
            .mixer_entry(track.track_id)
            .cloned()
            .unwrap_or_else(|| MixerEntry::new(track.track_id));
        let mut track_failed = false;
        for command in mixer_commands(&entry) {
            let name = command.name();
            if let Err(error) = peer.request(command).await {
                track_failed = true;
                push_bounded_error(
                    &mut report.mixer.errors,
                    format!("track {} {name}: {error}", entry.track_id),
                );
            }
        }
        if track_failed {
            report.mixer.failed += 1;
        } else {
            report.mixer.applied += 1;
        }
    }
}

/// Peer commands that reproduce one mixer entry.
#[must_use]
pub fn mixer_commands(entry: &MixerEntry) -> [Command; 5] {
    let track_id = entry.track_id;
    [
        Command::TrackSetMute {
            track_id,
            mute: entry.mute,
        },
        Command::TrackSetSolo {
            track_id,
            solo: entry.solo,
        },
        Command::TrackSetVolume {
            track_id,
            volume: entry.volume,
        },
        Command::TrackSetPan {
            track_id,
            pan: entry.pan,
        },
        Command::TrackSetRecordArm {
            track_id,
            record_armed: entry.record_armed,
        },
    ]
}

async fn restore_transport<P: Peer>(
    peer: &P,
    capture: Option<TransportCapture>,
    report: &mut ResyncReport,
) {
    if let Err(error) = peer.request(Command::TransportEnsureContext).await {
        report.transport_errors.push(error.to_string());
    }
    let Some(capture) = capture else {
        return;
    };

    let bpm = time::clamp_bpm(capture.bpm);
    let mut steps = vec![
        Command::TransportSeek {
            position_beats: capture.position_beats.max(0.0),
        },
        Command::TransportSetBpm { bpm },
    ];
    if capture.playing {
        steps.push(Command::TransportPlay);
        steps.push(Command::TransportSetBpm { bpm });
    }

    let mut clean = true;
    for command in steps {
        if let Err(error) = peer.request(command).await {
            clean = false;
            report.transport_errors.push(error.to_string());
        }
    }
    report.transport_restored = clean;
}

fn push_bounded_error(errors: &mut Vec<String>, error: String) {
    errors.push(error);
    if errors.len() > MAX_REPORTED_ERRORS {
        let excess = errors.len() - MAX_REPORTED_ERRORS;
        errors.drain(..excess);
    }
}
