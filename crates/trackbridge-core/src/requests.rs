//! Loosely typed inbound commands, normalized at the boundary.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{
    bridge::Peer,
    engine::{
        AddPluginRequest, CreateClipRequest, CreatePatternRequest, CreateTrackRequest, MixerPatch,
        PatternPatch,
    },
    model::{Fades, Project, TrackId, ViewPrefs},
    reconcile::ResyncPlan,
    studio::{Studio, StudioError},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd")]
pub enum StudioRequest {
    #[serde(rename = "project.get")]
    ProjectGet,
    #[serde(rename = "project.save")]
    ProjectSave { path: PathBuf },
    #[serde(rename = "project.load")]
    ProjectLoad { path: PathBuf },
    #[serde(rename = "project.replace")]
    ProjectReplace { project: Box<Project> },
    #[serde(rename = "project.set_time_signature", alias = "project.time-signature")]
    SetTimeSignature { numerator: u32, denominator: u32 },
    #[serde(rename = "project.set_view")]
    SetView { view: ViewPrefs },

    #[serde(rename = "track.create", alias = "track:create")]
    TrackCreate(CreateTrackRequest),
    #[serde(rename = "track.insert")]
    TrackInsert {
        position: u32,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },
    #[serde(rename = "track.delete", alias = "track:delete")]
    TrackDelete {
        #[serde(alias = "trackId")]
        track_id: TrackId,
    },
    #[serde(rename = "track.duplicate", alias = "track:duplicate")]
    TrackDuplicate {
        #[serde(alias = "trackId")]
        track_id: TrackId,
    },
    #[serde(rename = "track.reorder", alias = "track:reorder")]
    TrackReorder {
        #[serde(alias = "fromTrackId", alias = "from_track_id")]
        from: TrackId,
        #[serde(alias = "toTrackId", alias = "to_track_id")]
        to: TrackId,
    },
    #[serde(rename = "track.rename")]
    TrackRename {
        #[serde(alias = "trackId")]
        track_id: TrackId,
        name: String,
    },

    #[serde(rename = "clip.create", alias = "clip:create")]
    ClipCreate(CreateClipRequest),
    #[serde(rename = "clip.move", alias = "clip:move")]
    ClipMove {
        #[serde(alias = "trackId")]
        track_id: TrackId,
        #[serde(alias = "clipId")]
        clip_id: String,
        start: f64,
        #[serde(default, alias = "targetTrackId", alias = "target_track_id")]
        target_track: Option<TrackId>,
    },
    #[serde(rename = "clip.resize", alias = "clip:resize")]
    ClipResize {
        #[serde(alias = "trackId")]
        track_id: TrackId,
        #[serde(alias = "clipId")]
        clip_id: String,
        length: f64,
    },
    #[serde(rename = "clip.set_fades")]
    ClipFades {
        #[serde(alias = "trackId")]
        track_id: TrackId,
        #[serde(alias = "clipId")]
        clip_id: String,
        fades: Fades,
    },
    #[serde(rename = "clip.delete", alias = "clip:delete")]
    ClipDelete {
        #[serde(alias = "trackId")]
        track_id: TrackId,
        #[serde(alias = "clipId")]
        clip_id: String,
    },

    #[serde(rename = "pattern.create", alias = "pattern:create")]
    PatternCreate(CreatePatternRequest),
    #[serde(rename = "pattern.update", alias = "pattern:update")]
    PatternUpdate {
        #[serde(alias = "patternId")]
        pattern_id: String,
        #[serde(default)]
        patch: PatternPatch,
    },
    #[serde(rename = "pattern.delete", alias = "pattern:delete")]
    PatternDelete {
        #[serde(alias = "patternId")]
        pattern_id: String,
    },

    #[serde(rename = "plugin.add", alias = "vst:add")]
    PluginAdd(AddPluginRequest),
    #[serde(rename = "plugin.remove", alias = "vst:remove")]
    PluginRemove {
        #[serde(alias = "nodeId")]
        node_id: String,
    },
    #[serde(rename = "plugin.reorder")]
    PluginReorder {
        #[serde(alias = "nodeId")]
        node_id: String,
        #[serde(alias = "toIndex")]
        to_index: u32,
    },
    #[serde(rename = "plugin.set_param", alias = "vst:param:set")]
    PluginParam {
        #[serde(alias = "nodeId")]
        node_id: String,
        #[serde(alias = "paramId")]
        param_id: String,
        value: f64,
    },
    #[serde(rename = "plugin.set_bypass")]
    PluginBypass {
        #[serde(alias = "nodeId")]
        node_id: String,
        bypassed: bool,
    },
    #[serde(rename = "plugin.open_editor", alias = "vst:editor:open")]
    PluginEditor {
        #[serde(alias = "nodeId")]
        node_id: String,
    },
    #[serde(rename = "plugin.catalog", alias = "vst:scan")]
    PluginCatalog,

    #[serde(rename = "mixer.patch", alias = "track:patch")]
    MixerPatch {
        #[serde(alias = "trackId")]
        track_id: TrackId,
        #[serde(default)]
        volume: Option<f64>,
        #[serde(default)]
        pan: Option<f64>,
        #[serde(default)]
        mute: Option<bool>,
        #[serde(default)]
        solo: Option<bool>,
        #[serde(default, alias = "recordArmed")]
        record_armed: Option<bool>,
    },

    #[serde(rename = "transport.get_state")]
    TransportGet,
    #[serde(rename = "transport.play")]
    TransportPlay,
    #[serde(rename = "transport.pause")]
    TransportPause,
    #[serde(rename = "transport.stop")]
    TransportStop,
    #[serde(rename = "transport.seek")]
    TransportSeek {
        #[serde(alias = "positionBeats")]
        position_beats: f64,
    },
    #[serde(rename = "transport.set_bpm")]
    TransportSetBpm { bpm: f64 },

    #[serde(rename = "history.undo", alias = "undo")]
    Undo,
    #[serde(rename = "history.redo", alias = "redo")]
    Redo,
    #[serde(rename = "sync.full")]
    FullResync,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StudioResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StudioResponse {
    #[must_use]
    pub fn success(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => Self {
                ok: true,
                payload: Some(payload),
                error: None,
            },
            Err(error) => Self::failure(format!("failed to encode response: {error}")),
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

impl<T: Serialize> From<Result<T, StudioError>> for StudioResponse {
    fn from(value: Result<T, StudioError>) -> Self {
        match value {
            Ok(payload) => Self::success(payload),
            Err(error) => Self::failure(error.to_string()),
        }
    }
}

/// Parses a raw JSON command, reporting malformed input as a failed response.
pub fn parse_request(raw: Value) -> Result<StudioRequest, StudioResponse> {
    serde_json::from_value(raw)
        .map_err(|error| StudioResponse::failure(format!("invalid request: {error}")))
}

impl<P: Peer + 'static> Studio<P> {
    #[instrument(skip(self, request))]
    pub async fn handle(&self, request: StudioRequest) -> StudioResponse {
        debug!(?request, "studio request");
        match request {
            StudioRequest::ProjectGet => StudioResponse::success(self.project()),
            StudioRequest::ProjectSave { path } => self.save_project(&path).into(),
            StudioRequest::ProjectLoad { path } => self.load_project(&path).await.into(),
            StudioRequest::ProjectReplace { project } => self.replace_project(*project).await.into(),
            StudioRequest::SetTimeSignature {
                numerator,
                denominator,
            } => self
                .apply(ResyncPlan::clips_only(), |engine| {
                    engine.set_time_signature(numerator, denominator)
                })
                .await
                .into(),
            StudioRequest::SetView { view } => self
                .mutate(|engine| engine.set_view_prefs(view))
                .map(|(view, _)| view)
                .into(),

            StudioRequest::TrackCreate(request) => self
                .apply(ResyncPlan::full(), |engine| engine.create_track(request))
                .await
                .into(),
            StudioRequest::TrackInsert {
                position,
                name,
                color,
            } => self
                .apply(ResyncPlan::full(), |engine| {
                    engine.insert_track(position, CreateTrackRequest { name, color })
                })
                .await
                .into(),
            StudioRequest::TrackDelete { track_id } => self
                .apply(ResyncPlan::full(), |engine| engine.delete_track(track_id))
                .await
                .into(),
            StudioRequest::TrackDuplicate { track_id } => self
                .apply(ResyncPlan::full(), |engine| engine.duplicate_track(track_id))
                .await
                .into(),
            StudioRequest::TrackReorder { from, to } => self
                .apply(ResyncPlan::full(), |engine| engine.reorder_track(from, to))
                .await
                .into(),
            StudioRequest::TrackRename { track_id, name } => self
                .mutate(|engine| engine.rename_track(track_id, name))
                .map(|(track, _)| track)
                .into(),

            StudioRequest::ClipCreate(request) => self
                .apply(ResyncPlan::clips_only(), |engine| engine.create_clip(request))
                .await
                .into(),
            StudioRequest::ClipMove {
                track_id,
                clip_id,
                start,
                target_track,
            } => self
                .apply(ResyncPlan::clips_only(), |engine| {
                    engine.move_clip(track_id, &clip_id, start, target_track)
                })
                .await
                .into(),
            StudioRequest::ClipResize {
                track_id,
                clip_id,
                length,
            } => self
                .apply(ResyncPlan::clips_only(), |engine| {
                    engine.resize_clip(track_id, &clip_id, length)
                })
                .await
                .into(),
            StudioRequest::ClipFades {
                track_id,
                clip_id,
                fades,
            } => self
                .apply(ResyncPlan::clips_only(), |engine| {
                    engine.set_clip_fades(track_id, &clip_id, fades)
                })
                .await
                .into(),
            StudioRequest::ClipDelete { track_id, clip_id } => self
                .apply(ResyncPlan::clips_only(), |engine| {
                    engine.delete_clip(track_id, &clip_id)
                })
                .await
                .into(),

            StudioRequest::PatternCreate(request) => self
                .mutate(|engine| engine.create_pattern(request))
                .map(|(pattern, _)| pattern)
                .into(),
            StudioRequest::PatternUpdate { pattern_id, patch } => self
                .mutate(|engine| engine.update_pattern(&pattern_id, patch))
                .map(|(pattern, _)| pattern)
                .into(),
            StudioRequest::PatternDelete { pattern_id } => self
                .apply(ResyncPlan::clips_only(), |engine| {
                    engine.delete_pattern(&pattern_id)
                })
                .await
                .map(|removal| removal.removed_clips)
                .into(),

            StudioRequest::PluginAdd(request) => self
                .apply(ResyncPlan::full(), |engine| engine.add_plugin_node(request))
                .await
                .into(),
            StudioRequest::PluginRemove { node_id } => self.remove_plugin(&node_id).await.into(),
            StudioRequest::PluginReorder { node_id, to_index } => self
                .apply(ResyncPlan::full(), |engine| {
                    engine.reorder_plugin_node(&node_id, to_index)
                })
                .await
                .into(),
            StudioRequest::PluginParam {
                node_id,
                param_id,
                value,
            } => self
                .set_plugin_parameter(&node_id, &param_id, value)
                .await
                .into(),
            StudioRequest::PluginBypass { node_id, bypassed } => {
                self.set_plugin_bypass(&node_id, bypassed).await.into()
            }
            StudioRequest::PluginEditor { node_id } => self.open_plugin_editor(&node_id).await.into(),
            StudioRequest::PluginCatalog => self.plugin_catalog().await.into(),

            StudioRequest::MixerPatch {
                track_id,
                volume,
                pan,
                mute,
                solo,
                record_armed,
            } => self
                .apply(ResyncPlan::mixer_only(), |engine| {
                    engine.patch_mixer(
                        track_id,
                        MixerPatch {
                            volume,
                            pan,
                            mute,
                            solo,
                            record_armed,
                        },
                    )
                })
                .await
                .into(),

            StudioRequest::TransportGet => StudioResponse::success(self.refresh_transport().await),
            StudioRequest::TransportPlay => self.play().await.into(),
            StudioRequest::TransportPause => self.pause().await.into(),
            StudioRequest::TransportStop => self.stop().await.into(),
            StudioRequest::TransportSeek { position_beats } => self.seek(position_beats).await.into(),
            StudioRequest::TransportSetBpm { bpm } => self.set_bpm(bpm).await.into(),

            StudioRequest::Undo => self.undo().await.into(),
            StudioRequest::Redo => self.redo().await.into(),
            StudioRequest::FullResync => StudioResponse::success(self.resync(ResyncPlan::full()).await),
        }
    }
}
