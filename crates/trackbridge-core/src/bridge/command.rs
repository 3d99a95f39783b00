use serde::Serialize;
use serde_json::{Value, json};

use crate::model::{FadeCurve, TrackId};

/// Arguments of `clip:import-file`. Positions are carried both in bars and seconds.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClipImport {
    pub track_id: TrackId,
    pub source_path: String,
    pub start: f64,
    pub length: f64,
    pub start_seconds: f64,
    pub length_seconds: f64,
    pub source_offset_seconds: f64,
    pub fade_in: f64,
    pub fade_out: f64,
    pub fade_in_curve: FadeCurve,
    pub fade_out_curve: FadeCurve,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TransportGetState,
    TransportEnsureContext,
    TransportPlay,
    TransportPause,
    TransportStop,
    TransportSetBpm { bpm: f64 },
    TransportSeek { position_beats: f64 },
    EditReset { track_count: u32 },
    EditClearAudioClips,
    VstScan,
    VstLoad { plugin_uid: String, track_id: TrackId },
    VstRemove { track_id: TrackId, plugin_index: i32 },
    VstEditorOpen { track_id: TrackId, plugin_index: i32 },
    VstParamSet {
        track_id: TrackId,
        plugin_index: i32,
        param_id: String,
        value: f64,
    },
    VstBypass {
        track_id: TrackId,
        plugin_index: i32,
        bypassed: bool,
    },
    ClipImportFile(ClipImport),
    TrackSetMute { track_id: TrackId, mute: bool },
    TrackSetSolo { track_id: TrackId, solo: bool },
    TrackSetVolume { track_id: TrackId, volume: f64 },
    TrackSetPan { track_id: TrackId, pan: f64 },
    TrackSetRecordArm { track_id: TrackId, record_armed: bool },
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::TransportGetState => "transport.get_state",
            Self::TransportEnsureContext => "transport.ensure-context",
            Self::TransportPlay => "transport.play",
            Self::TransportPause => "transport.pause",
            Self::TransportStop => "transport.stop",
            Self::TransportSetBpm { .. } => "transport.set_bpm",
            Self::TransportSeek { .. } => "transport.seek",
            Self::EditReset { .. } => "edit:reset",
            Self::EditClearAudioClips => "edit:clear-audio-clips",
            Self::VstScan => "vst:scan",
            Self::VstLoad { .. } => "vst:load",
            Self::VstRemove { .. } => "vst:remove",
            Self::VstEditorOpen { .. } => "vst:editor:open",
            Self::VstParamSet { .. } => "vst:param:set",
            Self::VstBypass { .. } => "vst:bypass",
            Self::ClipImportFile(_) => "clip:import-file",
            Self::TrackSetMute { .. } => "track:set-mute",
            Self::TrackSetSolo { .. } => "track:set-solo",
            Self::TrackSetVolume { .. } => "track:set-volume",
            Self::TrackSetPan { .. } => "track:set-pan",
            Self::TrackSetRecordArm { .. } => "track:set-record-arm",
        }
    }

    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::TransportGetState
            | Self::TransportEnsureContext
            | Self::TransportPlay
            | Self::TransportPause
            | Self::TransportStop
            | Self::EditClearAudioClips
            | Self::VstScan => json!({}),
            Self::TransportSetBpm { bpm } => json!({ "bpm": bpm }),
            Self::TransportSeek { position_beats } => json!({ "position_beats": position_beats }),
            Self::EditReset { track_count } => json!({ "track_count": track_count }),
            Self::VstLoad {
                plugin_uid,
                track_id,
            } => json!({ "plugin_uid": plugin_uid, "track_id": track_id }),
            Self::VstRemove {
                track_id,
                plugin_index,
            }
            | Self::VstEditorOpen {
                track_id,
                plugin_index,
            } => json!({ "track_id": track_id, "plugin_index": plugin_index }),
            Self::VstParamSet {
                track_id,
                plugin_index,
                param_id,
                value,
            } => json!({
                "track_id": track_id,
                "plugin_index": plugin_index,
                "param_id": param_id,
                "value": value,
            }),
            Self::VstBypass {
                track_id,
                plugin_index,
                bypassed,
            } => json!({
                "track_id": track_id,
                "plugin_index": plugin_index,
                "bypassed": bypassed,
            }),
            Self::ClipImportFile(import) => serde_json::to_value(import).unwrap_or(Value::Null),
            Self::TrackSetMute { track_id, mute } => json!({ "track_id": track_id, "mute": mute }),
            Self::TrackSetSolo { track_id, solo } => json!({ "track_id": track_id, "solo": solo }),
            Self::TrackSetVolume { track_id, volume } => {
                json!({ "track_id": track_id, "volume": volume })
            }
            Self::TrackSetPan { track_id, pan } => json!({ "track_id": track_id, "pan": pan }),
            Self::TrackSetRecordArm {
                track_id,
                record_armed,
            } => json!({ "track_id": track_id, "record_armed": record_armed }),
        }
    }
}
