use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    AudioSource, Clip, ClipSource, DrumStep, FadeCurve, Fades, MixerEntry, Pattern, PatternKind,
    PatternNote, PluginNode, Project, Track,
};

/// Small deterministic session: a drum pattern, a bassline, a vocal take and
/// an instrument plus an effect in the plugin chains.
#[must_use]
pub fn demo_project() -> Project {
    let mut project = Project::new("Trackbridge Demo", 124.0);
    project.id = Uuid::parse_str("5f0c7a54-8a8e-4d0e-9d8b-2b7c4c1f6a10")
        .expect("fixture project id should be valid");
    let fixed_timestamp = DateTime::parse_from_rfc3339("2026-02-23T00:00:00Z")
        .expect("fixture timestamp should be valid")
        .with_timezone(&Utc);
    project.created_at = fixed_timestamp;
    project.updated_at = fixed_timestamp;

    project.patterns = vec![
        Pattern {
            id: "pattern-beat".to_string(),
            name: "Four on the floor".to_string(),
            kind: PatternKind::Drum,
            length: 16,
            steps: (0..16)
                .step_by(4)
                .map(|index| DrumStep {
                    lane: "kick".to_string(),
                    index,
                    velocity: 120,
                })
                .chain((4..16).step_by(8).map(|index| DrumStep {
                    lane: "snare".to_string(),
                    index,
                    velocity: 104,
                }))
                .collect(),
            notes: Vec::new(),
        },
        Pattern {
            id: "pattern-bass".to_string(),
            name: "Bassline".to_string(),
            kind: PatternKind::Melodic,
            length: 16,
            steps: Vec::new(),
            notes: [36_u8, 36, 43, 41]
                .into_iter()
                .zip((0_u32..).step_by(4))
                .map(|(pitch, start)| PatternNote {
                    pitch,
                    start,
                    length: 3,
                    velocity: 100,
                })
                .collect(),
        },
    ];

    let mut drums = Track::new(1, "Drums");
    drums.color = "#f77f00".to_string();
    drums.clips.push(pattern_clip("clip-drums-a", "pattern-beat", 0.0, 4.0));

    let mut bass = Track::new(2, "Bass");
    bass.color = "#00d1b2".to_string();
    bass.clips.push(pattern_clip("clip-bass-a", "pattern-bass", 0.0, 4.0));

    let mut vocals = Track::new(3, "Vocals");
    vocals.color = "#b388ff".to_string();
    vocals.clips.push(Clip {
        id: "clip-vocal-take".to_string(),
        name: "Vocal take".to_string(),
        start: 1.0,
        length: 2.0,
        source: ClipSource::Audio(AudioSource {
            path: "media/vocal-take.wav".to_string(),
            duration_seconds: Some(3.871),
            peaks: Vec::new(),
            source_offset_seconds: None,
        }),
        fades: Fades {
            fade_in: 0.05,
            fade_out: 0.4,
            fade_in_curve: FadeCurve::Linear,
            fade_out_curve: FadeCurve::SCurve,
        },
    });

    project.tracks = vec![drums, bass, vocals];
    project.mixer = (1..=3).map(MixerEntry::new).collect();
    project.mixer[2].volume = 0.65;
    project.mixer[2].pan = -0.2;

    project.plugin_nodes = vec![
        PluginNode {
            id: "node-bass-synth".to_string(),
            track_id: 2,
            plugin_index: 0,
            plugin_uid: None,
            name: "Sub Synth".to_string(),
            parameters: BTreeMap::from([("cutoff".to_string(), 0.42)]),
            bypassed: false,
            peer_index: None,
        },
        PluginNode {
            id: "node-vocal-verb".to_string(),
            track_id: 3,
            plugin_index: 0,
            plugin_uid: Some("vst3:plate-reverb".to_string()),
            name: "Plate Reverb".to_string(),
            parameters: BTreeMap::from([
                ("decay".to_string(), 0.7),
                ("mix".to_string(), 0.25),
            ]),
            bypassed: false,
            peer_index: None,
        },
    ];

    project
}

fn pattern_clip(id: &str, pattern_id: &str, start: f64, length: f64) -> Clip {
    Clip {
        id: id.to_string(),
        name: String::new(),
        start,
        length,
        source: ClipSource::Pattern {
            pattern_id: pattern_id.to_string(),
        },
        fades: Fades::default(),
    }
}
