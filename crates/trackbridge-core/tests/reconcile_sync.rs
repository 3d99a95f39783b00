mod common;

use std::{collections::BTreeMap, path::Path};

use common::{MockPeer, audio_clip, project_with_tracks, write_wav_with_onset};
use tempfile::tempdir;
use trackbridge_core::{
    Command, Project,
    model::PluginNode,
    reconcile::{
        DEFAULT_INSTRUMENT_UID, MAX_REPORTED_ERRORS, ResyncPlan, TransportCapture, resync,
    },
};

fn node(id: &str, track_id: u32, plugin_index: u32, uid: Option<&str>, name: &str) -> PluginNode {
    PluginNode {
        id: id.to_string(),
        track_id,
        plugin_index,
        plugin_uid: uid.map(str::to_string),
        name: name.to_string(),
        parameters: BTreeMap::new(),
        bypassed: false,
        peer_index: None,
    }
}

/// `total` audio clips on track 1; the first `missing` reference files that do not exist.
fn project_with_audio(media_root: &Path, total: usize, missing: usize) -> Project {
    let mut project = project_with_tracks(1);
    for index in 0..total {
        let file_name = format!("take-{index}.wav");
        if index >= missing {
            write_wav_with_onset(&media_root.join(&file_name), 1_000, 0, 200);
        }
        project.tracks[0].clips.push(audio_clip(
            &format!("clip-{index}"),
            &file_name,
            index as f64,
            1.0,
        ));
    }
    project
}

#[tokio::test]
async fn unreadable_clips_are_counted_not_fatal() {
    let media = tempdir().expect("tempdir should be creatable");
    let project = project_with_audio(media.path(), 5, 2);
    let peer = MockPeer::new();

    let report = resync(&peer, &project, media.path(), ResyncPlan::clips_only(), None).await;

    assert_eq!(report.clips.total, 5);
    assert_eq!(report.clips.synced, 3);
    assert_eq!(report.clips.failed, 2);
    assert_eq!(report.clips.last_errors.len(), 2);
    let imports = peer
        .names()
        .iter()
        .filter(|name| **name == "clip:import-file")
        .count();
    assert_eq!(imports, 3);
    assert_eq!(peer.names().first(), Some(&"edit:clear-audio-clips"));
}

#[tokio::test]
async fn clip_error_list_keeps_only_the_latest() {
    let media = tempdir().expect("tempdir should be creatable");
    let project = project_with_audio(media.path(), 14, 14);
    let peer = MockPeer::new();

    let report = resync(&peer, &project, media.path(), ResyncPlan::clips_only(), None).await;

    assert_eq!(report.clips.failed, 14);
    assert_eq!(report.clips.last_errors.len(), MAX_REPORTED_ERRORS);
    assert!(report.clips.last_errors[0].contains("clip-4"));
}

#[tokio::test]
async fn clip_imports_carry_seconds_and_source_offset() {
    let media = tempdir().expect("tempdir should be creatable");
    write_wav_with_onset(&media.path().join("vox.wav"), 1_000, 250, 750);
    let mut project = project_with_tracks(2);
    project.tracks[1]
        .clips
        .push(audio_clip("clip-vox", "vox.wav", 2.0, 1.5));
    let peer = MockPeer::new();

    let report = resync(&peer, &project, media.path(), ResyncPlan::clips_only(), None).await;
    assert_eq!(report.clips.synced, 1);

    let import = peer
        .commands()
        .into_iter()
        .find_map(|command| match command {
            Command::ClipImportFile(import) => Some(import),
            _ => None,
        })
        .expect("an import should be sent");
    assert_eq!(import.track_id, 2);
    assert!((import.start_seconds - 4.0).abs() < 1e-12);
    assert!((import.length_seconds - 3.0).abs() < 1e-12);
    assert!((import.source_offset_seconds - 0.25).abs() < 1e-9);
    assert!(import.source_path.ends_with("vox.wav"));
}

#[tokio::test]
async fn missing_named_plugin_falls_back_to_default_instrument() {
    let mut project = project_with_tracks(2);
    project.plugin_nodes = vec![
        node("node-synth", 1, 0, None, "Gone Synth"),
        node("node-verb", 2, 0, Some("vst3:gone-verb"), "Gone Verb"),
    ];
    let peer = MockPeer::new();
    peer.missing_plugin("Gone Synth");
    peer.missing_plugin("vst3:gone-verb");

    let report = resync(&peer, &project, Path::new("."), ResyncPlan::full(), None).await;

    assert_eq!(report.plugins.restored, 1);
    assert_eq!(report.plugins.fallbacks, 1);
    assert_eq!(report.plugins.failed, 1);
    assert_eq!(report.resolutions.len(), 1);
    let resolution = &report.resolutions[0];
    assert_eq!(resolution.node_id, "node-synth");
    assert_eq!(resolution.loaded_uid, DEFAULT_INSTRUMENT_UID);
    assert!(resolution.fallback);
    assert_eq!(resolution.peer_index, 0);
}

#[tokio::test]
async fn plugin_state_is_replayed_on_the_reported_index() {
    let mut project = project_with_tracks(1);
    let mut first = node("node-a", 1, 0, Some("vst3:a"), "A");
    first.parameters.insert("gain".to_string(), 0.3);
    let mut second = node("node-b", 1, 1, Some("vst3:b"), "B");
    second.bypassed = true;
    project.plugin_nodes = vec![second, first];
    let peer = MockPeer::new();

    let report = resync(&peer, &project, Path::new("."), ResyncPlan::full(), None).await;
    assert!(report.is_clean(), "{report:?}");

    let commands = peer.commands();
    assert!(commands.contains(&Command::VstParamSet {
        track_id: 1,
        plugin_index: 0,
        param_id: "gain".to_string(),
        value: 0.3,
    }));
    assert!(commands.contains(&Command::VstBypass {
        track_id: 1,
        plugin_index: 1,
        bypassed: true,
    }));
    let loads: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            Command::VstLoad { plugin_uid, .. } => Some(plugin_uid.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(loads, vec!["vst3:a", "vst3:b"]);
}

#[tokio::test]
async fn full_pass_orders_steps_and_restores_transport_last() {
    let mut project = project_with_tracks(2);
    project.plugin_nodes = vec![node("node-a", 2, 0, Some("vst3:a"), "A")];
    let peer = MockPeer::new();
    let capture = TransportCapture {
        position_beats: 12.5,
        playing: true,
        bpm: 140.0,
    };

    let report = resync(
        &peer,
        &project,
        Path::new("."),
        ResyncPlan::full(),
        Some(capture),
    )
    .await;
    assert!(report.transport_restored);
    assert_eq!(report.reset_track_count, Some(2));

    let commands = peer.commands();
    assert_eq!(commands[0], Command::EditReset { track_count: 2 });
    assert_eq!(commands[1].name(), "vst:load");
    let tail: Vec<_> = commands[commands.len() - 5..].to_vec();
    assert_eq!(
        tail,
        vec![
            Command::TransportEnsureContext,
            Command::TransportSeek {
                position_beats: 12.5
            },
            Command::TransportSetBpm { bpm: 140.0 },
            Command::TransportPlay,
            Command::TransportSetBpm { bpm: 140.0 },
        ]
    );
    let mixer_commands = commands
        .iter()
        .filter(|command| command.name().starts_with("track:set-"))
        .count();
    assert_eq!(mixer_commands, 10);
}

#[tokio::test]
async fn repeated_passes_send_identical_commands() {
    let media = tempdir().expect("tempdir should be creatable");
    let mut project = project_with_audio(media.path(), 3, 1);
    project.plugin_nodes = vec![node("node-a", 1, 0, None, "Named Synth")];
    let peer = MockPeer::new();

    let first = resync(&peer, &project, media.path(), ResyncPlan::full(), None).await;
    let first_commands = peer.commands();
    peer.clear();
    let second = resync(&peer, &project, media.path(), ResyncPlan::full(), None).await;

    assert_eq!(peer.commands(), first_commands);
    assert_eq!(first.clips, second.clips);
    assert_eq!(first.resolutions, second.resolutions);
}

#[tokio::test]
async fn failed_reset_is_reported_and_the_pass_continues() {
    let project = project_with_tracks(1);
    let peer = MockPeer::new();
    peer.fail_command("edit:reset");

    let report = resync(&peer, &project, Path::new("."), ResyncPlan::full(), None).await;

    assert!(report.reset_error.is_some());
    assert!(report.reset_track_count.is_none());
    assert_eq!(report.mixer.applied, 1);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn mixer_failures_are_counted_per_track() {
    let project = project_with_tracks(3);
    let peer = MockPeer::new();
    peer.fail_command("track:set-pan");

    let report = resync(&peer, &project, Path::new("."), ResyncPlan::mixer_only(), None).await;

    assert_eq!(report.mixer.failed, 3);
    assert_eq!(report.mixer.applied, 0);
    assert_eq!(report.mixer.errors.len(), 3);
}
