mod common;

use common::{MockPeer, project_with_tracks};
use tempfile::tempdir;
use trackbridge_core::{
    AddPluginRequest, BridgeEvent, ClockMode, Command, CreateTrackRequest, MixerPatch,
    ObserverMessage, PeerTick, ResyncPlan, Studio, StudioConfig, StudioError,
    fixtures::demo_project, history::comparison_key, reconcile::DEFAULT_INSTRUMENT_UID,
    transport::TrackMeter,
};

fn studio_with_mock(project: trackbridge_core::Project) -> (Studio<MockPeer>, MockPeer) {
    let peer = MockPeer::new();
    let studio = Studio::new(peer.clone(), project, StudioConfig::default());
    (studio, peer)
}

#[tokio::test]
async fn inactive_peer_sees_no_traffic() {
    let (studio, peer) = studio_with_mock(project_with_tracks(1));
    studio
        .apply(ResyncPlan::full(), |engine| {
            engine.create_track(CreateTrackRequest::default())
        })
        .await
        .expect("track creation should succeed");
    studio.play().await.expect("play should succeed offline");

    assert!(peer.commands().is_empty());
    assert!(studio.transport().playing);
    assert_eq!(studio.clock_mode(), ClockMode::Simulated);
}

#[tokio::test]
async fn connecting_rebuilds_the_demo_session() {
    let (studio, peer) = studio_with_mock(demo_project());
    peer.missing_plugin("Sub Synth");

    studio.handle_bridge_event(BridgeEvent::Connected).await;

    assert!(studio.is_peer_active());
    assert_eq!(peer.commands()[0], Command::EditReset { track_count: 3 });
    let report = studio.last_resync().expect("a resync report should be kept");
    assert_eq!(report.plugins.restored, 2);
    assert_eq!(report.plugins.fallbacks, 1);
    assert_eq!(report.clips.total, 1);
    assert_eq!(report.clips.failed, 1);
    assert_eq!(report.mixer.applied, 3);

    let project = studio.project();
    let synth = project
        .plugin_node("node-bass-synth")
        .expect("synth node should exist");
    assert_eq!(synth.peer_index, Some(0));
    assert!(
        report
            .resolutions
            .iter()
            .any(|resolution| resolution.loaded_uid == DEFAULT_INSTRUMENT_UID)
    );
}

#[tokio::test]
async fn parameter_edits_reach_the_live_instance() {
    let (studio, peer) = studio_with_mock(demo_project());
    studio.peer_connected().await;
    peer.clear();

    studio
        .set_plugin_parameter("node-vocal-verb", "decay", 0.9)
        .await
        .expect("parameter edit should succeed");
    studio
        .set_plugin_bypass("node-vocal-verb", true)
        .await
        .expect("bypass edit should succeed");

    assert_eq!(
        peer.commands(),
        vec![
            Command::VstParamSet {
                track_id: 3,
                plugin_index: 0,
                param_id: "decay".to_string(),
                value: 0.9,
            },
            Command::VstBypass {
                track_id: 3,
                plugin_index: 0,
                bypassed: true,
            },
        ]
    );
    let node = studio
        .project()
        .plugin_node("node-vocal-verb")
        .cloned()
        .expect("node should exist");
    assert_eq!(node.parameters.get("decay"), Some(&0.9));
    assert!(node.bypassed);
    assert_eq!(studio.history_depths(), (2, 0));
}

#[tokio::test]
async fn editor_requires_a_live_instance() {
    let (studio, peer) = studio_with_mock(demo_project());
    let error = studio
        .open_plugin_editor("node-vocal-verb")
        .await
        .expect_err("editor should need a live instance");
    assert!(matches!(error, StudioError::PluginNotLive(_)));

    studio.peer_connected().await;
    peer.clear();
    studio
        .open_plugin_editor("node-vocal-verb")
        .await
        .expect("editor should open once resolved");
    assert_eq!(
        peer.commands(),
        vec![Command::VstEditorOpen {
            track_id: 3,
            plugin_index: 0,
        }]
    );
}

#[tokio::test]
async fn mixer_edits_only_resync_the_mixer() {
    let (studio, peer) = studio_with_mock(project_with_tracks(3));
    studio.peer_connected().await;
    peer.clear();

    studio
        .patch_mixer(
            1,
            MixerPatch {
                volume: Some(0.5),
                ..MixerPatch::default()
            },
        )
        .await
        .expect("mixer patch should succeed");

    let names = peer.names();
    assert!(!names.contains(&"edit:reset"));
    assert!(!names.contains(&"edit:clear-audio-clips"));
    assert_eq!(names.len(), 16);
    assert!(peer.commands().contains(&Command::TrackSetVolume {
        track_id: 1,
        volume: 0.5,
    }));
}

#[tokio::test]
async fn undo_with_active_peer_restores_transport() {
    let (studio, peer) = studio_with_mock(project_with_tracks(1));
    studio.peer_connected().await;
    studio
        .apply(ResyncPlan::full(), |engine| {
            engine.create_track(CreateTrackRequest::default())
        })
        .await
        .expect("track creation should succeed");
    studio.seek(8.0).await.expect("seek should succeed");
    peer.clear();

    let project = studio.undo().await.expect("undo should succeed");

    assert_eq!(project.tracks.len(), 1);
    let commands = peer.commands();
    assert_eq!(commands[0], Command::EditReset { track_count: 1 });
    assert!(commands.contains(&Command::TransportSeek {
        position_beats: 8.0
    }));
}

#[tokio::test]
async fn rejected_undo_rolls_back() {
    let (studio, peer) = studio_with_mock(project_with_tracks(1));
    studio.peer_connected().await;
    studio
        .apply(ResyncPlan::full(), |engine| {
            engine.create_track(CreateTrackRequest::default())
        })
        .await
        .expect("track creation should succeed");
    let before = studio.project();
    peer.fail_command("edit:reset");

    let error = studio.undo().await.expect_err("undo should be rolled back");

    assert!(matches!(error, StudioError::HistoryApply { .. }));
    assert_eq!(studio.project(), before);
    assert_eq!(studio.history_depths(), (1, 0));

    peer.heal_command("edit:reset");
    let project = studio.undo().await.expect("undo should succeed once healed");
    assert_eq!(project.tracks.len(), 1);
}

#[tokio::test]
async fn disconnect_hands_position_to_the_simulated_clock() {
    let (studio, peer) = studio_with_mock(project_with_tracks(2));
    studio.peer_connected().await;
    peer.clear();

    studio
        .handle_bridge_event(BridgeEvent::Tick(PeerTick {
            playing: false,
            bpm: 120.0,
            position_beats: 10.0,
            meters: vec![TrackMeter {
                track_id: 1,
                level: 0.7,
            }],
        }))
        .await;
    assert_eq!(studio.clock_mode(), ClockMode::PeerDriven);
    assert_eq!(studio.meters().len(), 1);
    assert!((studio.transport().position_beats - 10.0).abs() < 1e-9);

    studio.handle_bridge_event(BridgeEvent::Disconnected).await;

    assert!(!studio.is_peer_active());
    assert_eq!(studio.clock_mode(), ClockMode::Simulated);
    assert!(studio.meters().is_empty());
    let snapshot = studio.transport();
    assert!(!snapshot.playing);
    assert!((snapshot.position_beats - 10.0).abs() < 1e-9);
    assert_eq!(snapshot.bar, 3);
}

#[tokio::test]
async fn peer_starting_playback_gets_tempo_reasserted() {
    let (studio, peer) = studio_with_mock(project_with_tracks(1));
    studio.peer_connected().await;
    peer.clear();

    let tick = PeerTick {
        playing: true,
        bpm: 128.0,
        position_beats: 0.5,
        meters: Vec::new(),
    };
    studio
        .handle_bridge_event(BridgeEvent::Tick(tick.clone()))
        .await;
    studio.handle_bridge_event(BridgeEvent::Tick(tick)).await;

    assert_eq!(
        peer.commands(),
        vec![Command::TransportSetBpm { bpm: 120.0 }]
    );
}

#[tokio::test]
async fn observers_receive_project_and_resync_messages() {
    let (studio, _peer) = studio_with_mock(project_with_tracks(1));
    let mut observer = studio.subscribe();
    studio.peer_connected().await;
    studio
        .apply(ResyncPlan::full(), |engine| {
            engine.rename_track(1, "Lead".to_string())
        })
        .await
        .expect("rename should succeed");

    let first = observer.recv().await.expect("resync message expected");
    assert!(matches!(first, ObserverMessage::Resync(_)));
    let second = observer.recv().await.expect("project message expected");
    match second {
        ObserverMessage::Project(project) => assert_eq!(project.tracks[0].name, "Lead"),
        other => panic!("unexpected observer message: {other:?}"),
    }
}

#[tokio::test]
async fn save_and_load_round_trip_through_the_studio() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("session.trackbridge.json");
    let (studio, _peer) = studio_with_mock(demo_project());
    studio.save_project(&path).expect("save should succeed");

    let (other, peer) = studio_with_mock(project_with_tracks(1));
    other.peer_connected().await;
    peer.clear();
    let loaded = other.load_project(&path).await.expect("load should succeed");

    assert_eq!(loaded, demo_project());
    assert_eq!(
        comparison_key(&other.project()),
        comparison_key(&demo_project())
    );
    assert_eq!(other.history_depths(), (0, 0));
    assert_eq!(peer.commands()[0], Command::EditReset { track_count: 3 });

    let autosave = other
        .autosave(&temp.path().join("autosave"))
        .expect("autosave should succeed");
    assert!(autosave.is_file());
}

#[tokio::test]
async fn edits_wait_for_an_undo_that_is_being_applied() {
    let (studio, peer) = studio_with_mock(project_with_tracks(1));
    studio.peer_connected().await;
    studio
        .apply(ResyncPlan::full(), |engine| {
            engine.create_track(CreateTrackRequest::default())
        })
        .await
        .expect("track creation should succeed");
    peer.fail_command("edit:reset");
    let held = peer.hold_command("edit:reset");

    let undo = tokio::spawn({
        let studio = studio.clone();
        async move { studio.undo().await }
    });
    held.reached.notified().await;

    let refused = studio.mutate(|engine| engine.rename_track(1, "Renamed".to_string()));
    assert!(matches!(refused, Err(StudioError::HistoryInFlight)));
    let queued = tokio::spawn({
        let studio = studio.clone();
        async move {
            studio
                .apply(ResyncPlan::mixer_only(), |engine| {
                    engine.rename_track(1, "Queued".to_string())
                })
                .await
        }
    });
    tokio::task::yield_now().await;
    assert_eq!(studio.project().tracks.len(), 1);

    held.release.notify_one();
    let undone = undo.await.expect("undo task should finish");
    assert!(matches!(undone, Err(StudioError::HistoryApply { .. })));
    queued
        .await
        .expect("queued task should finish")
        .expect("queued rename should apply after the rollback");

    let project = studio.project();
    assert_eq!(project.tracks.len(), 2);
    assert_eq!(project.tracks[0].name, "Queued");
    assert_eq!(studio.history_depths(), (2, 0));
}

#[tokio::test]
async fn removing_a_live_plugin_closes_its_instance() {
    let (studio, peer) = studio_with_mock(demo_project());
    studio.peer_connected().await;
    studio
        .apply(ResyncPlan::full(), |engine| {
            engine.add_plugin_node(AddPluginRequest {
                track_id: 3,
                id: Some("node-delay".to_string()),
                plugin_uid: Some("vst3:delay".to_string()),
                name: "Delay".to_string(),
                position: None,
                parameters: Default::default(),
            })
        })
        .await
        .expect("plugin add should succeed");
    peer.clear();

    let removed = studio
        .remove_plugin("node-vocal-verb")
        .await
        .expect("removal should succeed");

    assert_eq!(removed.peer_index, Some(0));
    assert_eq!(
        peer.commands(),
        vec![Command::VstRemove {
            track_id: 3,
            plugin_index: 0,
        }]
    );
    let delay = studio
        .project()
        .plugin_node("node-delay")
        .cloned()
        .expect("delay should remain");
    assert_eq!(delay.plugin_index, 0);
    assert_eq!(delay.peer_index, Some(0));
}

#[tokio::test]
async fn refused_plugin_removal_rebuilds_the_peer() {
    let (studio, peer) = studio_with_mock(demo_project());
    studio.peer_connected().await;
    peer.clear();
    peer.fail_command("vst:remove");

    studio
        .remove_plugin("node-vocal-verb")
        .await
        .expect("removal should still succeed in the model");

    assert_eq!(peer.names()[..2], ["vst:remove", "edit:reset"]);
    assert!(studio.project().plugin_node("node-vocal-verb").is_none());
}

#[tokio::test]
async fn transport_state_is_read_from_the_peer() {
    let (studio, peer) = studio_with_mock(project_with_tracks(1));
    let offline = studio.refresh_transport().await;
    assert_eq!(studio.clock_mode(), ClockMode::Simulated);
    assert!(offline.position_beats.abs() < 1e-9);

    studio.peer_connected().await;
    peer.report_transport(serde_json::json!({
        "playing": false,
        "bpm": 120.0,
        "positionBeats": 6.0,
    }));
    let snapshot = studio.refresh_transport().await;

    assert_eq!(studio.clock_mode(), ClockMode::PeerDriven);
    assert!((snapshot.position_beats - 6.0).abs() < 1e-9);
    assert_eq!(snapshot.bar, 2);
}

#[tokio::test]
async fn accepted_edits_publish_project_then_transport() {
    let (studio, _peer) = studio_with_mock(project_with_tracks(1));
    let mut observer = studio.subscribe();

    let (_, changed) = studio
        .mutate(|engine| engine.rename_track(1, "Lead".to_string()))
        .expect("rename should succeed");
    assert!(changed);

    assert!(matches!(
        observer.recv().await.expect("project message expected"),
        ObserverMessage::Project(_)
    ));
    assert!(matches!(
        observer.recv().await.expect("transport message expected"),
        ObserverMessage::Transport(_)
    ));

    let (_, changed) = studio
        .mutate(|engine| engine.rename_track(1, "Lead".to_string()))
        .expect("repeat rename should succeed");
    assert!(!changed);
    assert!(observer.try_recv().is_err());
}
