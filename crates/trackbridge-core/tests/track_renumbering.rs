use proptest::prelude::*;
use trackbridge_core::{
    AddPluginRequest, CreateTrackRequest, Engine, fixtures::demo_project, model::AudioSource,
    validate_project,
};

#[derive(Debug, Clone)]
enum TrackOp {
    Create,
    Insert(u32),
    Delete(u32),
    Duplicate(u32),
    Reorder(u32, u32),
    AddPlugin(u32, Option<u32>),
}

fn track_op() -> impl Strategy<Value = TrackOp> {
    prop_oneof![
        Just(TrackOp::Create),
        (1u32..8).prop_map(TrackOp::Insert),
        (1u32..8).prop_map(TrackOp::Delete),
        (1u32..8).prop_map(TrackOp::Duplicate),
        (1u32..8, 1u32..8).prop_map(|(from, to)| TrackOp::Reorder(from, to)),
        (1u32..8, prop::option::of(0u32..4)).prop_map(|(track, at)| TrackOp::AddPlugin(track, at)),
    ]
}

fn apply(engine: &mut Engine, op: &TrackOp) {
    // Out-of-range ids are expected to fail without touching the project.
    let _ = match op {
        TrackOp::Create => engine.create_track(CreateTrackRequest::default()).map(drop),
        TrackOp::Insert(position) => engine
            .insert_track(*position, CreateTrackRequest::default())
            .map(drop),
        TrackOp::Delete(track_id) => engine.delete_track(*track_id).map(drop),
        TrackOp::Duplicate(track_id) => engine.duplicate_track(*track_id).map(drop),
        TrackOp::Reorder(from, to) => engine.reorder_track(*from, *to),
        TrackOp::AddPlugin(track_id, position) => engine
            .add_plugin_node(AddPluginRequest {
                track_id: *track_id,
                id: None,
                plugin_uid: None,
                name: "Generated".to_string(),
                position: *position,
                parameters: Default::default(),
            })
            .map(drop),
    };
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 96,
        .. ProptestConfig::default()
    })]

    #[test]
    fn structural_edits_keep_the_document_valid(ops in prop::collection::vec(track_op(), 1..24)) {
        let mut engine = Engine::new(demo_project());
        for op in &ops {
            apply(&mut engine, op);
            let project = engine.project();
            prop_assert!(
                validate_project(project).is_ok(),
                "{:?} broke {:?}",
                op,
                validate_project(project)
            );
        }
    }
}

#[test]
fn deleting_a_track_shifts_mixer_and_plugins_down() {
    let mut engine = Engine::new(demo_project());
    let removed = engine.delete_track(2).expect("delete should succeed");
    assert_eq!(removed.name, "Bass");

    let project = engine.project();
    assert_eq!(project.tracks.len(), 2);
    assert_eq!(project.tracks[1].name, "Vocals");
    assert_eq!(project.tracks[1].track_id, 2);
    let vocals_mixer = project.mixer_entry(2).expect("mixer entry should follow");
    assert!((vocals_mixer.volume - 0.65).abs() < 1e-12);
    assert!(project.plugin_node("node-bass-synth").is_none());
    let verb = project
        .plugin_node("node-vocal-verb")
        .expect("reverb should survive");
    assert_eq!(verb.track_id, 2);
}

#[test]
fn reordering_carries_the_track_payload() {
    let mut engine = Engine::new(demo_project());
    engine.reorder_track(3, 1).expect("reorder should succeed");

    let project = engine.project();
    let names: Vec<_> = project.tracks.iter().map(|track| track.name.as_str()).collect();
    assert_eq!(names, vec!["Vocals", "Drums", "Bass"]);
    assert!((project.mixer_entry(1).expect("entry").pan + 0.2).abs() < 1e-12);
    assert_eq!(
        project
            .plugin_node("node-vocal-verb")
            .expect("reverb should exist")
            .track_id,
        1
    );
    assert_eq!(
        project
            .plugin_node("node-bass-synth")
            .expect("synth should exist")
            .track_id,
        3
    );
}

#[test]
fn duplicate_copies_chain_with_fresh_ids() {
    let mut engine = Engine::new(demo_project());
    let copy = engine.duplicate_track(2).expect("duplicate should succeed");
    assert_eq!(copy.track_id, 3);
    assert_eq!(copy.name, "Bass copy");

    let project = engine.project();
    assert_eq!(project.tracks.len(), 4);
    assert_eq!(project.tracks[3].name, "Vocals");
    let copied_chain = project.plugin_chain(3);
    assert_eq!(copied_chain.len(), 1);
    assert_ne!(copied_chain[0].id, "node-bass-synth");
    assert_eq!(copied_chain[0].name, "Sub Synth");
    assert_ne!(project.tracks[2].clips[0].id, project.tracks[1].clips[0].id);
}

#[test]
fn invalid_positions_are_rejected() {
    let mut engine = Engine::new(demo_project());
    assert!(engine.insert_track(0, CreateTrackRequest::default()).is_err());
    assert!(engine.insert_track(5, CreateTrackRequest::default()).is_err());
    assert!(engine.reorder_track(1, 4).is_err());
    assert!(engine.delete_track(0).is_err());
    assert_eq!(engine.project(), &demo_project());
}

#[test]
fn plugin_insert_position_is_clamped_and_contiguous() {
    let mut engine = Engine::new(demo_project());
    let first = engine
        .add_plugin_node(AddPluginRequest {
            track_id: 3,
            id: Some("node-eq".to_string()),
            plugin_uid: Some("vst3:eq".to_string()),
            name: "EQ".to_string(),
            position: Some(0),
            parameters: Default::default(),
        })
        .expect("insert at head should succeed");
    assert_eq!(first.plugin_index, 0);
    let tail = engine
        .add_plugin_node(AddPluginRequest {
            track_id: 3,
            id: Some("node-limiter".to_string()),
            plugin_uid: None,
            name: "Limiter".to_string(),
            position: Some(99),
            parameters: Default::default(),
        })
        .expect("insert past end should append");
    assert_eq!(tail.plugin_index, 2);

    let chain: Vec<_> = engine
        .project()
        .plugin_chain(3)
        .into_iter()
        .map(|node| node.id.as_str())
        .collect();
    assert_eq!(chain, vec!["node-eq", "node-vocal-verb", "node-limiter"]);

    engine
        .reorder_plugin_node("node-limiter", 0)
        .expect("chain reorder should succeed");
    let chain: Vec<_> = engine
        .project()
        .plugin_chain(3)
        .into_iter()
        .map(|node| (node.id.as_str(), node.plugin_index))
        .collect();
    assert_eq!(
        chain,
        vec![("node-limiter", 0), ("node-eq", 1), ("node-vocal-verb", 2)]
    );
}

#[test]
fn clip_constructors_check_their_sources() {
    let mut engine = Engine::new(demo_project());
    let pattern_id = engine.project().patterns[0].id.clone();

    assert!(engine.create_pattern_clip(1, "missing", 0.0, 1.0).is_err());
    assert!(
        engine
            .create_audio_clip(3, AudioSource::default(), 0.0, 1.0)
            .is_err()
    );
    assert!(engine.create_pattern_clip(1, pattern_id.clone(), -1.0, 1.0).is_err());
    assert_eq!(engine.project(), &demo_project());

    let pattern_clip = engine
        .create_pattern_clip(1, pattern_id, 4.0, 2.0)
        .expect("pattern clip should be placed");
    let audio_clip = engine
        .create_audio_clip(
            3,
            AudioSource {
                path: "takes/vox-2.wav".to_string(),
                ..AudioSource::default()
            },
            1.0,
            0.5,
        )
        .expect("audio clip should be placed");

    assert!(engine.project().tracks[0].clip(&pattern_clip.id).is_some());
    assert!(engine.project().tracks[2].clip(&audio_clip.id).is_some());
    assert!(validate_project(engine.project()).is_ok());
}
