#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    path::Path,
    sync::Arc,
};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Notify;
use trackbridge_core::{
    BridgeError, Command, Peer, Project, TrackId,
    model::{AudioSource, Clip, ClipSource, Fades, MixerEntry, Track},
};

/// In-process stand-in for the native peer that records every command.
#[derive(Clone, Default)]
pub struct MockPeer {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    commands: Vec<Command>,
    missing_plugins: HashSet<String>,
    failing_commands: HashSet<&'static str>,
    next_plugin_index: HashMap<TrackId, i32>,
    held_commands: HashMap<&'static str, Arc<HeldCommand>>,
    transport_state: Option<Value>,
}

/// Parks requests for one command until the test releases them.
#[derive(Default)]
pub struct HeldCommand {
    pub reached: Notify,
    pub release: Notify,
}

impl MockPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `vst:load` of `identifier` answers "plugin not found".
    pub fn missing_plugin(&self, identifier: &str) {
        self.state
            .lock()
            .missing_plugins
            .insert(identifier.to_string());
    }

    /// Every command named `name` fails with a peer error.
    pub fn fail_command(&self, name: &'static str) {
        self.state.lock().failing_commands.insert(name);
    }

    /// Requests named `name` wait for `release` before being answered.
    pub fn hold_command(&self, name: &'static str) -> Arc<HeldCommand> {
        let held = Arc::new(HeldCommand::default());
        self.state
            .lock()
            .held_commands
            .insert(name, Arc::clone(&held));
        held
    }

    /// Payload answered to `transport.get_state`.
    pub fn report_transport(&self, state: Value) {
        self.state.lock().transport_state = Some(state);
    }

    pub fn heal_command(&self, name: &'static str) {
        self.state.lock().failing_commands.remove(name);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .commands
            .iter()
            .map(Command::name)
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().commands.clear();
    }

    fn answer(&self, command: Command) -> Result<Value, BridgeError> {
        let mut state = self.state.lock();
        let name = command.name();
        state.commands.push(command.clone());

        if state.failing_commands.contains(name) {
            return Err(BridgeError::Peer {
                command: name.to_string(),
                message: "forced failure".to_string(),
            });
        }

        match command {
            Command::EditReset { .. } => {
                state.next_plugin_index.clear();
                Ok(json!({}))
            }
            Command::VstLoad {
                plugin_uid,
                track_id,
            } => {
                if state.missing_plugins.contains(&plugin_uid) {
                    return Err(BridgeError::Peer {
                        command: name.to_string(),
                        message: format!("plugin not found: {plugin_uid}"),
                    });
                }
                let next = state.next_plugin_index.entry(track_id).or_insert(0);
                let plugin_index = *next;
                *next += 1;
                Ok(json!({ "plugin": { "trackId": track_id, "pluginIndex": plugin_index } }))
            }
            Command::TransportGetState => Ok(state
                .transport_state
                .clone()
                .unwrap_or_else(|| json!({ "playing": false, "bpm": 120.0, "positionBeats": 0.0 }))),
            _ => Ok(json!({})),
        }
    }
}

impl Peer for MockPeer {
    fn request(&self, command: Command) -> impl Future<Output = Result<Value, BridgeError>> + Send {
        let held = self.state.lock().held_commands.get(command.name()).cloned();
        let peer = self.clone();
        async move {
            if let Some(held) = held {
                held.reached.notify_one();
                held.release.notified().await;
            }
            peer.answer(command)
        }
    }
}

/// Mono 16-bit WAV: `silent_frames` of silence followed by a square wave.
pub fn write_wav_with_onset(path: &Path, sample_rate: u32, silent_frames: u32, loud_frames: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("test wav should be creatable");
    for _ in 0..silent_frames {
        writer
            .write_sample(0_i16)
            .expect("silent sample write should succeed");
    }
    for frame in 0..loud_frames {
        let sample: i16 = if frame % 2 == 0 { 16_000 } else { -16_000 };
        writer
            .write_sample(sample)
            .expect("loud sample write should succeed");
    }
    writer.finalize().expect("test wav finalize should succeed");
}

pub fn audio_clip(id: &str, path: &str, start: f64, length: f64) -> Clip {
    Clip {
        id: id.to_string(),
        name: id.to_string(),
        start,
        length,
        source: ClipSource::Audio(AudioSource {
            path: path.to_string(),
            ..AudioSource::default()
        }),
        fades: Fades::default(),
    }
}

/// Valid project with `track_count` empty tracks and full mixer coverage.
pub fn project_with_tracks(track_count: u32) -> Project {
    let mut project = Project::new("Test Session", 120.0);
    project.tracks = (1..=track_count)
        .map(|track_id| Track::new(track_id, format!("Track {track_id}")))
        .collect();
    project.mixer = (1..=track_count).map(MixerEntry::new).collect();
    project
}
