pub mod assets;
pub mod bridge;
pub mod diagnostics;
pub mod engine;
pub mod envelope;
pub mod fixtures;
pub mod history;
pub mod model;
pub mod persistence;
pub mod reconcile;
mod renumber;
pub mod requests;
pub mod studio;
pub mod time;
pub mod transport;
pub mod wav;

pub use assets::{AudioAnalysis, analyze_audio_file, analyze_audio_file_with_cache};
pub use bridge::{BridgeClient, BridgeClientOptions, BridgeError, BridgeEvent, Command, Peer};
pub use diagnostics::{TelemetryGuard, init_tracing, init_tracing_with_options};
pub use engine::{
    AddPluginRequest, CreateClipRequest, CreatePatternRequest, CreateTrackRequest, Engine,
    EngineError, MixerPatch, PatternPatch, validate_project,
};
pub use history::{History, HistoryEntry};
pub use model::{
    AudioSource, Clip, ClipSource, FadeCurve, Fades, MixerEntry, Pattern, PatternKind,
    PluginNode, Project, TimeSignature, Track, TrackId,
};
pub use reconcile::{ResyncPlan, ResyncReport};
pub use requests::{StudioRequest, StudioResponse};
pub use studio::{ObserverMessage, Studio, StudioConfig, StudioError};
pub use transport::{ClockMode, PeerTick, TransportClock, TransportSnapshot};
