//! The shared store handed to every handler.
//!
//! All model state lives behind one `parking_lot` mutex and is only touched
//! synchronously. Anything that talks to the peer runs after the lock is
//! released, and reconciliation passes are serialized by an async gate.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{self, broadcast};
use tracing::{debug, info, instrument, warn};

use crate::{
    bridge::{BridgeError, BridgeEvent, Command, Peer},
    engine::{Engine, EngineError, MixerPatch, validate_project},
    history::{DEFAULT_HISTORY_DEPTH, Direction, History},
    model::{PluginNode, Project, TrackId},
    persistence,
    reconcile::{self, ResyncPlan, ResyncReport, TransportCapture},
    transport::{ClockMode, PeerTick, TrackMeter, TransportClock, TransportSnapshot},
};

const OBSERVER_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("{direction:?} could not be applied to the peer: {reason}")]
    HistoryApply { direction: Direction, reason: String },
    #[error("plugin node {0} has no live instance on the peer")]
    PluginNotLive(String),
    #[error("an undo or redo is still being applied")]
    HistoryInFlight,
}

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub media_root: PathBuf,
    pub history_depth: usize,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("."),
            history_depth: DEFAULT_HISTORY_DEPTH,
        }
    }
}

/// What observers receive.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ObserverMessage {
    Project(Box<Project>),
    Transport(TransportSnapshot),
    Meters(Vec<TrackMeter>),
    Resync(Box<ResyncReport>),
}

struct StudioState {
    engine: Engine,
    history: History,
    clock: TransportClock,
    plugin_catalog: Option<Value>,
    meters: Vec<TrackMeter>,
    last_resync: Option<ResyncReport>,
    history_step_active: bool,
}

impl StudioState {
    /// Keeps the clock's tempo and meter in step with the document.
    fn sync_clock(&mut self, now: Instant) {
        let project = self.engine.project();
        let (bpm, beats_per_bar) = (project.bpm, project.beats_per_bar());
        self.clock.set_bpm_at(bpm, now);
        self.clock.set_beats_per_bar(beats_per_bar);
    }

    fn capture_transport(&self, now: Instant) -> TransportCapture {
        TransportCapture {
            position_beats: self.clock.position_beats_at(now),
            playing: self.clock.is_playing(),
            bpm: self.engine.project().bpm,
        }
    }

    fn fold_resolutions(&mut self, report: &ResyncReport) {
        for resolution in &report.resolutions {
            if !self
                .engine
                .resolve_plugin_index(&resolution.node_id, resolution.peer_index)
            {
                debug!(node_id = %resolution.node_id, "resolved node no longer exists");
            }
        }
    }
}

/// Marks an undo or redo as in flight until dropped, including on cancellation.
struct HistoryStep<'a> {
    state: &'a Mutex<StudioState>,
}

impl Drop for HistoryStep<'_> {
    fn drop(&mut self) {
        self.state.lock().history_step_active = false;
    }
}

struct StudioInner<P> {
    peer: P,
    config: StudioConfig,
    state: Mutex<StudioState>,
    peer_active: AtomicBool,
    resync_gate: sync::Mutex<()>,
    observers: broadcast::Sender<ObserverMessage>,
}

pub struct Studio<P> {
    inner: Arc<StudioInner<P>>,
}

impl<P> Clone for Studio<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Peer + 'static> Studio<P> {
    #[must_use]
    pub fn new(peer: P, project: Project, config: StudioConfig) -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CHANNEL_CAPACITY);
        let history = History::new(&project, config.history_depth);
        let clock = TransportClock::new(project.bpm, project.beats_per_bar());
        Self {
            inner: Arc::new(StudioInner {
                peer,
                config,
                state: Mutex::new(StudioState {
                    engine: Engine::new(project),
                    history,
                    clock,
                    plugin_catalog: None,
                    meters: Vec::new(),
                    last_resync: None,
                    history_step_active: false,
                }),
                peer_active: AtomicBool::new(false),
                resync_gate: sync::Mutex::new(()),
                observers,
            }),
        }
    }

    #[must_use]
    pub fn peer(&self) -> &P {
        &self.inner.peer
    }

    #[must_use]
    pub fn config(&self) -> &StudioConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ObserverMessage> {
        self.inner.observers.subscribe()
    }

    #[must_use]
    pub fn project(&self) -> Project {
        self.inner.state.lock().engine.project().clone()
    }

    #[must_use]
    pub fn transport(&self) -> TransportSnapshot {
        self.inner.state.lock().clock.snapshot_at(Instant::now())
    }

    #[must_use]
    pub fn clock_mode(&self) -> ClockMode {
        self.inner.state.lock().clock.mode()
    }

    /// Undo and redo stack depths.
    #[must_use]
    pub fn history_depths(&self) -> (usize, usize) {
        let state = self.inner.state.lock();
        (state.history.undo_len(), state.history.redo_len())
    }

    #[must_use]
    pub fn last_resync(&self) -> Option<ResyncReport> {
        self.inner.state.lock().last_resync.clone()
    }

    #[must_use]
    pub fn meters(&self) -> Vec<TrackMeter> {
        self.inner.state.lock().meters.clone()
    }

    #[must_use]
    pub fn is_peer_active(&self) -> bool {
        self.inner.peer_active.load(Ordering::Acquire)
    }

    /// Runs a structural edit, records history and notifies observers.
    ///
    /// Returns the edit's value and whether the project changed. Fails with
    /// [`StudioError::HistoryInFlight`] while an undo or redo is being applied;
    /// [`Studio::apply`] queues behind it instead.
    pub fn mutate<T>(
        &self,
        edit: impl FnOnce(&mut Engine) -> Result<T, EngineError>,
    ) -> Result<(T, bool), StudioError> {
        let (value, changed, snapshot) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.history_step_active {
                return Err(StudioError::HistoryInFlight);
            }
            let value = edit(&mut state.engine)?;
            let changed = state.history.record(state.engine.project());
            state.sync_clock(Instant::now());
            (value, changed, state.engine.project().clone())
        };
        if changed {
            self.publish(ObserverMessage::Project(Box::new(snapshot)));
            self.publish_transport();
        }
        Ok((value, changed))
    }

    /// [`Studio::mutate`] followed by a reconciliation pass when anything changed.
    pub async fn apply<T>(
        &self,
        plan: ResyncPlan,
        edit: impl FnOnce(&mut Engine) -> Result<T, EngineError>,
    ) -> Result<T, StudioError> {
        let _gate = self.inner.resync_gate.lock().await;
        let (value, changed) = self.mutate(edit)?;
        if changed && !plan.is_empty() {
            self.resync_gated(plan).await;
        }
        Ok(value)
    }

    /// Reconciles the peer with the current project. `None` while the peer is away.
    pub async fn resync(&self, plan: ResyncPlan) -> Option<ResyncReport> {
        let _gate = self.inner.resync_gate.lock().await;
        self.resync_gated(plan).await
    }

    /// Caller holds `resync_gate`.
    async fn resync_gated(&self, plan: ResyncPlan) -> Option<ResyncReport> {
        if !self.is_peer_active() {
            debug!("peer inactive, resync skipped");
            return None;
        }
        let (project, capture) = {
            let state = self.inner.state.lock();
            let capture = plan
                .reset_structure
                .then(|| state.capture_transport(Instant::now()));
            (state.engine.project().clone(), capture)
        };
        Some(self.run_pass(&project, plan, capture).await)
    }

    async fn run_pass(
        &self,
        project: &Project,
        plan: ResyncPlan,
        capture: Option<TransportCapture>,
    ) -> ResyncReport {
        let report = reconcile::resync(
            &self.inner.peer,
            project,
            &self.inner.config.media_root,
            plan,
            capture,
        )
        .await;
        {
            let mut state = self.inner.state.lock();
            state.fold_resolutions(&report);
            state.last_resync = Some(report.clone());
        }
        self.publish(ObserverMessage::Resync(Box::new(report.clone())));
        report
    }

    #[instrument(skip(self))]
    pub async fn undo(&self) -> Result<Project, StudioError> {
        self.step_history(Direction::Undo).await
    }

    #[instrument(skip(self))]
    pub async fn redo(&self) -> Result<Project, StudioError> {
        self.step_history(Direction::Redo).await
    }

    async fn step_history(&self, direction: Direction) -> Result<Project, StudioError> {
        let _gate = self.inner.resync_gate.lock().await;
        let (transition, capture, current, _step) = {
            let mut state = self.inner.state.lock();
            let current = state.engine.project().clone();
            let transition = match direction {
                Direction::Undo => state.history.begin_undo(&current),
                Direction::Redo => state.history.begin_redo(&current),
            };
            let transition = transition.ok_or(match direction {
                Direction::Undo => StudioError::NothingToUndo,
                Direction::Redo => StudioError::NothingToRedo,
            })?;
            let now = Instant::now();
            let capture = state.capture_transport(now);
            state.engine.replace_project(transition.target.project.clone());
            state.sync_clock(now);
            state.history_step_active = true;
            let step = HistoryStep {
                state: &self.inner.state,
            };
            (transition, capture, current, step)
        };
        let target = transition.target.project.clone();

        if self.is_peer_active() {
            let report = self
                .run_pass(&target, ResyncPlan::full(), Some(capture))
                .await;
            if let Some(reason) = report.reset_error {
                let mut state = self.inner.state.lock();
                state.engine.replace_project(current);
                state.history.rollback(transition);
                state.sync_clock(Instant::now());
                warn!(?direction, %reason, "history step rolled back");
                return Err(StudioError::HistoryApply { direction, reason });
            }
        }

        let (undo_depth, redo_depth) = self.history_depths();
        info!(?direction, undo_depth, redo_depth, "history step applied");
        let project = self.project();
        self.publish(ObserverMessage::Project(Box::new(project.clone())));
        Ok(project)
    }

    /// Makes `project` authoritative as a fresh session; history starts over.
    #[instrument(skip(self, project), fields(project_id = %project.id))]
    pub async fn open_project(&self, project: Project) -> Result<(), StudioError> {
        validate_project(&project)?;
        let _gate = self.inner.resync_gate.lock().await;
        {
            let mut state = self.inner.state.lock();
            state.history.reset(&project);
            state.engine.replace_project(project.clone());
            state.clock = TransportClock::new(project.bpm, project.beats_per_bar());
        }
        self.publish(ObserverMessage::Project(Box::new(project)));
        self.resync_gated(ResyncPlan::full()).await;
        Ok(())
    }

    pub async fn load_project(&self, path: &Path) -> Result<Project, StudioError> {
        let project = persistence::load_project(path).map_err(EngineError::from)?;
        self.open_project(project.clone()).await?;
        Ok(project)
    }

    pub fn save_project(&self, path: &Path) -> Result<(), StudioError> {
        let project = self.project();
        persistence::save_project(path, &project).map_err(EngineError::from)?;
        Ok(())
    }

    pub fn autosave(&self, autosave_dir: &Path) -> Result<PathBuf, StudioError> {
        let project = self.project();
        Ok(persistence::autosave_project(&project, autosave_dir).map_err(EngineError::from)?)
    }

    /// Applies an externally supplied document as a new undoable state.
    #[instrument(skip(self, project), fields(project_id = %project.id))]
    pub async fn replace_project(&self, project: Project) -> Result<(), StudioError> {
        validate_project(&project)?;
        self.apply(ResyncPlan::full(), |engine| {
            engine.replace_project(project);
            Ok(())
        })
        .await
    }

    pub async fn play(&self) -> Result<TransportSnapshot, StudioError> {
        let bpm = {
            let mut state = self.inner.state.lock();
            state.clock.play_at(Instant::now());
            state.engine.project().bpm
        };
        self.send_transport(&[Command::TransportPlay, Command::TransportSetBpm { bpm }])
            .await?;
        Ok(self.publish_transport())
    }

    pub async fn pause(&self) -> Result<TransportSnapshot, StudioError> {
        self.inner.state.lock().clock.pause_at(Instant::now());
        self.send_transport(&[Command::TransportPause]).await?;
        Ok(self.publish_transport())
    }

    pub async fn stop(&self) -> Result<TransportSnapshot, StudioError> {
        self.inner.state.lock().clock.stop_at(Instant::now());
        self.send_transport(&[Command::TransportStop]).await?;
        Ok(self.publish_transport())
    }

    pub async fn seek(&self, position_beats: f64) -> Result<TransportSnapshot, StudioError> {
        let position_beats = {
            let mut state = self.inner.state.lock();
            let now = Instant::now();
            state.clock.seek_at(position_beats, now);
            state.clock.position_beats_at(now)
        };
        self.send_transport(&[Command::TransportSeek { position_beats }])
            .await?;
        Ok(self.publish_transport())
    }

    /// Tempo is a document edit; clip seconds shift with it.
    pub async fn set_bpm(&self, bpm: f64) -> Result<TransportSnapshot, StudioError> {
        let bpm = self
            .apply(ResyncPlan::clips_only(), |engine| engine.set_bpm(bpm))
            .await?;
        self.send_transport(&[Command::TransportSetBpm { bpm }])
            .await?;
        Ok(self.publish_transport())
    }

    /// Transport state, refreshed from the peer while it is active.
    pub async fn refresh_transport(&self) -> TransportSnapshot {
        if self.is_peer_active() {
            match self.inner.peer.request(Command::TransportGetState).await {
                Ok(payload) => match serde_json::from_value::<PeerTick>(payload) {
                    Ok(tick) => {
                        let mut state = self.inner.state.lock();
                        state.meters.clone_from(&tick.meters);
                        state.clock.apply_peer_tick(tick);
                    }
                    Err(error) => debug!(%error, "malformed transport state"),
                },
                Err(error) => warn!(%error, "transport state query failed"),
            }
        }
        self.transport()
    }

    async fn send_transport(&self, commands: &[Command]) -> Result<(), StudioError> {
        if !self.is_peer_active() {
            return Ok(());
        }
        for command in commands {
            self.inner.peer.request(command.clone()).await?;
        }
        Ok(())
    }

    /// Sets a parameter in the model and on the live instance when there is one.
    pub async fn set_plugin_parameter(
        &self,
        node_id: &str,
        param_id: &str,
        value: f64,
    ) -> Result<(), StudioError> {
        let (node, _) = self.mutate(|engine| engine.set_plugin_parameter(node_id, param_id, value))?;
        if let (true, Some(plugin_index)) = (self.is_peer_active(), node.peer_index) {
            self.inner
                .peer
                .request(Command::VstParamSet {
                    track_id: node.track_id,
                    plugin_index,
                    param_id: param_id.to_string(),
                    value,
                })
                .await?;
        }
        Ok(())
    }

    pub async fn set_plugin_bypass(&self, node_id: &str, bypassed: bool) -> Result<(), StudioError> {
        let (node, _) = self.mutate(|engine| engine.set_plugin_bypass(node_id, bypassed))?;
        if let (true, Some(plugin_index)) = (self.is_peer_active(), node.peer_index) {
            self.inner
                .peer
                .request(Command::VstBypass {
                    track_id: node.track_id,
                    plugin_index,
                    bypassed,
                })
                .await?;
        }
        Ok(())
    }

    /// Removes a node from its chain and closes its live instance.
    ///
    /// Falls back to a full resync when the peer refuses the removal.
    #[instrument(skip(self))]
    pub async fn remove_plugin(&self, node_id: &str) -> Result<PluginNode, StudioError> {
        let _gate = self.inner.resync_gate.lock().await;
        let (removed, _) = self.mutate(|engine| engine.remove_plugin_node(node_id))?;
        let Some(plugin_index) = removed.peer_index.filter(|_| self.is_peer_active()) else {
            return Ok(removed);
        };
        let command = Command::VstRemove {
            track_id: removed.track_id,
            plugin_index,
        };
        match self.inner.peer.request(command).await {
            Ok(_) => {
                self.inner
                    .state
                    .lock()
                    .engine
                    .release_peer_index(removed.track_id, plugin_index);
            }
            Err(error) => {
                warn!(%error, "live plugin removal failed, rebuilding peer state");
                self.resync_gated(ResyncPlan::full()).await;
            }
        }
        Ok(removed)
    }

    pub async fn open_plugin_editor(&self, node_id: &str) -> Result<Value, StudioError> {
        let node = {
            let state = self.inner.state.lock();
            state
                .engine
                .project()
                .plugin_node(node_id)
                .cloned()
                .ok_or_else(|| EngineError::PluginNodeNotFound(node_id.to_string()))?
        };
        let plugin_index = node
            .peer_index
            .filter(|_| self.is_peer_active())
            .ok_or_else(|| StudioError::PluginNotLive(node_id.to_string()))?;
        Ok(self
            .inner
            .peer
            .request(Command::VstEditorOpen {
                track_id: node.track_id,
                plugin_index,
            })
            .await?)
    }

    /// Peer plugin catalog, fetched once per connection.
    pub async fn plugin_catalog(&self) -> Result<Value, StudioError> {
        if let Some(catalog) = self.inner.state.lock().plugin_catalog.clone() {
            return Ok(catalog);
        }
        if !self.is_peer_active() {
            return Err(BridgeError::NotConnected.into());
        }
        let catalog = self.inner.peer.request(Command::VstScan).await?;
        self.inner.state.lock().plugin_catalog = Some(catalog.clone());
        Ok(catalog)
    }

    pub async fn handle_bridge_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Connected => self.peer_connected().await,
            BridgeEvent::Disconnected => self.peer_disconnected(),
            BridgeEvent::Tick(tick) => self.peer_tick(tick).await,
            BridgeEvent::Other { event, .. } => debug!(%event, "unhandled peer event"),
        }
    }

    /// Marks the peer active and rebuilds its state from scratch.
    #[instrument(skip(self))]
    pub async fn peer_connected(&self) {
        self.inner.peer_active.store(true, Ordering::Release);
        self.inner.state.lock().plugin_catalog = None;
        info!("peer active, running full resync");
        self.resync(ResyncPlan::full()).await;
    }

    /// Hands timing back to the simulated clock without a position jump.
    #[instrument(skip(self))]
    pub fn peer_disconnected(&self) {
        if !self.inner.peer_active.swap(false, Ordering::AcqRel) {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            state.clock.peer_disconnected_at(Instant::now());
            state.plugin_catalog = None;
            state.meters.clear();
        }
        warn!("peer inactive, transport simulated");
        self.publish_transport();
    }

    async fn peer_tick(&self, tick: PeerTick) {
        let (started, bpm) = {
            let mut state = self.inner.state.lock();
            let was_playing = state.clock.is_playing() && state.clock.mode() == ClockMode::PeerDriven;
            let started = tick.playing && !was_playing;
            state.meters.clone_from(&tick.meters);
            state.clock.apply_peer_tick(tick);
            (started, state.engine.project().bpm)
        };
        if started && self.is_peer_active() {
            debug!(bpm, "peer started playback, re-asserting tempo");
            if let Err(error) = self.inner.peer.request(Command::TransportSetBpm { bpm }).await {
                warn!(%error, "tempo re-assert failed");
            }
        }
    }

    /// Pushes the current transport snapshot and meters to observers.
    pub fn broadcast_tick(&self) -> TransportSnapshot {
        let snapshot = self.publish_transport();
        let meters = self.meters();
        if !meters.is_empty() {
            self.publish(ObserverMessage::Meters(meters));
        }
        snapshot
    }

    fn publish_transport(&self) -> TransportSnapshot {
        let snapshot = self.transport();
        self.publish(ObserverMessage::Transport(snapshot));
        snapshot
    }

    fn publish(&self, message: ObserverMessage) {
        // No receivers is fine.
        let _ = self.inner.observers.send(message);
    }

    /// Convenience for the common mixer edit.
    pub async fn patch_mixer(
        &self,
        track_id: TrackId,
        patch: MixerPatch,
    ) -> Result<(), StudioError> {
        self.apply(ResyncPlan::mixer_only(), |engine| engine.patch_mixer(track_id, patch))
            .await?;
        Ok(())
    }
}
