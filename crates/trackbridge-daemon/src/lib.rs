pub mod config;

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};
use trackbridge_core::{
    BridgeClient, BridgeEvent, ObserverMessage, Project, Studio, StudioResponse,
    diagnostics::init_tracing_with_options, persistence, requests::parse_request,
};

use crate::config::AppConfig;

pub type DaemonStudio = Studio<BridgeClient>;

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Runs the daemon until stdin closes or the process is interrupted.
pub async fn run(config: AppConfig, config_path: Option<PathBuf>) -> Result<()> {
    let telemetry = init_tracing_with_options(
        &config.paths.logs_dir,
        &config.diagnostics.trace_file_prefix,
        &config.diagnostics.rust_log_filter,
    )?;
    info!(session_id = %telemetry.session_id, "trackbridge daemon starting");
    match &config_path {
        Some(path) => info!(path = %path.display(), "config loaded"),
        None => warn!("no trackbridge.config.toml found, using defaults"),
    }

    let project = initial_project(&config)?;
    let client = BridgeClient::new(config.bridge_options());
    let studio = Studio::new(client.clone(), project, config.studio_config());

    // Subscribed before the reconnect task can emit `Connected`.
    let bridge_events = client.subscribe();
    let (output_tx, output_rx) = mpsc::channel::<Value>(OUTPUT_CHANNEL_CAPACITY);
    let tasks = vec![
        tokio::spawn(write_output(output_rx)),
        tokio::spawn(forward_bridge_events(
            studio.clone(),
            client.clone(),
            bridge_events,
        )),
        tokio::spawn(forward_observers(studio.subscribe(), output_tx.clone())),
        tokio::spawn(broadcast_loop(
            studio.clone(),
            Duration::from_millis(config.sync.broadcast_interval_ms.max(1)),
        )),
        tokio::spawn(autosave_loop(
            studio.clone(),
            config.paths.autosave_dir.clone(),
            Duration::from_secs(config.sync.autosave_interval_secs.max(1)),
        )),
        spawn_reconnect(client.clone()),
    ];

    tokio::select! {
        result = serve_stdin(studio.clone(), output_tx) => {
            if let Err(error) = result {
                error!(error = %format!("{error:#}"), "stdin loop failed");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
    }

    shutdown(&studio, &client, &config, tasks).await;
    Ok(())
}

fn initial_project(config: &AppConfig) -> Result<Project> {
    if let Some(path) = &config.project.open_path {
        return persistence::load_project(path)
            .with_context(|| format!("failed to open startup project {}", path.display()));
    }
    let mut project = Project::new(&config.project.default_title, config.project.default_bpm);
    project.time_signature.numerator = config.project.time_signature_numerator;
    project.time_signature.denominator = config.project.time_signature_denominator;
    if !project.time_signature.is_valid() {
        warn!("configured time signature invalid, using 4/4");
        project.time_signature = Default::default();
    }
    Ok(project)
}

fn spawn_reconnect(client: BridgeClient) -> JoinHandle<()> {
    tokio::spawn(async move { client.reconnect_until_connected().await })
}

/// Feeds peer lifecycle and tick events into the studio.
async fn forward_bridge_events(
    studio: DaemonStudio,
    client: BridgeClient,
    mut events: broadcast::Receiver<BridgeEvent>,
) {
    loop {
        match events.recv().await {
            Ok(BridgeEvent::Disconnected) => {
                studio.handle_bridge_event(BridgeEvent::Disconnected).await;
                spawn_reconnect(client.clone());
            }
            Ok(BridgeEvent::Connected) => {
                // The resync must not stall tick delivery.
                let studio = studio.clone();
                tokio::spawn(async move { studio.handle_bridge_event(BridgeEvent::Connected).await });
            }
            Ok(event) => studio.handle_bridge_event(event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "bridge event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Structural observer messages go to stdout; transport ticks stay internal.
async fn forward_observers(
    mut observers: broadcast::Receiver<ObserverMessage>,
    output: mpsc::Sender<Value>,
) {
    loop {
        let message = match observers.recv().await {
            Ok(ObserverMessage::Transport(_) | ObserverMessage::Meters(_)) => continue,
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "observer receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match serde_json::to_value(&message) {
            Ok(mut value) => {
                if let Value::Object(map) = &mut value {
                    map.insert("type".to_string(), Value::from("observer"));
                }
                if output.send(value).await.is_err() {
                    break;
                }
            }
            Err(error) => warn!(%error, "observer message not serializable"),
        }
    }
}

async fn broadcast_loop(studio: DaemonStudio, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        studio.broadcast_tick();
    }
}

async fn autosave_loop(studio: DaemonStudio, autosave_dir: PathBuf, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(error) = studio.autosave(&autosave_dir) {
            warn!(%error, "autosave failed");
        }
    }
}

#[instrument(skip_all)]
async fn serve_stdin(studio: DaemonStudio, output: mpsc::Sender<Value>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = handle_line(&studio, line).await;
        if output.send(response).await.is_err() {
            break;
        }
    }
    info!("stdin closed");
    Ok(())
}

/// Answers one JSON line, echoing the caller's `id` when present.
///
/// Lines look like `{"id": 1, "cmd": "track.delete", "payload": {"track_id": 2}}`.
pub async fn handle_line(studio: &DaemonStudio, line: &str) -> Value {
    let (id, response) = match serde_json::from_str::<Value>(line) {
        Ok(raw) => {
            let (id, request) = split_envelope(raw);
            let response = match parse_request(request) {
                Ok(request) => studio.handle(request).await,
                Err(response) => response,
            };
            (id, response)
        }
        Err(error) => (None, StudioResponse::failure(format!("invalid json: {error}"))),
    };
    response_line(id, &response)
}

/// Separates the caller's correlation id from the command body.
fn split_envelope(raw: Value) -> (Option<Value>, Value) {
    let Value::Object(mut envelope) = raw else {
        return (None, raw);
    };
    let id = envelope.remove("id");
    let mut body = match envelope.remove("payload") {
        Some(Value::Object(payload)) => payload,
        _ => Map::new(),
    };
    if let Some(cmd) = envelope.remove("cmd") {
        body.insert("cmd".to_string(), cmd);
    }
    (id, Value::Object(body))
}

fn response_line(id: Option<Value>, response: &StudioResponse) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::from("response"));
    map.insert("id".to_string(), id.unwrap_or(Value::Null));
    if let Ok(Value::Object(body)) = serde_json::to_value(response) {
        map.extend(body);
    }
    Value::Object(map)
}

async fn write_output(mut output: mpsc::Receiver<Value>) {
    let mut stdout = tokio::io::stdout();
    while let Some(value) = output.recv().await {
        let mut line = value.to_string();
        line.push('\n');
        if let Err(error) = stdout.write_all(line.as_bytes()).await {
            error!(%error, "stdout write failed");
            break;
        }
        let _ = stdout.flush().await;
    }
}

async fn shutdown(
    studio: &DaemonStudio,
    client: &BridgeClient,
    config: &AppConfig,
    tasks: Vec<JoinHandle<()>>,
) {
    match studio.autosave(&config.paths.autosave_dir) {
        Ok(path) => info!(path = %path.display(), "final autosave written"),
        Err(error) => warn!(%error, "final autosave failed"),
    }
    client.disconnect().await;
    for task in tasks {
        task.abort();
    }
    info!("trackbridge daemon stopped");
}
