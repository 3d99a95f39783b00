use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    net::{
        UnixStream,
        unix::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{self, broadcast, oneshot},
};
use tracing::{debug, info, instrument, warn};

use super::{
    BridgeError, BridgeEvent, Command, Peer,
    protocol::{self, InboundFrame},
};
use crate::transport::PeerTick;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const TICK_EVENT: &str = "transport.tick";

#[derive(Debug, Clone)]
pub struct BridgeClientOptions {
    pub socket_path: PathBuf,
    pub request_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl BridgeClientOptions {
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            request_timeout: Duration::from_millis(5_000),
            reconnect_interval: Duration::from_millis(1_500),
        }
    }
}

struct PendingRequest {
    command: &'static str,
    sender: oneshot::Sender<Result<Value, BridgeError>>,
}

struct ClientInner {
    options: BridgeClientOptions,
    next_id: AtomicU64,
    /// Bumped on every connect so a stale reader cannot tear down a newer link.
    generation: AtomicU64,
    connected: AtomicBool,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    writer: sync::Mutex<Option<OwnedWriteHalf>>,
    events: broadcast::Sender<BridgeEvent>,
}

/// Id-correlated request client over the peer's Unix socket.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

impl BridgeClient {
    #[must_use]
    pub fn new(options: BridgeClientOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                options,
                next_id: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
                writer: sync::Mutex::new(None),
                events,
            }),
        }
    }

    #[must_use]
    pub fn options(&self) -> &BridgeClientOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.events.subscribe()
    }

    #[instrument(skip(self), fields(socket = %self.inner.options.socket_path.display()))]
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let stream = UnixStream::connect(&self.inner.options.socket_path).await?;
        let (reader, writer) = stream.into_split();
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;

        *self.inner.writer.lock().await = Some(writer);
        self.inner.connected.store(true, Ordering::Release);
        tokio::spawn(read_loop(Arc::clone(&self.inner), reader, generation));

        info!(generation, "bridge connected");
        let _ = self.inner.events.send(BridgeEvent::Connected);
        Ok(())
    }

    /// Retries `connect` on the configured interval until it succeeds.
    pub async fn reconnect_until_connected(&self) {
        let interval = self.inner.options.reconnect_interval;
        let mut attempts = 0_u32;
        while !self.is_connected() {
            attempts += 1;
            match self.connect().await {
                Ok(()) => return,
                Err(error) => {
                    debug!(attempts, %error, "bridge reconnect attempt failed");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    /// Closes the link; pending requests fail with `Disconnected`.
    pub async fn disconnect(&self) {
        let generation = self.inner.generation.load(Ordering::Acquire);
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            use tokio::io::AsyncWriteExt;
            let _ = writer.shutdown().await;
        }
        mark_disconnected(&self.inner, generation).await;
    }

    #[instrument(skip(self, command), fields(cmd = command.name()))]
    pub async fn send(&self, command: Command) -> Result<Value, BridgeError> {
        let name = command.name();
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        let framed = protocol::encode_request(id, name, &command.payload())?;
        let (sender, receiver) = oneshot::channel();
        self.inner.pending.lock().insert(
            id,
            PendingRequest {
                command: name,
                sender,
            },
        );

        let written = {
            let mut writer = self.inner.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => protocol::write_frame(writer, &framed).await,
                None => Err(BridgeError::NotConnected),
            }
        };
        if let Err(error) = written {
            self.inner.pending.lock().remove(&id);
            return Err(error);
        }

        let timeout = self.inner.options.request_timeout;
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Disconnected {
                command: name.to_string(),
            }),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                warn!(id, "bridge request timed out");
                Err(BridgeError::Timeout {
                    command: name.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl Peer for BridgeClient {
    async fn request(&self, command: Command) -> Result<Value, BridgeError> {
        self.send(command).await
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut reader: OwnedReadHalf, generation: u64) {
    loop {
        let body = match protocol::read_frame(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!(generation, "bridge stream closed by peer");
                break;
            }
            Err(error) => {
                warn!(generation, %error, "bridge read failed");
                break;
            }
        };

        match protocol::decode_frame(&body) {
            Ok(InboundFrame::Response { id, result }) => {
                let pending = inner.pending.lock().remove(&id);
                match pending {
                    Some(pending) => {
                        let result = result.map_err(|message| BridgeError::Peer {
                            command: pending.command.to_string(),
                            message,
                        });
                        let _ = pending.sender.send(result);
                    }
                    None => debug!(id, ?result, "response for unknown request"),
                }
            }
            Ok(InboundFrame::Event { event, payload }) => {
                let _ = inner.events.send(classify_event(event, payload));
            }
            Err(error) => warn!(%error, "undecodable bridge frame dropped"),
        }
    }
    mark_disconnected(&inner, generation).await;
}

fn classify_event(event: String, payload: Value) -> BridgeEvent {
    if event != TICK_EVENT {
        return BridgeEvent::Other { event, payload };
    }
    match serde_json::from_value::<PeerTick>(payload.clone()) {
        Ok(tick) => BridgeEvent::Tick(tick),
        Err(error) => {
            debug!(%error, "malformed transport tick");
            BridgeEvent::Other { event, payload }
        }
    }
}

async fn mark_disconnected(inner: &ClientInner, generation: u64) {
    if inner.generation.load(Ordering::Acquire) != generation {
        return;
    }
    if !inner.connected.swap(false, Ordering::AcqRel) {
        return;
    }
    inner.writer.lock().await.take();

    let drained: Vec<PendingRequest> = inner.pending.lock().drain().map(|(_, p)| p).collect();
    let failed = drained.len();
    for pending in drained {
        let _ = pending.sender.send(Err(BridgeError::Disconnected {
            command: pending.command.to_string(),
        }));
    }

    info!(generation, failed, "bridge disconnected");
    let _ = inner.events.send(BridgeEvent::Disconnected);
}
