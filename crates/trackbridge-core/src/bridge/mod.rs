//! Contract with the native rendering peer and a Unix-socket client for it.

mod client;
mod command;
pub mod protocol;

use std::future::Future;

use serde_json::Value;
use thiserror::Error;

use crate::transport::PeerTick;

pub use client::{BridgeClient, BridgeClientOptions};
pub use command::{ClipImport, Command};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("bridge is not connected")]
    NotConnected,
    #[error("bridge disconnected while waiting for {command}")]
    Disconnected { command: String },
    #[error("{command} timed out after {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("{command} failed: {message}")]
    Peer { command: String, message: String },
    #[error("codec error: {0}")]
    Codec(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
}

impl BridgeError {
    /// Whether the peer rejected the request because the target does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Peer { message, .. } => message.to_ascii_lowercase().contains("not found"),
            _ => false,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// Lifecycle and push events coming from the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Connected,
    Disconnected,
    Tick(PeerTick),
    Other { event: String, payload: Value },
}

/// Anything that can answer id-correlated requests on behalf of the peer.
pub trait Peer: Send + Sync {
    fn request(&self, command: Command) -> impl Future<Output = Result<Value, BridgeError>> + Send;
}
