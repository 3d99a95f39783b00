//! Wire format: `[u32 length (big-endian)][MessagePack map]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::BridgeError;

pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RequestFrame<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: u64,
    pub cmd: &'a str,
    pub payload: &'a Value,
}

impl<'a> RequestFrame<'a> {
    #[must_use]
    pub fn new(id: u64, cmd: &'a str, payload: &'a Value) -> Self {
        Self {
            kind: "request",
            id,
            cmd,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Response {
        id: u64,
        result: Result<Value, String>,
    },
    Event {
        event: String,
        payload: Value,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: u64,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    event: Option<String>,
}

pub fn encode_request(id: u64, cmd: &str, payload: &Value) -> Result<Vec<u8>, BridgeError> {
    let body = rmp_serde::to_vec_named(&RequestFrame::new(id, cmd, payload))
        .map_err(|error| BridgeError::Codec(error.to_string()))?;
    frame(body)
}

/// Prefixes `body` with its big-endian length.
pub fn frame(body: Vec<u8>) -> Result<Vec<u8>, BridgeError> {
    if body.len() > MAX_FRAME_BYTES {
        return Err(BridgeError::FrameTooLarge(body.len()));
    }
    let length = u32::try_from(body.len()).map_err(|_| BridgeError::FrameTooLarge(body.len()))?;
    let mut framed = Vec::with_capacity(body.len() + 4);
    framed.extend_from_slice(&length.to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

pub fn decode_frame(body: &[u8]) -> Result<InboundFrame, BridgeError> {
    let raw: RawFrame =
        rmp_serde::from_slice(body).map_err(|error| BridgeError::Codec(error.to_string()))?;
    match raw.kind.as_str() {
        "response" => {
            let result = if raw.ok {
                Ok(raw.payload)
            } else {
                Err(raw.error.map_or_else(
                    || "unknown peer error".to_string(),
                    |error| match error {
                        Value::String(message) => message,
                        other => other.to_string(),
                    },
                ))
            };
            Ok(InboundFrame::Response { id: raw.id, result })
        }
        "event" => Ok(InboundFrame::Event {
            event: raw.event.unwrap_or_default(),
            payload: raw.payload,
        }),
        other => Err(BridgeError::Codec(format!("unexpected frame type: {other}"))),
    }
}

pub async fn write_frame<W>(writer: &mut W, framed: &[u8]) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame body. `Ok(None)` means the stream closed between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, BridgeError>
where
    R: AsyncRead + Unpin,
{
    let mut length = [0_u8; 4];
    match reader.read_exact(&mut length).await {
        Ok(_) => {}
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    }
    let length = u32::from_be_bytes(length) as usize;
    if length > MAX_FRAME_BYTES {
        return Err(BridgeError::FrameTooLarge(length));
    }
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}
