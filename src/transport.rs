//! Wire transport
//!
//! One connection to a resolved plugin endpoint. Frames are a zero-padded
//! 10-digit ASCII decimal length header followed by that many bytes of
//! UTF-8 JSON, so the whole protocol stays self-describing and any
//! non-streaming JSON parser can handle a frame.
//!
//! A request frame is `{"method", "id", "params"}`; a response frame holds
//! `"result"` XOR `"error"`, never both. Exactly one call is outstanding
//! per transport at a time (no pipelining); responses arrive in request
//! order. The `&mut self` receivers make a second `send` before `receive`
//! unrepresentable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::trace;

use crate::error::{Error, ErrorInfo, Result};

/// Length header width in bytes
const HDR_LEN: usize = 10;

/// Fixed request id; the field exists for forward compatibility
const MSG_ID: u64 = 100;

/// Wire schema revision carried on every frame
pub const WIRE_REV: u32 = 1;

/// Largest frame accepted on receive; lengths beyond this are treated
/// as a corrupt header rather than allocated
const MAX_FRAME_LEN: usize = 16 << 20;

fn default_rev() -> u32 {
    WIRE_REV
}

/// A decoded request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub id: u64,
    pub params: Value,
    #[serde(default = "default_rev")]
    pub rev: u32,
}

/// One connected channel to a plugin process
#[derive(Debug)]
pub struct Transport {
    stream: UnixStream,
}

impl Transport {
    /// Connect to a plugin rendezvous socket.
    pub async fn connect(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::PluginNotFound(format!(
                "No plugin socket at {}",
                path.display()
            )));
        }
        let stream = UnixStream::connect(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => Error::PluginSocketPermission(format!(
                "Incorrect permission on IPC socket {}",
                path.display()
            )),
            _ => Error::PluginIpcFail(format!(
                "Unable to connect to plugin at {}, daemon started? ({e})",
                path.display()
            )),
        })?;
        Ok(Self { stream })
    }

    /// Wrap an already-connected stream (plugin side, or tests over a pair).
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    // -------------------------------------------------------------------------
    // Framing
    // -------------------------------------------------------------------------

    async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let hdr = format!("{:0width$}", payload.len(), width = HDR_LEN);
        let io = |e: std::io::Error| {
            Error::TransportCommunication(format!("Error while sending to the plugin: {e}"))
        };
        self.stream.write_all(hdr.as_bytes()).await.map_err(io)?;
        self.stream.write_all(payload).await.map_err(io)?;
        self.stream.flush().await.map_err(io)?;
        Ok(())
    }

    /// Read one frame; `None` on end-of-stream at a frame boundary.
    async fn recv_frame_opt(&mut self) -> Result<Option<Vec<u8>>> {
        let io = |e: std::io::Error| {
            Error::TransportCommunication(format!("Error while reading from the plugin: {e}"))
        };
        let mut hdr = [0u8; HDR_LEN];
        match self.stream.read_exact(&mut hdr).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(io(e)),
        }
        let len: usize = std::str::from_utf8(&hdr)
            .ok()
            .and_then(|s| s.trim_start_matches('0').parse().ok().or_else(|| {
                // an all-zero header is a zero-length frame
                s.chars().all(|c| c == '0').then_some(0)
            }))
            .ok_or_else(|| {
                Error::TransportSerialization(format!("Malformed frame header: {hdr:?}"))
            })?;
        if len > MAX_FRAME_LEN {
            return Err(Error::TransportSerialization(format!(
                "Frame length {len} exceeds the {MAX_FRAME_LEN} byte limit"
            )));
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.map_err(io)?;
        Ok(Some(payload))
    }

    async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        self.recv_frame_opt().await?.ok_or_else(|| {
            Error::TransportCommunication("Connection closed by the peer".into())
        })
    }

    // -------------------------------------------------------------------------
    // Client Side
    // -------------------------------------------------------------------------

    /// Send a request frame. Must be paired with exactly one `receive`.
    pub async fn send(&mut self, method: &str, params: Value) -> Result<()> {
        let req = Request {
            method: method.to_string(),
            id: MSG_ID,
            params,
            rev: WIRE_REV,
        };
        let payload = serde_json::to_vec(&req)?;
        trace!(method, len = payload.len(), "send request");
        self.send_frame(&payload).await
    }

    /// Read one response frame, yielding the result value or the structured
    /// error the plugin answered with.
    pub async fn receive(&mut self) -> Result<Value> {
        let payload = self.recv_frame().await?;
        let frame: Value = serde_json::from_slice(&payload)?;
        let obj = frame.as_object().ok_or_else(|| {
            Error::TransportSerialization("Response frame is not a JSON object".into())
        })?;
        match (obj.get("result"), obj.get("error")) {
            (Some(result), None) => Ok(result.clone()),
            (None, Some(err)) => {
                let info: ErrorInfo = serde_json::from_value(err.clone())?;
                Err(Error::from(info))
            }
            (Some(_), Some(_)) => Err(Error::TransportSerialization(
                "Response frame has both result and error".into(),
            )),
            (None, None) => Err(Error::TransportSerialization(
                "Response frame has neither result nor error".into(),
            )),
        }
    }

    /// One round trip: `send` then `receive`.
    pub async fn rpc(&mut self, method: &str, params: Value) -> Result<Value> {
        self.send(method, params).await?;
        self.receive().await
    }

    // -------------------------------------------------------------------------
    // Plugin Side
    // -------------------------------------------------------------------------

    /// Read one request frame. `Ok(None)` means the peer closed cleanly
    /// between calls.
    pub async fn read_request(&mut self) -> Result<Option<Request>> {
        match self.recv_frame_opt().await? {
            Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
            None => Ok(None),
        }
    }

    /// Answer a request with a result value.
    pub async fn send_result(&mut self, id: u64, result: Value) -> Result<()> {
        let frame = serde_json::json!({ "id": id, "rev": WIRE_REV, "result": result });
        self.send_frame(&serde_json::to_vec(&frame)?).await
    }

    /// Answer a request with a structured error.
    pub async fn send_error(&mut self, id: u64, info: &ErrorInfo) -> Result<()> {
        let frame = serde_json::json!({ "id": id, "rev": WIRE_REV, "error": info });
        self.send_frame(&serde_json::to_vec(&frame)?).await
    }

    /// Close the transport and the underlying socket.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}
