//! Newline-delimited JSON framing shared by both ends of the stdio transport.
//!
//! Each line is one [`Frame`]. The provider opens with [`Frame::Hello`];
//! afterwards requests and callbacks flow in both directions, matched to
//! their results by id.

use crate::error::TransportError;
use inquest_types::{
    CallbackRequest, CallbackResponse, ConnectRequest, ConnectResponse, DataRequest, DataResponse, Schema, StoreRequest,
    StoreResponse,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PluginRequest {
    Schema,
    Connect(ConnectRequest),
    GetData(DataRequest),
    StoreData(StoreRequest),
    Disconnect { connection: u32 },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PluginResponse {
    Schema(Schema),
    Connect(ConnectResponse),
    Data(DataResponse),
    Stored(StoreResponse),
    Disconnected,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Hello {
        protocol_version: u32,
        provider: String,
    },
    Request {
        id: u64,
        request: PluginRequest,
    },
    Response {
        id: u64,
        result: Result<PluginResponse, String>,
    },
    Callback {
        id: u64,
        connection: u32,
        request: CallbackRequest,
    },
    CallbackResult {
        id: u64,
        result: Result<CallbackResponse, String>,
    },
}

pub fn encode(frame: &Frame) -> Result<String, TransportError> {
    let mut line = serde_json::to_string(frame).map_err(|e| TransportError::protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

pub fn decode(line: &str) -> Result<Frame, TransportError> {
    serde_json::from_str(line).map_err(|e| TransportError::protocol(format!("malformed frame: {e}")))
}

/// Kind and id of a line that failed to decode, when its envelope is intact.
pub fn frame_id(line: &str) -> Option<(String, u64)> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let kind = value.get("frame")?.as_str()?.to_string();
    let id = value.get("id")?.as_u64()?;
    Some((kind, id))
}

/// Serializes concurrent writers onto one output stream.
pub struct FrameWriter {
    peer: String,
    inner: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl FrameWriter {
    pub fn new<W>(peer: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer: peer.into(),
            inner: Mutex::new(Box::new(writer)),
        }
    }

    /// Writes one frame. A failed write means the peer is gone.
    pub async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let line = encode(frame)?;
        let mut writer = self.inner.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::unavailable(&self.peer, e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::unavailable(&self.peer, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inquest_types::{Primitive, ResourceRef};

    #[test]
    fn frames_are_single_lines() {
        let frame = Frame::Request {
            id: 7,
            request: PluginRequest::GetData(DataRequest::field(1, &ResourceRef::new("os.file", "/etc/hosts"), "content")),
        };
        let line = encode(&frame).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode(line.trim_end()).unwrap(), frame);
    }

    #[test]
    fn frame_id_survives_a_broken_payload() {
        let line = r#"{"frame":"response","id":1,"result":{"Ok":{"op":"schema","resources":42}}}"#;
        assert!(decode(line).is_err());
        assert_eq!(frame_id(line), Some(("response".to_string(), 1)));
        assert_eq!(frame_id("not json"), None);
        assert_eq!(frame_id(r#"{"frame":"response"}"#), None);
    }

    #[test]
    fn results_carry_remote_errors() {
        let frame = Frame::Response {
            id: 1,
            result: Err("connection 9 not found".into()),
        };
        let json: serde_json::Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(json["frame"], "response");
        assert_eq!(json["result"]["Err"], "connection 9 not found");

        let ok = Frame::CallbackResult {
            id: 2,
            result: Ok(CallbackResponse::Data(DataResponse::value(Primitive::Bool(true)))),
        };
        assert_eq!(decode(encode(&ok).unwrap().trim_end()).unwrap(), ok);
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(decode("hello"), Err(TransportError::Protocol { .. })));
    }

    #[tokio::test]
    async fn writer_appends_newline_delimited_frames() {
        let (client, mut server) = tokio::io::duplex(1024);
        let writer = FrameWriter::new("test", client);
        writer
            .send(&Frame::Hello {
                protocol_version: PROTOCOL_VERSION,
                provider: "os".into(),
            })
            .await
            .unwrap();
        drop(writer);

        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut out).await.unwrap();
        assert!(out.starts_with(r#"{"frame":"hello""#));
        assert!(out.ends_with('\n'));
    }
}
