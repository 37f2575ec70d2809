//! Framing for remote backends.
//!
//! Every message is `[u32 LE length][u8 kind][body]` where `length` counts
//! the kind byte and the body. Replies and requests start their body with
//! a u64 LE request id.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::bridge::{BackendEvent, Command, Reply, UiEvent};
use crate::error::BridgeError;

/// Largest accepted frame; a full 16-bit detector frame fits easily
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Request = 0,
    JsonReply = 1,
    BinaryReply = 2,
    ErrorReply = 3,
    Event = 4,
    Intent = 5,
}

impl MessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageKind::Request),
            1 => Some(MessageKind::JsonReply),
            2 => Some(MessageKind::BinaryReply),
            3 => Some(MessageKind::ErrorReply),
            4 => Some(MessageKind::Event),
            5 => Some(MessageKind::Intent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Request { id: u64, command: Command },
    Reply { id: u64, reply: Reply },
    /// The backend could not run the request at all
    Error { id: u64, message: String },
    Event(BackendEvent),
    Intent(UiEvent),
}

fn json_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, BridgeError> {
    serde_json::to_vec(value).map_err(|e| BridgeError::Protocol(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, BridgeError> {
    serde_json::from_slice(bytes).map_err(|e| BridgeError::Protocol(e.to_string()))
}

fn split_id(body: &[u8]) -> Result<(u64, &[u8]), BridgeError> {
    if body.len() < 8 {
        return Err(BridgeError::Protocol(format!(
            "message body too short for request id: {} bytes",
            body.len()
        )));
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&body[..8]);
    Ok((u64::from_le_bytes(id), &body[8..]))
}

fn with_id(id: u64, payload: Vec<u8>) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + payload.len());
    body.extend_from_slice(&id.to_le_bytes());
    body.extend_from_slice(&payload);
    body
}

impl WireMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            WireMessage::Request { .. } => MessageKind::Request,
            WireMessage::Reply {
                reply: Reply::Json(_),
                ..
            } => MessageKind::JsonReply,
            WireMessage::Reply {
                reply: Reply::Binary(_),
                ..
            } => MessageKind::BinaryReply,
            WireMessage::Error { .. } => MessageKind::ErrorReply,
            WireMessage::Event(_) => MessageKind::Event,
            WireMessage::Intent(_) => MessageKind::Intent,
        }
    }

    /// Encode into a complete frame including the length prefix
    pub fn encode(&self) -> Result<Vec<u8>, BridgeError> {
        let body = match self {
            WireMessage::Request { id, command } => with_id(*id, json_bytes(command)?),
            WireMessage::Reply {
                id,
                reply: Reply::Json(value),
            } => with_id(*id, json_bytes(value)?),
            WireMessage::Reply {
                id,
                reply: Reply::Binary(bytes),
            } => with_id(*id, bytes.clone()),
            WireMessage::Error { id, message } => with_id(*id, message.as_bytes().to_vec()),
            WireMessage::Event(event) => json_bytes(event)?,
            WireMessage::Intent(event) => json_bytes(event)?,
        };

        let len = body.len() + 1;
        if len > MAX_FRAME_LEN {
            return Err(BridgeError::Protocol(format!("frame of {} bytes too large", len)));
        }
        let mut frame = Vec::with_capacity(4 + len);
        frame.extend_from_slice(&(len as u32).to_le_bytes());
        frame.push(self.kind() as u8);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    pub fn decode(kind: u8, body: &[u8]) -> Result<Self, BridgeError> {
        let kind = MessageKind::from_u8(kind)
            .ok_or_else(|| BridgeError::Protocol(format!("unknown message kind {}", kind)))?;
        Ok(match kind {
            MessageKind::Request => {
                let (id, payload) = split_id(body)?;
                WireMessage::Request {
                    id,
                    command: from_json(payload)?,
                }
            }
            MessageKind::JsonReply => {
                let (id, payload) = split_id(body)?;
                WireMessage::Reply {
                    id,
                    reply: Reply::Json(from_json(payload)?),
                }
            }
            MessageKind::BinaryReply => {
                let (id, payload) = split_id(body)?;
                WireMessage::Reply {
                    id,
                    reply: Reply::Binary(payload.to_vec()),
                }
            }
            MessageKind::ErrorReply => {
                let (id, payload) = split_id(body)?;
                WireMessage::Error {
                    id,
                    message: String::from_utf8_lossy(payload).into_owned(),
                }
            }
            MessageKind::Event => WireMessage::Event(from_json(body)?),
            MessageKind::Intent => WireMessage::Intent(from_json(body)?),
        })
    }
}

/// Read one message; `Ok(None)` on a clean end of stream
pub async fn read_message<R>(reader: &mut R) -> Result<Option<WireMessage>, BridgeError>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(BridgeError::Protocol(format!("invalid frame length {}", len)));
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    WireMessage::decode(frame[0], &frame[1..]).map(Some)
}

pub async fn write_message<W>(writer: &mut W, message: &WireMessage) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::AdvancedCapture;

    #[tokio::test]
    async fn test_messages_cross_a_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let messages = vec![
            WireMessage::Request {
                id: 7,
                command: Command::RunCapture {
                    capture: AdvancedCapture::live(100),
                    auto_save: false,
                },
            },
            WireMessage::Reply {
                id: 7,
                reply: Reply::Binary(vec![1, 2, 3]),
            },
            WireMessage::Reply {
                id: 8,
                reply: Reply::unit(),
            },
            WireMessage::Error {
                id: 9,
                message: "busy".into(),
            },
            WireMessage::Event(BackendEvent::StreamCapture),
            WireMessage::Intent(UiEvent::CancelCapture),
        ];

        for message in &messages {
            write_message(&mut a, message).await.unwrap();
        }
        drop(a);

        for expected in messages {
            assert_eq!(read_message(&mut b).await.unwrap(), Some(expected));
        }
        assert_eq!(read_message(&mut b).await.unwrap(), None);
    }

    #[test]
    fn test_frame_layout() {
        let frame = WireMessage::Reply {
            id: 1,
            reply: Reply::Binary(vec![0xAA]),
        }
        .encode()
        .unwrap();
        assert_eq!(frame, vec![10, 0, 0, 0, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0xAA]);
    }

    #[tokio::test]
    async fn test_rejects_bad_frames() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[2, 0, 0, 0, 99, 0]).await.unwrap();
        assert!(matches!(read_message(&mut b).await, Err(BridgeError::Protocol(_))));

        a.write_all(&[0, 0, 0, 0]).await.unwrap();
        assert!(matches!(read_message(&mut b).await, Err(BridgeError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_disconnect() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[9, 0, 0, 0, 1]).await.unwrap();
        drop(a);
        assert!(matches!(read_message(&mut b).await, Err(BridgeError::Disconnected)));
    }
}
