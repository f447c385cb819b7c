//! Wire messages for the framed P2P protocol (version 2). Binary frames
//! are not represented here — they travel as the raw payload of
//! [`PeerMessage::Binary`] immediately following a [`Message::Chunk`]
//! header, per spec.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum Message {
    Hello {
        #[serde(rename = "protocolVersion")]
        protocol_version: u32,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Meta {
        #[serde(rename = "sessionId")]
        session_id: String,
        name: String,
        size: u64,
        mime: String,
    },
    Ready,
    Chunk {
        seq: u64,
        offset: u64,
        size: u64,
        total: u64,
    },
    ChunkAck {
        seq: u64,
        received: u64,
    },
    End {
        attempt: u32,
    },
    EndAck {
        received: u64,
        total: u64,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Error {
        message: String,
    },
    Cancelled {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Message {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Message always serializes")
    }

    pub fn from_json(v: &serde_json::Value) -> Option<Message> {
        serde_json::from_value(v.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_header_roundtrips_through_json() {
        let msg = Message::Chunk {
            seq: 7,
            offset: 4096,
            size: 1024,
            total: 10,
        };
        let v = msg.to_json();
        assert_eq!(v["t"], "chunk");
        let back = Message::from_json(&v).unwrap();
        match back {
            Message::Chunk { seq, offset, size, total } => {
                assert_eq!((seq, offset, size, total), (7, 4096, 1024, 10));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn cancelled_without_reason_omits_field() {
        let msg = Message::Cancelled { reason: None };
        let v = msg.to_json();
        assert!(v.get("reason").is_none());
    }
}
