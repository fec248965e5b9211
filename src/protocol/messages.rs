use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Message id reserved for the `start` frame
pub const START_MESSAGE_ID: u64 = 1;

/// Frames sent from the console to the media stream peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Start(StartMessage),
    Audio(AudioMessage),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn stream_id(&self) -> &str {
        match self {
            OutboundMessage::Start(start) => &start.stream_id,
            OutboundMessage::Audio(audio) => &audio.stream_id,
        }
    }
}

/// Session-start frame, always message id 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMessage {
    pub user_id: String,
    pub account_id: String,
    pub call_app_id: String,
    pub call_id: String,
    pub stream_id: String,
    pub message_id: u64,
    pub data: StreamFormat,
}

/// Audio parameters announced in the start frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// One captured chunk on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMessage {
    pub stream_id: String,
    /// Decimal string of the per-session sequence number
    pub message_id: String,
    pub data: AudioData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioData {
    pub audio_b64: String,
}

/// Frames received from the peer that the controller acts on
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Synthesized speech to play
    Audio(InboundAudio),
    /// Stop playing (optionally a specific chunk)
    Interrupt { chunk_id: Option<u64> },
    /// Drop everything queued for playback
    Clear,
    /// Peer-side failure report
    Error { message: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudio {
    pub audio_b64: String,
    pub chunk_id: Option<u64>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawInbound {
    Audio(RawAudio),
    Interrupt {
        #[serde(default)]
        chunk_id: Option<Value>,
    },
    Clear,
    Error {
        #[serde(default)]
        message: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct RawAudio {
    #[serde(default)]
    audio_b64: Option<String>,
    #[serde(default)]
    data: Option<RawAudioData>,
    #[serde(default)]
    chunk_id: Option<Value>,
}

#[derive(Deserialize)]
struct RawAudioData {
    #[serde(default)]
    audio_b64: Option<String>,
}

/// Parse one inbound text frame.
///
/// Dispatch is on the `type` field only. Unrecognized types yield
/// `Ok(None)`; extra or missing optional fields never fail the parse.
pub fn parse_inbound(text: &str) -> Result<Option<InboundMessage>, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|e| ProtocolError::Json(e.to_string()))?;

    match value.get("type") {
        Some(Value::String(_)) => {}
        Some(_) => return Ok(None),
        None => return Err(ProtocolError::MissingType),
    }

    let raw: RawInbound =
        serde_json::from_value(value).map_err(|e| ProtocolError::Json(e.to_string()))?;

    let message = match raw {
        RawInbound::Audio(audio) => {
            let payload = audio
                .audio_b64
                .filter(|p| !p.is_empty())
                .or_else(|| audio.data.and_then(|d| d.audio_b64))
                .filter(|p| !p.is_empty())
                .ok_or(ProtocolError::MissingPayload)?;

            InboundMessage::Audio(InboundAudio {
                audio_b64: payload,
                chunk_id: audio.chunk_id.as_ref().and_then(loose_u64),
            })
        }
        RawInbound::Interrupt { chunk_id } => InboundMessage::Interrupt {
            chunk_id: chunk_id.as_ref().and_then(loose_u64),
        },
        RawInbound::Clear => InboundMessage::Clear,
        RawInbound::Error { message } => InboundMessage::Error {
            message: message.map(|m| match m {
                Value::String(s) => s,
                other => other.to_string(),
            }),
        },
        RawInbound::Unknown => return Ok(None),
    };

    Ok(Some(message))
}

/// Accept ids sent either as numbers or numeric strings
fn loose_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
