//! Media stream wire protocol
//!
//! Flat JSON text frames tagged by `type`:
//! - `start` (out): call identity + stream format, message id 1
//! - `audio` (out): base64 PCM16 mono 8 kHz under `data.audio_b64`
//! - `audio` (in): synthesized speech, `audio_b64` top-level or under `data`
//! - `interrupt` / `clear` / `error` (in): playback control and peer errors

pub mod messages;

pub use messages::{
    parse_inbound, AudioData, AudioMessage, InboundAudio, InboundMessage, OutboundMessage,
    StartMessage, StreamFormat, START_MESSAGE_ID,
};

use crate::audio::codec::{WIRE_CHANNELS, WIRE_ENCODING, WIRE_SAMPLE_RATE};

/// Who is calling; sent once per session in the start frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    pub user_id: String,
    pub account_id: String,
    pub call_app_id: String,
}

pub fn start_frame(identity: &CallIdentity, call_id: &str, stream_id: &str) -> OutboundMessage {
    OutboundMessage::Start(StartMessage {
        user_id: identity.user_id.clone(),
        account_id: identity.account_id.clone(),
        call_app_id: identity.call_app_id.clone(),
        call_id: call_id.to_string(),
        stream_id: stream_id.to_string(),
        message_id: START_MESSAGE_ID,
        data: StreamFormat {
            encoding: WIRE_ENCODING.to_string(),
            sample_rate: WIRE_SAMPLE_RATE,
            channels: WIRE_CHANNELS,
        },
    })
}

pub fn audio_frame(stream_id: &str, message_id: u64, audio_b64: String) -> OutboundMessage {
    OutboundMessage::Audio(AudioMessage {
        stream_id: stream_id.to_string(),
        message_id: message_id.to_string(),
        data: AudioData { audio_b64 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use serde_json::Value;

    fn identity() -> CallIdentity {
        CallIdentity {
            user_id: "user-1".to_string(),
            account_id: "acct-1".to_string(),
            call_app_id: "app-1".to_string(),
        }
    }

    #[test]
    fn test_start_frame_serialization() {
        let json = start_frame(&identity(), "session-abc", "stream_1000")
            .to_json()
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "start");
        assert_eq!(value["user_id"], "user-1");
        assert_eq!(value["account_id"], "acct-1");
        assert_eq!(value["call_app_id"], "app-1");
        assert_eq!(value["call_id"], "session-abc");
        assert_eq!(value["stream_id"], "stream_1000");
        assert_eq!(value["message_id"], 1);
        assert_eq!(value["data"]["encoding"], "audio/l16");
        assert_eq!(value["data"]["sample_rate"], 8000);
        assert_eq!(value["data"]["channels"], 1);
    }

    #[test]
    fn test_audio_frame_serialization() {
        let frame = audio_frame("stream_1000", 2, "AAAA".to_string());
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "audio");
        assert_eq!(value["stream_id"], "stream_1000");
        assert_eq!(value["message_id"], "2");
        assert_eq!(value["data"]["audio_b64"], "AAAA");
        assert_eq!(frame.stream_id(), "stream_1000");
    }

    #[test]
    fn test_outbound_roundtrip_through_serde() {
        let frame = audio_frame("s", 7, "AQI=".to_string());
        let back: OutboundMessage = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_inbound_audio_top_level() {
        let msg = parse_inbound(r#"{"type":"audio","audio_b64":"UklGRg==","chunk_id":4}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Audio(InboundAudio {
                audio_b64: "UklGRg==".to_string(),
                chunk_id: Some(4),
            })
        );
    }

    #[test]
    fn test_inbound_audio_nested_under_data() {
        let msg = parse_inbound(r#"{"type":"audio","stream_id":"x","data":{"audio_b64":"AAAA"}}"#)
            .unwrap()
            .unwrap();
        match msg {
            InboundMessage::Audio(audio) => {
                assert_eq!(audio.audio_b64, "AAAA");
                assert_eq!(audio.chunk_id, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_inbound_ignores_extra_fields_and_odd_optional_types() {
        let msg = parse_inbound(
            r#"{"type":"audio","audio_b64":"AAAA","chunk_id":"12","speaker":{"name":"x"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Audio(InboundAudio {
                audio_b64: "AAAA".to_string(),
                chunk_id: Some(12),
            })
        );
    }

    #[test]
    fn test_inbound_unknown_type_is_ignored() {
        assert_eq!(parse_inbound(r#"{"type":"unknown"}"#).unwrap(), None);
        assert_eq!(parse_inbound(r#"{"type":"mark","name":"x"}"#).unwrap(), None);
    }

    #[test]
    fn test_inbound_control_messages() {
        assert_eq!(
            parse_inbound(r#"{"type":"interrupt","chunk_id":3}"#).unwrap(),
            Some(InboundMessage::Interrupt { chunk_id: Some(3) })
        );
        assert_eq!(
            parse_inbound(r#"{"type":"clear"}"#).unwrap(),
            Some(InboundMessage::Clear)
        );
        assert_eq!(
            parse_inbound(r#"{"type":"error","message":"stt failed"}"#).unwrap(),
            Some(InboundMessage::Error {
                message: Some("stt failed".to_string())
            })
        );
    }

    #[test]
    fn test_inbound_malformed_frames() {
        assert!(matches!(parse_inbound("{not json"), Err(ProtocolError::Json(_))));
        assert_eq!(
            parse_inbound(r#"{"audio_b64":"AAAA"}"#),
            Err(ProtocolError::MissingType)
        );
        assert_eq!(
            parse_inbound(r#"{"type":"audio"}"#),
            Err(ProtocolError::MissingPayload)
        );
        assert_eq!(
            parse_inbound(r#"{"type":"audio","data":{"audio_b64":""}}"#),
            Err(ProtocolError::MissingPayload)
        );
    }
}
