use std::time::Duration;

use crate::audio::codec::WIRE_SAMPLE_RATE;
use crate::audio::{CaptureConstraints, CaptureSettings};
use crate::protocol::CallIdentity;

/// Runtime settings of one stream controller
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Console origin the media stream endpoint is derived from
    /// (e.g. "https://console.example.com")
    pub origin: String,

    /// Path of the media stream endpoint on the origin
    pub stream_path: String,

    /// Identity announced in the start frame
    pub identity: CallIdentity,

    /// Knowledge base linked to each call after the start frame, if any
    pub knowledge_base_id: Option<String>,

    pub constraints: CaptureConstraints,

    /// Chunk length and maximum capture duration
    pub capture: CaptureSettings,

    /// Outbound PCM rate (8kHz on the wire)
    pub target_sample_rate: u32,

    /// Start capturing by itself once connected
    pub auto_start: bool,

    /// Delay between transport open and auto-start
    /// Default: 500ms
    pub auto_start_delay: Duration,

    /// Give up waiting for a response after this long
    /// Default: 30 seconds
    pub processing_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8000".to_string(),
            stream_path: "/media-stream".to_string(),
            identity: CallIdentity {
                user_id: "anonymous".to_string(),
                account_id: "default".to_string(),
                call_app_id: "console".to_string(),
            },
            knowledge_base_id: None,
            constraints: CaptureConstraints::default(),
            capture: CaptureSettings::default(),
            target_sample_rate: WIRE_SAMPLE_RATE,
            auto_start: true,
            auto_start_delay: Duration::from_millis(500),
            processing_timeout: Duration::from_secs(30),
        }
    }
}
