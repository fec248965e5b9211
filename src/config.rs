use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{CaptureConstraints, CaptureSettings, ChunkConfig};
use crate::protocol::CallIdentity;
use crate::session::StreamConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "callstream".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

/// Where to stream and who is calling
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// Console origin; the media stream endpoint is derived from it
    pub origin: String,
    pub path: String,
    /// Base URL of the console API, defaults to `origin`
    pub api_base: Option<String>,
    pub user_id: String,
    pub account_id: String,
    pub call_app_id: String,
    pub knowledge_base_id: Option<String>,
    pub auto_start: bool,
    pub auto_start_delay_ms: u64,
    pub processing_timeout_secs: u64,
}

impl Default for StreamSection {
    fn default() -> Self {
        let defaults = StreamConfig::default();
        Self {
            origin: defaults.origin,
            path: defaults.stream_path,
            api_base: None,
            user_id: defaults.identity.user_id,
            account_id: defaults.identity.account_id,
            call_app_id: defaults.identity.call_app_id,
            knowledge_base_id: None,
            auto_start: defaults.auto_start,
            auto_start_delay_ms: defaults.auto_start_delay.as_millis() as u64,
            processing_timeout_secs: defaults.processing_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Native rate requested from the microphone
    pub capture_sample_rate: u32,
    /// Length of one captured chunk
    pub chunk_ms: u64,
    /// Capture stops by itself after this long
    pub max_capture_secs: u64,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let constraints = CaptureConstraints::default();
        let capture = CaptureSettings::default();
        Self {
            capture_sample_rate: constraints.sample_rate,
            chunk_ms: capture.chunk.timeslice_ms,
            max_capture_secs: capture.max_duration.as_secs(),
            echo_cancellation: constraints.echo_cancellation,
            noise_suppression: constraints.noise_suppression,
            auto_gain_control: constraints.auto_gain_control,
        }
    }
}

impl Config {
    /// Load `path` (extension optional) and apply `CALLSTREAM__SECTION__KEY`
    /// environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("CALLSTREAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    /// Controller settings derived from the file
    pub fn stream_config(&self) -> StreamConfig {
        let defaults = StreamConfig::default();

        StreamConfig {
            origin: self.stream.origin.clone(),
            stream_path: self.stream.path.clone(),
            identity: CallIdentity {
                user_id: self.stream.user_id.clone(),
                account_id: self.stream.account_id.clone(),
                call_app_id: self.stream.call_app_id.clone(),
            },
            knowledge_base_id: self.stream.knowledge_base_id.clone(),
            constraints: CaptureConstraints {
                channels: 1,
                sample_rate: self.audio.capture_sample_rate,
                echo_cancellation: self.audio.echo_cancellation,
                noise_suppression: self.audio.noise_suppression,
                auto_gain_control: self.audio.auto_gain_control,
            },
            capture: CaptureSettings {
                chunk: ChunkConfig {
                    timeslice_ms: self.audio.chunk_ms,
                },
                max_duration: Duration::from_secs(self.audio.max_capture_secs),
            },
            target_sample_rate: defaults.target_sample_rate,
            auto_start: self.stream.auto_start,
            auto_start_delay: Duration::from_millis(self.stream.auto_start_delay_ms),
            processing_timeout: Duration::from_secs(self.stream.processing_timeout_secs),
        }
    }

    /// Base URL for the knowledge base association call
    pub fn api_base(&self) -> &str {
        self.stream.api_base.as_deref().unwrap_or(&self.stream.origin)
    }
}
