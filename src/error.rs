use thiserror::Error;

/// Failures of the capture side (device acquisition and the capture session)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("no capture device available: {0}")]
    NoDevice(String),

    #[error("capture already active")]
    AlreadyActive,

    #[error("capture device not acquired")]
    NotAcquired,

    #[error("capture device error: {0}")]
    Device(String),
}

/// Failures of the duplex message channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to open transport: {0}")]
    Open(String),

    #[error("transport is not open")]
    NotOpen,

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("transport closed unexpectedly: {0}")]
    Closed(String),
}

/// Failures while turning an inbound payload into sound
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("undecodable audio payload: {0}")]
    Decode(String),

    #[error("playback device error: {0}")]
    Device(String),
}

/// Malformed inbound frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed JSON frame: {0}")]
    Json(String),

    #[error("frame has no type field")]
    MissingType,

    #[error("audio frame has no payload")]
    MissingPayload,
}

/// Top-level error taxonomy reported by the stream controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("permission error: {0}")]
    Permission(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("capture error: {0}")]
    Capture(CaptureError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("no recorded chunk with id {0}")]
    UnknownChunk(u64),
}

impl From<CaptureError> for StreamError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(msg) => StreamError::Permission(msg),
            other => StreamError::Capture(other),
        }
    }
}

impl From<PlaybackError> for StreamError {
    fn from(err: PlaybackError) -> Self {
        match err {
            PlaybackError::Decode(msg) => StreamError::Decode(msg),
            PlaybackError::Device(msg) => StreamError::Decode(format!("playback device: {}", msg)),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
