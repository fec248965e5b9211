pub mod associate;
pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod protocol;
pub mod session;
pub mod transport;

pub use associate::{Associator, HttpAssociator};
pub use audio::{
    AudioFrame, CaptureChunk, CaptureConstraints, CaptureDevice, CaptureSession, ChunkConfig,
    ChunkedRecorder, DecodedAudio, FileCaptureDevice, PlaybackDevice, PlaybackSession,
    WavFilePlaybackDevice,
};
pub use config::Config;
pub use error::{CaptureError, PlaybackError, ProtocolError, StreamError, TransportError};
pub use http::{create_router, AppState};
pub use protocol::{CallIdentity, InboundMessage, OutboundMessage};
pub use session::{
    ConnectionState, ControllerHandle, RecordedChunk, StreamConfig, StreamController, StreamStatus,
};
pub use transport::{Transport, TransportEvent, WebSocketTransport};
