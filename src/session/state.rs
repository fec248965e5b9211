use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of the stream controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Capturing and ready to send the next chunk
    Streaming,
    /// A chunk was sent; waiting for the synthesized answer
    Processing,
    /// Transport failed; resources are held until `disconnect`
    Error,
}

/// Everything that can move the controller between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    ConnectRequested,
    /// Device acquisition or transport open failed during connect
    ConnectFailed,
    TransportOpened,
    CaptureStarted,
    ChunkSent,
    /// Answer played out, failed to decode, timed out or was interrupted
    ResponseFinished,
    TransportFailed,
    Disconnected,
}

impl ConnectionState {
    /// The single transition function. `None` means the event does not apply
    /// in this state and must be ignored.
    pub fn transition(self, event: StateEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use StateEvent as E;

        match (self, event) {
            (_, E::Disconnected) => Some(Disconnected),
            (Disconnected, E::ConnectRequested) => Some(Connecting),
            (Connecting, E::ConnectFailed) => Some(Disconnected),
            (Connecting, E::TransportOpened) => Some(Connected),
            (Connected, E::CaptureStarted) => Some(Streaming),
            (Streaming | Processing, E::ChunkSent) => Some(Processing),
            (Processing, E::ResponseFinished) => Some(Streaming),
            (Connecting | Connected | Streaming | Processing | Error, E::TransportFailed) => {
                Some(Error)
            }
            _ => None,
        }
    }

    /// True while a session exists on the wire
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Streaming | ConnectionState::Processing
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Processing => "processing",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}
