//! Stream session management
//!
//! This module provides the `StreamController` actor that manages:
//! - Microphone acquisition and chunked capture
//! - Encoding chunks into numbered audio frames on the media stream
//! - Playback of synthesized responses and interrupts from the peer
//! - The connection state machine and its published status
//! - Client-side history of sent chunks

mod config;
mod controller;
mod session;
mod state;
mod stats;

pub use config::StreamConfig;
pub use controller::{Clock, ControllerHandle, StreamController};
pub use session::Session;
pub use state::{ConnectionState, StateEvent};
pub use stats::{ChunkHistory, ChunkPlayback, RecordedChunk, StreamStatus};
