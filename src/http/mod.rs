//! HTTP control API for the call console
//!
//! This module exposes the stream controller over REST:
//! - GET /session/status - Current status snapshot
//! - POST /session/connect, /session/disconnect - Session lifecycle
//! - POST /session/capture/start, /session/capture/stop - Microphone control
//! - POST /session/interrupt - Cut the current response short
//! - GET, DELETE /session/chunks - Recorded chunk history
//! - POST /session/chunks/:id/replay - Local replay of a sent chunk
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
