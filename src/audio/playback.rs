//! Playback of synthesized speech received from the peer.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::codec::{self, DecodedAudio};
use crate::error::PlaybackError;

/// Speaker abstraction
#[async_trait::async_trait]
pub trait PlaybackDevice: Send {
    /// Render decoded audio; the receiver fires when rendering ends.
    /// Dropping the sender without sending means the playback was cut short.
    async fn play(&mut self, audio: DecodedAudio) -> Result<oneshot::Receiver<()>, PlaybackError>;

    /// Halt immediately. Safe to call when nothing plays.
    fn stop(&mut self);

    fn name(&self) -> &str;
}

/// How a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Stopped,
}

/// Resolves when the current playback ends
pub struct PlaybackCompletion {
    rx: oneshot::Receiver<()>,
}

impl Future for PlaybackCompletion {
    type Output = PlaybackOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| match result {
            Ok(()) => PlaybackOutcome::Finished,
            Err(_) => PlaybackOutcome::Stopped,
        })
    }
}

/// Owns the output device; at most one playback is live at a time
pub struct PlaybackSession {
    device: Box<dyn PlaybackDevice>,
    playing: bool,
}

impl PlaybackSession {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        Self {
            device,
            playing: false,
        }
    }

    /// Decode a base64 payload and start playing it
    pub async fn play(&mut self, payload_b64: &str) -> Result<PlaybackCompletion, PlaybackError> {
        let bytes = codec::decode_base64(payload_b64)
            .map_err(|e| PlaybackError::Decode(format!("invalid base64: {}", e)))?;
        self.play_media(&bytes).await
    }

    /// Decode container bytes and start playing them
    pub async fn play_media(&mut self, bytes: &[u8]) -> Result<PlaybackCompletion, PlaybackError> {
        let audio = codec::decode_media(bytes).map_err(PlaybackError::Decode)?;

        // Only one playback: release the previous one first
        self.stop();

        info!(
            "Playing {}ms of audio on {} ({}Hz, {} channels)",
            audio.duration_ms(),
            self.device.name(),
            audio.sample_rate,
            audio.channels
        );

        let rx = self.device.play(audio).await?;
        self.playing = true;

        Ok(PlaybackCompletion { rx })
    }

    /// Halt the current playback, if any
    pub fn stop(&mut self) {
        if self.playing {
            debug!("Stopping playback");
        }
        self.device.stop();
        self.playing = false;
    }

    /// Record that the live playback ended on its own
    pub fn mark_finished(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if self.playing {
            warn!("Playback session dropped while playing; stopping device");
            self.device.stop();
        }
    }
}
