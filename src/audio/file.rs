//! File-backed devices: stream a recording as if it were a microphone and
//! store received speech as WAV files. Used when no sound hardware is around.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, CaptureConstraints, CaptureDevice};
use super::codec::{self, DecodedAudio};
use super::playback::PlaybackDevice;
use crate::error::{CaptureError, PlaybackError};

/// Length of one emitted frame
const FRAME_MS: u64 = 20;

/// Replays an audio file in real time as capture frames
pub struct FileCaptureDevice {
    path: PathBuf,
    audio: Option<Arc<DecodedAudio>>,
    task: Option<JoinHandle<()>>,
}

impl FileCaptureDevice {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            audio: None,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureDevice for FileCaptureDevice {
    async fn acquire(&mut self, _constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| CaptureError::NoDevice(format!("{}: {}", self.path.display(), e)))?;

        let audio = codec::decode_media(&bytes).map_err(CaptureError::Device)?;

        info!(
            "Opened capture file {}: {}ms, {}Hz, {} channels",
            self.path.display(),
            audio.duration_ms(),
            audio.sample_rate,
            audio.channels
        );

        self.audio = Some(Arc::new(audio));
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        let audio = self.audio.clone().ok_or(CaptureError::NotAcquired)?;
        let (tx, rx) = mpsc::channel(100);

        self.task = Some(tokio::spawn(async move {
            let channels = audio.channels.max(1) as usize;
            let frames_per_tick = (audio.sample_rate as u64 * FRAME_MS / 1000).max(1) as usize;
            let step = frames_per_tick * channels;

            let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_MS));
            let mut timestamp_ms = 0;

            for samples in audio.samples.chunks(step) {
                ticker.tick().await;

                let frame = AudioFrame {
                    samples: samples.to_vec(),
                    sample_rate: audio.sample_rate,
                    channels: audio.channels,
                    timestamp_ms,
                };
                timestamp_ms += frame.duration_ms();

                if tx.send(frame).await.is_err() {
                    return;
                }
            }

            debug!("Capture file exhausted after {}ms", timestamp_ms);
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.audio = None;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Writes every played response to `<dir>/response-<n>.wav`.
///
/// Completion fires after the audio's own duration so the controller sees
/// the same timing a speaker would give it.
pub struct WavFilePlaybackDevice {
    dir: PathBuf,
    counter: Arc<AtomicUsize>,
    task: Option<JoinHandle<()>>,
}

impl WavFilePlaybackDevice {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            counter: Arc::new(AtomicUsize::new(0)),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl PlaybackDevice for WavFilePlaybackDevice {
    async fn play(&mut self, audio: DecodedAudio) -> Result<oneshot::Receiver<()>, PlaybackError> {
        self.stop();

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PlaybackError::Device(format!("{}: {}", self.dir.display(), e)))?;

        let index = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("response-{:04}.wav", index));

        let pcm: Vec<i16> = audio.samples.iter().copied().map(codec::quantize).collect();
        let bytes = codec::wav_bytes(&pcm, audio.sample_rate, audio.channels)
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PlaybackError::Device(format!("{}: {}", path.display(), e)))?;

        info!("Saved response to {}", path.display());

        let (done_tx, done_rx) = oneshot::channel();
        let duration = Duration::from_millis(audio.duration_ms());
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = done_tx.send(());
        }));

        Ok(done_rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                warn!("Cutting response playback short");
            }
            task.abort();
        }
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}
