//! Capture session: owns the microphone and cuts its audio into chunks.
//!
//! A session runs at most one capture task. The task reads device frames,
//! feeds the [`ChunkedRecorder`] and emits finished chunks on a channel. It
//! ends on an explicit stop, on the maximum capture duration, or when the
//! device stream ends; in every case the partially filled chunk is flushed
//! before the task exits.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{AudioFrame, CaptureConstraints, CaptureDevice};
use super::chunk::{CaptureChunk, ChunkConfig, ChunkedRecorder};
use crate::error::CaptureError;

const CHUNK_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub chunk: ChunkConfig,
    /// Capture stops by itself after this long
    pub max_duration: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            max_duration: Duration::from_secs(60),
        }
    }
}

pub struct CaptureSession {
    device: Box<dyn CaptureDevice>,
    settings: CaptureSettings,
    acquired: bool,
    task: Option<CaptureTask>,
}

struct CaptureTask {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CaptureSession {
    pub fn new(device: Box<dyn CaptureDevice>, settings: CaptureSettings) -> Self {
        Self {
            device,
            settings,
            acquired: false,
            task: None,
        }
    }

    /// Acquire the microphone. A second call while acquired does nothing.
    pub async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        if self.acquired {
            return Ok(());
        }

        info!("Acquiring capture device: {}", self.device.name());
        self.device.acquire(constraints).await?;
        self.acquired = true;
        Ok(())
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// True while the capture task is running
    pub fn is_active(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Start capturing; chunks arrive on the returned receiver, which closes
    /// once the capture has stopped and its final chunk was delivered.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<CaptureChunk>, CaptureError> {
        if self.is_active() {
            warn!("Capture already active");
            return Err(CaptureError::AlreadyActive);
        }

        if !self.acquired {
            return Err(CaptureError::NotAcquired);
        }

        // A previous capture that ended on its own still has the device running
        if self.task.is_some() {
            self.stop().await?;
        }

        let frames = self.device.start().await?;
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(run_capture(frames, chunk_tx, stop_rx, self.settings.clone()));

        self.task = Some(CaptureTask {
            stop_tx: Some(stop_tx),
            handle,
        });

        info!(
            "Capture started on {} ({}ms chunks, auto-stop after {:?})",
            self.device.name(),
            self.settings.chunk.timeslice_ms,
            self.settings.max_duration
        );

        Ok(chunk_rx)
    }

    /// Stop capturing. Buffered audio is flushed before the device stops.
    /// Does nothing when no capture is running.
    pub async fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(mut task) = self.task.take() {
            if let Some(stop_tx) = task.stop_tx.take() {
                // The task may already be gone after an auto-stop
                let _ = stop_tx.send(());
            }

            if let Err(e) = task.handle.await {
                error!("Capture task panicked: {}", e);
            }
        }

        if self.device.is_capturing() {
            self.device.stop().await?;
            info!("Capture stopped");
        }

        Ok(())
    }

    /// Release the hardware tracks. Safe to call in any state.
    pub fn release(&mut self) -> Result<(), CaptureError> {
        if let Some(task) = self.task.take() {
            // Dropping the stop sender ends the task; it flushes on its own
            drop(task.stop_tx);
        }

        self.acquired = false;
        self.device.release()
    }
}

async fn run_capture(
    mut frames: mpsc::Receiver<AudioFrame>,
    chunks: mpsc::Sender<CaptureChunk>,
    mut stop_rx: oneshot::Receiver<()>,
    settings: CaptureSettings,
) {
    let mut recorder = ChunkedRecorder::new(settings.chunk.clone());
    let deadline = tokio::time::sleep(settings.max_duration);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            _ = &mut stop_rx => break "stop requested",
            _ = &mut deadline => break "maximum capture duration reached",
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if !emit(&mut recorder, &frame, &chunks).await {
                        return;
                    }
                }
                None => break "device stream ended",
            },
        }
    };

    // Frames already delivered by the device belong to this capture
    while let Ok(frame) = frames.try_recv() {
        if !emit(&mut recorder, &frame, &chunks).await {
            return;
        }
    }

    match recorder.flush() {
        Ok(Some(chunk)) => {
            debug!("Flushing final chunk {} ({}ms)", chunk.index, chunk.duration_ms);
            let _ = chunks.send(chunk).await;
        }
        Ok(None) => {}
        Err(e) => error!("Failed to flush final chunk: {}", e),
    }

    info!(
        "Capture task finished: {} ({} chunks)",
        reason,
        recorder.chunks_emitted()
    );
}

/// Returns false once nobody listens for chunks any more
async fn emit(
    recorder: &mut ChunkedRecorder,
    frame: &AudioFrame,
    chunks: &mpsc::Sender<CaptureChunk>,
) -> bool {
    match recorder.push(frame) {
        Ok(done) => {
            for chunk in done {
                if chunks.send(chunk).await.is_err() {
                    debug!("Chunk receiver dropped, ending capture task");
                    return false;
                }
            }
            true
        }
        Err(e) => {
            error!("Failed to record frame: {}", e);
            true
        }
    }
}
