//! Hardware devices on top of cpal.
//!
//! cpal streams are not `Send`, so each stream lives on a dedicated thread
//! that is driven through a command channel. Audio crosses into tokio through
//! `try_send` so the realtime callback never blocks.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioFrame, CaptureConstraints, CaptureDevice};
use super::codec::{self, DecodedAudio};
use super::playback::PlaybackDevice;
use crate::error::{CaptureError, PlaybackError};

const FRAME_CHANNEL_CAPACITY: usize = 256;

type FrameSlot = Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>;

type Reply = oneshot::Sender<Result<(), CaptureError>>;

enum CaptureCommand {
    Start(mpsc::Sender<AudioFrame>, Reply),
    Stop(Reply),
    Release,
}

/// Default input device
pub struct CpalCaptureDevice {
    name: String,
    worker: Option<(std_mpsc::Sender<CaptureCommand>, thread::JoinHandle<()>)>,
    capturing: bool,
}

impl CpalCaptureDevice {
    pub fn new() -> Self {
        Self {
            name: "cpal default input".to_string(),
            worker: None,
            capturing: false,
        }
    }

    async fn request(&self, make: impl FnOnce(Reply) -> CaptureCommand) -> Result<(), CaptureError> {
        let (tx, _) = self.worker.as_ref().ok_or(CaptureError::NotAcquired)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(make(reply_tx))
            .map_err(|_| CaptureError::Device("capture thread exited".to_string()))?;
        reply_rx
            .await
            .map_err(|_| CaptureError::Device("capture thread exited".to_string()))?
    }
}

/// Reap a worker thread off the async executor
fn join_in_background(handle: thread::JoinHandle<()>, name: String) {
    let join = move || {
        if handle.join().is_err() {
            error!("Capture thread for {} panicked", name);
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(join);
        }
        Err(_) => join(),
    }
}

impl Default for CpalCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CaptureDevice for CpalCaptureDevice {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (command_tx, command_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let constraints = constraints.clone();

        let handle = thread::Builder::new()
            .name("callstream-capture".to_string())
            .spawn(move || capture_thread(constraints, command_rx, ready_tx))
            .map_err(|e| CaptureError::Device(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(name)) => {
                self.name = name;
                self.worker = Some((command_tx, handle));
                Ok(())
            }
            Ok(Err(e)) => {
                join_in_background(handle, self.name.clone());
                Err(e)
            }
            Err(_) => Err(CaptureError::Device("capture thread exited".to_string())),
        }
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.capturing {
            return Err(CaptureError::AlreadyActive);
        }

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        self.request(|reply| CaptureCommand::Start(frame_tx, reply)).await?;
        self.capturing = true;
        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.capturing {
            return Ok(());
        }

        self.capturing = false;
        self.request(CaptureCommand::Stop).await
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        self.capturing = false;

        if let Some((tx, handle)) = self.worker.take() {
            // The thread drops the stream on its way out
            let _ = tx.send(CaptureCommand::Release);
            join_in_background(handle, self.name.clone());
            info!("Released capture device {}", self.name);
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn capture_thread(
    constraints: CaptureConstraints,
    commands: std_mpsc::Receiver<CaptureCommand>,
    ready: oneshot::Sender<Result<String, CaptureError>>,
) {
    let host = cpal::default_host();

    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err(CaptureError::NoDevice(
            "no default input device available".to_string(),
        )));
        return;
    };

    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let config = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::PermissionDenied(e.to_string())));
            return;
        }
    };

    if config.sample_rate().0 != constraints.sample_rate || config.channels() != constraints.channels {
        debug!(
            "Input device runs at {}Hz/{}ch (requested {}Hz/{}ch); converting in software",
            config.sample_rate().0,
            config.channels(),
            constraints.sample_rate,
            constraints.channels
        );
    }

    let sample_rate = config.sample_rate().0;
    let channels = config.channels();
    let slot: FrameSlot = Arc::new(Mutex::new(None));
    let frames_seen = Arc::new(AtomicU64::new(0));

    let deliver = {
        let slot = Arc::clone(&slot);
        let frames_seen = Arc::clone(&frames_seen);
        move |samples: Vec<f32>| {
            let count = samples.len() as u64 / channels.max(1) as u64;
            let seen = frames_seen.fetch_add(count, Ordering::Relaxed);
            let frame = AudioFrame {
                samples,
                sample_rate,
                channels,
                timestamp_ms: seen * 1000 / sample_rate as u64,
            };
            if let Ok(guard) = slot.lock() {
                if let Some(tx) = guard.as_ref() {
                    if tx.try_send(frame).is_err() {
                        warn!("Capture consumer lagging, dropping frame");
                    }
                }
            }
        }
    };

    let stream_config: cpal::StreamConfig = config.clone().into();
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(data.to_vec()),
            |err| error!("Capture stream error: {}", err),
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                deliver(data.iter().map(|&s| s as f32 / 32768.0).collect())
            },
            |err| error!("Capture stream error: {}", err),
            None,
        ),
        format => {
            let _ = ready.send(Err(CaptureError::Device(format!(
                "unsupported sample format: {:?}",
                format
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::PermissionDenied(e.to_string())));
            return;
        }
    };

    info!("Acquired input device {} ({}Hz, {} channels)", name, sample_rate, channels);
    if ready.send(Ok(name)).is_err() {
        return;
    }

    while let Ok(command) = commands.recv() {
        match command {
            CaptureCommand::Start(tx, reply) => {
                if let Ok(mut guard) = slot.lock() {
                    *guard = Some(tx);
                }
                frames_seen.store(0, Ordering::Relaxed);
                let result = stream
                    .play()
                    .map_err(|e| CaptureError::Device(format!("failed to start stream: {}", e)));
                let _ = reply.send(result);
            }
            CaptureCommand::Stop(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| CaptureError::Device(format!("failed to pause stream: {}", e)));
                if let Ok(mut guard) = slot.lock() {
                    *guard = None;
                }
                let _ = reply.send(result);
            }
            CaptureCommand::Release => break,
        }
    }

    drop(stream);
}

/// Default output device; one rendering thread per playback
pub struct CpalPlaybackDevice {
    current: Option<std_mpsc::Sender<()>>,
}

impl CpalPlaybackDevice {
    pub fn new() -> Self {
        Self { current: None }
    }
}

impl Default for CpalPlaybackDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PlaybackDevice for CpalPlaybackDevice {
    async fn play(&mut self, audio: DecodedAudio) -> Result<oneshot::Receiver<()>, PlaybackError> {
        self.stop();

        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        thread::Builder::new()
            .name("callstream-playback".to_string())
            .spawn(move || playback_thread(audio, stop_rx, done_tx, ready_tx))
            .map_err(|e| PlaybackError::Device(format!("failed to spawn playback thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.current = Some(stop_tx);
                Ok(done_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PlaybackError::Device("playback thread exited".to_string())),
        }
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.current.take() {
            let _ = stop_tx.send(());
        }
    }

    fn name(&self) -> &str {
        "cpal default output"
    }
}

fn playback_thread(
    audio: DecodedAudio,
    stop_rx: std_mpsc::Receiver<()>,
    done_tx: oneshot::Sender<()>,
    ready: oneshot::Sender<Result<(), PlaybackError>>,
) {
    let host = cpal::default_host();

    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err(PlaybackError::Device("no default output device".to_string())));
        return;
    };

    let config = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(PlaybackError::Device(e.to_string())));
            return;
        }
    };

    if config.sample_format() != cpal::SampleFormat::F32 {
        let _ = ready.send(Err(PlaybackError::Device(format!(
            "unsupported output format: {:?}",
            config.sample_format()
        ))));
        return;
    }

    let out_rate = config.sample_rate().0;
    let out_channels = config.channels() as usize;
    let samples = Arc::new(codec::resample(&audio.to_mono(), audio.sample_rate, out_rate));
    let position = Arc::new(AtomicUsize::new(0));
    let drained = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let drained = Arc::clone(&drained);
        device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(out_channels) {
                    let value = samples.get(pos).copied().unwrap_or(0.0);
                    frame.iter_mut().for_each(|s| *s = value);
                    pos += 1;
                }
                position.store(pos, Ordering::Relaxed);
                if pos >= samples.len() {
                    drained.store(true, Ordering::Relaxed);
                }
            },
            |err| error!("Playback stream error: {}", err),
            None,
        )
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(PlaybackError::Device(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(PlaybackError::Device(e.to_string())));
        return;
    }

    let _ = ready.send(Ok(()));

    loop {
        match stop_rx.recv_timeout(Duration::from_millis(10)) {
            // Stop requested or device dropped: done_tx drops unsent
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                debug!("Playback stopped early");
                return;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if drained.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }

    drop(stream);
    let _ = done_tx.send(());
}
