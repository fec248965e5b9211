// In-memory devices and transport shared by the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use callstream::audio::codec;
use callstream::audio::{AudioFrame, CaptureConstraints, CaptureDevice, DecodedAudio, PlaybackDevice};
use callstream::error::{CaptureError, PlaybackError, TransportError};
use callstream::transport::{Transport, TransportEvent};
use callstream::Associator;
use tokio::sync::{mpsc, oneshot};
use url::Url;

// ============================================================================
// Capture
// ============================================================================

#[derive(Default)]
struct CaptureState {
    deny: bool,
    fail_stop: bool,
    fail_release: bool,
    acquired: bool,
    frames: Option<mpsc::Sender<AudioFrame>>,
    acquire_calls: usize,
    start_calls: usize,
    stop_calls: usize,
    release_calls: usize,
}

/// Test-side view of a [`FakeCaptureDevice`]
#[derive(Clone, Default)]
pub struct CaptureProbe {
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureProbe {
    pub fn deny_permission(&self) {
        self.state.lock().unwrap().deny = true;
    }

    pub fn fail_stop(&self) {
        self.state.lock().unwrap().fail_stop = true;
    }

    pub fn fail_release(&self) {
        self.state.lock().unwrap().fail_release = true;
    }

    pub fn is_acquired(&self) -> bool {
        self.state.lock().unwrap().acquired
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().unwrap().frames.is_some()
    }

    pub fn acquire_calls(&self) -> usize {
        self.state.lock().unwrap().acquire_calls
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().unwrap().start_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().unwrap().stop_calls
    }

    pub fn release_calls(&self) -> usize {
        self.state.lock().unwrap().release_calls
    }

    /// Deliver `ms` of a constant mono signal at `sample_rate`
    pub async fn speak(&self, ms: u64, sample_rate: u32) -> bool {
        let frames = self.state.lock().unwrap().frames.clone();
        let Some(frames) = frames else {
            return false;
        };

        let count = (sample_rate as u64 * ms / 1000) as usize;
        frames
            .send(AudioFrame {
                samples: vec![0.25; count],
                sample_rate,
                channels: 1,
                timestamp_ms: 0,
            })
            .await
            .is_ok()
    }

    /// Wait until the capture has been started
    pub async fn wait_capturing(&self) {
        while !self.is_capturing() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub struct FakeCaptureDevice {
    probe: CaptureProbe,
}

impl FakeCaptureDevice {
    pub fn new() -> (Self, CaptureProbe) {
        let probe = CaptureProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

#[async_trait::async_trait]
impl CaptureDevice for FakeCaptureDevice {
    async fn acquire(&mut self, _constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        let mut state = self.probe.state.lock().unwrap();
        state.acquire_calls += 1;
        if state.deny {
            return Err(CaptureError::PermissionDenied("denied by test".to_string()));
        }
        state.acquired = true;
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        let mut state = self.probe.state.lock().unwrap();
        if !state.acquired {
            return Err(CaptureError::NotAcquired);
        }
        let (tx, rx) = mpsc::channel(256);
        state.frames = Some(tx);
        state.start_calls += 1;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        let mut state = self.probe.state.lock().unwrap();
        state.stop_calls += 1;
        if state.fail_stop {
            return Err(CaptureError::Device("stop failed in test".to_string()));
        }
        state.frames = None;
        Ok(())
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        let mut state = self.probe.state.lock().unwrap();
        state.release_calls += 1;
        if state.fail_release {
            return Err(CaptureError::Device("release failed in test".to_string()));
        }
        state.frames = None;
        state.acquired = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.probe.is_capturing()
    }

    fn name(&self) -> &str {
        "fake-mic"
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
struct TransportState {
    fail_open: bool,
    fail_send: bool,
    fail_close: bool,
    open: bool,
    url: Option<String>,
    events: Option<mpsc::Sender<TransportEvent>>,
    open_calls: usize,
    close_calls: usize,
}

#[derive(Clone)]
pub struct TransportProbe {
    state: Arc<Mutex<TransportState>>,
    sent: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl TransportProbe {
    pub fn fail_open(&self) {
        self.state.lock().unwrap().fail_open = true;
    }

    pub fn fail_send(&self) {
        self.state.lock().unwrap().fail_send = true;
    }

    pub fn fail_close(&self) {
        self.state.lock().unwrap().fail_close = true;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    pub fn url(&self) -> Option<String> {
        self.state.lock().unwrap().url.clone()
    }

    pub fn open_calls(&self) -> usize {
        self.state.lock().unwrap().open_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    /// Next frame the controller sent, parsed
    pub async fn next_frame(&self) -> serde_json::Value {
        let mut sent = self.sent.lock().await;
        let text = tokio::time::timeout(Duration::from_secs(120), sent.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("transport dropped");
        serde_json::from_str(&text).expect("outbound frame is JSON")
    }

    /// Frames sent so far without waiting
    pub async fn drain_frames(&self) -> Vec<serde_json::Value> {
        let mut sent = self.sent.lock().await;
        let mut frames = Vec::new();
        while let Ok(text) = sent.try_recv() {
            frames.push(serde_json::from_str(&text).expect("outbound frame is JSON"));
        }
        frames
    }

    /// Push an event as if the peer had produced it
    pub async fn inject(&self, event: TransportEvent) {
        let events = self.state.lock().unwrap().events.clone();
        events
            .expect("transport not open")
            .send(event)
            .await
            .expect("controller stopped listening");
    }

    pub async fn inject_text(&self, text: impl Into<String>) {
        self.inject(TransportEvent::Message(text.into())).await;
    }
}

pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
    sent: mpsc::UnboundedSender<String>,
}

impl FakeTransport {
    pub fn new() -> (Self, TransportProbe) {
        let state = Arc::new(Mutex::new(TransportState::default()));
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: state.clone(),
                sent: sent_tx,
            },
            TransportProbe {
                state,
                sent: Arc::new(tokio::sync::Mutex::new(sent_rx)),
            },
        )
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn open(&mut self, endpoint: &Url) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.open_calls += 1;
        if state.fail_open {
            return Err(TransportError::Open("refused by test".to_string()));
        }

        let (tx, rx) = mpsc::channel(100);
        state.events = Some(tx);
        state.open = true;
        state.url = Some(endpoint.to_string());
        Ok(rx)
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let state = self.state.lock().unwrap();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if state.fail_send {
            return Err(TransportError::Send("broken pipe".to_string()));
        }
        let _ = self.sent.send(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.close_calls += 1;
        if state.fail_close {
            return Err(TransportError::Send("close failed in test".to_string()));
        }
        state.open = false;
        state.events = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

// ============================================================================
// Playback
// ============================================================================

#[derive(Default)]
struct PlaybackState {
    played: Vec<DecodedAudio>,
    done: Option<oneshot::Sender<()>>,
    stop_calls: usize,
}

#[derive(Clone, Default)]
pub struct PlaybackProbe {
    state: Arc<Mutex<PlaybackState>>,
}

impl PlaybackProbe {
    pub fn played(&self) -> usize {
        self.state.lock().unwrap().played.len()
    }

    pub fn last_played(&self) -> Option<DecodedAudio> {
        self.state.lock().unwrap().played.last().cloned()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().done.is_some()
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().unwrap().stop_calls
    }

    /// End the current playback as if the audio ran out
    pub fn finish(&self) -> bool {
        match self.state.lock().unwrap().done.take() {
            Some(done) => done.send(()).is_ok(),
            None => false,
        }
    }

    pub async fn wait_playing(&self) {
        while !self.is_playing() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub struct FakePlaybackDevice {
    probe: PlaybackProbe,
}

impl FakePlaybackDevice {
    pub fn new() -> (Self, PlaybackProbe) {
        let probe = PlaybackProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

#[async_trait::async_trait]
impl PlaybackDevice for FakePlaybackDevice {
    async fn play(&mut self, audio: DecodedAudio) -> Result<oneshot::Receiver<()>, PlaybackError> {
        let mut state = self.probe.state.lock().unwrap();
        let (tx, rx) = oneshot::channel();
        state.played.push(audio);
        state.done = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        let mut state = self.probe.state.lock().unwrap();
        state.stop_calls += 1;
        state.done = None;
    }

    fn name(&self) -> &str {
        "fake-speaker"
    }
}

// ============================================================================
// Associator
// ============================================================================

#[derive(Clone, Default)]
pub struct FakeAssociator {
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
    pub fail: bool,
}

#[async_trait::async_trait]
impl Associator for FakeAssociator {
    async fn associate(&self, call_id: &str, knowledge_base_id: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((call_id.to_string(), knowledge_base_id.to_string()));
        if self.fail {
            anyhow::bail!("knowledge base service unavailable");
        }
        Ok(())
    }
}

// ============================================================================
// Audio helpers
// ============================================================================

/// Base64 WAV of a short mono tone, as the peer would send it
pub fn response_audio_b64(ms: u64, sample_rate: u32) -> String {
    let n = (sample_rate as u64 * ms / 1000) as usize;
    let samples: Vec<i16> = (0..n)
        .map(|i| ((i as f32 * 0.07).sin() * 6000.0) as i16)
        .collect();
    let wav = codec::wav_bytes(&samples, sample_rate, 1).expect("wav encoding");
    codec::encode_base64(&wav)
}
