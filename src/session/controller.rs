//! The stream controller actor.
//!
//! One tokio task owns the capture session, the transport and the playback
//! session and reacts to one event at a time: commands from
//! [`ControllerHandle`]s, transport events, finished capture chunks, the
//! auto-start timer, the processing deadline and playback completion.
//! Every state change goes through [`ConnectionState::transition`] and is
//! published on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::config::StreamConfig;
use super::session::Session;
use super::state::{ConnectionState, StateEvent};
use super::stats::{ChunkHistory, ChunkPlayback, RecordedChunk, StreamStatus};
use crate::associate::Associator;
use crate::audio::codec;
use crate::audio::{
    CaptureChunk, CaptureDevice, CaptureSession, PlaybackCompletion, PlaybackDevice,
    PlaybackOutcome, PlaybackSession,
};
use crate::error::{CaptureError, Result, StreamError, TransportError};
use crate::protocol::{self, InboundMessage};
use crate::transport::{endpoint_url, Transport, TransportEvent};

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of unix milliseconds used for stream ids
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

enum Command {
    Connect(oneshot::Sender<Result<()>>),
    Disconnect(oneshot::Sender<Result<()>>),
    StartCapture(oneshot::Sender<Result<()>>),
    StopCapture(oneshot::Sender<Result<()>>),
    Interrupt(oneshot::Sender<Result<()>>),
    ClearHistory(oneshot::Sender<usize>),
    ReplayChunk(u64, oneshot::Sender<Result<()>>),
    Status(oneshot::Sender<StreamStatus>),
    History(oneshot::Sender<Vec<RecordedChunk>>),
}

/// Cloneable front door to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StreamStatus>,
}

fn controller_gone() -> StreamError {
    StreamError::InvalidState("stream controller has stopped".to_string())
}

impl ControllerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| controller_gone())?;
        reply_rx.await.map_err(|_| controller_gone())
    }

    /// Acquire the microphone, open the transport and announce the stream
    pub async fn connect(&self) -> Result<()> {
        self.request(Command::Connect).await?
    }

    /// Release everything. Safe to call in any state, any number of times.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await?
    }

    pub async fn start_capture(&self) -> Result<()> {
        self.request(Command::StartCapture).await?
    }

    pub async fn stop_capture(&self) -> Result<()> {
        self.request(Command::StopCapture).await?
    }

    /// Cut the current response short
    pub async fn interrupt(&self) -> Result<()> {
        self.request(Command::Interrupt).await?
    }

    /// Drop the recorded chunk history; returns how many chunks were removed
    pub async fn clear_history(&self) -> Result<usize> {
        self.request(Command::ClearHistory).await
    }

    /// Play a recorded chunk back locally
    pub async fn replay_chunk(&self, id: u64) -> Result<()> {
        self.request(|reply| Command::ReplayChunk(id, reply)).await?
    }

    pub async fn history(&self) -> Result<Vec<RecordedChunk>> {
        self.request(Command::History).await
    }

    pub async fn status(&self) -> Result<StreamStatus> {
        self.request(Command::Status).await
    }

    /// Latest published snapshot without a round trip to the controller
    pub fn current_status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    /// Wait until the controller publishes `state`
    pub async fn wait_for(&self, state: ConnectionState) -> Result<StreamStatus> {
        let mut status = self.status.clone();
        let snapshot = status
            .wait_for(|s| s.state == state)
            .await
            .map_err(|_| controller_gone())?;
        Ok(snapshot.clone())
    }

    /// Disconnect every time the controller lands in `Error`, which holds
    /// on to its devices until told otherwise. Returns once the controller
    /// has stopped.
    pub async fn release_on_error(self) {
        while self.wait_for(ConnectionState::Error).await.is_ok() {
            warn!("Stream failed, releasing session resources");
            if let Err(e) = self.disconnect().await {
                warn!("Release after failure did not complete: {}", e);
                return;
            }
        }
    }
}

struct ActivePlayback {
    completion: PlaybackCompletion,
    /// Set when a recorded chunk is replayed instead of a response playing
    replay: Option<u64>,
    /// Started while `Processing`; only these answer the pending chunk
    response: bool,
}

pub struct StreamController {
    config: StreamConfig,
    state: ConnectionState,
    capture: CaptureSession,
    transport: Box<dyn Transport>,
    playback: PlaybackSession,
    associator: Option<Arc<dyn Associator>>,
    clock: Clock,
    session: Option<Session>,
    history: ChunkHistory,
    events: Option<mpsc::Receiver<TransportEvent>>,
    chunks: Option<mpsc::Receiver<CaptureChunk>>,
    auto_start_at: Option<Instant>,
    processing_deadline: Option<Instant>,
    playing: Option<ActivePlayback>,
    frames_sent: u64,
    last_error: Option<String>,
    status_tx: watch::Sender<StreamStatus>,
}

impl StreamController {
    pub fn new(
        config: StreamConfig,
        capture_device: Box<dyn CaptureDevice>,
        transport: Box<dyn Transport>,
        playback_device: Box<dyn PlaybackDevice>,
    ) -> Self {
        let (status_tx, _) = watch::channel(StreamStatus::default());
        let capture = CaptureSession::new(capture_device, config.capture.clone());

        Self {
            config,
            state: ConnectionState::Disconnected,
            capture,
            transport,
            playback: PlaybackSession::new(playback_device),
            associator: None,
            clock: system_clock(),
            session: None,
            history: ChunkHistory::new(),
            events: None,
            chunks: None,
            auto_start_at: None,
            processing_deadline: None,
            playing: None,
            frames_sent: 0,
            last_error: None,
            status_tx,
        }
    }

    pub fn with_associator(mut self, associator: Arc<dyn Associator>) -> Self {
        self.associator = Some(associator);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run the controller on its own task
    pub fn spawn(self) -> ControllerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = ControllerHandle {
            commands: command_tx,
            status: self.status_tx.subscribe(),
        };

        tokio::spawn(self.run(command_rx));

        handle
    }

    /// Event loop; ends once every handle has been dropped
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Stream controller started");
        self.publish();

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = recv_or_pending(&mut self.events) => {
                    self.handle_transport_event(event).await;
                }
                chunk = recv_or_pending(&mut self.chunks) => {
                    self.handle_chunk(chunk).await;
                }
                _ = sleep_or_pending(self.auto_start_at) => {
                    self.auto_start_at = None;
                    debug!("Auto-start delay elapsed");
                    if let Err(e) = self.start_capture().await {
                        error!("Auto-start failed: {}", e);
                        self.last_error = Some(e.to_string());
                    }
                }
                _ = sleep_or_pending(self.processing_deadline) => {
                    self.processing_deadline = None;
                    warn!(
                        "No response within {:?}, resuming streaming",
                        self.config.processing_timeout
                    );
                    self.apply(StateEvent::ResponseFinished);
                }
                outcome = playback_or_pending(&mut self.playing) => {
                    self.handle_playback_end(outcome);
                }
            }

            self.publish();
        }

        if let Err(e) = self.disconnect().await {
            warn!("Final disconnect failed: {}", e);
        }
        info!("Stream controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                let result = self.disconnect().await;
                let _ = reply.send(result);
            }
            Command::StartCapture(reply) => {
                let result = self.start_capture().await;
                let _ = reply.send(result);
            }
            Command::StopCapture(reply) => {
                let result = self.stop_capture().await;
                let _ = reply.send(result);
            }
            Command::Interrupt(reply) => {
                self.interrupt();
                let _ = reply.send(Ok(()));
            }
            Command::ClearHistory(reply) => {
                let _ = reply.send(self.clear_history());
            }
            Command::ReplayChunk(id, reply) => {
                let result = self.replay_chunk(id).await;
                let _ = reply.send(result);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::History(reply) => {
                let _ = reply.send(self.history.list());
            }
        }
    }

    /// Apply one event to the state machine; false when it does not apply
    fn apply(&mut self, event: StateEvent) -> bool {
        match self.state.transition(event) {
            Some(next) => {
                if next != self.state {
                    info!("Connection state: {} -> {}", self.state, next);
                }
                self.state = next;
                self.publish();
                true
            }
            None => {
                debug!("Ignoring {:?} in state {}", event, self.state);
                false
            }
        }
    }

    fn fail(&mut self, err: &StreamError) {
        self.last_error = Some(err.to_string());
    }

    async fn connect(&mut self) -> Result<()> {
        if !self.apply(StateEvent::ConnectRequested) {
            return Err(StreamError::InvalidState(format!(
                "cannot connect while {}",
                self.state
            )));
        }
        self.last_error = None;

        // Microphone first: a denied prompt must not leave a socket open
        if let Err(e) = self.capture.acquire(&self.config.constraints).await {
            let err = StreamError::from(e);
            error!("Failed to acquire capture device: {}", err);
            self.fail(&err);
            self.apply(StateEvent::ConnectFailed);
            return Err(err);
        }

        let opened = match endpoint_url(&self.config.origin, &self.config.stream_path) {
            Ok(url) => self.transport.open(&url).await,
            Err(e) => Err(e),
        };

        let events = match opened {
            Ok(events) => events,
            Err(e) => {
                let err = StreamError::from(e);
                error!("Failed to open transport: {}", err);
                self.fail(&err);
                if let Err(e) = self.capture.release() {
                    warn!("Failed to release capture device: {}", e);
                }
                self.apply(StateEvent::ConnectFailed);
                return Err(err);
            }
        };

        self.events = Some(events);
        self.frames_sent = 0;
        let session = Session::new((self.clock)());

        info!(
            "Session {} started (stream {})",
            session.session_id, session.stream_id
        );

        let start = protocol::start_frame(&self.config.identity, &session.call_id, &session.stream_id);
        let call_id = session.call_id.clone();
        self.session = Some(session);
        self.apply(StateEvent::TransportOpened);

        let text = start
            .to_json()
            .map_err(|e| StreamError::Encode(e.to_string()))?;
        if let Err(e) = self.transport.send(text).await {
            let err = StreamError::from(e);
            self.transport_failed(err.clone());
            return Err(err);
        }
        debug!("Sent start frame");

        self.spawn_association(call_id);

        if self.config.auto_start {
            self.auto_start_at = Some(Instant::now() + self.config.auto_start_delay);
        }

        Ok(())
    }

    fn spawn_association(&self, call_id: String) {
        let (Some(associator), Some(knowledge_base_id)) =
            (self.associator.clone(), self.config.knowledge_base_id.clone())
        else {
            return;
        };

        tokio::spawn(async move {
            if let Err(e) = associator.associate(&call_id, &knowledge_base_id).await {
                warn!("Knowledge base association failed: {:#}", e);
            }
        });
    }

    async fn start_capture(&mut self) -> Result<()> {
        self.auto_start_at = None;

        match self.state {
            ConnectionState::Connected => {}
            // Capture ended on its own; a restart keeps the session as it is
            ConnectionState::Streaming | ConnectionState::Processing if !self.capture.is_active() => {}
            ConnectionState::Streaming | ConnectionState::Processing => {
                return Err(StreamError::from(CaptureError::AlreadyActive));
            }
            state => {
                return Err(StreamError::InvalidState(format!(
                    "cannot start capture while {}",
                    state
                )))
            }
        }

        match self.capture.start().await {
            Ok(chunks) => {
                self.chunks = Some(chunks);
                self.apply(StateEvent::CaptureStarted);
                Ok(())
            }
            Err(e) => {
                let err = StreamError::from(e);
                error!("Failed to start capture: {}", err);
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn stop_capture(&mut self) -> Result<()> {
        self.auto_start_at = None;
        // The chunk receiver stays open so the flushed tail still gets sent
        self.capture.stop().await.map_err(StreamError::from)
    }

    async fn handle_chunk(&mut self, chunk: Option<CaptureChunk>) {
        let Some(chunk) = chunk else {
            self.chunks = None;
            debug!("Capture chunk stream ended");
            if let Err(e) = self.capture.stop().await {
                warn!("Failed to stop capture device: {}", e);
            }
            return;
        };

        if !matches!(
            self.state,
            ConnectionState::Streaming | ConnectionState::Processing
        ) {
            debug!("Dropping chunk {} in state {}", chunk.index, self.state);
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };

        let encoded = codec::encode_chunk(&chunk.bytes, self.config.target_sample_rate);
        if encoded.passthrough {
            self.last_error = Some(
                StreamError::Encode(format!("chunk {} sent as passthrough", chunk.index))
                    .to_string(),
            );
        }

        let message_id = session.take_message_id();
        let payload_len = encoded.payload.len();
        let frame = protocol::audio_frame(&session.stream_id, message_id, encoded.payload);

        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize audio frame {}: {}", message_id, e);
                return;
            }
        };

        if let Err(e) = self.transport.send(text).await {
            self.transport_failed(StreamError::from(e));
            return;
        }

        self.frames_sent += 1;
        debug!(
            "Sent audio frame {} on {} ({}ms, {} samples)",
            message_id,
            frame.stream_id(),
            chunk.duration_ms,
            encoded.sample_count
        );

        self.history.record(
            chunk.captured_at,
            message_id,
            chunk.duration_ms,
            chunk.bytes,
            payload_len,
            encoded.passthrough,
        );

        if self.apply(StateEvent::ChunkSent) {
            self.processing_deadline = Some(Instant::now() + self.config.processing_timeout);
        }
    }

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(text)) => match protocol::parse_inbound(&text) {
                Ok(Some(message)) => self.handle_inbound(message).await,
                Ok(None) => debug!("Ignoring frame of unknown type"),
                Err(e) => warn!("Dropping malformed frame: {}", StreamError::from(e)),
            },
            Some(TransportEvent::Error(reason)) => {
                self.transport_failed(StreamError::Transport(TransportError::Closed(reason)));
            }
            Some(TransportEvent::Closed) | None => {
                info!("Media stream closed by peer");
                self.events = None;
                if let Err(e) = self.disconnect().await {
                    warn!("Disconnect after close failed: {}", e);
                }
            }
        }
    }

    /// Transport broke: stop reacting but keep resources until `disconnect`
    fn transport_failed(&mut self, err: StreamError) {
        error!("Transport failure: {}", err);
        self.fail(&err);
        self.events = None;
        self.auto_start_at = None;
        self.processing_deadline = None;
        self.apply(StateEvent::TransportFailed);
    }

    async fn handle_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Audio(audio) => {
                if !self.state.is_live() {
                    debug!("Ignoring inbound audio in state {}", self.state);
                    return;
                }

                if let Some(chunk_id) = audio.chunk_id {
                    debug!("Inbound audio for peer chunk {}", chunk_id);
                }

                let response = self.state == ConnectionState::Processing;
                self.stop_playback();
                match self.playback.play(&audio.audio_b64).await {
                    Ok(completion) => {
                        if response {
                            self.processing_deadline = None;
                        } else {
                            debug!("Playing unsolicited audio in state {}", self.state);
                        }
                        self.playing = Some(ActivePlayback {
                            completion,
                            replay: None,
                            response,
                        });
                    }
                    Err(e) => {
                        let err = StreamError::from(e);
                        warn!("Processing failed: {}", err);
                        self.fail(&err);
                        self.finish_response();
                    }
                }
            }
            InboundMessage::Interrupt { chunk_id } => {
                info!("Peer interrupted playback (chunk {:?})", chunk_id);
                self.interrupt();
            }
            InboundMessage::Clear => {
                info!("Peer cleared playback");
                self.interrupt();
            }
            InboundMessage::Error { message } => {
                let message = message.unwrap_or_else(|| "unspecified".to_string());
                warn!("Peer reported an error: {}", message);
                self.last_error = Some(format!("peer error: {}", message));
            }
        }
    }

    fn finish_response(&mut self) {
        self.processing_deadline = None;
        self.apply(StateEvent::ResponseFinished);
    }

    fn interrupt(&mut self) {
        self.stop_playback();
        self.finish_response();
    }

    fn stop_playback(&mut self) {
        if let Some(active) = self.playing.take() {
            if let Some(id) = active.replay {
                self.history.set_playback(id, ChunkPlayback::Paused);
            }
        }
        self.playback.stop();
    }

    fn handle_playback_end(&mut self, outcome: PlaybackOutcome) {
        let Some(active) = self.playing.take() else {
            return;
        };
        self.playback.mark_finished();

        match active.replay {
            Some(id) => {
                debug!("Replay of chunk {} ended ({:?})", id, outcome);
                self.history.set_playback(id, ChunkPlayback::Paused);
            }
            None if active.response => {
                debug!("Response playback ended ({:?})", outcome);
                self.finish_response();
            }
            None => debug!("Unsolicited playback ended ({:?})", outcome),
        }
    }

    async fn replay_chunk(&mut self, id: u64) -> Result<()> {
        if matches!(&self.playing, Some(active) if active.replay.is_none()) {
            return Err(StreamError::InvalidState("a response is playing".to_string()));
        }

        let raw = self
            .history
            .get(id)
            .map(|chunk| chunk.raw.clone())
            .ok_or(StreamError::UnknownChunk(id))?;

        self.stop_playback();
        let completion = self.playback.play_media(&raw).await?;
        self.history.set_playback(id, ChunkPlayback::Playing);
        self.playing = Some(ActivePlayback {
            completion,
            replay: Some(id),
            response: false,
        });

        info!("Replaying chunk {}", id);
        Ok(())
    }

    fn clear_history(&mut self) -> usize {
        if matches!(&self.playing, Some(active) if active.replay.is_some()) {
            self.stop_playback();
        }
        let removed = self.history.clear();
        info!("Cleared {} recorded chunks", removed);
        removed
    }

    /// Release every resource; each step runs even if an earlier one failed
    async fn disconnect(&mut self) -> Result<()> {
        let was_connected = self.state != ConnectionState::Disconnected;

        self.auto_start_at = None;
        self.processing_deadline = None;
        self.chunks = None;
        self.events = None;

        if let Err(e) = self.capture.stop().await {
            warn!("Failed to stop capture: {}", e);
        }

        self.stop_playback();

        match timeout(CLOSE_TIMEOUT, self.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close transport: {}", e),
            Err(_) => warn!("Timed out closing transport"),
        }

        if let Err(e) = self.capture.release() {
            warn!("Failed to release capture device: {}", e);
        }

        if self.history.clear() > 0 {
            debug!("Dropped chunk history of ended session");
        }

        if let Some(session) = self.session.take() {
            let elapsed_ms = (self.clock)() - session.started_at.timestamp_millis();
            info!(
                "Session {} ended after {}ms and {} audio frames",
                session.session_id,
                elapsed_ms.max(0),
                self.frames_sent
            );
        }
        self.frames_sent = 0;

        self.apply(StateEvent::Disconnected);
        if was_connected {
            info!("Disconnected");
        }

        Ok(())
    }

    fn snapshot(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            session_id: self.session.as_ref().map(|s| s.session_id.clone()),
            stream_id: self.session.as_ref().map(|s| s.stream_id.clone()),
            next_message_id: self.session.as_ref().map(|s| s.next_message_id()),
            frames_sent: self.frames_sent,
            capturing: self.capture.is_active(),
            playing: self.playing.is_some(),
            processing: self.state == ConnectionState::Processing,
            recorded_chunks: self.history.len(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.snapshot());
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn playback_or_pending(playing: &mut Option<ActivePlayback>) -> PlaybackOutcome {
    match playing {
        Some(active) => (&mut active.completion).await,
        None => std::future::pending().await,
    }
}
