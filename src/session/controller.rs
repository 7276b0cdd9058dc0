use super::error::SessionError;
use super::stats::SessionStats;
use super::transcript::{LiveTranscript, TranscriptAggregator, TranscriptSegment};
use crate::audio::{
    AudioOutput, CaptureDevice, CaptureDeviceFactory, CapturePipeline, CaptureSource, ClockOutput,
    PlaybackScheduler,
};
use crate::codec;
use crate::config::Config;
use crate::link::{NatsChannel, ServerEvent, SessionChannel, SessionOpen};
use crate::video::{FrameSampler, FrameSource, SamplerConfig, StillFrameSource};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Controller lifecycle states.
///
/// `Failed` is reached only when a start attempt cannot make it to `Active`
/// (device acquisition or connect failure). Fatal events during an active
/// session tear down through `Terminating` and land back in `Idle` with a
/// user-visible message. A new start is accepted from `Idle` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Terminating,
    Failed,
}

/// Per-session start parameters supplied by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    /// Domain hints for the remote assistant, appended to the persona.
    pub context: Option<String>,
    /// Overrides the configured synthesized voice.
    pub voice: Option<String>,
}

/// Connects a session link, returning the send half and the event stream.
pub type ChannelConnector = Box<
    dyn Fn(
            SessionOpen,
        ) -> BoxFuture<
            'static,
            Result<(Arc<dyn SessionChannel>, mpsc::Receiver<ServerEvent>)>,
        > + Send
        + Sync,
>;

/// Collaborator factories the controller acquires resources through.
///
/// Production wiring comes from [`Providers::from_config`]; tests inject
/// mocks to drive the lifecycle deterministically.
pub struct Providers {
    pub capture: Box<dyn Fn() -> Result<Box<dyn CaptureDevice>> + Send + Sync>,
    pub frames: Box<dyn Fn() -> Result<Arc<dyn FrameSource>> + Send + Sync>,
    pub output: Box<dyn Fn() -> Box<dyn AudioOutput> + Send + Sync>,
    pub connect: ChannelConnector,
}

impl Providers {
    pub fn from_config(config: &Config) -> Self {
        let capture_source = match &config.audio.capture_wav {
            Some(path) => CaptureSource::Wav(PathBuf::from(path)),
            None => CaptureSource::Microphone,
        };
        let still_jpeg = config.video.still_jpeg.clone();
        let nats_url = config.link.nats_url.clone();

        Self {
            capture: Box::new(move || CaptureDeviceFactory::create(capture_source.clone())),
            frames: Box::new(move || match &still_jpeg {
                Some(path) => {
                    let source = StillFrameSource::open(PathBuf::from(path))?;
                    Ok(Arc::new(source) as Arc<dyn FrameSource>)
                }
                None => anyhow::bail!("camera capture is not available in this environment"),
            }),
            output: Box::new(|| Box::new(ClockOutput::new())),
            connect: Box::new(move |open| {
                let url = nats_url.clone();
                Box::pin(async move {
                    let (channel, events) = NatsChannel::connect(&url, open).await?;
                    Ok((Arc::new(channel) as Arc<dyn SessionChannel>, events))
                })
            }),
        }
    }
}

struct SessionMeta {
    session_id: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

/// Resources owned by one active session, released exactly once on teardown.
struct SessionHandle {
    channel: Arc<dyn SessionChannel>,
    device: Box<dyn CaptureDevice>,
    shutdown_tx: watch::Sender<bool>,
    capture_task: JoinHandle<()>,
    frame_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
}

/// Orchestrates the live consultation session.
///
/// Owns at most one session at a time. Each source (microphone frames, the
/// 1 Hz video tick, inbound server events) runs as its own producer task;
/// all mutable session state (playback cursor, active set, transcript
/// accumulators) is owned by the single event task, so server events are
/// handled strictly in arrival order.
pub struct SessionController {
    audio_cfg: crate::config::AudioConfig,
    video_cfg: crate::config::VideoConfig,
    tutor_cfg: crate::config::TutorConfig,
    providers: Providers,

    state_tx: watch::Sender<SessionState>,
    live_tx: watch::Sender<LiveTranscript>,
    segments: Arc<Mutex<Vec<TranscriptSegment>>>,
    last_error: Arc<Mutex<Option<String>>>,

    chunks_sent: Arc<AtomicUsize>,
    frames_sent: Arc<AtomicUsize>,
    playback_active: Arc<AtomicUsize>,

    meta: Mutex<Option<SessionMeta>>,
    session: Mutex<Option<SessionHandle>>,
}

impl SessionController {
    pub fn new(config: &Config) -> Arc<Self> {
        let providers = Providers::from_config(config);
        Self::with_providers(config, providers)
    }

    pub fn with_providers(config: &Config, providers: Providers) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (live_tx, _) = watch::channel(LiveTranscript::default());

        Arc::new(Self {
            audio_cfg: config.audio.clone(),
            video_cfg: config.video.clone(),
            tutor_cfg: config.tutor.clone(),
            providers,
            state_tx,
            live_tx,
            segments: Arc::new(Mutex::new(Vec::new())),
            last_error: Arc::new(Mutex::new(None)),
            chunks_sent: Arc::new(AtomicUsize::new(0)),
            frames_sent: Arc::new(AtomicUsize::new(0)),
            playback_active: Arc::new(AtomicUsize::new(0)),
            meta: Mutex::new(None),
            session: Mutex::new(None),
        })
    }

    /// Start a consultation session. Returns the session id once the link
    /// has acknowledged the open and all producer tasks are running.
    pub async fn start(self: &Arc<Self>, request: StartRequest) -> Result<String, SessionError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        match *self.state_tx.borrow() {
            SessionState::Idle | SessionState::Failed => {}
            _ => return Err(SessionError::AlreadyActive),
        }

        info!("Starting consultation session");
        self.state_tx.send_replace(SessionState::Connecting);
        *self.last_error.lock().await = None;
        self.segments.lock().await.clear();
        self.live_tx.send_replace(LiveTranscript::default());
        self.chunks_sent.store(0, Ordering::SeqCst);
        self.frames_sent.store(0, Ordering::SeqCst);
        self.playback_active.store(0, Ordering::SeqCst);

        // Acquire capture devices. Failure here is the permission path: the
        // session never starts and no further action is taken.
        let mut device = match (self.providers.capture)() {
            Ok(device) => device,
            Err(e) => return Err(self.fail_start(SessionError::Permission(e.to_string())).await),
        };
        let frame_source = match (self.providers.frames)() {
            Ok(source) => source,
            Err(e) => return Err(self.fail_start(SessionError::Permission(e.to_string())).await),
        };
        let capture_rx = match device.start().await {
            Ok(rx) => rx,
            Err(e) => return Err(self.fail_start(SessionError::Permission(e.to_string())).await),
        };
        info!("Capture device acquired: {}", device.name());

        let session_id = format!("consult-{}", uuid::Uuid::new_v4());
        let open = SessionOpen {
            session_id: session_id.clone(),
            input_rate: codec::INPUT_SAMPLE_RATE,
            output_rate: codec::OUTPUT_SAMPLE_RATE,
            response_modality: "audio".to_string(),
            voice: request
                .voice
                .unwrap_or_else(|| self.tutor_cfg.voice.clone()),
            system_instruction: self.system_instruction(request.context.as_deref()),
            input_transcription: true,
            output_transcription: true,
        };

        let (channel, events) = match (self.providers.connect)(open).await {
            Ok(pair) => pair,
            Err(e) => {
                if let Err(stop_err) = device.stop().await {
                    error!("Failed to release capture device: {}", stop_err);
                }
                return Err(self.fail_start(SessionError::Link(e.to_string())).await);
            }
        };

        *self.meta.lock().await = Some(SessionMeta {
            session_id: session_id.clone(),
            started_at: Utc::now(),
            ended_at: None,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let capture_task = self.spawn_capture_task(
            capture_rx,
            Arc::clone(&channel),
            shutdown_rx.clone(),
        );

        let sampler = FrameSampler::new(
            frame_source,
            SamplerConfig {
                width: self.video_cfg.width,
                height: self.video_cfg.height,
                quality: self.video_cfg.quality,
                interval: Duration::from_secs(self.video_cfg.interval_secs),
            },
        );
        let frame_task = sampler.spawn(
            Arc::clone(&channel),
            shutdown_rx.clone(),
            Arc::clone(&self.frames_sent),
        );

        let event_task = self.spawn_event_task(events, shutdown_rx);

        *slot = Some(SessionHandle {
            channel,
            device,
            shutdown_tx,
            capture_task,
            frame_task,
            event_task,
        });

        // Published while the slot lock is still held: an instantly-closing
        // link must observe Active before teardown flips the state back.
        self.state_tx.send_replace(SessionState::Active);
        info!("Consultation session active: {}", session_id);

        Ok(session_id)
    }

    /// Stop the active session and release everything.
    pub async fn stop(&self) -> Result<SessionStats, SessionError> {
        if self.session.lock().await.is_none() {
            return Err(SessionError::NotActive);
        }

        info!("Stopping consultation session");
        self.finish(true).await;
        Ok(self.stats().await)
    }

    /// Release every session resource. Runs on every exit path (user stop,
    /// server close, link error) and is a no-op once the session slot is
    /// empty, so release happens exactly once.
    ///
    /// `join_event_task` must be false when the caller is the event task
    /// itself; that path has already flushed scheduled playback before
    /// calling in, and joining would be a self-join.
    async fn finish(&self, join_event_task: bool) {
        let handle = self.session.lock().await.take();
        let Some(mut handle) = handle else {
            return;
        };

        self.state_tx.send_replace(SessionState::Terminating);
        let _ = handle.shutdown_tx.send(true);

        if let Err(e) = handle.device.stop().await {
            error!("Failed to release capture device: {}", e);
        }
        if let Err(e) = handle.capture_task.await {
            error!("Capture task panicked: {}", e);
        }
        if let Err(e) = handle.frame_task.await {
            error!("Frame sampler task panicked: {}", e);
        }
        // The event task owns the playback scheduler; Idle must not be
        // published until its flush has run.
        if join_event_task {
            if let Err(e) = handle.event_task.await {
                error!("Event task panicked: {}", e);
                self.playback_active.store(0, Ordering::SeqCst);
            }
        }
        if let Err(e) = handle.channel.close().await {
            error!("Failed to close session link: {}", e);
        }

        if let Some(meta) = self.meta.lock().await.as_mut() {
            meta.ended_at = Some(Utc::now());
        }
        self.live_tx.send_replace(LiveTranscript::default());

        self.state_tx.send_replace(SessionState::Idle);
        info!("Consultation session resources released");
    }

    fn system_instruction(&self, context: Option<&str>) -> String {
        format!(
            "{}\n\nStudent context: {}",
            self.tutor_cfg.persona,
            context.unwrap_or("general revision")
        )
    }

    async fn fail_start(&self, err: SessionError) -> SessionError {
        error!("Session start failed: {}", err);
        *self.last_error.lock().await = Some(err.to_string());
        self.state_tx.send_replace(SessionState::Failed);
        err
    }

    /// Bridge the capture device into fixed-size encoded chunks on the link.
    fn spawn_capture_task(
        &self,
        mut capture_rx: mpsc::Receiver<crate::audio::CaptureFrame>,
        channel: Arc<dyn SessionChannel>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let chunks_sent = Arc::clone(&self.chunks_sent);
        let frame_size = self.audio_cfg.frame_size;

        tokio::spawn(async move {
            info!("Capture pipeline started ({} samples per chunk)", frame_size);
            let mut pipeline = CapturePipeline::new(frame_size);

            loop {
                let frame = tokio::select! {
                    maybe = capture_rx.recv() => match maybe {
                        Some(frame) => frame,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                };

                if frame.sample_rate != codec::INPUT_SAMPLE_RATE || frame.channels != 1 {
                    // Malformed delivery: drop the frame, capture continues.
                    warn!(
                        "Dropping capture frame with unexpected format: {} Hz, {} ch",
                        frame.sample_rate, frame.channels
                    );
                    continue;
                }

                for chunk in pipeline.push(&frame.samples) {
                    match channel.send_audio(chunk).await {
                        Ok(()) => {
                            chunks_sent.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            // Fatality is decided by the event stream; the
                            // producer just keeps the microphone drained.
                            error!("Failed to send audio chunk: {}", e);
                        }
                    }
                }
            }

            info!(
                "Capture pipeline stopped ({} buffered samples discarded)",
                pipeline.pending_len()
            );
        })
    }

    /// Consume the server event stream. This task owns the playback
    /// scheduler and transcript aggregator; it ends on `Closed`, a link
    /// error, or teardown, and always flushes scheduled audio on the way
    /// out before triggering the controller's release path.
    fn spawn_event_task(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<ServerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let output = (self.providers.output)();

        tokio::spawn(async move {
            info!("Event loop started");
            let mut scheduler = PlaybackScheduler::new(output);
            let mut aggregator = TranscriptAggregator::new();
            let mut link_error: Option<String> = None;

            loop {
                let event = tokio::select! {
                    maybe = events.recv() => match maybe {
                        Some(event) => event,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                };

                match event {
                    ServerEvent::InputTranscription { text } => {
                        aggregator.push_input(&text);
                        controller.live_tx.send_replace(aggregator.live());
                    }
                    ServerEvent::OutputTranscription { text } => {
                        aggregator.push_output(&text);
                        controller.live_tx.send_replace(aggregator.live());
                    }
                    ServerEvent::AudioDelta { data } => {
                        if let Err(e) = scheduler.handle_delta(&data) {
                            // Local format problem: drop the delta, keep going.
                            warn!("Dropping malformed audio delta: {}", e);
                        }
                    }
                    ServerEvent::TurnComplete => {
                        if let Some(segment) = aggregator.complete_turn() {
                            info!("Turn complete: {:?} / {:?}", segment.input, segment.output);
                            controller.segments.lock().await.push(segment.clone());
                        }
                        controller.live_tx.send_replace(aggregator.live());
                    }
                    ServerEvent::Interrupted => {
                        scheduler.interrupt();
                    }
                    ServerEvent::Error { message } => {
                        error!("Session link error: {}", message);
                        link_error = Some(message);
                        break;
                    }
                    ServerEvent::Closed => {
                        info!("Session closed by server");
                        break;
                    }
                }

                controller
                    .playback_active
                    .store(scheduler.active_len(), Ordering::SeqCst);
            }

            // Unconditional: no audio may outlive the session.
            scheduler.flush();
            controller.playback_active.store(0, Ordering::SeqCst);

            if let Some(message) = link_error {
                *controller.last_error.lock().await = Some(message);
            }

            info!("Event loop ended");
            controller.finish(false).await;
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions (the outward status interface).
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Current mid-turn partial transcription.
    pub fn live_transcript(&self) -> LiveTranscript {
        self.live_tx.borrow().clone()
    }

    /// Watch live transcription updates.
    pub fn watch_live_transcript(&self) -> watch::Receiver<LiveTranscript> {
        self.live_tx.subscribe()
    }

    /// The finalized transcript log.
    pub async fn transcript(&self) -> Vec<TranscriptSegment> {
        self.segments.lock().await.clone()
    }

    /// Snapshot of controller and session statistics.
    pub async fn stats(&self) -> SessionStats {
        let (session_id, started_at, duration_secs) = match self.meta.lock().await.as_ref() {
            Some(meta) => {
                let until = meta.ended_at.unwrap_or_else(Utc::now);
                let duration = until.signed_duration_since(meta.started_at);
                (
                    Some(meta.session_id.clone()),
                    Some(meta.started_at),
                    duration.num_milliseconds() as f64 / 1000.0,
                )
            }
            None => (None, None, 0.0),
        };

        SessionStats {
            state: self.state(),
            session_id,
            started_at,
            duration_secs,
            chunks_sent: self.chunks_sent.load(Ordering::SeqCst),
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            transcript_segments: self.segments.lock().await.len(),
            playback_active: self.playback_active.load(Ordering::SeqCst),
            last_error: self.last_error.lock().await.clone(),
        }
    }
}
