// Integration tests for the session controller lifecycle.
//
// Mock providers stand in for the capture device, frame source, and session
// link so every transition (start, stop, server close, link error,
// interruption) can be driven deterministically.

use anyhow::Result;
use async_trait::async_trait;
use live_consult::config::{
    AudioConfig, Config, HttpConfig, LinkConfig, ServiceConfig, TutorConfig, VideoConfig,
};
use live_consult::{
    codec, AudioChunk, CaptureDevice, CaptureFrame, FrameSample, FrameSource, Providers,
    ServerEvent, SessionChannel, SessionController, SessionError, SessionOpen, SessionState,
    StartRequest,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn test_config() -> Config {
    Config {
        service: ServiceConfig {
            name: "live-consult-test".to_string(),
            http: HttpConfig {
                bind: "127.0.0.1".to_string(),
                port: 0,
            },
        },
        audio: AudioConfig {
            frame_size: 4096,
            capture_wav: None,
        },
        video: VideoConfig {
            width: 320,
            height: 240,
            quality: 50,
            interval_secs: 1,
            still_jpeg: None,
        },
        link: LinkConfig {
            nats_url: "nats://localhost:4222".to_string(),
        },
        tutor: TutorConfig {
            voice: "Puck".to_string(),
            persona: "You are a study tutor.".to_string(),
        },
    }
}

#[derive(Debug)]
struct MockDevice {
    rx: Option<mpsc::Receiver<CaptureFrame>>,
    capturing: Arc<AtomicBool>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureDevice for MockDevice {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureFrame>> {
        self.capturing.store(true, Ordering::SeqCst);
        self.rx.take().ok_or_else(|| anyhow::anyhow!("already started"))
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockChannel {
    audio_sent: Arc<AtomicUsize>,
    frames_sent: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionChannel for MockChannel {
    async fn send_audio(&self, _chunk: AudioChunk) -> Result<()> {
        self.audio_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_frame(&self, _frame: FrameSample) -> Result<()> {
        self.frames_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct OkFrameSource;

impl FrameSource for OkFrameSource {
    fn capture_jpeg(&self, _w: u32, _h: u32, _q: u8) -> Result<Vec<u8>> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }
}

struct FailingFrameSource;

impl FrameSource for FailingFrameSource {
    fn capture_jpeg(&self, _w: u32, _h: u32, _q: u8) -> Result<Vec<u8>> {
        anyhow::bail!("no frame available")
    }
}

/// Everything a test needs to drive and observe one controller.
struct Harness {
    controller: Arc<SessionController>,
    capture_txs: Arc<Mutex<Vec<mpsc::Sender<CaptureFrame>>>>,
    event_txs: Arc<Mutex<Vec<mpsc::Sender<ServerEvent>>>>,
    opens: Arc<Mutex<Vec<SessionOpen>>>,
    audio_sent: Arc<AtomicUsize>,
    frames_sent: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    device_stops: Arc<AtomicUsize>,
}

struct HarnessOptions {
    capture_fails: bool,
    connect_fails: bool,
    frames_fail: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            capture_fails: false,
            connect_fails: false,
            frames_fail: false,
        }
    }
}

fn harness(options: HarnessOptions) -> Harness {
    let HarnessOptions {
        capture_fails,
        connect_fails,
        frames_fail,
    } = options;

    let capture_txs: Arc<Mutex<Vec<mpsc::Sender<CaptureFrame>>>> = Arc::default();
    let event_txs: Arc<Mutex<Vec<mpsc::Sender<ServerEvent>>>> = Arc::default();
    let opens: Arc<Mutex<Vec<SessionOpen>>> = Arc::default();
    let audio_sent = Arc::new(AtomicUsize::new(0));
    let frames_sent = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let device_stops = Arc::new(AtomicUsize::new(0));

    let providers = Providers {
        capture: {
            let capture_txs = Arc::clone(&capture_txs);
            let device_stops = Arc::clone(&device_stops);
            Box::new(move || {
                if capture_fails {
                    anyhow::bail!("microphone access denied");
                }
                let (tx, rx) = mpsc::channel(64);
                capture_txs.lock().unwrap().push(tx);
                Ok(Box::new(MockDevice {
                    rx: Some(rx),
                    capturing: Arc::new(AtomicBool::new(false)),
                    stops: Arc::clone(&device_stops),
                }) as Box<dyn CaptureDevice>)
            })
        },
        frames: {
            Box::new(move || {
                if frames_fail {
                    Ok(Arc::new(FailingFrameSource) as Arc<dyn FrameSource>)
                } else {
                    Ok(Arc::new(OkFrameSource) as Arc<dyn FrameSource>)
                }
            })
        },
        output: Box::new(|| Box::new(live_consult::ClockOutput::new())),
        connect: {
            let event_txs = Arc::clone(&event_txs);
            let opens = Arc::clone(&opens);
            let audio_sent = Arc::clone(&audio_sent);
            let frames_sent = Arc::clone(&frames_sent);
            let closes = Arc::clone(&closes);
            Box::new(move |open| {
                let event_txs = Arc::clone(&event_txs);
                let opens = Arc::clone(&opens);
                let audio_sent = Arc::clone(&audio_sent);
                let frames_sent = Arc::clone(&frames_sent);
                let closes = Arc::clone(&closes);
                Box::pin(async move {
                    if connect_fails {
                        anyhow::bail!("connection refused");
                    }
                    opens.lock().unwrap().push(open);
                    let (tx, rx) = mpsc::channel(256);
                    event_txs.lock().unwrap().push(tx);
                    let channel = MockChannel {
                        audio_sent,
                        frames_sent,
                        closes,
                    };
                    Ok((Arc::new(channel) as Arc<dyn SessionChannel>, rx))
                })
            })
        },
    };

    Harness {
        controller: SessionController::with_providers(&test_config(), providers),
        capture_txs,
        event_txs,
        opens,
        audio_sent,
        frames_sent,
        closes,
        device_stops,
    }
}

impl Harness {
    fn capture_tx(&self) -> mpsc::Sender<CaptureFrame> {
        self.capture_txs.lock().unwrap().last().unwrap().clone()
    }

    fn event_tx(&self) -> mpsc::Sender<ServerEvent> {
        self.event_txs.lock().unwrap().last().unwrap().clone()
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_stats<F: Fn(&live_consult::SessionStats) -> bool>(
    controller: &SessionController,
    what: &str,
    condition: F,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = controller.stats().await;
        if condition(&stats) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what} (stats: {stats:?})"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn mic_frame(samples: usize) -> CaptureFrame {
    CaptureFrame {
        samples: vec![0.1; samples],
        sample_rate: codec::INPUT_SAMPLE_RATE,
        channels: 1,
        timestamp_ms: 0,
    }
}

/// Base64 PCM delta of `frames` samples at 24 kHz mono.
fn audio_delta(frames: usize) -> ServerEvent {
    ServerEvent::AudioDelta {
        data: codec::encode_base64(&codec::to_wire(&vec![0.0; frames])),
    }
}

#[tokio::test]
async fn start_streams_capture_audio_and_stop_releases_everything() {
    let h = harness(HarnessOptions::default());

    h.controller.start(StartRequest::default()).await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Active);

    // Two full capture frames must become two wire chunks.
    let mic = h.capture_tx();
    mic.send(mic_frame(4096)).await.unwrap();
    mic.send(mic_frame(4096)).await.unwrap();
    let audio_sent = Arc::clone(&h.audio_sent);
    wait_until("2 audio chunks sent", || {
        audio_sent.load(Ordering::SeqCst) >= 2
    })
    .await;

    // The frame sampler ticks immediately on start.
    let frames_sent = Arc::clone(&h.frames_sent);
    wait_until("1 frame sent", || frames_sent.load(Ordering::SeqCst) >= 1).await;

    let stats = h.controller.stop().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.device_stops.load(Ordering::SeqCst), 1, "device released once");
    assert_eq!(h.closes.load(Ordering::SeqCst), 1, "channel discarded once");
    assert!(stats.chunks_sent >= 2);
    assert_eq!(stats.playback_active, 0, "no orphaned playback");
}

#[tokio::test]
async fn partial_capture_frames_are_buffered_not_sent() {
    let h = harness(HarnessOptions::default());
    h.controller.start(StartRequest::default()).await.unwrap();

    h.capture_tx().send(mic_frame(2000)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.audio_sent.load(Ordering::SeqCst), 0);

    // Completing the 4096-sample chunk releases exactly one send.
    h.capture_tx().send(mic_frame(2096)).await.unwrap();
    let audio_sent = Arc::clone(&h.audio_sent);
    wait_until("1 audio chunk sent", || {
        audio_sent.load(Ordering::SeqCst) == 1
    })
    .await;

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn session_open_carries_voice_and_context() {
    let h = harness(HarnessOptions::default());

    h.controller
        .start(StartRequest {
            context: Some("Partnership accounts, goodwill valuation".to_string()),
            voice: Some("Umbriel".to_string()),
        })
        .await
        .unwrap();

    let opens = h.opens.lock().unwrap();
    let open = opens.last().unwrap();
    assert_eq!(open.input_rate, 16_000);
    assert_eq!(open.output_rate, 24_000);
    assert_eq!(open.response_modality, "audio");
    assert_eq!(open.voice, "Umbriel");
    assert!(open.input_transcription && open.output_transcription);
    assert!(open.system_instruction.contains("study tutor"));
    assert!(open
        .system_instruction
        .contains("Partnership accounts, goodwill valuation"));
    drop(opens);

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn capture_denial_fails_the_start_without_further_action() {
    let h = harness(HarnessOptions {
        capture_fails: true,
        ..Default::default()
    });

    let err = h.controller.start(StartRequest::default()).await.unwrap_err();
    assert!(matches!(err, SessionError::Permission(_)));
    assert_eq!(h.controller.state(), SessionState::Failed);
    assert!(h.event_txs.lock().unwrap().is_empty(), "no connect attempted");

    let stats = h.controller.stats().await;
    assert!(stats.last_error.unwrap().contains("denied"));
}

#[tokio::test]
async fn connect_failure_releases_the_acquired_device() {
    let h = harness(HarnessOptions {
        connect_fails: true,
        ..Default::default()
    });

    let err = h.controller.start(StartRequest::default()).await.unwrap_err();
    assert!(matches!(err, SessionError::Link(_)));
    assert_eq!(h.controller.state(), SessionState::Failed);
    assert_eq!(h.device_stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_close_tears_down_without_a_stop_request() {
    let h = harness(HarnessOptions::default());
    h.controller.start(StartRequest::default()).await.unwrap();

    let events = h.event_tx();
    events
        .send(ServerEvent::InputTranscription {
            text: "Cur".to_string(),
        })
        .await
        .unwrap();
    events
        .send(ServerEvent::InputTranscription {
            text: "rent Ratio".to_string(),
        })
        .await
        .unwrap();
    events
        .send(ServerEvent::OutputTranscription {
            text: "= CA/CL".to_string(),
        })
        .await
        .unwrap();
    events.send(ServerEvent::TurnComplete).await.unwrap();
    events.send(ServerEvent::Closed).await.unwrap();

    let controller = Arc::clone(&h.controller);
    wait_until("controller returns to idle", || {
        controller.state() == SessionState::Idle
    })
    .await;

    assert_eq!(h.device_stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.closes.load(Ordering::SeqCst), 1);

    let transcript = h.controller.transcript().await;
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].input, "Current Ratio");
    assert_eq!(transcript[0].output, "= CA/CL");
    assert_eq!(
        h.controller.live_transcript(),
        live_consult::LiveTranscript::default()
    );
}

#[tokio::test]
async fn link_error_surfaces_a_message_and_returns_to_idle() {
    let h = harness(HarnessOptions::default());
    h.controller.start(StartRequest::default()).await.unwrap();

    h.event_tx()
        .send(ServerEvent::Error {
            message: "quota exhausted".to_string(),
        })
        .await
        .unwrap();

    let controller = Arc::clone(&h.controller);
    wait_until("teardown after link error", || {
        controller.state() == SessionState::Idle
    })
    .await;

    assert_eq!(h.device_stops.load(Ordering::SeqCst), 1);
    let stats = h.controller.stats().await;
    assert_eq!(stats.last_error.as_deref(), Some("quota exhausted"));
}

#[tokio::test]
async fn interruption_flushes_scheduled_playback_mid_session() {
    let h = harness(HarnessOptions::default());
    h.controller.start(StartRequest::default()).await.unwrap();

    let events = h.event_tx();
    // Three one-second buffers arrive in a burst, far ahead of real time.
    for _ in 0..3 {
        events.send(audio_delta(24_000)).await.unwrap();
    }

    wait_for_stats(&h.controller, "3 buffers scheduled", |stats| {
        stats.playback_active == 3
    })
    .await;

    events.send(ServerEvent::Interrupted).await.unwrap();

    wait_for_stats(&h.controller, "playback flushed", |stats| {
        stats.playback_active == 0
    })
    .await;
    assert_eq!(h.controller.state(), SessionState::Active, "barge-in is not teardown");

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn stop_flushes_scheduled_playback_before_going_idle() {
    let h = harness(HarnessOptions::default());
    h.controller.start(StartRequest::default()).await.unwrap();

    // Schedule a burst well ahead of real time, then stop immediately.
    let events = h.event_tx();
    for _ in 0..3 {
        events.send(audio_delta(24_000)).await.unwrap();
    }
    wait_for_stats(&h.controller, "3 buffers scheduled", |stats| {
        stats.playback_active == 3
    })
    .await;

    // By the time stop() returns, the flush must already have run: no
    // orphaned playback may be observable from the Idle state.
    let stats = h.controller.stop().await.unwrap();
    assert_eq!(stats.state, SessionState::Idle);
    assert_eq!(stats.playback_active, 0);
    assert_eq!(h.controller.stats().await.playback_active, 0);
}

#[tokio::test]
async fn frame_capture_failures_are_per_tick_skips() {
    let h = harness(HarnessOptions {
        frames_fail: true,
        ..Default::default()
    });
    h.controller.start(StartRequest::default()).await.unwrap();

    // Audio still flows while every frame tick fails.
    h.capture_tx().send(mic_frame(4096)).await.unwrap();
    let audio_sent = Arc::clone(&h.audio_sent);
    wait_until("audio unaffected", || audio_sent.load(Ordering::SeqCst) >= 1).await;

    assert_eq!(h.frames_sent.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.state(), SessionState::Active);

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn stop_without_an_active_session_is_rejected() {
    let h = harness(HarnessOptions::default());
    let err = h.controller.stop().await.unwrap_err();
    assert!(matches!(err, SessionError::NotActive));
}

#[tokio::test]
async fn second_start_conflicts_while_active() {
    let h = harness(HarnessOptions::default());
    h.controller.start(StartRequest::default()).await.unwrap();

    let err = h.controller.start(StartRequest::default()).await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadyActive));

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn controller_is_reusable_after_stop() {
    let h = harness(HarnessOptions::default());

    let first = h.controller.start(StartRequest::default()).await.unwrap();
    h.controller.stop().await.unwrap();
    let second = h.controller.start(StartRequest::default()).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(h.opens.lock().unwrap().len(), 2);
    assert_eq!(h.controller.state(), SessionState::Active);

    h.controller.stop().await.unwrap();
    assert_eq!(h.device_stops.load(Ordering::SeqCst), 2);
    assert_eq!(h.closes.load(Ordering::SeqCst), 2);
}
