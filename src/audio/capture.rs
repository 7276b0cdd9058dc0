use crate::codec;
use crate::link::AudioChunk;
use anyhow::{Context, Result};
use hound::WavReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Samples per encoded chunk handed to the session link.
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Raw microphone samples as delivered by a capture device.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Interleaved samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// Timestamp in milliseconds since capture started.
    pub timestamp_ms: u64,
}

/// Microphone capture device.
///
/// Implementations push frames at the audio subsystem's delivery cadence;
/// the pipeline never polls in a CPU loop.
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync + std::fmt::Debug {
    /// Start capturing audio.
    ///
    /// Returns a channel receiver that will receive capture frames.
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureFrame>>;

    /// Stop capturing audio and release the device.
    async fn stop(&mut self) -> Result<()>;

    /// Check if the device is currently capturing.
    fn is_capturing(&self) -> bool;

    /// Device name for logging.
    fn name(&self) -> &str;
}

/// Capture source selection.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Live microphone input.
    Microphone,
    /// WAV file input (fixtures, offline runs).
    Wav(PathBuf),
}

/// Capture device factory.
pub struct CaptureDeviceFactory;

impl CaptureDeviceFactory {
    pub fn create(source: CaptureSource) -> Result<Box<dyn CaptureDevice>> {
        match source {
            CaptureSource::Microphone => {
                anyhow::bail!("microphone capture is not available in this environment")
            }
            CaptureSource::Wav(path) => {
                let device = WavCaptureDevice::new(path)?;
                Ok(Box::new(device))
            }
        }
    }
}

/// Re-slices the capture stream into fixed-size wire chunks.
///
/// Devices deliver frames at whatever granularity suits them; the link wants
/// exactly [`CAPTURE_FRAME_SIZE`] samples per chunk. Remainders are buffered
/// across frames and discarded with the pipeline on teardown.
pub struct CapturePipeline {
    frame_size: usize,
    pending: Vec<f32>,
}

impl CapturePipeline {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Absorb one device frame; returns every wire-ready chunk it completed.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        self.pending.extend_from_slice(samples);

        let mut chunks = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let frame = std::mem::replace(&mut self.pending, rest);
            chunks.push(AudioChunk::new(codec::to_wire(&frame)));
        }
        chunks
    }

    /// Samples buffered but not yet chunk-aligned.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// WAV-file-backed capture device.
///
/// Reads a 16 kHz mono WAV and delivers it in capture-sized frames, paced at
/// real time so downstream behaves as it would against a live microphone.
/// Pacing can be disabled for tests.
#[derive(Debug)]
pub struct WavCaptureDevice {
    path: PathBuf,
    samples: Vec<f32>,
    sample_rate: u32,
    paced: bool,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WavCaptureDevice {
    pub fn new(path: PathBuf) -> Result<Self> {
        let reader = WavReader::open(&path)
            .with_context(|| format!("Failed to open WAV capture source {}", path.display()))?;

        let spec = reader.spec();
        if spec.channels != 1 {
            anyhow::bail!(
                "WAV capture source must be mono (got {} channels)",
                spec.channels
            );
        }
        if spec.sample_rate != codec::INPUT_SAMPLE_RATE {
            anyhow::bail!(
                "WAV capture source must be {} Hz (got {} Hz)",
                codec::INPUT_SAMPLE_RATE,
                spec.sample_rate
            );
        }

        let samples: Vec<f32> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read WAV samples")?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect();

        info!(
            "WAV capture source loaded: {} ({:.1}s)",
            path.display(),
            samples.len() as f64 / spec.sample_rate as f64
        );

        Ok(Self {
            path,
            samples,
            sample_rate: spec.sample_rate,
            paced: true,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }

    /// Disable real-time pacing (tests).
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait::async_trait]
impl CaptureDevice for WavCaptureDevice {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureFrame>> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            anyhow::bail!("WAV capture device already started");
        }

        let (tx, rx) = mpsc::channel(16);
        let samples = self.samples.clone();
        let sample_rate = self.sample_rate;
        let paced = self.paced;
        let capturing = Arc::clone(&self.capturing);

        self.task = Some(tokio::spawn(async move {
            let frame_millis = CAPTURE_FRAME_SIZE as u64 * 1000 / sample_rate as u64;
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(frame_millis.max(1)));
            let mut timestamp_ms = 0;

            for frame in samples.chunks(CAPTURE_FRAME_SIZE) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                if paced {
                    interval.tick().await;
                }

                let frame = CaptureFrame {
                    samples: frame.to_vec(),
                    sample_rate,
                    channels: 1,
                    timestamp_ms,
                };
                timestamp_ms += frame_millis;

                if tx.send(frame).await.is_err() {
                    debug!("Capture consumer went away; stopping WAV delivery");
                    break;
                }
            }

            capturing.store(false, Ordering::SeqCst);
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("WAV capture task failed: {}", e);
                }
            }
        }

        debug!("WAV capture stopped: {}", self.path.display());
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}
