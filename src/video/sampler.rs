use crate::link::{FrameSample, SessionChannel};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Video frame provider.
///
/// Returns one compressed still at the requested size and JPEG quality
/// (0-100). A failed capture skips that tick; the next tick supersedes it.
pub trait FrameSource: Send + Sync {
    fn capture_jpeg(&self, width: u32, height: u32, quality: u8) -> Result<Vec<u8>>;
}

/// Frame sampling configuration.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            quality: 50,
            interval: Duration::from_secs(1),
        }
    }
}

/// Periodically captures a downscaled snapshot and hands it to the channel.
///
/// Runs as its own task so a slow capture never blocks audio delivery.
pub struct FrameSampler {
    source: Arc<dyn FrameSource>,
    config: SamplerConfig,
}

impl FrameSampler {
    pub fn new(source: Arc<dyn FrameSource>, config: SamplerConfig) -> Self {
        Self { source, config }
    }

    /// Start ticking. Ends when `shutdown` flips to true.
    pub fn spawn(
        self,
        channel: Arc<dyn SessionChannel>,
        mut shutdown: watch::Receiver<bool>,
        frames_sent: Arc<AtomicUsize>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Frame sampler started: {}x{} q={} every {:?}",
                self.config.width, self.config.height, self.config.quality, self.config.interval
            );

            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }

                let jpeg = match self.source.capture_jpeg(
                    self.config.width,
                    self.config.height,
                    self.config.quality,
                ) {
                    Ok(jpeg) => jpeg,
                    Err(e) => {
                        // Non-fatal: skip this tick, the next one supersedes.
                        debug!("Frame capture skipped: {}", e);
                        continue;
                    }
                };

                match channel.send_frame(FrameSample::new(jpeg)).await {
                    Ok(()) => {
                        frames_sent.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        warn!("Failed to send frame sample: {}", e);
                    }
                }
            }

            info!("Frame sampler stopped");
        })
    }
}

/// File-backed frame source serving a pre-encoded JPEG.
///
/// Stands in for a camera in fixtures and offline runs; a platform camera
/// integration replaces it behind [`FrameSource`].
pub struct StillFrameSource {
    jpeg: Vec<u8>,
}

impl StillFrameSource {
    pub fn open(path: PathBuf) -> Result<Self> {
        let jpeg = std::fs::read(&path)
            .with_context(|| format!("Failed to read frame source {}", path.display()))?;
        Ok(Self { jpeg })
    }
}

impl FrameSource for StillFrameSource {
    fn capture_jpeg(&self, _width: u32, _height: u32, _quality: u8) -> Result<Vec<u8>> {
        Ok(self.jpeg.clone())
    }
}
