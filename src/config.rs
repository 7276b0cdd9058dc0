use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub link: LinkConfig,
    pub tutor: TutorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Samples per chunk handed to the link (16 kHz mono).
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    /// WAV file standing in for the microphone. Unset selects the live
    /// microphone source.
    pub capture_wav: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_frame_width")]
    pub width: u32,
    #[serde(default = "default_frame_height")]
    pub height: u32,
    /// JPEG quality factor, 0-100.
    #[serde(default = "default_frame_quality")]
    pub quality: u8,
    #[serde(default = "default_frame_interval")]
    pub interval_secs: u64,
    /// Pre-encoded JPEG standing in for the camera.
    pub still_jpeg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub nats_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TutorConfig {
    /// Synthesized voice identity requested at session open.
    pub voice: String,
    /// Fixed persona and ruleset; the caller-supplied context is appended
    /// at session start.
    pub persona: String,
}

fn default_frame_size() -> usize {
    crate::audio::CAPTURE_FRAME_SIZE
}

fn default_frame_width() -> u32 {
    320
}

fn default_frame_height() -> u32 {
    240
}

fn default_frame_quality() -> u8 {
    50
}

fn default_frame_interval() -> u64 {
    1
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipelines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.frame_size == 0 {
            anyhow::bail!("audio.frame_size must be at least 1 sample");
        }
        if self.video.interval_secs == 0 {
            anyhow::bail!("video.interval_secs must be at least 1 second");
        }
        if self.video.quality > 100 {
            anyhow::bail!(
                "video.quality must be 0-100 (got {})",
                self.video.quality
            );
        }
        Ok(())
    }
}
