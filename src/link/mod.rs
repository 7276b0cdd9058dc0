//! Remote session channel
//!
//! Owns the single bidirectional connection to the inference service. The
//! channel works at message level: encoded audio/image chunks go up,
//! tagged [`ServerEvent`]s come back. Connecting hands the caller the event
//! receiver for the connection's lifetime; the stream is infinite and
//! non-restartable. The channel never retries internally; retry policy
//! belongs to the session controller.

mod messages;
mod nats;

pub use messages::{
    AudioChunk, ClientMessage, FrameSample, MediaPayload, ServerEvent, SessionOpen, AUDIO_MIME,
    IMAGE_MIME,
};
pub use nats::NatsChannel;

use anyhow::Result;

/// Send half of the session link.
///
/// Shared by the capture pipeline and frame sampler tasks; the receive half
/// is the `mpsc::Receiver<ServerEvent>` returned at connect time.
#[async_trait::async_trait]
pub trait SessionChannel: Send + Sync {
    /// Transmit one encoded audio chunk.
    async fn send_audio(&self, chunk: AudioChunk) -> Result<()>;

    /// Transmit one sampled video frame.
    async fn send_frame(&self, frame: FrameSample) -> Result<()>;

    /// Discard the connection. Ends the event stream.
    async fn close(&self) -> Result<()>;
}
