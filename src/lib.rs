pub mod audio;
pub mod codec;
pub mod config;
pub mod http;
pub mod link;
pub mod session;
pub mod video;

pub use audio::{
    AudioOutput, CaptureDevice, CaptureDeviceFactory, CaptureFrame, CapturePipeline,
    CaptureSource, ClockOutput, PlaybackScheduler, WavCaptureDevice, CAPTURE_FRAME_SIZE,
};
pub use codec::{CodecError, DecodedAudio, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use config::Config;
pub use http::{create_router, AppState};
pub use link::{
    AudioChunk, ClientMessage, FrameSample, NatsChannel, ServerEvent, SessionChannel, SessionOpen,
};
pub use session::{
    LiveTranscript, Providers, SessionController, SessionError, SessionState, SessionStats,
    StartRequest, TranscriptAggregator, TranscriptSegment,
};
pub use video::{FrameSampler, FrameSource, SamplerConfig, StillFrameSource};
