pub mod capture;
pub mod playback;

pub use capture::{
    CaptureDevice, CaptureDeviceFactory, CaptureFrame, CapturePipeline, CaptureSource,
    WavCaptureDevice, CAPTURE_FRAME_SIZE,
};
pub use playback::{AudioOutput, ClockOutput, PlaybackHandle, PlaybackScheduler};
