use serde::{Deserialize, Serialize};

/// MIME type of microphone audio sent upstream.
pub const AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// MIME type of sampled video frames sent upstream.
pub const IMAGE_MIME: &str = "image/jpeg";

/// An encoded slice of microphone audio, ready for the wire.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Little-endian i16 PCM bytes at 16 kHz mono.
    pub data: Vec<u8>,
    pub mime_type: &'static str,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            mime_type: AUDIO_MIME,
        }
    }
}

/// A compressed still image sampled from the video source.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
}

impl FrameSample {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            mime_type: IMAGE_MIME,
        }
    }
}

/// Messages published by the client on the session link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    SessionOpen(SessionOpen),
    AudioChunk(MediaPayload),
    ImageChunk(MediaPayload),
}

/// Media envelope shared by audio and image chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub session_id: String,
    /// Base64-encoded payload bytes.
    pub data: String,
    pub mime_type: String,
    /// RFC3339 timestamp.
    pub timestamp: String,
}

/// Configuration fixed at session open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpen {
    pub session_id: String,
    pub input_rate: u32,
    pub output_rate: u32,
    pub response_modality: String,
    pub voice: String,
    pub system_instruction: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

/// Events received from the inference service, in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Incremental transcription of the user's speech.
    InputTranscription { text: String },
    /// Incremental transcription of the assistant's speech.
    OutputTranscription { text: String },
    /// Base64 PCM at 24 kHz mono.
    AudioDelta { data: String },
    /// The assistant finished a response turn.
    TurnComplete,
    /// New input preempts audio already scheduled for playback.
    Interrupted,
    /// Channel-level failure; fatal to the current session.
    Error { message: String },
    /// The server closed the connection.
    Closed,
}
