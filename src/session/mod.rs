//! Consultation session management
//!
//! This module provides the `SessionController` state machine that manages:
//! - Capture device acquisition and release
//! - The bidirectional session link to the inference service
//! - Playback scheduling of synthesized response audio
//! - Transcript aggregation and turn finalization
//! - Session statistics and lifecycle state

mod controller;
mod error;
mod stats;
mod transcript;

pub use controller::{ChannelConnector, Providers, SessionController, SessionState, StartRequest};
pub use error::SessionError;
pub use stats::SessionStats;
pub use transcript::{LiveTranscript, TranscriptAggregator, TranscriptSegment};
