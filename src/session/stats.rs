use super::controller::SessionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the controller and the current (or most recent) session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Controller lifecycle state.
    pub state: SessionState,

    /// Identifier of the current or most recent session.
    pub session_id: Option<String>,

    /// When the session started.
    pub started_at: Option<DateTime<Utc>>,

    /// Session duration in seconds (frozen once the session ends).
    pub duration_secs: f64,

    /// Audio chunks transmitted so far.
    pub chunks_sent: usize,

    /// Video frames transmitted so far.
    pub frames_sent: usize,

    /// Finalized transcript segments.
    pub transcript_segments: usize,

    /// Scheduled, not-yet-finished playback buffers.
    pub playback_active: usize,

    /// User-visible message from the last fatal session error.
    pub last_error: Option<String>,
}
