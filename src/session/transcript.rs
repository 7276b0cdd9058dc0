use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Finalized transcript pair for one completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// What the user said during the turn.
    pub input: String,
    /// What the assistant answered.
    pub output: String,
    /// When the turn completed.
    pub timestamp: DateTime<Utc>,
}

/// Mid-turn partial transcription, for display only. Not part of the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LiveTranscript {
    pub input: String,
    pub output: String,
}

/// Accumulates transcription deltas per turn and finalizes them at turn
/// boundaries. Turn completion is the only point at which partial text
/// becomes part of the permanent log.
#[derive(Default)]
pub struct TranscriptAggregator {
    input: String,
    output: String,
    log: Vec<TranscriptSegment>,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, text: &str) {
        self.input.push_str(text);
    }

    pub fn push_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Finalize the open turn. Appends a segment if any text accumulated and
    /// clears both accumulators either way.
    pub fn complete_turn(&mut self) -> Option<&TranscriptSegment> {
        if self.input.is_empty() && self.output.is_empty() {
            return None;
        }

        let segment = TranscriptSegment {
            input: std::mem::take(&mut self.input),
            output: std::mem::take(&mut self.output),
            timestamp: Utc::now(),
        };
        self.log.push(segment);
        self.log.last()
    }

    /// Current partial text for display.
    pub fn live(&self) -> LiveTranscript {
        LiveTranscript {
            input: self.input.clone(),
            output: self.output.clone(),
        }
    }

    /// The ordered log of finalized turns.
    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.log
    }
}
