//! Playback scheduling
//!
//! Response audio arrives in bursts faster than real time. The scheduler
//! keeps a monotonic cursor (the absolute output-clock time before which no
//! new audio may start) and schedules each decoded delta back-to-back at the
//! cursor, so playback is gapless and never overlaps. A server `interrupted`
//! event stops everything scheduled and resets the cursor to zero, so the
//! next response starts immediately instead of after stale scheduled time.

use crate::codec::{self, CodecError, DecodedAudio};
use std::collections::HashSet;
use std::time::Instant;
use tracing::debug;

/// Opaque handle to one scheduled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(u64);

/// Audio output provider.
///
/// The platform sink (speaker, WebAudio bridge, test clock) lives behind
/// this seam. Stopping a handle that already finished is a no-op.
pub trait AudioOutput: Send {
    /// Current output-clock time in seconds.
    fn now(&self) -> f64;

    /// Schedule a decoded buffer to begin at `start_time` (output-clock
    /// seconds).
    fn schedule(&mut self, audio: DecodedAudio, start_time: f64) -> PlaybackHandle;

    /// Stop a scheduled buffer immediately, best effort.
    fn stop(&mut self, handle: PlaybackHandle);

    /// Whether a scheduled buffer has finished (played out or stopped).
    fn is_finished(&self, handle: PlaybackHandle) -> bool;
}

impl AudioOutput for Box<dyn AudioOutput> {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn schedule(&mut self, audio: DecodedAudio, start_time: f64) -> PlaybackHandle {
        (**self).schedule(audio, start_time)
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        (**self).stop(handle)
    }

    fn is_finished(&self, handle: PlaybackHandle) -> bool {
        (**self).is_finished(handle)
    }
}

/// Schedules decoded response audio for gapless, non-overlapping output.
///
/// Mutated only from the session's single event-handling task.
pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    /// Absolute time of the next unscheduled sample.
    cursor: f64,
    /// Scheduled, not-yet-finished buffers.
    active: HashSet<PlaybackHandle>,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            cursor: 0.0,
            active: HashSet::new(),
        }
    }

    /// Decode one base64 PCM delta (24 kHz mono) and schedule it at the
    /// cursor. The cursor never moves backwards while the session is active.
    pub fn handle_delta(&mut self, data: &str) -> Result<(), CodecError> {
        let bytes = codec::decode_base64(data)?;
        let audio = codec::from_wire(&bytes, codec::OUTPUT_SAMPLE_RATE, 1)?;

        self.prune_finished();

        self.cursor = self.cursor.max(self.output.now());
        let start = self.cursor;
        let duration = audio.duration_secs();

        let handle = self.output.schedule(audio, start);
        self.active.insert(handle);
        self.cursor += duration;

        debug!(
            "Scheduled {:.3}s of audio at t={:.3} ({} active)",
            duration,
            start,
            self.active.len()
        );

        Ok(())
    }

    /// Barge-in: stop every scheduled buffer and reset the cursor so the
    /// next delta starts immediately rather than after stale scheduled time.
    pub fn interrupt(&mut self) {
        let stopped = self.active.len();
        for handle in self.active.drain() {
            self.output.stop(handle);
        }
        self.cursor = 0.0;

        debug!("Playback interrupted: {} buffers stopped", stopped);
    }

    /// Teardown flush; identical to an interruption.
    pub fn flush(&mut self) {
        self.interrupt();
    }

    /// Drop handles whose buffers completed naturally.
    fn prune_finished(&mut self) {
        let output = &self.output;
        self.active.retain(|handle| !output.is_finished(*handle));
    }

    /// The absolute time before which no new audio may be scheduled.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of scheduled, not-yet-finished buffers.
    pub fn active_len(&mut self) -> usize {
        self.prune_finished();
        self.active.len()
    }
}

/// Wall-clock output provider with no physical sink.
///
/// Tracks scheduling and completion against a monotonic clock so cursor and
/// active-set semantics hold end to end; a platform speaker integration
/// replaces this behind [`AudioOutput`].
pub struct ClockOutput {
    epoch: Instant,
    next_id: u64,
    /// handle → (start, end), retained until stopped or observed finished.
    scheduled: Vec<(PlaybackHandle, f64, f64)>,
}

impl ClockOutput {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            next_id: 0,
            scheduled: Vec::new(),
        }
    }
}

impl Default for ClockOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for ClockOutput {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, audio: DecodedAudio, start_time: f64) -> PlaybackHandle {
        // Entries that already played out carry no further information.
        let now = self.now();
        self.scheduled.retain(|(_, _, end)| *end > now);

        let handle = PlaybackHandle(self.next_id);
        self.next_id += 1;
        self.scheduled
            .push((handle, start_time, start_time + audio.duration_secs()));
        handle
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        self.scheduled.retain(|(h, _, _)| *h != handle);
    }

    fn is_finished(&self, handle: PlaybackHandle) -> bool {
        let now = self.now();
        match self.scheduled.iter().find(|(h, _, _)| *h == handle) {
            Some((_, _, end)) => *end <= now,
            None => true,
        }
    }
}
