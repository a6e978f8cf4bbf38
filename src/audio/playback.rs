//! Gapless scheduling of inbound audio chunks against a monotonic clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;

use super::pcm;
use crate::error::Result;

/// Seconds since an arbitrary fixed origin. Never goes backwards.
pub trait PlaybackClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock advanced by hand. Useful for offline rendering and tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward; earlier times are ignored.
    pub fn set(&self, seconds: f64) {
        let mut current = self.bits.load(Ordering::Acquire);
        while f64::from_bits(current) < seconds {
            match self.bits.compare_exchange_weak(
                current,
                seconds.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// One decoded chunk placed on the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUnit {
    pub id: u64,
    pub samples: Arc<[f32]>,
    pub sample_rate_hz: u32,
    /// Clock time at which the first sample plays.
    pub start: f64,
    /// Length in seconds.
    pub duration: f64,
}

impl PlaybackUnit {
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Where scheduled units are rendered.
pub trait PlaybackSink: Send {
    /// Play `unit` starting at `unit.start`.
    fn schedule(&mut self, unit: &PlaybackUnit);

    /// Silence everything scheduled so far, immediately.
    fn stop_all(&mut self);
}

/// Discards audio. Scheduling still tracks timing and speaking state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn schedule(&mut self, _unit: &PlaybackUnit) {}

    fn stop_all(&mut self) {}
}

/// Instructions for a host-owned output device.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Play(PlaybackUnit),
    StopAll,
}

/// Forwards scheduling decisions to the host over an unbounded channel so the
/// session never waits on the audio thread.
#[derive(Debug, Clone)]
pub struct ChannelPlaybackSink {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
}

impl ChannelPlaybackSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlaybackCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PlaybackSink for ChannelPlaybackSink {
    fn schedule(&mut self, unit: &PlaybackUnit) {
        if self.tx.send(PlaybackCommand::Play(unit.clone())).is_err() {
            tracing::debug!(unit = unit.id, "Playback receiver gone");
        }
    }

    fn stop_all(&mut self) {
        let _ = self.tx.send(PlaybackCommand::StopAll);
    }
}

/// Places chunks back to back on the clock: each unit starts at
/// `max(now, next_start_time)` and pushes the cursor to its end, so units
/// never overlap and never start in the past.
pub struct PlaybackScheduler {
    clock: Arc<dyn PlaybackClock>,
    sink: Box<dyn PlaybackSink>,
    sample_rate_hz: u32,
    next_start_time: f64,
    scheduled: VecDeque<PlaybackUnit>,
    next_id: u64,
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("sample_rate_hz", &self.sample_rate_hz)
            .field("next_start_time", &self.next_start_time)
            .field("scheduled", &self.scheduled.len())
            .finish_non_exhaustive()
    }
}

impl PlaybackScheduler {
    #[must_use]
    pub fn new(
        clock: Arc<dyn PlaybackClock>,
        sink: Box<dyn PlaybackSink>,
        sample_rate_hz: u32,
    ) -> Self {
        Self {
            clock,
            sink,
            sample_rate_hz,
            next_start_time: 0.0,
            scheduled: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Schedule decoded samples. Empty input schedules nothing.
    #[allow(clippy::cast_precision_loss)]
    pub fn enqueue(&mut self, samples: Vec<f32>) -> Option<PlaybackUnit> {
        if samples.is_empty() || self.sample_rate_hz == 0 {
            return None;
        }
        self.retire_finished();

        let now = self.clock.now();
        let start = now.max(self.next_start_time);
        let duration = samples.len() as f64 / f64::from(self.sample_rate_hz);
        self.next_id += 1;
        let unit = PlaybackUnit {
            id: self.next_id,
            samples: samples.into(),
            sample_rate_hz: self.sample_rate_hz,
            start,
            duration,
        };
        self.next_start_time = unit.end();

        tracing::trace!(unit = unit.id, start, duration, "Scheduled playback unit");
        self.sink.schedule(&unit);
        self.scheduled.push_back(unit.clone());
        Some(unit)
    }

    /// Decode a base64 PCM chunk and schedule it.
    ///
    /// # Errors
    /// Returns an error if the chunk does not decode; nothing is scheduled and
    /// the timeline is unchanged.
    pub fn enqueue_base64(&mut self, data: &str) -> Result<Option<PlaybackUnit>> {
        let samples = pcm::decode_base64(data)?;
        Ok(self.enqueue(samples))
    }

    /// Stop everything, forget the schedule and reset the cursor. Returns the
    /// number of units that were still pending.
    pub fn flush(&mut self) -> usize {
        let cleared = self.scheduled.len();
        self.sink.stop_all();
        self.scheduled.clear();
        self.next_start_time = 0.0;
        if cleared > 0 {
            tracing::debug!(cleared, "Playback flushed");
        }
        cleared
    }

    /// Drop units whose end time has passed. Returns how many retired.
    pub fn retire_finished(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.scheduled.len();
        while self.scheduled.front().is_some_and(|unit| unit.end() <= now) {
            self.scheduled.pop_front();
        }
        before - self.scheduled.len()
    }

    /// True while any scheduled unit has not yet finished.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        let now = self.clock.now();
        self.scheduled.back().is_some_and(|unit| unit.end() > now)
    }

    #[must_use]
    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    #[must_use]
    pub const fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_base64;

    fn scheduler() -> (PlaybackScheduler, ManualClock) {
        let clock = ManualClock::new();
        let scheduler = PlaybackScheduler::new(Arc::new(clock.clone()), Box::new(NullSink), 1000);
        (scheduler, clock)
    }

    #[test]
    fn units_are_back_to_back_and_never_in_the_past() {
        let (mut scheduler, clock) = scheduler();
        clock.set(1.0);
        let a = scheduler.enqueue(vec![0.0; 500]).unwrap();
        let b = scheduler.enqueue(vec![0.0; 250]).unwrap();
        assert!((a.start - 1.0).abs() < 1e-9);
        assert!((b.start - a.end()).abs() < 1e-9);

        clock.set(3.0);
        let c = scheduler.enqueue(vec![0.0; 100]).unwrap();
        assert!((c.start - 3.0).abs() < 1e-9);
        assert!((scheduler.next_start_time() - 3.1).abs() < 1e-9);
    }

    #[test]
    fn speaking_follows_the_last_unit() {
        let (mut scheduler, clock) = scheduler();
        assert!(!scheduler.is_speaking());
        scheduler.enqueue(vec![0.0; 1000]);
        scheduler.enqueue(vec![0.0; 1000]);
        clock.set(1.5);
        assert!(scheduler.is_speaking());
        assert_eq!(scheduler.retire_finished(), 1);
        clock.set(2.0);
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.retire_finished(), 1);
        assert_eq!(scheduler.scheduled_len(), 0);
    }

    #[test]
    fn flush_clears_everything() {
        let (sink, mut commands) = ChannelPlaybackSink::new();
        let clock = ManualClock::new();
        let mut scheduler = PlaybackScheduler::new(Arc::new(clock), Box::new(sink), 1000);
        scheduler.enqueue(vec![0.1; 400]);
        scheduler.enqueue(vec![0.1; 400]);

        assert_eq!(scheduler.flush(), 2);
        assert_eq!(scheduler.scheduled_len(), 0);
        assert!(!scheduler.is_speaking());
        assert!(scheduler.next_start_time().abs() < f64::EPSILON);

        assert!(matches!(commands.try_recv(), Ok(PlaybackCommand::Play(_))));
        assert!(matches!(commands.try_recv(), Ok(PlaybackCommand::Play(_))));
        assert_eq!(commands.try_recv(), Ok(PlaybackCommand::StopAll));
    }

    #[test]
    fn bad_chunk_leaves_timeline_untouched() {
        let (mut scheduler, _clock) = scheduler();
        scheduler.enqueue_base64(&encode_base64(&[0, 100, -100])).unwrap();
        let cursor = scheduler.next_start_time();
        assert!(scheduler.enqueue_base64("AAA").is_err());
        assert!(scheduler.enqueue_base64("!!not base64!!").is_err());
        assert!((scheduler.next_start_time() - cursor).abs() < f64::EPSILON);
        assert_eq!(scheduler.scheduled_len(), 1);
    }

    #[test]
    fn manual_clock_is_monotonic() {
        let clock = ManualClock::new();
        clock.set(2.0);
        clock.set(1.0);
        assert!((clock.now() - 2.0).abs() < f64::EPSILON);
        clock.advance(0.5);
        assert!((clock.now() - 2.5).abs() < f64::EPSILON);
    }
}
