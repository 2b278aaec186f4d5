//! Playback position estimation between sparse player reports.

use crate::player::PlaybackState;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Last authoritative position and when we saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackAnchor {
    pub position_ms: u64,
    pub wall_clock: Instant,
    pub duration_ms: u64,
    pub is_playing: bool,
}

impl PlaybackAnchor {
    pub fn from_state(state: &PlaybackState, now: Instant) -> Self {
        Self {
            position_ms: state.position_ms,
            wall_clock: now,
            duration_ms: state.duration_ms,
            is_playing: !state.is_paused,
        }
    }

    /// Position at `now`, never past the end of a track with a known length.
    /// A zero duration is treated as unknown and does not clamp.
    pub fn estimate(&self, now: Instant) -> u64 {
        let raw = if self.is_playing {
            let elapsed = now.saturating_duration_since(self.wall_clock).as_millis();
            self.position_ms
                .saturating_add(u64::try_from(elapsed).unwrap_or(u64::MAX))
        } else {
            self.position_ms
        };
        if self.duration_ms > 0 {
            raw.min(self.duration_ms)
        } else {
            raw
        }
    }
}

#[derive(Debug, Default)]
pub struct PositionTracker {
    anchor: Option<PlaybackAnchor>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the anchor wholesale from a player report.
    pub fn reset(&mut self, state: &PlaybackState, now: Instant) {
        self.anchor = Some(PlaybackAnchor::from_state(state, now));
    }

    pub fn clear(&mut self) {
        self.anchor = None;
    }

    pub fn estimate(&self, now: Instant) -> u64 {
        self.anchor.map(|a| a.estimate(now)).unwrap_or(0)
    }

    pub fn duration_ms(&self) -> u64 {
        self.anchor.map(|a| a.duration_ms).unwrap_or(0)
    }

    pub fn is_playing(&self) -> bool {
        self.anchor.is_some_and(|a| a.is_playing)
    }
}

/// Restartable periodic tick driving position refreshes.
///
/// Lives on the engine task, so restarting replaces the old interval before
/// the next tick can be observed.
#[derive(Debug)]
pub struct PositionTicker {
    period: Duration,
    interval: Option<Interval>,
}

impl PositionTicker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    pub fn restart(&mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    /// Wait for the next tick. Never resolves while stopped.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(position_ms: u64, duration_ms: u64, is_paused: bool) -> PlaybackState {
        PlaybackState {
            track_title: "Song".into(),
            position_ms,
            duration_ms,
            is_paused,
            ..Default::default()
        }
    }

    #[test]
    fn test_estimate_advances_while_playing() {
        let t = Instant::now();
        let mut tracker = PositionTracker::new();
        tracker.reset(&state(5000, 60_000, false), t);
        assert_eq!(tracker.estimate(t), 5000);
        assert_eq!(tracker.estimate(t + Duration::from_millis(2000)), 7000);
    }

    #[test]
    fn test_estimate_clamped_to_duration() {
        let t = Instant::now();
        let mut tracker = PositionTracker::new();
        tracker.reset(&state(5000, 6000, false), t);
        assert_eq!(tracker.estimate(t + Duration::from_millis(2000)), 6000);
    }

    #[test]
    fn test_estimate_frozen_while_paused() {
        let t = Instant::now();
        let mut tracker = PositionTracker::new();
        tracker.reset(&state(5000, 60_000, true), t);
        assert_eq!(tracker.estimate(t + Duration::from_secs(30)), 5000);
        assert!(!tracker.is_playing());
    }

    #[test]
    fn test_unknown_duration_does_not_clamp() {
        let t = Instant::now();
        let mut tracker = PositionTracker::new();
        tracker.reset(&state(5000, 0, false), t);
        assert_eq!(tracker.estimate(t + Duration::from_millis(500)), 5500);
    }

    #[test]
    fn test_reset_may_jump_backwards() {
        let t = Instant::now();
        let mut tracker = PositionTracker::new();
        tracker.reset(&state(50_000, 60_000, false), t);
        let later = t + Duration::from_millis(100);
        tracker.reset(&state(1_000, 60_000, false), later);
        assert_eq!(tracker.estimate(later), 1_000);
    }

    #[test]
    fn test_monotonic_while_playing() {
        let t = Instant::now();
        let mut tracker = PositionTracker::new();
        tracker.reset(&state(0, 10_000, false), t);
        let mut last = 0;
        for step in 0..200u64 {
            let est = tracker.estimate(t + Duration::from_millis(step * 73));
            assert!(est >= last);
            last = est;
        }
        assert_eq!(last, 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_restart_and_stop() {
        let mut ticker = PositionTicker::new(Duration::from_millis(120));
        assert!(ticker.interval.is_none());

        ticker.restart();
        let first = ticker.tick().await;
        let second = ticker.tick().await;
        assert_eq!(second - first, Duration::from_millis(120));

        ticker.stop();
        let stopped = tokio::time::timeout(Duration::from_secs(5), ticker.tick()).await;
        assert!(stopped.is_err());
    }
}
