//! Real-time playback driver.
//!
//! The clock never simulates time. While playing it reads the transport
//! position on each display tick and feeds it to the [`TimelineSampler`].

use serde::Serialize;

use crate::audio::AudioTransport;
use crate::timeline::{TimelineSampler, TimelineState};
use crate::Result;

/// Default distance from the end within which `play` restarts the track.
pub const REPLAY_EPSILON_SECONDS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    Ended,
}

#[derive(Debug)]
pub struct PlaybackClock<T: AudioTransport> {
    transport: T,
    state: PlaybackState,
    duration: Option<f64>,
    position: f64,
    replay_epsilon: f64,
    tick_scheduled: bool,
}

impl<T: AudioTransport> PlaybackClock<T> {
    pub fn new(transport: T) -> Self {
        Self::with_replay_epsilon(transport, REPLAY_EPSILON_SECONDS)
    }

    pub fn with_replay_epsilon(transport: T, replay_epsilon: f64) -> Self {
        let duration = transport.duration();
        let position = transport.position();
        Self {
            transport,
            state: PlaybackState::Stopped,
            duration,
            position,
            replay_epsilon,
            tick_scheduled: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Media metadata arrived; the total duration is now known.
    pub fn on_metadata_loaded(&mut self, duration: f64) {
        tracing::debug!(duration, "playback metadata loaded");
        self.duration = Some(duration);
    }

    /// Starts or resumes playback. Near the end of the track the position is
    /// reset to zero first.
    pub fn play(&mut self) -> Result<()> {
        if self.state == PlaybackState::Playing {
            return Ok(());
        }

        if self.duration.is_none() {
            self.duration = self.transport.duration();
        }
        if let Some(duration) = self.duration {
            if self.position >= duration - self.replay_epsilon {
                self.seek(0.0);
            }
        }

        self.transport.play()?;
        self.state = PlaybackState::Playing;
        self.schedule_tick();
        tracing::debug!(position = self.position, "playback started");
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.transport.pause();
        self.position = self.transport.position();
        self.state = PlaybackState::Paused;
        self.tick_scheduled = false;
    }

    /// Pauses and rewinds to the start.
    pub fn stop(&mut self) {
        if self.state == PlaybackState::Playing {
            self.transport.pause();
        }
        self.seek(0.0);
        self.state = PlaybackState::Stopped;
        self.tick_scheduled = false;
    }

    /// Moves the position immediately without touching the play state.
    pub fn seek(&mut self, seconds: f64) {
        let upper = self.duration.unwrap_or(f64::MAX);
        let target = seconds.clamp(0.0, upper);
        self.transport.set_position(target);
        self.position = target;
    }

    /// The transport reached the end of the media.
    pub fn on_ended(&mut self) {
        if let Some(duration) = self.duration {
            self.position = duration;
        }
        self.state = PlaybackState::Ended;
        self.tick_scheduled = false;
        tracing::debug!(position = self.position, "playback ended");
    }

    /// Requests a display tick. Returns `false` when one is already pending
    /// or the clock is not playing.
    pub fn schedule_tick(&mut self) -> bool {
        if self.state != PlaybackState::Playing || self.tick_scheduled {
            return false;
        }
        self.tick_scheduled = true;
        true
    }

    pub fn wants_tick(&self) -> bool {
        self.tick_scheduled
    }

    /// Runs one display tick. Yields a fresh state while playing; otherwise
    /// the tick chain stops and `None` is returned.
    pub fn tick<'s>(&mut self, sampler: &'s TimelineSampler) -> Option<TimelineState<'s>> {
        if self.state != PlaybackState::Playing {
            self.tick_scheduled = false;
            return None;
        }

        if self.transport.has_ended() {
            self.position = self.transport.position();
            self.on_ended();
            return Some(sampler.sample(self.position));
        }

        self.position = self.transport.position();
        Some(sampler.sample(self.position))
    }

    /// State at the current position, for redraws outside the tick chain.
    pub fn snapshot<'s>(&self, sampler: &'s TimelineSampler) -> TimelineState<'s> {
        sampler.sample(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackgroundAsset, LyricLine};

    #[derive(Debug, Default)]
    struct FakeTransport {
        playing: bool,
        position: f64,
        duration: Option<f64>,
        play_calls: usize,
    }

    impl AudioTransport for FakeTransport {
        fn play(&mut self) -> Result<()> {
            self.playing = true;
            self.play_calls += 1;
            Ok(())
        }

        fn pause(&mut self) {
            self.playing = false;
        }

        fn position(&self) -> f64 {
            self.position
        }

        fn set_position(&mut self, seconds: f64) {
            self.position = seconds;
        }

        fn duration(&self) -> Option<f64> {
            self.duration
        }

        fn has_ended(&self) -> bool {
            self.duration.is_some_and(|duration| self.position >= duration)
        }
    }

    fn clock(duration: f64) -> PlaybackClock<FakeTransport> {
        PlaybackClock::new(FakeTransport {
            duration: Some(duration),
            ..Default::default()
        })
    }

    fn sampler() -> TimelineSampler {
        TimelineSampler::new(
            &[LyricLine::new("Hello", 10.0, 12.0)],
            Vec::new(),
            BackgroundAsset::fallback("bg.jpg"),
        )
        .unwrap()
    }

    #[test]
    fn ticks_follow_transport_position() {
        let sampler = sampler();
        let mut clock = clock(20.0);
        clock.play().unwrap();

        clock.transport.position = 11.0;
        let state = clock.tick(&sampler).unwrap();
        assert_eq!(state.progress, Some(0.5));
        assert_eq!(clock.position(), 11.0);
    }

    #[test]
    fn pause_stops_the_tick_chain() {
        let sampler = sampler();
        let mut clock = clock(20.0);
        clock.play().unwrap();
        assert!(clock.wants_tick());

        clock.pause();
        assert_eq!(clock.state(), PlaybackState::Paused);
        assert!(!clock.wants_tick());
        assert!(clock.tick(&sampler).is_none());
    }

    #[test]
    fn scheduling_is_idempotent() {
        let mut clock = clock(20.0);
        assert!(!clock.schedule_tick());

        clock.play().unwrap();
        assert!(!clock.schedule_tick());
        clock.play().unwrap();
        assert_eq!(clock.transport().play_calls, 1);
    }

    #[test]
    fn reaching_the_end_snaps_to_duration() {
        let sampler = sampler();
        let mut clock = clock(20.0);
        clock.play().unwrap();

        clock.transport.position = 20.0;
        let state = clock.tick(&sampler).unwrap();
        assert_eq!(clock.state(), PlaybackState::Ended);
        assert_eq!(clock.position(), 20.0);
        assert_eq!(state.previous.map(|l| l.text.as_str()), Some("Hello"));
        assert!(!clock.wants_tick());
    }

    #[test]
    fn play_near_the_end_restarts() {
        let mut clock = clock(20.0);
        clock.seek(19.95);
        clock.play().unwrap();

        assert_eq!(clock.position(), 0.0);
        assert_eq!(clock.transport().position, 0.0);
    }

    #[test]
    fn play_in_the_middle_resumes() {
        let mut clock = clock(20.0);
        clock.seek(8.0);
        clock.play().unwrap();
        assert_eq!(clock.position(), 8.0);
    }

    #[test]
    fn seek_keeps_play_state() {
        let sampler = sampler();
        let mut clock = clock(20.0);
        clock.seek(11.0);

        assert_eq!(clock.state(), PlaybackState::Stopped);
        assert_eq!(clock.snapshot(&sampler).progress, Some(0.5));

        clock.play().unwrap();
        clock.seek(2.0);
        assert_eq!(clock.state(), PlaybackState::Playing);
        assert_eq!(clock.transport().position, 2.0);
    }

    #[test]
    fn metadata_enables_replay_check() {
        let mut clock = PlaybackClock::new(FakeTransport::default());
        assert_eq!(clock.duration(), None);

        clock.on_metadata_loaded(5.0);
        clock.seek(5.0);
        clock.play().unwrap();
        assert_eq!(clock.position(), 0.0);
    }

    #[test]
    fn stop_rewinds_and_halts() {
        let sampler = sampler();
        let mut clock = clock(20.0);
        clock.play().unwrap();
        clock.transport.position = 11.0;
        clock.tick(&sampler).unwrap();

        clock.stop();
        assert_eq!(clock.state(), PlaybackState::Stopped);
        assert_eq!(clock.position(), 0.0);
        assert_eq!(clock.transport().position, 0.0);
        assert!(!clock.transport().playing);
        assert!(!clock.wants_tick());
        assert!(clock.tick(&sampler).is_none());
    }

    #[test]
    fn resume_continues_from_the_paused_position() {
        let sampler = sampler();
        let mut clock = clock(20.0);
        clock.play().unwrap();
        clock.transport.position = 7.0;
        clock.pause();
        assert_eq!(clock.position(), 7.0);

        clock.play().unwrap();
        assert_eq!(clock.state(), PlaybackState::Playing);
        assert_eq!(clock.position(), 7.0);
        assert_eq!(clock.transport().position, 7.0);
        assert_eq!(clock.transport().play_calls, 2);
        assert!(clock.wants_tick());
        assert_eq!(clock.tick(&sampler).map(|state| state.time), Some(7.0));
    }

    #[test]
    fn play_after_ended_notification_restarts() {
        let mut clock = clock(20.0);
        clock.play().unwrap();
        clock.transport.position = 13.0;

        clock.on_ended();
        assert_eq!(clock.state(), PlaybackState::Ended);
        assert_eq!(clock.position(), 20.0);
        assert!(!clock.wants_tick());

        clock.play().unwrap();
        assert_eq!(clock.state(), PlaybackState::Playing);
        assert_eq!(clock.position(), 0.0);
        assert_eq!(clock.transport().position, 0.0);
    }

    #[test]
    fn seek_while_ended_only_moves_the_position() {
        let sampler = sampler();
        let mut clock = clock(20.0);
        clock.play().unwrap();
        clock.on_ended();

        clock.seek(11.0);
        assert_eq!(clock.state(), PlaybackState::Ended);
        assert_eq!(clock.position(), 11.0);
        assert_eq!(clock.transport().position, 11.0);
        assert!(!clock.wants_tick());
        assert_eq!(clock.snapshot(&sampler).progress, Some(0.5));

        clock.play().unwrap();
        assert_eq!(clock.position(), 11.0);
    }
}
