//! Playback clock with exact rational timing and shuttle speed
//!
//! **Why**: The nominal playback position must keep advancing by wall time
//! whether or not the frame under it has been decoded yet, and must not drift
//! over long sessions or across speed changes.
//!
//! **Used by**: PlaybackSession (every refresh tick), PlaybackControls (cue,
//! step, shuttle)
//!
//! # Timing Model
//!
//! Position = `anchor` frame + `ticks / ticks_per_frame`, where one frame is
//! `den * 1e9` ticks and one nanosecond of wall time at speed `s` adds
//! `num * s` ticks. All integer, so `30000/1001` fps over 1.001 s lands on
//! exactly 30 frames.
//!
//! # Speed
//!
//! Integer multiplier: negative = reverse, 0 = paused, positive = forward.
//! Speed sign alone determines the prefetch iteration mode.
//!
//! # Range Ends
//!
//! `EndBehavior::Loop` wraps around keeping the sub-frame phase,
//! `EndBehavior::Stop` parks on the boundary and pauses.

use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::core::cache_man::ConfigError;
use crate::core::prefetch::IterationMode;
use crate::entities::timeline::FrameRange;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Rational frame rate `num / den` frames per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Result<Self, ConfigError> {
        if num == 0 || den == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        Ok(Self { num, den })
    }

    /// Nearest rational for a float fps; NTSC rates map to x000/1001
    pub fn from_fps(fps: f64) -> Result<Self, ConfigError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(ConfigError::ZeroFrameRate);
        }
        for base in [24u32, 30, 48, 60, 120] {
            let ntsc = base as f64 * 1000.0 / 1001.0;
            if (fps - ntsc).abs() < 0.005 {
                return Self::new(base * 1000, 1001);
            }
        }
        if fps.fract() == 0.0 {
            return Self::new(fps as u32, 1);
        }
        Self::new((fps * 1000.0).round() as u32, 1000)
    }

    pub fn fps(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// One frame of wall time at speed 1, rounded up to whole nanoseconds
    /// so that offsetting by it always reaches the next frame
    pub fn frame_duration(&self) -> Duration {
        let nanos = (NANOS_PER_SEC * self.den as i128 + self.num as i128 - 1) / self.num as i128;
        Duration::from_nanos(nanos as u64)
    }

    fn ticks_per_frame(&self) -> i128 {
        self.den as i128 * NANOS_PER_SEC
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self { num: 24, den: 1 }
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{} fps", self.num)
        } else {
            write!(f, "{:.3} fps", self.fps())
        }
    }
}

/// What happens when playback runs off the range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EndBehavior {
    #[default]
    Loop,
    Stop,
}

#[derive(Debug, Clone)]
pub struct PlaybackClock {
    rate: FrameRate,
    range: FrameRange,
    end: EndBehavior,
    speed: i32,
    /// Restored by `toggle_play`
    resume_speed: i32,
    anchor: i64,
    /// Sub-frame accumulator, always in `[0, ticks_per_frame)`
    ticks: i128,
    /// Signed media nanoseconds since the last cue
    playback_ns: i128,
}

impl PlaybackClock {
    /// Paused clock at the start of `range`
    pub fn new(rate: FrameRate, range: FrameRange) -> Self {
        Self {
            rate,
            range,
            end: EndBehavior::default(),
            speed: 0,
            resume_speed: 1,
            anchor: range.first,
            ticks: 0,
            playback_ns: 0,
        }
    }

    pub fn with_end_behavior(mut self, end: EndBehavior) -> Self {
        self.end = end;
        self
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    /// Change rate keeping the current position
    pub fn set_rate(&mut self, rate: FrameRate) {
        let tpf_old = self.rate.ticks_per_frame();
        self.rate = rate;
        self.ticks = self.ticks * rate.ticks_per_frame() / tpf_old;
    }

    pub fn range(&self) -> FrameRange {
        self.range
    }

    /// Replace the valid range; the position is clamped into it
    pub fn set_range(&mut self, range: FrameRange) {
        self.range = range;
        if !range.contains(self.anchor) {
            self.anchor = range.clamp(self.anchor);
            self.ticks = 0;
        }
    }

    pub fn end_behavior(&self) -> EndBehavior {
        self.end
    }

    pub fn set_end_behavior(&mut self, end: EndBehavior) {
        self.end = end;
    }

    /// Jump to `frame` (clamped to range), dropping any sub-frame phase
    pub fn cue(&mut self, frame: i64) -> i64 {
        self.anchor = self.range.clamp(frame);
        self.ticks = 0;
        self.playback_ns = 0;
        trace!("Cue to frame {}", self.anchor);
        self.anchor
    }

    /// Jump by `delta` frames from the displayed frame (clamped to range)
    pub fn cue_relative(&mut self, delta: i64) -> i64 {
        self.cue(self.display_index().saturating_add(delta))
    }

    /// Advance by wall time scaled by speed. Returns true if the displayed frame changed.
    pub fn offset_playback_time(&mut self, elapsed: Duration) -> bool {
        if self.speed == 0 {
            return false;
        }
        let before = self.display_index();
        let elapsed_ns = elapsed.as_nanos() as i128;
        let speed = self.speed as i128;

        self.playback_ns += elapsed_ns * speed;
        self.ticks += elapsed_ns * self.rate.num as i128 * speed;

        let tpf = self.rate.ticks_per_frame();
        self.anchor += self.ticks.div_euclid(tpf) as i64;
        self.ticks = self.ticks.rem_euclid(tpf);
        self.apply_end_behavior();

        self.display_index() != before
    }

    fn apply_end_behavior(&mut self) {
        if self.range.contains(self.anchor) {
            return;
        }
        match self.end {
            EndBehavior::Loop => {
                let len = self.range.frame_count() as i64;
                let wrapped = self.range.first + (self.anchor - self.range.first).rem_euclid(len);
                trace!("Frame loop: {} -> {}", self.anchor, wrapped);
                self.anchor = wrapped;
            }
            EndBehavior::Stop => {
                self.anchor = self.range.clamp(self.anchor);
                self.ticks = 0;
                self.set_playback_speed(0);
                trace!("Reached range end at {}, stopping", self.anchor);
            }
        }
    }

    /// Change speed; the position is untouched
    pub fn set_playback_speed(&mut self, speed: i32) {
        if speed != 0 {
            self.resume_speed = speed;
        }
        self.speed = speed;
    }

    /// Pause, or resume at the last non-zero speed (1 if never set)
    pub fn toggle_play(&mut self) -> i32 {
        let speed = if self.speed == 0 { self.resume_speed } else { 0 };
        self.set_playback_speed(speed);
        speed
    }

    pub fn speed(&self) -> i32 {
        self.speed
    }

    pub fn is_playing(&self) -> bool {
        self.speed != 0
    }

    pub fn iteration_mode(&self) -> IterationMode {
        IterationMode::from_speed(self.speed)
    }

    /// Fractional frame position
    pub fn current_frame(&self) -> f64 {
        self.anchor as f64 + self.ticks as f64 / self.rate.ticks_per_frame() as f64
    }

    /// Floor of `current_frame`
    pub fn current_index(&self) -> i64 {
        self.anchor
    }

    /// Frame shown now: `current_frame` rounded half up. Past the last frame
    /// it wraps to the first when looping and stays on the last otherwise.
    pub fn display_index(&self) -> i64 {
        let tpf = self.rate.ticks_per_frame();
        let rounded = if self.ticks * 2 >= tpf { self.anchor + 1 } else { self.anchor };
        if self.range.contains(rounded) {
            return rounded;
        }
        match self.end {
            EndBehavior::Loop => self.range.first,
            EndBehavior::Stop => self.range.clamp(rounded),
        }
    }

    /// Signed media time played since the last cue (scaled by speed)
    pub fn playback_time(&self) -> f64 {
        self.playback_ns as f64 / NANOS_PER_SEC as f64
    }

    /// Wall time of one frame at speed 1 (fixed-step mode)
    pub fn frame_duration(&self) -> Duration {
        self.rate.frame_duration()
    }
}
