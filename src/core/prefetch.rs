//! Direction-aware prefetch scheduler
//!
//! Turns (current frame, iteration mode, window size) into the ordered list
//! of frame references the cache should hold, nearest need first:
//!
//! - **Forward**:  f, f+1, f+2, ... f+W-1
//! - **Backward**: f, f-1, f-2, ... f-W+1
//! - **PingPong**: f, f+1, f-1, f+2, f-2, ... (paused: scrub either way)
//!
//! Frames outside the timeline range are skipped, never substituted, so the
//! window shrinks near the boundaries. The plan says nothing about cache hits;
//! it only tells `FrameCache::prepare` what to prioritize.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::core::cache_man::ConfigError;
use crate::entities::frame::FrameReference;
use crate::entities::timeline::{FrameRange, Timeline};

/// Direction policy driving prefetch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IterationMode {
    Forward,
    Backward,
    /// Paused preview: prefetch symmetrically around the current frame
    PingPong,
}

impl IterationMode {
    /// Mode from playback speed sign
    pub fn from_speed(speed: i32) -> Self {
        match speed {
            s if s < 0 => IterationMode::Backward,
            s if s > 0 => IterationMode::Forward,
            _ => IterationMode::PingPong,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrefetchScheduler {
    window: usize,
}

impl PrefetchScheduler {
    /// Create scheduler with window size `window` (frames, at least 1)
    pub fn new(window: usize) -> Result<Self, ConfigError> {
        if window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(Self { window })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn set_window(&mut self, window: usize) -> Result<(), ConfigError> {
        if window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        self.window = window;
        Ok(())
    }

    /// Timeline frames to keep resident, nearest first, within `range`
    pub fn frames(&self, current: i64, mode: IterationMode, range: FrameRange) -> Vec<i64> {
        let w = self.window as i64;
        let candidates: Box<dyn Iterator<Item = i64>> = match mode {
            IterationMode::Forward => Box::new((0..w).map(|offset| current + offset)),
            IterationMode::Backward => Box::new((0..w).map(|offset| current - offset)),
            IterationMode::PingPong => Box::new((0..w).map(|n| {
                // 0, +1, -1, +2, -2, ...
                let step = (n + 1) / 2;
                if n % 2 == 1 { current + step } else { current - step }
            })),
        };
        candidates.filter(|f| range.contains(*f)).collect()
    }

    /// Frame references for the window, nearest first, deduplicated.
    ///
    /// Each frame contributes one reference per enabled track that shows
    /// something there (track order). Empty if the timeline has no range.
    pub fn plan(&self, current: i64, mode: IterationMode, timeline: &Timeline) -> Vec<FrameReference> {
        let Some(range) = timeline.range() else {
            return Vec::new();
        };

        let mut refs: IndexSet<FrameReference> = IndexSet::with_capacity(self.window);
        for frame in self.frames(current, mode, range) {
            refs.extend(timeline.references_at(frame));
        }
        refs.into_iter().collect()
    }
}
