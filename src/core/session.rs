//! Playback session: the explicit context value driven once per refresh
//!
//! Owns the clock and the scheduler (render-loop only, unsynchronized) and
//! shares the frame cache with the loader workers. Input handlers and the
//! render loop receive `&mut PlaybackSession` instead of closing over globals.
//!
//! Per tick: read frame -> iteration mode -> plan window -> `prepare()` ->
//! `get()` per enabled track -> `TickOutput` for the renderer.

use log::{debug, info};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::cache_man::{Budget, ConfigError};
use crate::core::clock::{EndBehavior, FrameRate, PlaybackClock};
use crate::core::event_bus::{EventBus, FirstFrameReadyEvent};
use crate::core::frame_cache::{CacheState, EntryState, FrameCache};
use crate::core::prefetch::{IterationMode, PrefetchScheduler};
use crate::core::workers::WorkerPool;
use crate::entities::frame::FrameReference;
use crate::entities::timeline::{FrameRange, Timeline};
use crate::entities::traits::{FrameLoader, FrameResource};

/// Unusable session setup, reported by `PlaybackSession::new`
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    EmptyTimeline,
    Config(ConfigError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::EmptyTimeline => write!(f, "Timeline has no playable frames"),
            SessionError::Config(e) => write!(f, "Invalid session config: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Config(e) => Some(e),
            SessionError::EmptyTimeline => None,
        }
    }
}

impl From<ConfigError> for SessionError {
    fn from(e: ConfigError) -> Self {
        SessionError::Config(e)
    }
}

/// Session parameters
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub rate: FrameRate,
    pub budget: Budget,
    /// Prefetch window in timeline frames
    pub window: usize,
    pub end: EndBehavior,
    /// Initial speed (0 = paused)
    pub speed: i32,
    /// Initial frame, clamped to the timeline range
    pub start_frame: Option<i64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rate: FrameRate::default(),
            budget: Budget::Entries(64),
            window: 16,
            end: EndBehavior::Loop,
            speed: 0,
            start_frame: None,
        }
    }
}

/// What one enabled track shows at the current frame
#[derive(Debug)]
pub struct LayerView<R> {
    pub track: usize,
    /// None if the track has no clip here
    pub reference: Option<FrameReference>,
    /// Resident resource, if Ready
    pub resource: Option<Arc<R>>,
    pub state: EntryState,
}

/// Result of one refresh
#[derive(Debug)]
pub struct TickOutput<R> {
    pub frame: i64,
    pub mode: IterationMode,
    /// Enabled tracks, bottom first
    pub layers: Vec<LayerView<R>>,
    /// True on the first tick (per arming) where something could be drawn
    pub first_frame_ready: bool,
}

impl<R> TickOutput<R> {
    /// Number of layers that have nothing to draw yet (placeholder)
    pub fn missing(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| l.reference.is_some() && l.resource.is_none())
            .count()
    }
}

pub struct PlaybackSession<R: FrameResource> {
    timeline: Arc<Timeline>,
    clock: PlaybackClock,
    scheduler: PrefetchScheduler,
    cache: Arc<FrameCache<R>>,
    events: EventBus,
    first_frame_armed: bool,
}

impl<R: FrameResource> PlaybackSession<R> {
    /// Build a session over `timeline`, failing fast on unusable setup
    pub fn new(
        timeline: Arc<Timeline>,
        loader: Arc<dyn FrameLoader<Resource = R>>,
        pool: Arc<dyn WorkerPool>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let range = timeline.range().ok_or(SessionError::EmptyTimeline)?;
        let rate = FrameRate::new(config.rate.num, config.rate.den)?;
        let scheduler = PrefetchScheduler::new(config.window)?;
        let events = EventBus::new();
        let cache = Arc::new(FrameCache::new(config.budget, loader, pool, events.clone())?);

        let mut clock = PlaybackClock::new(rate, range).with_end_behavior(config.end);
        if let Some(frame) = config.start_frame {
            clock.cue(frame);
        }
        clock.set_playback_speed(config.speed);

        info!(
            "Session: frames {}..={} @ {}, window={}, budget={}, end={:?}",
            range.first, range.last, rate, config.window, config.budget, config.end
        );

        Ok(Self {
            timeline,
            clock,
            scheduler,
            cache,
            events,
            first_frame_armed: true,
        })
    }

    /// One refresh: schedule the window, resolve what is ready now
    pub fn tick(&mut self) -> TickOutput<R> {
        let frame = self.clock.display_index();
        let mode = self.clock.iteration_mode();

        let plan = self.scheduler.plan(frame, mode, &self.timeline);
        self.cache.prepare(&plan);

        let layers: Vec<LayerView<R>> = self
            .timeline
            .tracks()
            .iter()
            .enumerate()
            .filter(|(_, track)| !track.disabled)
            .map(|(idx, track)| {
                let reference = track.media_frame_reference_at(frame);
                let resource = reference.as_ref().and_then(|r| self.cache.get(r));
                let state = match (&resource, &reference) {
                    (Some(_), _) => EntryState::Ready,
                    (None, Some(r)) => self.cache.status(r),
                    (None, None) => EntryState::Empty,
                };
                LayerView {
                    track: idx,
                    reference,
                    resource,
                    state,
                }
            })
            .collect();

        let mut first_frame_ready = false;
        if self.first_frame_armed {
            if let Some(shown) = layers.iter().find(|l| l.resource.is_some()) {
                self.first_frame_armed = false;
                first_frame_ready = true;
                if let Some(reference) = shown.reference {
                    debug!("First frame ready at {} ({})", frame, reference);
                    self.events.emit(FirstFrameReadyEvent {
                        timeline_frame: frame,
                        frame: reference,
                    });
                }
            }
        }

        TickOutput {
            frame,
            mode,
            layers,
            first_frame_ready,
        }
    }

    /// Advance the clock by wall time. Returns true if the frame changed.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        self.clock.offset_playback_time(elapsed)
    }

    /// Jump to `frame` (clamped). Loads outside the new window lose priority.
    pub fn cue(&mut self, frame: i64) -> i64 {
        let target = self.clock.cue(frame);
        self.on_discontinuity();
        target
    }

    /// Jump by `delta` frames (clamped)
    pub fn cue_relative(&mut self, delta: i64) -> i64 {
        let target = self.clock.cue_relative(delta);
        self.on_discontinuity();
        target
    }

    fn on_discontinuity(&self) {
        let plan = self.scheduler.plan(
            self.clock.display_index(),
            self.clock.iteration_mode(),
            &self.timeline,
        );
        self.cache.deprioritize_outside(&plan);
    }

    pub fn set_speed(&mut self, speed: i32) {
        self.clock.set_playback_speed(speed);
    }

    pub fn toggle_play(&mut self) -> i32 {
        self.clock.toggle_play()
    }

    pub fn speed(&self) -> i32 {
        self.clock.speed()
    }

    pub fn current_frame(&self) -> f64 {
        self.clock.current_frame()
    }

    pub fn current_index(&self) -> i64 {
        self.clock.current_index()
    }

    /// Frame the next tick resolves
    pub fn display_index(&self) -> i64 {
        self.clock.display_index()
    }

    pub fn range(&self) -> FrameRange {
        self.clock.range()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn set_window(&mut self, window: usize) -> Result<(), ConfigError> {
        self.scheduler.set_window(window)
    }

    pub fn window(&self) -> usize {
        self.scheduler.window()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn cache(&self) -> &Arc<FrameCache<R>> {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Report `first_frame_ready` again on the next tick that shows something
    pub fn rearm_first_frame(&mut self) {
        self.first_frame_armed = true;
    }

    pub fn dump_state(&self, state: &mut CacheState) {
        self.cache.dump_state(state);
    }
}
