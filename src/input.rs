//! Input sink: host-agnostic keyboard/mouse entry points
//!
//! The windowing host translates its native events into `Key`/`Modifiers`
//! and forwards them to an `InputSink` together with the context value it
//! acts on. Every method has a no-op default, so sinks only implement what
//! they care about.
//!
//! # Playback keys (`PlaybackControls`)
//!
//! - **Home/End**: first/last frame of the range
//! - **Left/Right**: step one frame (Ctrl: `FRAME_JUMP_STEP` frames)
//! - **Space**: play/pause toggle
//! - **J**: reverse at 1x, 2x, 4x, 8x (tap to increase speed)
//! - **K**: pause
//! - **L**: forward at 1x, 2x, 4x, 8x (tap to increase speed)
//! - **Wheel**: step one frame per notch

use log::trace;

use crate::core::session::PlaybackSession;
use crate::entities::traits::FrameResource;

/// Frame step size for Ctrl+Arrow
pub const FRAME_JUMP_STEP: i64 = 25;

/// Fastest J/L shuttle speed
pub const MAX_SHUTTLE: i32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Home,
    End,
    Left,
    Right,
    Up,
    Down,
    Space,
    Escape,
    /// Printable key, as typed (case preserved)
    Char(char),
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        shift: false,
        alt: false,
    };

    pub const CTRL: Modifiers = Modifiers {
        ctrl: true,
        shift: false,
        alt: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Receiver of host input events. Each method returns true if it consumed the event.
pub trait InputSink<C> {
    fn key(&mut self, _ctx: &mut C, _key: Key, _mods: Modifiers) -> bool {
        false
    }

    fn char(&mut self, _ctx: &mut C, _ch: char) -> bool {
        false
    }

    /// Wheel delta in notches, positive = away from the user
    fn scroll(&mut self, _ctx: &mut C, _dx: f32, _dy: f32) -> bool {
        false
    }

    fn mouse_move(&mut self, _ctx: &mut C, _x: f32, _y: f32) -> bool {
        false
    }

    fn mouse_button(&mut self, _ctx: &mut C, _button: MouseButton, _pressed: bool) -> bool {
        false
    }

    fn resize(&mut self, _ctx: &mut C, _width: u32, _height: u32) -> bool {
        false
    }
}

/// Transport keys over a `PlaybackSession`
#[derive(Debug, Clone)]
pub struct PlaybackControls {
    pub jump_step: i64,
    pub max_shuttle: i32,
}

impl Default for PlaybackControls {
    fn default() -> Self {
        Self {
            jump_step: FRAME_JUMP_STEP,
            max_shuttle: MAX_SHUTTLE,
        }
    }
}

impl PlaybackControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next J/L speed: start at 1x, double while going the same way,
    /// reset to 1x on direction change
    fn shuttle(&self, speed: i32, direction: i32) -> i32 {
        if speed == 0 || speed.signum() != direction {
            direction
        } else {
            (speed * 2).clamp(-self.max_shuttle, self.max_shuttle)
        }
    }

    fn jog<R: FrameResource>(&self, session: &mut PlaybackSession<R>, direction: i32) {
        let speed = self.shuttle(session.speed(), direction);
        trace!("Shuttle {} -> {}", session.speed(), speed);
        session.set_speed(speed);
    }
}

impl<R: FrameResource> InputSink<PlaybackSession<R>> for PlaybackControls {
    fn key(&mut self, session: &mut PlaybackSession<R>, key: Key, mods: Modifiers) -> bool {
        let step = if mods.ctrl { self.jump_step } else { 1 };
        match key {
            Key::Home => {
                session.cue(session.range().first);
            }
            Key::End => {
                session.cue(session.range().last);
            }
            Key::Left => {
                session.cue_relative(-step);
            }
            Key::Right => {
                session.cue_relative(step);
            }
            Key::Space => {
                session.toggle_play();
            }
            Key::Char(c) => return self.char(session, c),
            _ => return false,
        }
        true
    }

    fn char(&mut self, session: &mut PlaybackSession<R>, ch: char) -> bool {
        match ch.to_ascii_lowercase() {
            'j' | '<' => self.jog(session, -1),
            'k' => session.set_speed(0),
            'l' | '>' => self.jog(session, 1),
            _ => return false,
        }
        true
    }

    fn scroll(&mut self, session: &mut PlaybackSession<R>, _dx: f32, dy: f32) -> bool {
        if dy == 0.0 {
            return false;
        }
        session.cue_relative(if dy > 0.0 { 1 } else { -1 });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionConfig;
    use crate::core::workers::{Job, Task, TaskHandle, WorkerPool};
    use crate::entities::frame::{Frame, FrameError, FrameReference, StreamId};
    use crate::entities::timeline::{Clip, Timeline, Track};
    use crate::entities::traits::FrameLoader;
    use std::sync::Arc;

    /// Accepts work and never runs it
    struct IdlePool;

    impl WorkerPool for IdlePool {
        fn submit(&self, job: Job) -> TaskHandle {
            Task::new(job)
        }
        fn defer(&self, task: &TaskHandle) {
            task.set_deferred(true);
        }
        fn promote(&self, task: &TaskHandle) {
            task.set_deferred(false);
        }
    }

    struct BlankLoader;

    impl FrameLoader for BlankLoader {
        type Resource = Frame;
        fn estimate_bytes(&self, _frame: &FrameReference) -> usize {
            64
        }
        fn load(&self, _frame: &FrameReference) -> Result<Frame, FrameError> {
            Ok(Frame::placeholder(4, 4))
        }
    }

    fn session() -> PlaybackSession<Frame> {
        let mut track = Track::new("main");
        track.add_clip(Clip::new(StreamId::new(), 10, 0, 100));
        let mut timeline = Timeline::new();
        timeline.add_track(track);
        let config = SessionConfig {
            start_frame: Some(50),
            ..Default::default()
        };
        PlaybackSession::new(Arc::new(timeline), Arc::new(BlankLoader), Arc::new(IdlePool), config).unwrap()
    }

    #[test]
    fn test_home_end_and_steps() {
        let mut s = session();
        let mut controls = PlaybackControls::new();

        assert!(controls.key(&mut s, Key::Right, Modifiers::NONE));
        assert_eq!(s.current_index(), 51);
        controls.key(&mut s, Key::Left, Modifiers::CTRL);
        assert_eq!(s.current_index(), 26);

        controls.key(&mut s, Key::Home, Modifiers::NONE);
        assert_eq!(s.current_index(), 10);
        controls.key(&mut s, Key::Left, Modifiers::NONE);
        assert_eq!(s.current_index(), 10);
        controls.key(&mut s, Key::End, Modifiers::NONE);
        assert_eq!(s.current_index(), 109);

        assert!(!controls.key(&mut s, Key::Escape, Modifiers::NONE));
    }

    #[test]
    fn test_space_toggles() {
        let mut s = session();
        let mut controls = PlaybackControls::new();
        controls.key(&mut s, Key::Space, Modifiers::NONE);
        assert_eq!(s.speed(), 1);
        controls.key(&mut s, Key::Space, Modifiers::NONE);
        assert_eq!(s.speed(), 0);
    }

    #[test]
    fn test_jkl_shuttle() {
        let mut s = session();
        let mut controls = PlaybackControls::new();

        let mut speeds = Vec::new();
        for _ in 0..5 {
            controls.key(&mut s, Key::Char('l'), Modifiers::NONE);
            speeds.push(s.speed());
        }
        assert_eq!(speeds, vec![1, 2, 4, 8, 8]);

        // Direction change resets to 1x
        controls.char(&mut s, 'J');
        assert_eq!(s.speed(), -1);
        controls.char(&mut s, 'j');
        assert_eq!(s.speed(), -2);

        controls.char(&mut s, 'k');
        assert_eq!(s.speed(), 0);
        assert!(!controls.char(&mut s, 'x'));
    }

    #[test]
    fn test_scroll_steps_and_defaults_ignore() {
        let mut s = session();
        let mut controls = PlaybackControls::new();
        assert!(controls.scroll(&mut s, 0.0, 1.0));
        assert!(controls.scroll(&mut s, 0.0, 1.0));
        assert!(controls.scroll(&mut s, 0.0, -1.0));
        assert_eq!(s.current_index(), 51);
        assert!(!controls.scroll(&mut s, 3.0, 0.0));

        assert!(!controls.mouse_move(&mut s, 10.0, 10.0));
        assert!(!controls.mouse_button(&mut s, MouseButton::Left, true));
        assert!(!controls.resize(&mut s, 1920, 1080));
        assert_eq!(s.current_index(), 51);
    }
}
