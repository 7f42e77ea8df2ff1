//! flipbook - frame playback engine library
//!
//! Playback clock, prefetch scheduler and budgeted frame cache for
//! image-sequence playback, plus the headless runner used by the binary.

// Core engine (clock, prefetch, cache, events, workers)
pub mod core;

// Data model and loaders
pub mod entities;
pub mod utils;

// App modules
pub mod cli;
pub mod input;
pub mod paths;
pub mod runner;
pub mod settings;

// Re-export commonly used types from core
pub use core::cache_man::{Budget, CacheManager, ConfigError};
pub use core::clock::{EndBehavior, FrameRate, PlaybackClock};
pub use core::event_bus::{downcast_event, BoxedEvent, EventBus};
pub use core::frame_cache::{CacheState, EntryState, FrameCache};
pub use core::prefetch::{IterationMode, PrefetchScheduler};
pub use core::session::{PlaybackSession, SessionConfig, SessionError, TickOutput};
pub use core::workers::{WorkerPool, Workers};

// Re-export entities
pub use entities::{Frame, FrameError, FrameLoader, FrameReference, FrameResource, SequenceLoader, StreamId, Timeline};
