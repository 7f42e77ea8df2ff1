//! Core engine modules - clock, prefetch, cache, events, workers
//!
//! These modules form the playback engine, independent of any UI.

pub mod cache_man;
pub mod clock;
pub mod event_bus;
pub mod frame_cache;
pub mod prefetch;
pub mod session;
pub mod stats;
pub mod workers;

// Re-exports for convenience
pub use cache_man::{Budget, CacheManager, ConfigError};
pub use clock::{EndBehavior, FrameRate, PlaybackClock};
pub use event_bus::EventBus;
pub use frame_cache::{CacheState, EntryState, FrameCache};
pub use prefetch::{IterationMode, PrefetchScheduler};
pub use session::{PlaybackSession, SessionConfig, SessionError, TickOutput};
pub use stats::{CacheStats, Metronome};
pub use workers::{WorkerPool, Workers};
