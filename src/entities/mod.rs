//! Entities module - data model and capability traits
//!
//! - `frame`: frame identity (`FrameReference`) and decoded buffers (`Frame`)
//! - `timeline`: tracks of clips mapping timeline frames to stream frames
//! - `traits`: what the engine needs from loaders and resources
//! - `loader`: image sequence loader built on the `image` crate

pub mod frame;
pub mod loader;
pub mod timeline;
pub mod traits;

pub use frame::{Frame, FrameError, FrameReference, PixelBuffer, PixelFormat, StreamId};
pub use loader::SequenceLoader;
pub use timeline::{Clip, FrameRange, Timeline, Track};
pub use traits::{FrameLoader, FrameResource};
