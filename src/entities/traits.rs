//! Abstract traits for dependency inversion.
//!
//! These traits define the capabilities `core` needs from the outside world
//! (decoding, resource accounting) without knowing how they are implemented.
//!
//! Implementations live in `entities/loader.rs` (image sequences) and in tests.

use std::sync::Arc;

use super::frame::{FrameError, FrameReference};

/// Anything the cache can own and account against the budget.
pub trait FrameResource: Send + Sync + 'static {
    /// Resident size in bytes
    fn byte_size(&self) -> usize;
}

/// Abstract frame loader (decode + upload capability).
///
/// Called from worker threads. The cache never cares how a frame is
/// produced, only what it costs and whether it succeeded.
pub trait FrameLoader: Send + Sync {
    type Resource: FrameResource;

    /// Expected resident size of the frame, used for admission before decode.
    fn estimate_bytes(&self, frame: &FrameReference) -> usize;

    /// Decode the frame. Blocking; runs off the render loop.
    fn load(&self, frame: &FrameReference) -> Result<Self::Resource, FrameError>;

    /// Best-effort cancellation hint for an in-flight load.
    ///
    /// Returns true if the loader will abandon the work. The default does
    /// nothing, in which case the result is discarded on arrival.
    fn cancel(&self, _frame: &FrameReference) -> bool {
        false
    }
}

/// Blanket impl: Arc<T> implements traits if T does
impl<T: FrameResource> FrameResource for Arc<T> {
    fn byte_size(&self) -> usize {
        (**self).byte_size()
    }
}

impl<T: FrameLoader + ?Sized> FrameLoader for Arc<T> {
    type Resource = T::Resource;

    fn estimate_bytes(&self, frame: &FrameReference) -> usize {
        (**self).estimate_bytes(frame)
    }

    fn load(&self, frame: &FrameReference) -> Result<Self::Resource, FrameError> {
        (**self).load(frame)
    }

    fn cancel(&self, frame: &FrameReference) -> bool {
        (**self).cancel(frame)
    }
}
