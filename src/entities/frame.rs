//! Frame identity and decoded frame buffers (U8, F32)
//!
//! **Why**: The cache is keyed by *what* to load (`FrameReference`), and owns
//! *what was loaded* (`Frame`). Both live here so loaders and the cache agree
//! on one vocabulary.
//!
//! **Used by**: FrameCache (keys + resources), Timeline (clip lookups),
//! SequenceLoader (decode target)
//!
//! # Pixel Formats
//!
//! - `PixelBuffer::U8`: LDR images (JPG/PNG/TGA), 4 bytes/pixel
//! - `PixelBuffer::F32`: HDR/EXR/16-bit sources, 16 bytes/pixel

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::traits::FrameResource;

/// Identifier of one media stream (image sequence, clip source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell streams apart in logs
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// One loadable unit: (stream, frame index within stream).
///
/// Immutable value type, used as the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameReference {
    pub stream: StreamId,
    pub index: u64,
}

impl FrameReference {
    pub fn new(stream: StreamId, index: u64) -> Self {
        Self { stream, index }
    }
}

impl fmt::Display for FrameReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stream, self.index)
    }
}

/// Pixel buffer format - stores different precision levels
#[derive(Debug, Clone)]
pub enum PixelBuffer {
    U8(Vec<u8>),   // LDR formats (PNG, JPEG, TGA) - 8-bit per channel
    F32(Vec<f32>), // HDR formats (EXR, HDR, 16-bit) - 32-bit float per channel
}

/// Pixel format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    RgbaF32,
}

impl PixelFormat {
    /// Bytes per RGBA pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::RgbaF32 => 16,
        }
    }
}

/// Decoded RGBA frame, ready for upload.
///
/// Immutable once built; the cache hands out `Arc<Frame>` views.
#[derive(Debug, Clone)]
pub struct Frame {
    buffer: PixelBuffer,
    width: usize,
    height: usize,
}

/// Frame loading errors
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    Image(String),
    Io(String),
    UnsupportedFormat(String),
    UnknownStream(StreamId),
    MissingFrame(FrameReference),
    OverBudget { bytes: usize, limit: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Image(e) => write!(f, "Image error: {}", e),
            FrameError::Io(e) => write!(f, "IO error: {}", e),
            FrameError::UnsupportedFormat(e) => write!(f, "Unsupported format: {}", e),
            FrameError::UnknownStream(id) => write!(f, "Unknown stream {}", id),
            FrameError::MissingFrame(r) => write!(f, "No source for frame {}", r),
            FrameError::OverBudget { bytes, limit } => {
                write!(f, "Frame needs {} bytes, budget allows {}", bytes, limit)
            }
        }
    }
}

impl std::error::Error for FrameError {}

impl Frame {
    /// Build an 8-bit RGBA frame. Buffer length must be `width * height * 4`.
    pub fn from_u8_buffer(buffer: Vec<u8>, width: usize, height: usize) -> Self {
        debug_assert_eq!(buffer.len(), width * height * 4);
        Self {
            buffer: PixelBuffer::U8(buffer),
            width,
            height,
        }
    }

    /// Build a float RGBA frame. Buffer length must be `width * height * 4`.
    pub fn from_f32_buffer(buffer: Vec<f32>, width: usize, height: usize) -> Self {
        debug_assert_eq!(buffer.len(), width * height * 4);
        Self {
            buffer: PixelBuffer::F32(buffer),
            width,
            height,
        }
    }

    /// Dark green placeholder, shown by renderers for missing frames
    pub fn placeholder(width: usize, height: usize) -> Self {
        let mut buffer = vec![0u8; width * height * 4];
        for px in buffer.chunks_mut(4) {
            px.copy_from_slice(&[0, 100, 0, 255]);
        }
        Self::from_u8_buffer(buffer, width, height)
    }

    /// Memory size in bytes
    pub fn mem(&self) -> usize {
        match &self.buffer {
            PixelBuffer::U8(vec) => vec.len(),
            PixelBuffer::F32(vec) => vec.len() * 4,
        }
    }

    pub fn pixel_buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn pixel_format(&self) -> PixelFormat {
        match self.buffer {
            PixelBuffer::U8(_) => PixelFormat::Rgba8,
            PixelBuffer::F32(_) => PixelFormat::RgbaF32,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

impl FrameResource for Frame {
    fn byte_size(&self) -> usize {
        self.mem()
    }
}
