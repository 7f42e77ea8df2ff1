//! Image sequence loader backed by the `image` crate
//!
//! Resolves `FrameReference`s to files of registered `FileSequence`s and
//! decodes them into `Frame`s:
//! - EXR/HDR and 16-bit/float sources -> `PixelBuffer::F32`
//! - Everything else (PNG, JPEG, TGA, ...) -> `PixelBuffer::U8`
//!
//! Size estimates come from the first file header of each stream and are
//! memoized, so admission never touches pixel data.

use log::{debug, trace, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use image::{ColorType, ImageDecoder, ImageError, ImageReader};

use super::frame::{Frame, FrameError, FrameReference, PixelFormat, StreamId};
use super::timeline::Track;
use super::traits::FrameLoader;
use crate::utils::media;
use crate::utils::sequences::FileSequence;

/// Image header summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: usize,
    pub height: usize,
    /// Buffer format the decoder will produce
    pub format: PixelFormat,
}

impl ImageHeader {
    pub fn byte_size(&self) -> usize {
        self.width * self.height * self.format.bytes_per_pixel()
    }
}

/// Loader over a set of registered image sequences
#[derive(Default)]
pub struct SequenceLoader {
    streams: RwLock<HashMap<StreamId, Arc<FileSequence>>>,
    estimates: Mutex<HashMap<StreamId, usize>>,
}

impl SequenceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sequence under a fresh stream id
    pub fn add_sequence(&self, seq: FileSequence) -> StreamId {
        let id = StreamId::new();
        debug!("Registered stream {} -> {}", id, seq.pattern());
        self.streams
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(seq));
        id
    }

    pub fn sequence(&self, id: StreamId) -> Option<Arc<FileSequence>> {
        self.streams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Register `seq` and append it as a clip to `track`.
    ///
    /// Returns the stream id and the timeline frame the clip starts at.
    pub fn append_to_track(&self, track: &mut Track, seq: FileSequence) -> (StreamId, i64) {
        let length = seq.frame_count();
        let id = self.add_sequence(seq);
        let start = track.push_clip(id, 0, length);
        (id, start)
    }

    /// Read dimensions and output format without decoding pixels
    pub fn header(path: &Path) -> Result<ImageHeader, FrameError> {
        let decoder = ImageReader::open(path)
            .map_err(|e| FrameError::Io(format!("{}: {}", path.display(), e)))?
            .with_guessed_format()
            .map_err(|e| FrameError::Io(format!("{}: {}", path.display(), e)))?
            .into_decoder()
            .map_err(map_image_error)?;

        let (w, h) = decoder.dimensions();
        let format = if media::is_float_image(path) || is_deep(decoder.color_type()) {
            PixelFormat::RgbaF32
        } else {
            PixelFormat::Rgba8
        };
        Ok(ImageHeader {
            width: w as usize,
            height: h as usize,
            format,
        })
    }

    /// Decode a complete image file into a Frame
    pub fn load_path(path: &Path) -> Result<Frame, FrameError> {
        trace!("Decoding {}", path.display());
        let img = image::open(path).map_err(map_image_error)?;
        let width = img.width() as usize;
        let height = img.height() as usize;

        if media::is_float_image(path) || is_deep(img.color()) {
            Ok(Frame::from_f32_buffer(img.to_rgba32f().into_raw(), width, height))
        } else {
            Ok(Frame::from_u8_buffer(img.to_rgba8().into_raw(), width, height))
        }
    }

    fn lookup(&self, frame: &FrameReference) -> Result<Arc<FileSequence>, FrameError> {
        self.sequence(frame.stream)
            .ok_or(FrameError::UnknownStream(frame.stream))
    }
}

impl FrameLoader for SequenceLoader {
    type Resource = Frame;

    fn estimate_bytes(&self, frame: &FrameReference) -> usize {
        if let Some(bytes) = self
            .estimates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&frame.stream)
        {
            return *bytes;
        }

        // Header read happens unlocked; a racing estimate just repeats it
        let bytes = match self.lookup(frame) {
            Ok(seq) => match seq.files.values().next() {
                Some(path) => match Self::header(path) {
                    Ok(header) => header.byte_size(),
                    Err(e) => {
                        warn!("Cannot estimate {}: {}", frame, e);
                        0
                    }
                },
                None => 0,
            },
            Err(_) => 0,
        };

        self.estimates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(frame.stream, bytes);
        bytes
    }

    fn load(&self, frame: &FrameReference) -> Result<Frame, FrameError> {
        let seq = self.lookup(frame)?;
        let path = seq
            .path_at(frame.index)
            .ok_or(FrameError::MissingFrame(*frame))?;
        Self::load_path(path)
    }
}

/// More than 8 bits per channel
fn is_deep(color: ColorType) -> bool {
    matches!(
        color,
        ColorType::L16
            | ColorType::La16
            | ColorType::Rgb16
            | ColorType::Rgba16
            | ColorType::Rgb32F
            | ColorType::Rgba32F
    )
}

fn map_image_error(e: ImageError) -> FrameError {
    match e {
        ImageError::IoError(e) => FrameError::Io(e.to_string()),
        ImageError::Unsupported(e) => FrameError::UnsupportedFormat(e.to_string()),
        e => FrameError::Image(e.to_string()),
    }
}
