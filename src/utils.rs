//! Utility functions and constants
//!
//! **Used by**: sequence detection, SequenceLoader, CLI input filtering

pub mod sequences;

/// Media file type detection
pub mod media {
    use std::path::Path;

    /// Supported image file extensions
    pub const IMAGE_EXTS: &[&str] = &["exr", "png", "jpg", "jpeg", "tif", "tiff", "tga", "hdr"];

    /// Extensions decoded to float buffers
    pub const FLOAT_EXTS: &[&str] = &["exr", "hdr"];

    fn ext_lower(path: &Path) -> Option<String> {
        path.extension().and_then(|s| s.to_str()).map(|s| s.to_lowercase())
    }

    /// Check if file is an image format
    pub fn is_image(path: &Path) -> bool {
        ext_lower(path).is_some_and(|ext| IMAGE_EXTS.contains(&ext.as_str()))
    }

    /// Check if file is a float (HDR) image format
    pub fn is_float_image(path: &Path) -> bool {
        ext_lower(path).is_some_and(|ext| FLOAT_EXTS.contains(&ext.as_str()))
    }

}
