//! Image sequence detection utilities
//!
//! Groups numbered files (`shot.0001.exr`, `shot.0002.exr`, ...) into
//! `FileSequence`s by expanding a glob over the siblings of each input path.
//! Files without a trailing frame number become one-frame sequences.

use indexmap::IndexMap;
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::entities::frame::FrameError;
use crate::utils::media;

/// Numbered files sharing prefix and extension
#[derive(Debug, Clone, PartialEq)]
pub struct FileSequence {
    /// Directory + name part before the number, e.g. `/shots/plate.`
    pub prefix: String,
    pub ext: String,
    /// Digits in the frame number (0 for single files)
    pub padding: usize,
    pub first: u64,
    pub last: u64,
    /// Frame number -> file (gaps allowed)
    pub files: BTreeMap<u64, PathBuf>,
}

impl FileSequence {
    /// One-frame sequence for a file without a frame number
    pub fn single(path: PathBuf) -> Self {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string();
        let prefix = path.with_extension("").to_string_lossy().to_string();
        let mut files = BTreeMap::new();
        files.insert(0, path);
        Self {
            prefix,
            ext,
            padding: 0,
            first: 0,
            last: 0,
            files,
        }
    }

    /// Glob-style pattern identifying the sequence
    pub fn pattern(&self) -> String {
        if self.padding == 0 {
            format!("{}.{}", self.prefix, self.ext)
        } else {
            format!("{}{}.{}", self.prefix, "#".repeat(self.padding), self.ext)
        }
    }

    /// Frames from first to last, gaps included
    pub fn frame_count(&self) -> u64 {
        self.last - self.first + 1
    }

    /// Frames actually present on disk
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// File for stream-local index (0 = first frame of the sequence)
    pub fn path_at(&self, index: u64) -> Option<&Path> {
        let number = self.first.checked_add(index)?;
        self.files.get(&number).map(PathBuf::as_path)
    }

    /// Display name: file name without number and extension
    pub fn name(&self) -> String {
        let name = Path::new(&self.prefix)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("sequence");
        name.trim_end_matches(['.', '_', '-']).to_string()
    }
}

/// Detect image sequences from a list of file paths
///
/// Each sequence is reported once, in the order its first member appears in
/// `paths`. Non-image files are skipped.
pub fn detect_sequences(paths: Vec<PathBuf>) -> Result<Vec<FileSequence>, FrameError> {
    let mut found: IndexMap<String, FileSequence> = IndexMap::new();

    for path in paths {
        if !media::is_image(&path) {
            warn!("Skipping unsupported file: {}", path.display());
            continue;
        }

        let seq = match split_sequence_path(&path)? {
            Some((prefix, _number, ext, padding)) => {
                let key = format!("{}{}", prefix, ext);
                if found.contains_key(&key) {
                    continue;
                }
                match detect_sequence_from_pattern(&prefix, &ext, padding) {
                    Ok(seq) => {
                        info!("Detected sequence: {} ({} frames)", seq.pattern(), seq.file_count());
                        seq
                    }
                    Err(e) => {
                        warn!("Failed to detect sequence for {}: {}", path.display(), e);
                        FileSequence::single(path)
                    }
                }
            }
            None => FileSequence::single(path),
        };

        let key = format!("{}{}", seq.prefix, seq.ext);
        found.entry(key).or_insert(seq);
    }

    Ok(found.into_values().collect())
}

/// Collect all siblings matching `prefix*.ext`
fn detect_sequence_from_pattern(prefix: &str, ext: &str, padding: usize) -> Result<FileSequence, FrameError> {
    let pattern = format!("{}*.{}", glob::Pattern::escape(prefix), ext);
    let mut files = BTreeMap::new();

    for path in glob_paths(&pattern)? {
        if let Some((p, number, e, _)) = split_sequence_path(&path)? {
            if p == prefix && e == ext {
                files.insert(number, path);
            }
        }
    }

    let (first, last) = match (files.keys().next(), files.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Err(FrameError::Io(format!("No files matched pattern: {}", pattern))),
    };

    Ok(FileSequence {
        prefix: prefix.to_string(),
        ext: ext.to_string(),
        padding,
        first,
        last,
        files,
    })
}

fn trailing_digits(stem: &str) -> usize {
    stem.chars().rev().take_while(|c| c.is_ascii_digit()).count()
}

/// Expand a glob pattern into a list of paths
fn glob_paths(pattern: &str) -> Result<Vec<PathBuf>, FrameError> {
    let mut paths = Vec::new();
    for entry in glob::glob(pattern)
        .map_err(|e| FrameError::Io(format!("Glob error for pattern {}: {}", pattern, e)))?
    {
        match entry {
            Ok(path) => paths.push(path),
            Err(e) => return Err(FrameError::Io(format!("Glob entry error: {}", e))),
        }
    }
    Ok(paths)
}

/// Split a sequence filename into (prefix, number, ext, padding)
///
/// Example: "/path/seq.0001.exr" -> ("/path/seq.", 1, "exr", 4)
fn split_sequence_path(path: &Path) -> Result<Option<(String, u64, String, usize)>, FrameError> {
    let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
        return Ok(None);
    };
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return Ok(None);
    };

    let digits = trailing_digits(stem);
    if digits == 0 {
        return Ok(None);
    }
    let digit_start = stem.len() - digits;

    let number_str = &stem[digit_start..];
    let number = number_str
        .parse::<u64>()
        .map_err(|e| FrameError::Io(format!("Invalid frame number '{}': {}", number_str, e)))?;

    let mut prefix = String::new();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        prefix.push_str(&parent.to_string_lossy());
        if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
            prefix.push(std::path::MAIN_SEPARATOR);
        }
    }
    prefix.push_str(&stem[..digit_start]);

    Ok(Some((prefix, number, ext.to_string(), digits)))
}
