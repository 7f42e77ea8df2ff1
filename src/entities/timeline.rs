//! Timeline: ordered tracks of time-ordered clips
//!
//! A clip maps a span of timeline frames onto a media stream. The playback
//! core only *queries* the timeline ("which clip is under frame N", "which
//! stream frame does it show"); building and editing it is up to the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::frame::{FrameReference, StreamId};

/// Inclusive frame range `[first, last]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub first: i64,
    pub last: i64,
}

impl FrameRange {
    pub fn new(first: i64, last: i64) -> Self {
        if last < first {
            Self { first: last, last: first }
        } else {
            Self { first, last }
        }
    }

    pub fn contains(&self, frame: i64) -> bool {
        frame >= self.first && frame <= self.last
    }

    pub fn clamp(&self, frame: i64) -> i64 {
        frame.clamp(self.first, self.last)
    }

    /// Number of frames in range
    pub fn frame_count(&self) -> u64 {
        (self.last - self.first) as u64 + 1
    }

    fn union(self, other: FrameRange) -> FrameRange {
        FrameRange {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }
}

/// Span of a media stream placed on a track.
///
/// Timeline frames `[start, start + length)` show stream frames
/// `[source_in, source_in + length)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clip {
    pub stream: StreamId,
    pub start: i64,
    pub source_in: u64,
    pub length: u64,
}

impl Clip {
    pub fn new(stream: StreamId, start: i64, source_in: u64, length: u64) -> Self {
        Self { stream, start, source_in, length }
    }

    /// Timeline frames covered, None for zero-length clips
    pub fn range(&self) -> Option<FrameRange> {
        if self.length == 0 {
            return None;
        }
        Some(FrameRange::new(self.start, self.start + self.length as i64 - 1))
    }

    pub fn contains(&self, frame: i64) -> bool {
        self.range().is_some_and(|r| r.contains(frame))
    }

    /// Stream frame shown at timeline `frame` (caller checks `contains`)
    fn local_index(&self, frame: i64) -> u64 {
        self.source_in + (frame - self.start) as u64
    }
}

/// Single track: clips keyed by start frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub disabled: bool,
    clips: BTreeMap<i64, Clip>,
}

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disabled: false,
            clips: BTreeMap::new(),
        }
    }

    /// Insert clip, replacing one that starts at the same frame
    pub fn add_clip(&mut self, clip: Clip) {
        self.clips.insert(clip.start, clip);
    }

    /// Append clip right after the current last frame of the track
    pub fn push_clip(&mut self, stream: StreamId, source_in: u64, length: u64) -> i64 {
        let start = self.range().map(|r| r.last + 1).unwrap_or(0);
        self.add_clip(Clip::new(stream, start, source_in, length));
        start
    }

    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.clips.values()
    }

    /// Clip under `frame`. Overlaps resolve to the later-starting clip.
    pub fn clip_containing(&self, frame: i64) -> Option<&Clip> {
        self.clips
            .range(..=frame)
            .rev()
            .map(|(_, clip)| clip)
            .find(|clip| clip.contains(frame))
    }

    /// Stream frame shown by this track at `frame`
    pub fn media_frame_reference_at(&self, frame: i64) -> Option<FrameReference> {
        self.clip_containing(frame)
            .map(|clip| FrameReference::new(clip.stream, clip.local_index(frame)))
    }

    pub fn range(&self) -> Option<FrameRange> {
        self.clips
            .values()
            .filter_map(Clip::range)
            .reduce(FrameRange::union)
    }
}

/// Ordered collection of tracks (index 0 renders first)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    tracks: Vec<Track>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_track(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_mut(&mut self, idx: usize) -> Option<&mut Track> {
        self.tracks.get_mut(idx)
    }

    /// Union of all enabled track ranges; None if nothing is playable
    pub fn range(&self) -> Option<FrameRange> {
        self.tracks
            .iter()
            .filter(|t| !t.disabled)
            .filter_map(Track::range)
            .reduce(FrameRange::union)
    }

    /// Frame references visible at `frame`, one per enabled track that has a clip there
    pub fn references_at(&self, frame: i64) -> impl Iterator<Item = FrameReference> + '_ {
        self.tracks
            .iter()
            .filter(|t| !t.disabled)
            .filter_map(move |t| t.media_frame_reference_at(frame))
    }
}
