//src/segment.rs

use crate::types::{Segment, Sequence};

/// Default minimum window length; shorter trailing windows are dropped.
pub const DEFAULT_MIN_LENGTH: usize = 6;

/// Splitting parameters. `max_length == 0` disables splitting entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    pub max_length: usize,
    pub min_length: usize,
    pub overlap: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_length: 0,
            min_length: DEFAULT_MIN_LENGTH,
            overlap: 0,
        }
    }
}

impl SegmentConfig {
    pub fn new(max_length: usize, min_length: usize, overlap: usize) -> Self {
        Self {
            max_length,
            min_length,
            overlap,
        }
    }

    /// Returns the overlap actually used and whether it had to be corrected.
    /// An overlap that leaves no forward step is clamped to `max_length / 2`.
    pub fn effective_overlap(&self) -> (usize, bool) {
        if self.max_length > 0 && self.overlap >= self.max_length {
            (self.max_length / 2, true)
        } else {
            (self.overlap, false)
        }
    }
}

/// Canonical segment id: `{parent}_segment_{start}_{end}`, 1-based inclusive.
pub fn segment_id(parent_id: &str, start: u64, end: u64) -> String {
    format!("{}_segment_{}_{}", parent_id, start, end)
}

/// Result of segmenting one sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
    /// Windows skipped because they were shorter than `min_length`
    pub dropped_windows: usize,
    /// Set when the configured overlap was clamped
    pub overlap_corrected: bool,
    /// Input sequences without bases; they yield no segments
    pub empty_sequences: usize,
}

/// Split `bases` into ordered, possibly overlapping windows of at most
/// `max_length` bases.
///
/// Sequences that already fit (or any sequence when splitting is disabled)
/// come back as a single segment carrying the original id with no suffix.
/// Windows shorter than `min_length` are skipped, which silently drops a
/// short tail. An empty sequence produces no segments at all.
pub fn segment(id: &str, bases: &str, config: &SegmentConfig) -> Segmentation {
    let len = bases.len();

    if config.max_length == 0 || len <= config.max_length {
        let whole = Segment {
            segment_id: id.to_string(),
            parent_id: id.to_string(),
            bases: bases.to_string(),
            start: 1,
            end: len as u64,
        };
        if whole.is_empty() {
            log::debug!("sequence {} has no bases; skipping", id);
            return Segmentation {
                empty_sequences: 1,
                ..Segmentation::default()
            };
        }
        return Segmentation {
            segments: vec![whole],
            ..Segmentation::default()
        };
    }

    let (overlap, overlap_corrected) = config.effective_overlap();
    if overlap_corrected {
        log::warn!(
            "overlap {} >= max_length {} for {}; using overlap {}",
            config.overlap,
            config.max_length,
            id,
            overlap
        );
    }
    let step = config.max_length - overlap;

    let raw = bases.as_bytes();
    let mut segments = Vec::with_capacity(len / step + 1);
    let mut dropped_windows = 0;

    let mut start = 0usize;
    while start < len {
        let end = (start + config.max_length).min(len);
        if end - start < config.min_length {
            dropped_windows += 1;
        } else {
            let (first, last) = (start as u64 + 1, end as u64);
            segments.push(Segment {
                segment_id: segment_id(id, first, last),
                parent_id: id.to_string(),
                bases: String::from_utf8_lossy(&raw[start..end]).into_owned(),
                start: first,
                end: last,
            });
        }
        start += step;
    }

    Segmentation {
        segments,
        dropped_windows,
        overlap_corrected,
        empty_sequences: 0,
    }
}

/// Segment every sequence and flatten the windows in input order.
pub fn segment_all(sequences: &[Sequence], config: &SegmentConfig) -> Segmentation {
    let mut out = Segmentation::default();
    for seq in sequences {
        let Segmentation {
            segments,
            dropped_windows,
            overlap_corrected,
            empty_sequences,
        } = segment(&seq.id, &seq.bases, config);
        out.segments.extend(segments);
        out.dropped_windows += dropped_windows;
        out.overlap_corrected |= overlap_corrected;
        out.empty_sequences += empty_sequences;
    }
    if out.empty_sequences > 0 {
        log::warn!("skipped {} sequence(s) without bases", out.empty_sequences);
    }
    out
}
