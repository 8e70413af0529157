//! Value types shared by the proxies and the resource capability traits

use serde::{Deserialize, Serialize};

/// Attachment state of a container resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachmentState {
    /// Not yet connected to a playback consumer (or detached again)
    #[default]
    Unattached,
    /// Connected and accepting structural and content calls
    Attached,
    /// End of stream has been signalled
    Ended,
}

/// How appended media segments are placed on the timeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendMode {
    /// Segment timestamps decide placement
    #[default]
    Segments,
    /// Segments are placed back to back in append order
    Sequence,
}

/// Error code optionally passed with end-of-stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndOfStreamError {
    /// The stream ended because of a network failure
    Network,
    /// The stream ended because of a decode failure
    Decode,
}

/// Optional settings applied by a CONFIGURE operation
///
/// Unset fields leave the buffer's current value untouched. Settings are
/// applied in the order mode, timestamp offset, append window start,
/// append window end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BufferOptions {
    /// Offset added to timestamps of subsequently appended media
    pub timestamp_offset: Option<f64>,
    /// Segment placement mode
    pub mode: Option<AppendMode>,
    /// Start of the append window in seconds
    pub append_window_start: Option<f64>,
    /// End of the append window in seconds (may be infinite)
    pub append_window_end: Option<f64>,
}

impl BufferOptions {
    /// Create an empty set of options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timestamp offset
    pub fn with_timestamp_offset(mut self, offset: f64) -> Self {
        self.timestamp_offset = Some(offset);
        self
    }

    /// Set the append mode
    pub fn with_mode(mut self, mode: AppendMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set both ends of the append window
    pub fn with_append_window(mut self, start: f64, end: f64) -> Self {
        self.append_window_start = Some(start);
        self.append_window_end = Some(end);
        self
    }

    /// True if no setting would be applied
    pub fn is_empty(&self) -> bool {
        self.timestamp_offset.is_none()
            && self.mode.is_none()
            && self.append_window_start.is_none()
            && self.append_window_end.is_none()
    }
}

/// Ordered, non-overlapping `[start, end)` time ranges in seconds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeRanges {
    ranges: Vec<(f64, f64)>,
}

impl TimeRanges {
    /// Create an empty set of ranges
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Start of the range at `index`
    pub fn start(&self, index: usize) -> Option<f64> {
        self.ranges.get(index).map(|r| r.0)
    }

    /// End of the range at `index`
    pub fn end(&self, index: usize) -> Option<f64> {
        self.ranges.get(index).map(|r| r.1)
    }

    /// Iterate over `(start, end)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ranges.iter().copied()
    }

    /// Add `[start, end)`, merging with any range it touches
    pub fn add(&mut self, start: f64, end: f64) {
        if !(start < end) {
            return;
        }
        let mut merged = (start, end);
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e < merged.0 || s > merged.1 {
                kept.push((s, e));
            } else {
                merged = (merged.0.min(s), merged.1.max(e));
            }
        }
        kept.push(merged);
        kept.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.ranges = kept;
    }

    /// Cut `[start, end)` out of every range
    pub fn subtract(&mut self, start: f64, end: f64) {
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e <= start || s >= end {
                kept.push((s, e));
                continue;
            }
            if s < start {
                kept.push((s, start));
            }
            if e > end {
                kept.push((end, e));
            }
        }
        self.ranges = kept;
    }
}

impl From<Vec<(f64, f64)>> for TimeRanges {
    fn from(ranges: Vec<(f64, f64)>) -> Self {
        let mut out = TimeRanges::new();
        for (s, e) in ranges {
            out.add(s, e);
        }
        out
    }
}

/// Kind of media track exposed by a child buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// Read-only description of a media track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub label: String,
    pub language: String,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_ranges_merge_and_subtract() {
        let mut ranges = TimeRanges::new();
        ranges.add(0.0, 2.0);
        ranges.add(4.0, 6.0);
        ranges.add(2.0, 4.0);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges.start(0), Some(0.0));
        assert_eq!(ranges.end(0), Some(6.0));

        ranges.subtract(1.0, 3.0);
        assert_eq!(ranges.iter().collect::<Vec<_>>(), vec![(0.0, 1.0), (3.0, 6.0)]);

        ranges.subtract(0.0, 10.0);
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_empty_range_is_ignored() {
        let mut ranges = TimeRanges::new();
        ranges.add(3.0, 3.0);
        ranges.add(5.0, 1.0);
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_buffer_options_from_json() {
        let options: BufferOptions =
            serde_json::from_str(r#"{"timestamp_offset": 1.5, "mode": "sequence"}"#).unwrap();
        assert_eq!(options.timestamp_offset, Some(1.5));
        assert_eq!(options.mode, Some(AppendMode::Sequence));
        assert!(options.append_window_start.is_none());
        assert!(!options.is_empty());
        assert!(BufferOptions::new().is_empty());
    }
}
