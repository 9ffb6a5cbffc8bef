//! Clip marker repair and annotation alignment
//!
//! The clip layer of a dataset is a chronological list of `Clip Start` /
//! `Clip End` markers. Recorders leave a few artifacts in it:
//!
//! - a `Clip End` at 2000 µs emitted while the machine boots
//! - a recording that begins mid-clip (leading `Clip End`)
//! - a recording that stops mid-clip (trailing `Clip Start`)
//!
//! [`repair_markers`] fixes those, [`pair_clips`] turns the result into
//! [`Clip`]s, and [`align`] assigns free annotations to the clip whose closed
//! window contains them. On a shared boundary the earlier clip wins.

use crate::remote::RawAnnotation;
use crate::{Annotation, Clip, ClipMarker, MarkerKind};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Offset of the spurious `Clip End` written during machine startup
pub const STARTUP_SENTINEL_USEC: i64 = 2000;

/// Per-clip annotations keyed by offset from the clip start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignedAnnotationMap {
    clips: BTreeMap<usize, BTreeMap<i64, String>>,
}

impl AlignedAnnotationMap {
    /// Map with an empty entry for each of `clip_count` clips
    pub fn with_clips(clip_count: usize) -> Self {
        Self {
            clips: (0..clip_count).map(|i| (i, BTreeMap::new())).collect(),
        }
    }

    /// Insert an annotation for a clip; a later insert at the same offset replaces the earlier one
    pub fn insert(&mut self, clip_index: usize, offset_usec: i64, description: impl Into<String>) {
        self.clips
            .entry(clip_index)
            .or_default()
            .insert(offset_usec, description.into());
    }

    /// Annotations of one clip, ordered by offset
    pub fn for_clip(&self, clip_index: usize) -> Option<&BTreeMap<i64, String>> {
        self.clips.get(&clip_index)
    }

    /// Non-empty annotations of one clip
    pub fn events_for_clip(&self, clip_index: usize) -> Option<&BTreeMap<i64, String>> {
        self.for_clip(clip_index).filter(|m| !m.is_empty())
    }

    /// Total number of assigned annotations
    pub fn assigned_count(&self) -> usize {
        self.clips.values().map(BTreeMap::len).sum()
    }

    /// Whether no annotation was assigned to any clip
    pub fn is_empty(&self) -> bool {
        self.assigned_count() == 0
    }

    /// Iterate over `(clip index, annotations)` in clip order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &BTreeMap<i64, String>)> {
        self.clips.iter().map(|(i, m)| (*i, m))
    }

    /// Event id for every distinct assigned description, ids follow sorted order
    pub fn event_id_map(&self) -> BTreeMap<String, u32> {
        let labels: BTreeSet<&String> = self.clips.values().flat_map(|m| m.values()).collect();
        labels
            .into_iter()
            .enumerate()
            .map(|(id, label)| (label.clone(), id as u32))
            .collect()
    }
}

/// Result of clip alignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    /// Clips in chronological order
    pub clips: Vec<Clip>,
    /// Annotations assigned to those clips
    pub annotations: AlignedAnnotationMap,
}

impl Alignment {
    /// Whether alignment produced no usable clip
    pub fn has_clips(&self) -> bool {
        !self.clips.is_empty()
    }
}

/// Convert the remote clip layer into markers, skipping entries of unknown type
pub fn markers_from_layer(raw: &[RawAnnotation]) -> Vec<ClipMarker> {
    raw.iter()
        .filter_map(|a| match a.kind.parse::<MarkerKind>() {
            Ok(kind) => Some(ClipMarker {
                kind,
                offset_usec: a.start_time_offset_usec,
            }),
            Err(e) => {
                warn!(offset = a.start_time_offset_usec, "Ignoring clip layer entry: {}", e);
                None
            }
        })
        .collect()
}

/// Convert the remote annotation layer into free annotations
pub fn annotations_from_layer(raw: &[RawAnnotation]) -> Vec<Annotation> {
    raw.iter()
        .map(|a| Annotation::new(a.start_time_offset_usec, a.description.clone()))
        .collect()
}

/// Apply the startup, leading-end and trailing-start repairs, in that order
pub fn repair_markers(markers: &[ClipMarker], span_end_usec: i64) -> Vec<ClipMarker> {
    let mut repaired: Vec<ClipMarker> = markers.to_vec();

    if let Some(first) = repaired.first() {
        if first.kind == MarkerKind::ClipEnd && first.offset_usec == STARTUP_SENTINEL_USEC {
            debug!("Dropping startup clip end marker");
            repaired.remove(0);
        }
    }

    if repaired.first().map(|m| m.kind) == Some(MarkerKind::ClipEnd) {
        debug!("Recording begins inside a clip, adding clip start at 0");
        repaired.insert(0, ClipMarker::start(0));
    }

    if repaired.last().map(|m| m.kind) == Some(MarkerKind::ClipStart) {
        debug!(span_end_usec, "Recording ends inside a clip, adding clip end at span end");
        repaired.push(ClipMarker::end(span_end_usec));
    }

    repaired
}

/// Pair consecutive start/end markers into clips
///
/// Markers that break the start/end alternation, and pairs that would have a
/// negative duration, are dropped with a warning.
pub fn pair_clips(markers: &[ClipMarker]) -> Vec<Clip> {
    let mut clips = Vec::new();
    let mut open: Option<i64> = None;

    for marker in markers {
        match (marker.kind, open) {
            (MarkerKind::ClipStart, None) => open = Some(marker.offset_usec),
            (MarkerKind::ClipStart, Some(previous)) => {
                warn!(
                    dropped_start = previous,
                    offset = marker.offset_usec,
                    "Consecutive clip starts, keeping the later one"
                );
                open = Some(marker.offset_usec);
            }
            (MarkerKind::ClipEnd, Some(start)) => {
                open = None;
                if marker.offset_usec < start {
                    warn!(start, end = marker.offset_usec, "Dropping clip with negative duration");
                    continue;
                }
                clips.push(Clip {
                    index: clips.len(),
                    start_usec: start,
                    end_usec: marker.offset_usec,
                });
            }
            (MarkerKind::ClipEnd, None) => {
                warn!(offset = marker.offset_usec, "Dropping clip end without a start");
            }
        }
    }

    if let Some(start) = open {
        warn!(start, "Dropping unterminated clip start");
    }

    clips
}

/// Assign each annotation to the first clip whose closed window contains it
pub fn assign_annotations(clips: &[Clip], annotations: &[Annotation]) -> AlignedAnnotationMap {
    let mut map = AlignedAnnotationMap::with_clips(clips.len());
    let mut dropped = 0usize;

    for annotation in annotations {
        let t = annotation.offset_usec;
        match clips.iter().find(|c| c.contains(t)) {
            Some(clip) => map.insert(clip.index, t - clip.start_usec, annotation.description.clone()),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(dropped, "Annotations outside every clip were dropped");
    }
    map
}

/// Repair markers, derive clips, and align annotations to them
///
/// `span_end_usec` is the recording length, used to close a trailing clip.
/// An empty clip list tells the caller to fall back to a single unannotated
/// clip over the requested span.
///
/// # Examples
///
/// ```
/// use ieeg_bids_downloader::align::align;
/// use ieeg_bids_downloader::{Annotation, ClipMarker};
///
/// let markers = [ClipMarker::end(2000), ClipMarker::start(500_000), ClipMarker::end(900_000)];
/// let notes = [Annotation::new(600_000, "spike")];
/// let alignment = align(&markers, &notes, 1_000_000);
///
/// assert_eq!(alignment.clips.len(), 1);
/// assert_eq!(alignment.annotations.for_clip(0).unwrap()[&100_000], "spike");
/// ```
pub fn align(markers: &[ClipMarker], annotations: &[Annotation], span_end_usec: i64) -> Alignment {
    let repaired = repair_markers(markers, span_end_usec);
    let clips = pair_clips(&repaired);
    let annotations = assign_annotations(&clips, annotations);

    debug!(
        clips = clips.len(),
        assigned = annotations.assigned_count(),
        "Aligned annotations to clips"
    );

    Alignment { clips, annotations }
}
