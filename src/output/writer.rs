//! Persisting one work item's recording
//!
//! [`RecordingWriter::persist`] turns every fetched clip into a unit on the
//! layout, falls back to a raw artifact when a unit cannot be written, and
//! ledgers the item once all clips have been handled. Unit failures are
//! counted in the [`PersistReport`]; only ledger failures are returned.

use super::{EventRecord, LayoutWriter, Sidecar, UnitData, UnitPath};
use crate::align::AlignedAnnotationMap;
use crate::channels::infer_channel_types;
use crate::downloader::job::WorkItem;
use crate::fetcher::FetchedSegment;
use crate::ledger::{LedgerError, SessionCounter, SubjectLedger};
use crate::metrics::record_unit_written;
use crate::Clip;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// A fetched clip
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRecording {
    /// Clip window; `index` decides the run number
    pub clip: Clip,
    /// Samples for the window
    pub segment: FetchedSegment,
}

/// Whether a recording carries aligned annotations
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationMode {
    /// Annotations aligned to clips
    Annotated(AlignedAnnotationMap),
    /// Plain span download
    Unannotated,
}

/// All clips fetched for one work item
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// Clips in index order
    pub clips: Vec<ClipRecording>,
    /// Annotation state decided before any unit is written
    pub annotations: AnnotationMode,
}

impl Recording {
    /// Event ids for the whole item; empty when unannotated
    pub fn event_id_map(&self) -> BTreeMap<String, u32> {
        match &self.annotations {
            AnnotationMode::Annotated(map) => map.event_id_map(),
            AnnotationMode::Unannotated => BTreeMap::new(),
        }
    }

    /// Events of one clip, converted to sample indices
    pub fn events_for(&self, clip: &ClipRecording, ids: &BTreeMap<String, u32>) -> Vec<EventRecord> {
        let AnnotationMode::Annotated(map) = &self.annotations else {
            return Vec::new();
        };
        let Some(events) = map.events_for_clip(clip.clip.index) else {
            return Vec::new();
        };

        events
            .iter()
            .map(|(offset, label)| EventRecord {
                onset_usec: *offset,
                sample_index: sample_index(*offset, clip.segment.sample_rate),
                label: label.clone(),
                event_id: ids.get(label).copied().unwrap_or_default(),
            })
            .collect()
    }
}

/// Sample index of an offset within a clip
///
/// Truncates toward zero: an event between two samples belongs to the earlier one.
pub fn sample_index(offset_usec: i64, sample_rate: f64) -> u64 {
    let index = (offset_usec as f64 * 1e-6 * sample_rate).floor();
    if index.is_finite() && index > 0.0 {
        index as u64
    } else {
        0
    }
}

/// Outcome of persisting one recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Subject number used
    pub subject_number: u32,
    /// Session number used
    pub session_number: u32,
    /// Units written to the layout
    pub units_written: usize,
    /// Units written as raw fallback artifacts
    pub units_fallback: usize,
    /// Units lost entirely
    pub units_failed: usize,
}

/// Errors that stop a recording from being ledgered
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Nothing was fetched
    #[error("recording has no clips")]
    Empty,

    /// Ledger could not be updated
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Writes recordings through a layout
pub struct RecordingWriter<'a, L: LayoutWriter + ?Sized> {
    layout: &'a L,
    channel_type_threshold: usize,
}

impl<'a, L: LayoutWriter + ?Sized> RecordingWriter<'a, L> {
    /// Create a writer
    pub fn new(layout: &'a L, channel_type_threshold: usize) -> Self {
        Self {
            layout,
            channel_type_threshold,
        }
    }

    /// Persist every clip of `recording`, then ledger the item
    pub fn persist(
        &self,
        recording: &Recording,
        item: &WorkItem,
        ledger: &mut SubjectLedger,
        sessions: &mut SessionCounter,
    ) -> Result<PersistReport, PersistError> {
        if recording.clips.is_empty() {
            return Err(PersistError::Empty);
        }

        let subject_number = ledger.resolve_subject(&item.uid, self.layout.root())?;
        let session_number = sessions.next_session(subject_number)?;
        let event_ids = recording.event_id_map();
        let mut report = PersistReport {
            subject_number,
            session_number,
            ..PersistReport::default()
        };

        debug!(
            source = %item.source_reference,
            subject = subject_number,
            session = session_number,
            clips = recording.clips.len(),
            "Persisting recording"
        );

        for clip in &recording.clips {
            let run = clip.clip.index as u32 + 1;
            let path = match self.layout.build_path(subject_number, session_number, run) {
                Ok(path) => path,
                Err(e) => {
                    error!(source = %item.source_reference, run, error = %e, "Cannot build unit path");
                    report.units_failed += 1;
                    continue;
                }
            };

            let names = clip.segment.channel_names();
            let types = infer_channel_types(&names, self.channel_type_threshold);
            let events = recording.events_for(clip, &event_ids);
            let unit = UnitData {
                samples: &clip.segment.samples,
                channel_names: &names,
                channel_types: &types,
                sample_rate: clip.segment.sample_rate,
                events: &events,
                event_id_map: &event_ids,
            };

            match self.layout.write_unit(&path, &unit) {
                Ok(()) => {
                    report.units_written += 1;
                    record_unit_written(false);
                }
                Err(e) => {
                    warn!(
                        source = %item.source_reference,
                        unit = %path.stem(),
                        error = %e,
                        "Unit write failed, writing raw fallback"
                    );
                    match self.layout.write_fallback(&path, &unit) {
                        Ok(written) => {
                            report.units_fallback += 1;
                            record_unit_written(true);
                            info!(path = %written.display(), "Fallback artifact written");
                        }
                        Err(e) => {
                            error!(
                                source = %item.source_reference,
                                unit = %path.stem(),
                                error = %e,
                                "Fallback write failed, unit lost"
                            );
                            report.units_failed += 1;
                            continue;
                        }
                    }
                }
            }

            self.write_sidecar(&path, item, &events);
        }

        ledger.upsert(&item.source_reference, &item.uid, subject_number)?;
        ledger.save()?;

        info!(
            source = %item.source_reference,
            subject = subject_number,
            session = session_number,
            written = report.units_written,
            fallback = report.units_fallback,
            failed = report.units_failed,
            "Recording persisted"
        );
        Ok(report)
    }

    fn write_sidecar(&self, path: &UnitPath, item: &WorkItem, events: &[EventRecord]) {
        let sidecar = Sidecar {
            uid: item.uid.clone(),
            target: item.target.clone(),
            annotations: events.iter().map(|e| e.label.clone()).collect(),
        };
        if let Err(e) = self.layout.write_sidecar(path, &sidecar) {
            warn!(unit = %path.stem(), error = %e, "Side-car write failed");
        }
    }
}
