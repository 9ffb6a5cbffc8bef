//! On-disk BIDS-style layout
//!
//! Every file is written to a temporary file in the target directory, synced
//! and then renamed into place, so a unit is either complete or absent.

use super::path::{sanitize_label, BidsPathBuilder, UnitPath, DEFAULT_TASK};
use super::{EventRecord, LayoutWriter, OutputError, OutputResult, Sidecar, UnitData};
use crate::{ChannelType, SampleMatrix, USEC_PER_SEC};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Row of the channel table
#[derive(Debug, Serialize)]
struct ChannelRow<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    sampling_frequency: f64,
}

/// Row of the event table
#[derive(Debug, Serialize)]
struct EventRow<'a> {
    onset: f64,
    duration: f64,
    sample: u64,
    value: u32,
    trial_type: &'a str,
}

/// Raw unit as written by [`BidsLayout::write_fallback`]
#[derive(Debug, Serialize)]
struct FallbackRef<'a> {
    channel_names: &'a [String],
    channel_types: &'a [ChannelType],
    sample_rate: f64,
    samples: &'a SampleMatrix,
    events: &'a [EventRecord],
    event_id_map: &'a BTreeMap<String, u32>,
}

/// Raw unit read back from a fallback artifact
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FallbackArtifact {
    /// Channel names in column order
    pub channel_names: Vec<String>,
    /// Channel types in column order
    pub channel_types: Vec<ChannelType>,
    /// Sampling rate in Hz
    pub sample_rate: f64,
    /// Samples
    pub samples: SampleMatrix,
    /// Events
    pub events: Vec<EventRecord>,
    /// Description to event id
    pub event_id_map: BTreeMap<String, u32>,
}

impl FallbackArtifact {
    /// Load a fallback artifact
    pub fn load(path: &Path) -> OutputResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Write a file atomically: temp file in the same directory, sync, rename
fn write_atomic<F>(path: &Path, write: F) -> OutputResult<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> OutputResult<()>,
{
    let parent = path
        .parent()
        .ok_or_else(|| OutputError::IoError(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut buffered = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, temp.as_file());
        write(&mut buffered)?;
        buffered.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|e| OutputError::IoError(format!("Failed to persist {}: {}", path.display(), e)))?;
    Ok(())
}

fn usec_to_secs(usec: i64) -> f64 {
    usec as f64 / USEC_PER_SEC as f64
}

/// BIDS-style directory layout rooted at one directory
#[derive(Debug, Clone)]
pub struct BidsLayout {
    root: PathBuf,
    session_label: String,
    task: String,
}

impl BidsLayout {
    /// Layout below `root` using `session_label` for session directories
    pub fn new(root: impl Into<PathBuf>, session_label: impl AsRef<str>) -> Self {
        Self {
            root: root.into(),
            session_label: sanitize_label(session_label.as_ref()),
            task: DEFAULT_TASK.to_string(),
        }
    }

    /// Override the task label
    pub fn with_task(mut self, task: &str) -> Self {
        self.task = sanitize_label(task);
        self
    }

    fn write_samples(path: &Path, unit: &UnitData<'_>) -> OutputResult<()> {
        write_atomic(path, |out| {
            let mut writer = WriterBuilder::new().from_writer(out);
            writer.write_record(unit.channel_names)?;
            for row in unit.samples.rows() {
                writer.write_record(row.iter().map(|v| v.to_string()))?;
            }
            writer.flush()?;
            Ok(())
        })
    }

    fn write_channels(path: &Path, unit: &UnitData<'_>) -> OutputResult<()> {
        write_atomic(path, |out| {
            let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(out);
            for (name, kind) in unit.channel_names.iter().zip(unit.channel_types) {
                writer.serialize(ChannelRow {
                    name,
                    kind: kind.as_str(),
                    sampling_frequency: unit.sample_rate,
                })?;
            }
            writer.flush()?;
            Ok(())
        })
    }

    fn write_events(path: &Path, events: &[EventRecord]) -> OutputResult<()> {
        write_atomic(path, |out| {
            let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(out);
            for event in events {
                writer.serialize(EventRow {
                    onset: usec_to_secs(event.onset_usec),
                    duration: 0.0,
                    sample: event.sample_index,
                    value: event.event_id,
                    trial_type: &event.label,
                })?;
            }
            writer.flush()?;
            Ok(())
        })
    }
}

impl LayoutWriter for BidsLayout {
    fn root(&self) -> &Path {
        &self.root
    }

    fn session_label(&self) -> &str {
        &self.session_label
    }

    fn build_path(&self, subject: u32, session: u32, run: u32) -> OutputResult<UnitPath> {
        BidsPathBuilder::new(self.root.clone())
            .with_subject(subject)
            .with_session(&self.session_label, session)
            .with_task(&self.task)
            .with_run(run)
            .build()
    }

    fn write_unit(&self, path: &UnitPath, unit: &UnitData<'_>) -> OutputResult<()> {
        unit.validate()?;
        path.ensure_directories()?;

        Self::write_samples(&path.data_path(), unit)?;
        Self::write_channels(&path.channels_path(), unit)?;
        if !unit.events.is_empty() {
            Self::write_events(&path.events_path(), unit.events)?;
        }

        info!(
            path = %path.data_path().display(),
            channels = unit.samples.channels(),
            samples = unit.samples.samples(),
            events = unit.events.len(),
            "Unit written"
        );
        Ok(())
    }

    fn write_sidecar(&self, path: &UnitPath, sidecar: &Sidecar) -> OutputResult<()> {
        let target = path.sidecar_path();
        write_atomic(&target, |out| {
            serde_json::to_writer_pretty(&mut *out, sidecar)?;
            out.write_all(b"\n")?;
            Ok(())
        })?;
        debug!(path = %target.display(), "Side-car written");
        Ok(())
    }

    fn write_fallback(&self, path: &UnitPath, unit: &UnitData<'_>) -> OutputResult<PathBuf> {
        let target = path.fallback_path();
        let artifact = FallbackRef {
            channel_names: unit.channel_names,
            channel_types: unit.channel_types,
            sample_rate: unit.sample_rate,
            samples: unit.samples,
            events: unit.events,
            event_id_map: unit.event_id_map,
        };
        write_atomic(&target, |out| {
            serde_json::to_writer(&mut *out, &artifact)?;
            Ok(())
        })?;
        Ok(target)
    }
}
