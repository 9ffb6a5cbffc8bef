//! Persisting recordings
//!
//! - [`path`] names subject/session/run units on disk
//! - [`bids`] is the on-disk layout (CSV samples plus TSV/JSON side files)
//! - [`writer`] drives a recording through a layout, with a raw fallback

use crate::ChannelType;
use crate::SampleMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod bids;
pub mod path;
pub mod writer;

pub use bids::BidsLayout;
pub use path::{BidsPathBuilder, UnitPath};
pub use writer::{
    AnnotationMode, ClipRecording, PersistError, PersistReport, Recording, RecordingWriter,
};

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV/TSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Path components are missing or out of range
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Unit data is not self-consistent
    #[error("invalid unit: {0}")]
    InvalidUnit(String),
}

impl From<std::io::Error> for OutputError {
    fn from(err: std::io::Error) -> Self {
        OutputError::IoError(err.to_string())
    }
}

impl From<csv::Error> for OutputError {
    fn from(err: csv::Error) -> Self {
        OutputError::CsvError(err.to_string())
    }
}

impl From<serde_json::Error> for OutputError {
    fn from(err: serde_json::Error) -> Self {
        OutputError::SerializationError(err.to_string())
    }
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// One event inside a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Offset from the unit start in microseconds
    pub onset_usec: i64,
    /// Sample index of the onset
    pub sample_index: u64,
    /// Event description
    pub label: String,
    /// Numeric id from the item's event id map
    pub event_id: u32,
}

/// Everything written for one persisted unit
#[derive(Debug, Clone, Copy)]
pub struct UnitData<'a> {
    /// Samples, one column per channel
    pub samples: &'a SampleMatrix,
    /// Channel names in column order
    pub channel_names: &'a [String],
    /// Inferred type per channel
    pub channel_types: &'a [ChannelType],
    /// Shared sampling rate in Hz
    pub sample_rate: f64,
    /// Events in onset order (may be empty)
    pub events: &'a [EventRecord],
    /// Description to event id for the whole item
    pub event_id_map: &'a BTreeMap<String, u32>,
}

impl UnitData<'_> {
    /// Check column counts agree
    pub fn validate(&self) -> OutputResult<()> {
        let columns = self.samples.channels();
        if self.channel_names.len() != columns || self.channel_types.len() != columns {
            return Err(OutputError::InvalidUnit(format!(
                "{} columns but {} names and {} types",
                columns,
                self.channel_names.len(),
                self.channel_types.len()
            )));
        }
        Ok(())
    }
}

/// Descriptive side-car written next to each unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    /// Stable subject identifier
    pub uid: String,
    /// Target label from the manifest
    pub target: String,
    /// Annotation descriptions carried by the unit
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
}

/// Destination for persisted units
pub trait LayoutWriter: Send + Sync {
    /// Root directory of the layout
    fn root(&self) -> &Path;

    /// Label prefixed to session numbers
    fn session_label(&self) -> &str;

    /// Path of a unit for one subject, session and run
    fn build_path(&self, subject: u32, session: u32, run: u32) -> OutputResult<UnitPath>;

    /// Write a unit (samples, channel table, events)
    fn write_unit(&self, path: &UnitPath, unit: &UnitData<'_>) -> OutputResult<()>;

    /// Write the unit's side-car
    fn write_sidecar(&self, path: &UnitPath, sidecar: &Sidecar) -> OutputResult<()>;

    /// Persist a unit in raw recoverable form after `write_unit` failed
    ///
    /// Returns where it was written.
    fn write_fallback(&self, path: &UnitPath, unit: &UnitData<'_>) -> OutputResult<PathBuf>;
}
