//! # iEEG BIDS Downloader Library
//!
//! Retrieves long-duration intracranial EEG recordings from a remote data
//! service, aligns clinician annotations to recording clips, and writes the
//! result as a BIDS-style dataset.
//!
//! ## Features
//!
//! - **Bounded retries**: every remote call runs under a timeout with a fixed
//!   backoff; permanently failed fetches land in an append-only failure log
//! - **Chunked fetching**: long spans are split into sub-requests and
//!   concatenated in order
//! - **Clip alignment**: clip markers are repaired and free annotations are
//!   mapped onto the clip that contains them
//! - **No wasted downloads**: units that fail to write are preserved as
//!   fallback artifacts
//! - **Stable numbering**: a subject ledger keeps uid → subject numbers stable
//!   across runs and lets reruns skip finished recordings
//!
//! ## Quick Start
//!
//! ```no_run
//! use ieeg_bids_downloader::downloader::{DownloadConfig, DownloadOrchestrator, Manifest};
//! use ieeg_bids_downloader::output::BidsLayout;
//! use ieeg_bids_downloader::remote::http::{Credentials, HttpConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloadConfig::new("./bids_root").with_annotation_mode(true);
//! let connector = HttpConnector::new(
//!     "https://data.example.org/api",
//!     Credentials::new("user", "secret"),
//! )?;
//! let layout = BidsLayout::new(config.output_root.clone(), config.session_label.clone());
//!
//! let manifest = Manifest::load("./manifest.csv")?;
//! let orchestrator = DownloadOrchestrator::new(config, connector, layout)?;
//! let summary = orchestrator.run(&manifest).await?;
//! println!("completed {} recordings", summary.completed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`remote`] - Remote session traits, the HTTP implementation, and local
//!   EDF files behind the same traits
//! - [`edf`] - EDF/EDF+ header and data record reader
//! - [`fetcher`] - Retry loop, failure log, and chunked fetching
//! - [`align`] - Clip marker repair and annotation alignment
//! - [`channels`] - Channel signal-type inference
//! - [`output`] - Layout writer and the write-with-fallback recording writer
//! - [`ledger`] - Subject ledger and session numbering
//! - [`downloader`] - Configuration, manifest, and orchestration
//!
//! All time offsets are microseconds relative to the recording start.

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Clip marker repair and annotation alignment
pub mod align;

/// Channel signal-type inference
pub mod channels;

/// CLI command implementations
pub mod cli;

/// Configuration, manifest handling, and download orchestration
pub mod downloader;

/// EDF/EDF+ file reader
pub mod edf;

/// Retry loop, failure log, and chunked fetching
pub mod fetcher;

/// Subject ledger and session numbering
pub mod ledger;

/// Observability metrics
pub mod metrics;

/// Layout writer and recording persistence
pub mod output;

/// Remote data service sessions
pub mod remote;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

pub use channels::ChannelType;

/// Microseconds per second, the clock unit of the remote service
pub const USEC_PER_SEC: i64 = 1_000_000;

/// Microseconds per minute
pub const USEC_PER_MINUTE: i64 = 60 * USEC_PER_SEC;

/// A recording channel as reported by the remote service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    /// Channel label (e.g., "LA01", "Fp1", "ECG1")
    pub name: String,
    /// Sampling rate in Hz
    pub sample_rate: f64,
}

impl Channel {
    /// Create a channel descriptor
    pub fn new(name: impl Into<String>, sample_rate: f64) -> Self {
        Self {
            name: name.into(),
            sample_rate,
        }
    }
}

/// Kind of clip marker in the clip annotation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerKind {
    /// Beginning of a clip
    ClipStart,
    /// End of a clip
    ClipEnd,
}

impl std::fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerKind::ClipStart => write!(f, "Clip Start"),
            MarkerKind::ClipEnd => write!(f, "Clip End"),
        }
    }
}

impl FromStr for MarkerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clip start" => Ok(MarkerKind::ClipStart),
            "clip end" => Ok(MarkerKind::ClipEnd),
            _ => Err(format!("Invalid clip marker type: {s}")),
        }
    }
}

/// A clip boundary marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipMarker {
    /// Start or end
    pub kind: MarkerKind,
    /// Offset from recording start in microseconds
    pub offset_usec: i64,
}

impl ClipMarker {
    /// Clip start marker at `offset_usec`
    pub fn start(offset_usec: i64) -> Self {
        Self {
            kind: MarkerKind::ClipStart,
            offset_usec,
        }
    }

    /// Clip end marker at `offset_usec`
    pub fn end(offset_usec: i64) -> Self {
        Self {
            kind: MarkerKind::ClipEnd,
            offset_usec,
        }
    }
}

/// A free-floating annotation, not yet assigned to a clip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Offset from recording start in microseconds
    pub offset_usec: i64,
    /// Annotation text
    pub description: String,
}

impl Annotation {
    /// Create an annotation
    pub fn new(offset_usec: i64, description: impl Into<String>) -> Self {
        Self {
            offset_usec,
            description: description.into(),
        }
    }
}

/// A bounded window of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clip {
    /// Zero-based index in chronological order
    pub index: usize,
    /// Start offset in microseconds
    pub start_usec: i64,
    /// End offset in microseconds (inclusive for annotation assignment)
    pub end_usec: i64,
}

impl Clip {
    /// Clip duration in microseconds
    pub fn duration_usec(&self) -> i64 {
        self.end_usec - self.start_usec
    }

    /// Whether `offset_usec` falls inside the closed clip window
    pub fn contains(&self, offset_usec: i64) -> bool {
        self.start_usec <= offset_usec && offset_usec <= self.end_usec
    }
}

/// Dataset time bounds reported when a session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    /// Dataset start (absolute microseconds)
    pub start_usec: i64,
    /// Dataset end (absolute microseconds)
    pub end_usec: i64,
}

impl TimeSpan {
    /// Length of the recording in microseconds
    pub fn duration_usec(&self) -> i64 {
        self.end_usec - self.start_usec
    }
}

/// Row-major sample matrix (time × channel)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleMatrix {
    channels: usize,
    data: Vec<f64>,
}

impl SampleMatrix {
    /// Empty matrix with a fixed channel count
    pub fn empty(channels: usize) -> Self {
        Self {
            channels,
            data: Vec::new(),
        }
    }

    /// Build from time-major rows; every row must have `channels` values
    pub fn from_rows(channels: usize, rows: Vec<Vec<f64>>) -> Result<Self, String> {
        let mut data = Vec::with_capacity(rows.len() * channels);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != channels {
                return Err(format!(
                    "Row {i} has {} values, expected {channels}",
                    row.len()
                ));
            }
            data.extend(row);
        }
        Ok(Self { channels, data })
    }

    /// Number of channels (columns)
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of samples (rows)
    pub fn samples(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels
        }
    }

    /// Whether the matrix holds no samples
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over time-major rows
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks(self.channels.max(1))
    }

    /// Append another matrix along the time axis
    pub fn append(&mut self, other: SampleMatrix) -> Result<(), String> {
        if other.channels != self.channels {
            return Err(format!(
                "Cannot concatenate {} channels onto {} channels",
                other.channels, self.channels
            ));
        }
        self.data.extend(other.data);
        Ok(())
    }
}
