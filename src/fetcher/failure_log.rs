//! Append-only log of permanently failed remote calls
//!
//! One CSV record per line: `source_reference,start,duration,error_description`
//! with times in microseconds. The file is opened in append mode for every
//! record and each record is written with a single `write_all`, so reruns
//! never truncate it and lines from separate writers do not interleave.

use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// A permanently failed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Dataset the call was made against
    pub source_reference: String,
    /// Requested start in microseconds
    pub start_usec: i64,
    /// Requested duration in microseconds
    pub duration_usec: i64,
    /// Last error seen
    pub error_description: String,
}

impl FailureRecord {
    /// Render as a single CSV line, newline included
    pub fn to_line(&self) -> io::Result<Vec<u8>> {
        let flattened = FailureRecord {
            error_description: self.error_description.replace(['\r', '\n'], " "),
            ..self.clone()
        };

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.serialize(&flattened).map_err(io::Error::other)?;
        writer.into_inner().map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Append-only failure log file
#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    /// Log at `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    pub fn append(&self, record: &FailureRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let line = record.to_line()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;

        debug!(
            path = %self.path.display(),
            source = %record.source_reference,
            "Failure recorded"
        );
        Ok(())
    }

    /// Append one record, logging instead of returning an error
    pub fn record(&self, record: &FailureRecord) {
        if let Err(e) = self.append(record) {
            error!(
                path = %self.path.display(),
                error = %e,
                source = %record.source_reference,
                start_usec = record.start_usec,
                duration_usec = record.duration_usec,
                failure = %record.error_description,
                "Failed to write failure log"
            );
        }
    }

    /// Read every record back (used by tests and `validate`)
    pub fn read_all(&self) -> io::Result<Vec<FailureRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&self.path)
            .map_err(io::Error::other)?;

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(io::Error::other)?;
            let field = |i: usize| row.get(i).unwrap_or_default().to_string();
            records.push(FailureRecord {
                source_reference: field(0),
                start_usec: field(1).parse().unwrap_or_default(),
                duration_usec: field(2).parse().unwrap_or_default(),
                error_description: field(3),
            });
        }
        Ok(records)
    }
}
