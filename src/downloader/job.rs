//! Work items and the input manifest

use super::config::DownloadConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Manifest errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV parse error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// A row is missing a required value
    #[error("invalid manifest row {row}: {message}")]
    InvalidRow {
        /// 1-based data row
        row: usize,
        /// What was wrong
        message: String,
    },
}

impl From<csv::Error> for ManifestError {
    fn from(err: csv::Error) -> Self {
        match err.kind() {
            csv::ErrorKind::Io(_) => ManifestError::IoError(err.to_string()),
            _ => ManifestError::CsvError(err.to_string()),
        }
    }
}

/// One dataset to download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Dataset name on the remote service
    pub source_reference: String,
    /// Stable subject identifier
    pub uid: String,
    /// Target label written to side-cars
    pub target: String,
    /// Requested start in microseconds
    pub requested_start_usec: i64,
    /// Requested duration in microseconds (0 = whole dataset)
    pub requested_duration_usec: i64,
}

impl WorkItem {
    /// Item covering the whole dataset
    pub fn new(
        source_reference: impl Into<String>,
        uid: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source_reference: source_reference.into(),
            uid: uid.into(),
            target: target.into(),
            requested_start_usec: 0,
            requested_duration_usec: 0,
        }
    }

    /// Restrict the item to a span
    pub fn with_span(mut self, start_usec: i64, duration_usec: i64) -> Self {
        self.requested_start_usec = start_usec;
        self.requested_duration_usec = duration_usec;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ManifestRow {
    source_reference: String,
    uid: String,
    #[serde(default)]
    target: String,
}

/// Ordered list of datasets to process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    items: Vec<WorkItem>,
}

impl Manifest {
    /// Manifest from items
    pub fn from_items(items: Vec<WorkItem>) -> Self {
        Self { items }
    }

    /// Load a CSV manifest with columns `source_reference,uid[,target]`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| ManifestError::IoError(format!("{}: {e}", path.display())))?;
        let manifest = Self::from_reader(file)?;
        debug!(path = %path.display(), items = manifest.len(), "Manifest loaded");
        Ok(manifest)
    }

    /// Parse a CSV manifest
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ManifestError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut items = Vec::new();
        for (i, row) in reader.deserialize::<ManifestRow>().enumerate() {
            let row = row?;
            if row.source_reference.is_empty() {
                return Err(ManifestError::InvalidRow {
                    row: i + 1,
                    message: "source_reference is empty".to_string(),
                });
            }
            if row.uid.is_empty() {
                return Err(ManifestError::InvalidRow {
                    row: i + 1,
                    message: format!("uid is empty for {}", row.source_reference),
                });
            }
            items.push(WorkItem::new(row.source_reference, row.uid, row.target));
        }
        Ok(Self { items })
    }

    /// Items in manifest order
    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the manifest is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Source references listed more than once, in first-seen order
    pub fn duplicates(&self) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order = Vec::new();
        for item in &self.items {
            let count = counts.entry(&item.source_reference).or_insert(0);
            *count += 1;
            if *count == 2 {
                order.push(item.source_reference.clone());
            }
        }
        order
    }

    /// Items with the configured span applied
    pub fn work_items(&self, config: &DownloadConfig) -> Vec<WorkItem> {
        self.items
            .iter()
            .map(|item| {
                item.clone()
                    .with_span(config.span_start_usec, config.span_duration_usec)
            })
            .collect()
    }
}
