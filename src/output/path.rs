//! Unit path generation
//!
//! Units live in a three-level tree:
//!
//! ```text
//! {root}/sub-{NNNN}/ses-{label}{NNN}/eeg/sub-{NNNN}_ses-{label}{NNN}_task-{task}_run-{R}_eeg.csv
//! ```
//!
//! with sibling `_channels.tsv`, `_events.tsv`, `_targets.json` and, when the
//! unit could not be written, `_eeg.fallback.json`.
//!
//! # Usage Example
//!
//! ```rust
//! use ieeg_bids_downloader::output::BidsPathBuilder;
//! use std::path::PathBuf;
//!
//! let unit = BidsPathBuilder::new(PathBuf::from("bids"))
//!     .with_subject(1)
//!     .with_session("implant", 1)
//!     .with_run(2)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(
//!     unit.data_path(),
//!     PathBuf::from("bids/sub-0001/ses-implant001/eeg/sub-0001_ses-implant001_task-task_run-2_eeg.csv")
//! );
//! ```

use super::{OutputError, OutputResult};
use std::path::{Path, PathBuf};

/// Default task label
pub const DEFAULT_TASK: &str = "task";

/// Datatype directory below each session
const DATATYPE_DIR: &str = "eeg";

/// Directory name for a subject (`sub-0001`)
pub fn subject_dir_name(subject: u32) -> String {
    format!("sub-{subject:04}")
}

/// Subject number from a `sub-NNNN` directory name
pub fn parse_subject_dir(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("sub-")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Directory name for a session (`ses-implant001`)
pub fn session_dir_name(label: &str, session: u32) -> String {
    format!("ses-{label}{session:03}")
}

/// Session number from a `ses-{label}NNN` directory name
pub fn parse_session_dir(name: &str, label: &str) -> Option<u32> {
    let digits = name.strip_prefix("ses-")?.strip_prefix(label)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Sanitize an entity label
///
/// Entity labels are separated by `_` and `-` in file names, so anything
/// that is not ASCII alphanumeric is removed. This also rules out path
/// separators and `..`.
pub fn sanitize_label(label: &str) -> String {
    label.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Location of one persisted unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitPath {
    dir: PathBuf,
    stem: String,
}

impl UnitPath {
    /// Directory holding the unit's files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Shared file name prefix (`sub-0001_ses-implant001_task-task_run-1`)
    pub fn stem(&self) -> &str {
        &self.stem
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{}", self.stem, suffix))
    }

    /// Sample matrix file
    pub fn data_path(&self) -> PathBuf {
        self.file("eeg.csv")
    }

    /// Channel table
    pub fn channels_path(&self) -> PathBuf {
        self.file("channels.tsv")
    }

    /// Event table
    pub fn events_path(&self) -> PathBuf {
        self.file("events.tsv")
    }

    /// Side-car with uid and target
    pub fn sidecar_path(&self) -> PathBuf {
        self.file("targets.json")
    }

    /// Raw fallback artifact
    pub fn fallback_path(&self) -> PathBuf {
        self.file("eeg.fallback.json")
    }

    /// Create the unit directory
    pub fn ensure_directories(&self) -> OutputResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            OutputError::IoError(format!(
                "Failed to create directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }
}

/// Builder for [`UnitPath`]
#[derive(Debug, Clone)]
pub struct BidsPathBuilder {
    root_dir: PathBuf,
    subject: Option<u32>,
    session_label: String,
    session: Option<u32>,
    task: String,
    run: Option<u32>,
}

impl BidsPathBuilder {
    /// Start a path below `root_dir`
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            subject: None,
            session_label: String::new(),
            session: None,
            task: DEFAULT_TASK.to_string(),
            run: None,
        }
    }

    /// Set subject number
    pub fn with_subject(mut self, subject: u32) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Set session label and number
    pub fn with_session(mut self, label: &str, session: u32) -> Self {
        self.session_label = sanitize_label(label);
        self.session = Some(session);
        self
    }

    /// Set task label
    pub fn with_task(mut self, task: &str) -> Self {
        self.task = sanitize_label(task);
        self
    }

    /// Set run number (1-based)
    pub fn with_run(mut self, run: u32) -> Self {
        self.run = Some(run);
        self
    }

    /// Build the unit path
    pub fn build(&self) -> OutputResult<UnitPath> {
        let subject = positive(self.subject, "subject")?;
        let session = positive(self.session, "session")?;
        let run = positive(self.run, "run")?;
        if self.task.is_empty() {
            return Err(OutputError::InvalidPath("task label is empty".to_string()));
        }

        let subject_dir = subject_dir_name(subject);
        let session_dir = session_dir_name(&self.session_label, session);
        let stem = format!(
            "{}_{}_task-{}_run-{}",
            subject_dir, session_dir, self.task, run
        );

        Ok(UnitPath {
            dir: self
                .root_dir
                .join(subject_dir)
                .join(session_dir)
                .join(DATATYPE_DIR),
            stem,
        })
    }
}

fn positive(value: Option<u32>, name: &str) -> OutputResult<u32> {
    match value {
        Some(v) if v > 0 => Ok(v),
        Some(_) => Err(OutputError::InvalidPath(format!("{name} must be positive"))),
        None => Err(OutputError::InvalidPath(format!("{name} not set"))),
    }
}
