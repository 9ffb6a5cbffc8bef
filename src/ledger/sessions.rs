//! Session numbering
//!
//! A subject's next session is one past the highest `ses-{label}NNN`
//! directory already on disk. The first time a subject is seen in a run its
//! directory is scanned; after that the counter advances in memory, so a
//! number is never handed out twice even before anything is written.

use super::LedgerResult;
use crate::output::path::{parse_session_dir, parse_subject_dir, subject_dir_name};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory names below `dir`; a missing directory has none
fn dir_names(dir: &Path) -> LedgerResult<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

/// Highest `sub-NNNN` number below `output_root`
pub fn max_subject_dir(output_root: &Path) -> LedgerResult<Option<u32>> {
    Ok(dir_names(output_root)?
        .iter()
        .filter_map(|name| parse_subject_dir(name))
        .max())
}

/// Highest session number on disk for one subject
pub fn max_session_dir(output_root: &Path, label: &str, subject: u32) -> LedgerResult<Option<u32>> {
    let subject_dir = output_root.join(subject_dir_name(subject));
    Ok(dir_names(&subject_dir)?
        .iter()
        .filter_map(|name| parse_session_dir(name, label))
        .max())
}

/// Per-subject session counter for one run
#[derive(Debug, Clone)]
pub struct SessionCounter {
    output_root: PathBuf,
    label: String,
    next: HashMap<u32, u32>,
}

impl SessionCounter {
    /// Counter for sessions labelled `label` below `output_root`
    pub fn new(output_root: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            output_root: output_root.into(),
            label: label.into(),
            next: HashMap::new(),
        }
    }

    /// Allocate the next session number for `subject`
    pub fn next_session(&mut self, subject: u32) -> LedgerResult<u32> {
        let session = match self.next.get(&subject) {
            Some(next) => *next,
            None => {
                let on_disk = max_session_dir(&self.output_root, &self.label, subject)?;
                debug!(subject, highest = ?on_disk, "Scanned existing sessions");
                on_disk.map_or(1, |n| n + 1)
            }
        };
        self.next.insert(subject, session + 1);
        Ok(session)
    }
}
