//! Subject ledger persistence
//!
//! CSV with columns `source_reference,uid,subject_number`, one row per source
//! file. Subject numbers are written zero-padded to
//! [`SUBJECT_NUMBER_WIDTH`] digits.
//!
//! Two invariants hold for every saved ledger: a uid maps to exactly one
//! subject number, and a subject number belongs to exactly one uid.

use super::sessions::max_subject_dir;
use super::{LedgerError, LedgerResult};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Maximum ledger file size (10 MB)
pub const MAX_LEDGER_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Digits used when writing subject numbers
pub const SUBJECT_NUMBER_WIDTH: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    source_reference: String,
    uid: String,
    subject_number: String,
}

/// One ledgered source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Source file / dataset name
    pub source_reference: String,
    /// Stable subject identifier
    pub uid: String,
    /// Assigned subject number
    pub subject_number: u32,
}

/// The subject ledger, in memory
#[derive(Debug, Clone)]
pub struct SubjectLedger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
}

impl SubjectLedger {
    /// Empty ledger that will be saved at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    /// Load the ledger at `path`; a missing file is an empty ledger
    pub fn load(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "No ledger yet, starting empty");
            return Ok(Self::new(path));
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.with_extension("lock"))
            .map_err(|e| LedgerError::LockError(format!("Failed to create lock file: {e}")))?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| LedgerError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let size = std::fs::metadata(&path)?.len();
        if size > MAX_LEDGER_FILE_SIZE {
            return Err(LedgerError::TooLarge {
                size,
                max: MAX_LEDGER_FILE_SIZE,
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)?;
        let mut entries = Vec::new();
        for (i, row) in reader.deserialize::<LedgerRow>().enumerate() {
            let row = row?;
            let subject_number = row.subject_number.parse::<u32>().map_err(|e| {
                LedgerError::InvalidRow {
                    row: i + 1,
                    message: format!("subject_number {:?}: {e}", row.subject_number),
                }
            })?;
            entries.push(LedgerEntry {
                source_reference: row.source_reference,
                uid: row.uid,
                subject_number,
            });
        }

        let ledger = Self { path, entries };
        ledger.check_invariants()?;
        info!(
            path = %ledger.path.display(),
            entries = ledger.entries.len(),
            "Ledger loaded"
        );
        Ok(ledger)
    }

    /// Ledger file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in file order
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Number of ledgered source files
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is ledgered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a source file
    pub fn get(&self, source_reference: &str) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.source_reference == source_reference)
    }

    /// Whether a source file is already ledgered
    pub fn contains(&self, source_reference: &str) -> bool {
        self.get(source_reference).is_some()
    }

    /// Subject number already assigned to `uid`
    pub fn subject_for_uid(&self, uid: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.uid == uid)
            .map(|e| e.subject_number)
    }

    /// Highest subject number in the ledger
    pub fn max_subject_number(&self) -> Option<u32> {
        self.entries.iter().map(|e| e.subject_number).max()
    }

    /// Subject number for `uid`, allocating a new one if needed
    ///
    /// A new number is one past the highest number seen in either the ledger
    /// or the `sub-NNNN` directories below `output_root`, so subjects written
    /// by earlier tools are never reused.
    pub fn resolve_subject(&self, uid: &str, output_root: &Path) -> LedgerResult<u32> {
        if let Some(number) = self.subject_for_uid(uid) {
            return Ok(number);
        }
        let highest = self
            .max_subject_number()
            .into_iter()
            .chain(max_subject_dir(output_root)?)
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    /// Insert or replace the row for `source_reference`
    pub fn upsert(
        &mut self,
        source_reference: &str,
        uid: &str,
        subject_number: u32,
    ) -> LedgerResult<()> {
        for entry in &self.entries {
            if entry.source_reference == source_reference {
                continue;
            }
            if entry.uid == uid && entry.subject_number != subject_number {
                return Err(LedgerError::Conflict(format!(
                    "uid {uid} already has subject number {}",
                    entry.subject_number
                )));
            }
            if entry.subject_number == subject_number && entry.uid != uid {
                return Err(LedgerError::Conflict(format!(
                    "subject number {subject_number} already belongs to uid {}",
                    entry.uid
                )));
            }
        }

        let entry = LedgerEntry {
            source_reference: source_reference.to_string(),
            uid: uid.to_string(),
            subject_number,
        };
        match self
            .entries
            .iter_mut()
            .find(|e| e.source_reference == source_reference)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        Ok(())
    }

    /// Check the uid/number invariants
    pub fn check_invariants(&self) -> LedgerResult<()> {
        let mut by_uid: HashMap<&str, u32> = HashMap::new();
        let mut by_number: HashMap<u32, &str> = HashMap::new();
        let mut sources: HashMap<&str, usize> = HashMap::new();

        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(first) = sources.insert(&entry.source_reference, i + 1) {
                return Err(LedgerError::Conflict(format!(
                    "{} appears in rows {first} and {}",
                    entry.source_reference,
                    i + 1
                )));
            }
            if let Some(number) = by_uid.insert(&entry.uid, entry.subject_number) {
                if number != entry.subject_number {
                    return Err(LedgerError::Conflict(format!(
                        "uid {} has subject numbers {number} and {}",
                        entry.uid, entry.subject_number
                    )));
                }
            }
            if let Some(uid) = by_number.insert(entry.subject_number, &entry.uid) {
                if uid != entry.uid {
                    return Err(LedgerError::Conflict(format!(
                        "subject number {} is shared by uids {uid} and {}",
                        entry.subject_number, entry.uid
                    )));
                }
            }
        }
        Ok(())
    }

    /// Save atomically
    ///
    /// Writes to a temp file in the ledger's directory under an exclusive
    /// lock, syncs it, and renames it over the ledger.
    pub fn save(&self) -> LedgerResult<()> {
        let path = &self.path;
        let parent_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent_dir)?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        for entry in &self.entries {
            writer.serialize(LedgerRow {
                source_reference: entry.source_reference.clone(),
                uid: entry.uid.clone(),
                subject_number: format!(
                    "{:0width$}",
                    entry.subject_number,
                    width = SUBJECT_NUMBER_WIDTH
                ),
            })?;
        }
        if self.entries.is_empty() {
            writer.write_record(["source_reference", "uid", "subject_number"])?;
        }
        let contents = writer
            .into_inner()
            .map_err(|e| LedgerError::IoError(e.to_string()))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.with_extension("lock"))
            .map_err(|e| LedgerError::LockError(format!("Failed to create lock file: {e}")))?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| LedgerError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)?;
        temp_file.write_all(&contents)?;
        temp_file.flush()?;
        temp_file.as_file().sync_all()?;
        temp_file
            .persist(path)
            .map_err(|e| LedgerError::IoError(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = std::fs::File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        debug!(
            path = %path.display(),
            entries = self.entries.len(),
            "Ledger saved"
        );
        Ok(())
    }
}
