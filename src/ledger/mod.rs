//! Durable subject numbering
//!
//! The subject ledger maps each source file to a stable uid and subject
//! number. It is read at start, rewritten atomically after every ledgered
//! item, and guarded by an advisory lock for the length of a run.

pub mod lock;
pub mod sessions;
pub mod subjects;

pub use lock::LedgerLock;
pub use sessions::{max_subject_dir, SessionCounter};
pub use subjects::{LedgerEntry, SubjectLedger, MAX_LEDGER_FILE_SIZE, SUBJECT_NUMBER_WIDTH};

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// A row could not be interpreted
    #[error("invalid ledger row {row}: {message}")]
    InvalidRow {
        /// 1-based data row
        row: usize,
        /// What was wrong
        message: String,
    },

    /// Numbering invariant would be broken
    #[error("ledger conflict: {0}")]
    Conflict(String),

    /// Lock could not be taken
    #[error("lock error: {0}")]
    LockError(String),

    /// Ledger file exceeds the size limit
    #[error("ledger file too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size
        size: u64,
        /// Limit
        max: u64,
    },
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::IoError(err.to_string())
    }
}

impl From<csv::Error> for LedgerError {
    fn from(err: csv::Error) -> Self {
        LedgerError::CsvError(err.to_string())
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
