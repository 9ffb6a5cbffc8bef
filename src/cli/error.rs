//! CLI error types and conversions

use crate::downloader::{DownloadError, ManifestError};
use crate::ledger::LedgerError;
use crate::metrics::MetricsError;
use crate::remote::SessionError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Download run error
    #[error("download error: {0}")]
    DownloadError(#[from] DownloadError),

    /// Manifest error
    #[error("manifest error: {0}")]
    ManifestError(#[from] ManifestError),

    /// Ledger error
    #[error("ledger error: {0}")]
    LedgerError(#[from] LedgerError),

    /// Remote service client could not be built
    #[error("remote error: {0}")]
    RemoteError(#[from] SessionError),

    /// Metrics exporter could not be installed
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
