//! Download orchestration
//!
//! # Overview
//!
//! A run processes a [`Manifest`] in order:
//!
//! 1. **Ledger check**: items whose source reference is already in the
//!    subject ledger are skipped without any remote call
//! 2. **Fetch**: span mode fetches one fixed span; annotation mode fetches the
//!    clip and annotation layers, aligns them, and fetches every clip
//! 3. **Persist**: each clip becomes one run in the output layout, with a raw
//!    fallback when the layout write fails
//! 4. **Ledger**: the item is recorded and the ledger saved before the next
//!    item starts
//!
//! # Quick Start
//!
//! ```no_run
//! use ieeg_bids_downloader::downloader::{DownloadConfig, DownloadOrchestrator, Manifest};
//! use ieeg_bids_downloader::output::BidsLayout;
//! use ieeg_bids_downloader::remote::{Credentials, HttpConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloadConfig::new("./bids").with_annotation_mode(true);
//! let connector = HttpConnector::new(
//!     "https://www.ieeg.org/services",
//!     Credentials::new("user", "secret"),
//! )?;
//! let layout = BidsLayout::new("./bids", &config.session_label);
//!
//! let manifest = Manifest::load("manifest.csv")?;
//! let summary = DownloadOrchestrator::new(config, connector, layout)?
//!     .run(&manifest)
//!     .await?;
//! println!("{} items completed", summary.completed);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Only run-level problems surface as [`DownloadError`]: invalid
//! configuration, an unreadable ledger, or a second run holding the ledger
//! lock. Per-item problems become an [`ItemOutcome`] and the run moves on.

pub mod config;
pub mod executor;
pub mod job;

pub use config::DownloadConfig;
pub use executor::{DownloadOrchestrator, ItemObserver, ItemOutcome, RunSummary};
pub use job::{Manifest, ManifestError, WorkItem};

use crate::ledger::LedgerError;

/// Run-level download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Ledger could not be locked, read or saved
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Manifest could not be read
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
}
