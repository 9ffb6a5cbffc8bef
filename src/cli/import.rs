//! Import command implementation
//!
//! Runs local EDF files through the same orchestrator, layout and ledger as
//! the download command. The manifest's `source_reference` column holds file
//! paths relative to `--input-dir`.

use crate::downloader::config::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BACKOFF, DEFAULT_SESSION_LABEL};
use crate::downloader::{DownloadConfig, DownloadOrchestrator, Manifest, RunSummary};
use crate::output::BidsLayout;
use crate::remote::EdfConnector;
use crate::shutdown::SharedShutdown;
use crate::USEC_PER_MINUTE;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use super::download::{run_with_progress, seconds_to_usec};
use super::{CliError, OutputFormat};

/// Import command arguments
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// CSV manifest with columns source_reference,uid[,target]; source
    /// references are EDF file paths
    #[arg(long)]
    pub manifest: PathBuf,

    /// Directory the manifest's file paths are relative to
    #[arg(long, default_value = ".")]
    pub input_dir: PathBuf,

    /// Root of the output dataset
    #[arg(long)]
    pub output_root: PathBuf,

    /// Span start in seconds
    #[arg(long, default_value_t = 0.0)]
    pub start: f64,

    /// Span duration in seconds (0 reads to the end of each file)
    #[arg(long, default_value_t = 0.0)]
    pub duration: f64,

    /// Longest single read in minutes
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_minutes: u64,

    /// Session directory label
    #[arg(long, default_value = DEFAULT_SESSION_LABEL)]
    pub session_label: String,

    /// Subject ledger (default: <output-root>/subjects.csv)
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Failure log (default: <output-root>/failures.csv)
    #[arg(long)]
    pub failure_log: Option<PathBuf>,
}

impl ImportArgs {
    /// Build the run configuration from the flags
    ///
    /// A local read that fails fails again, so every call gets one attempt.
    pub fn to_config(&self) -> Result<DownloadConfig, CliError> {
        let chunk_usec = i64::try_from(self.chunk_minutes)
            .ok()
            .and_then(|minutes| minutes.checked_mul(USEC_PER_MINUTE))
            .ok_or_else(|| {
                CliError::InvalidArgument(format!(
                    "--chunk-minutes {} is too large",
                    self.chunk_minutes
                ))
            })?;

        let mut config = DownloadConfig::new(self.output_root.clone())
            .with_span(
                seconds_to_usec("start", self.start)?,
                seconds_to_usec("duration", self.duration)?,
            )
            .with_span_to_end(true)
            .with_retry(1, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BACKOFF)
            .with_max_chunk_usec(chunk_usec)
            .with_session_label(self.session_label.clone());

        if let Some(ledger) = &self.ledger {
            config = config.with_ledger_path(ledger.clone());
        }
        if let Some(failure_log) = &self.failure_log {
            config = config.with_failure_log(failure_log.clone());
        }

        config
            .validate()
            .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
        Ok(config)
    }

    /// Run the import and print the summary
    pub async fn execute(
        &self,
        output_format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<RunSummary, CliError> {
        let config = self.to_config()?;
        let manifest = Manifest::load(&self.manifest)?;
        for duplicate in manifest.duplicates() {
            warn!(source = %duplicate, "Manifest lists file more than once");
        }

        let connector = EdfConnector::new(self.input_dir.clone());
        let layout = BidsLayout::new(config.output_root.clone(), &config.session_label);

        info!(
            manifest = %self.manifest.display(),
            input_dir = %self.input_dir.display(),
            items = manifest.len(),
            output_root = %config.output_root.display(),
            "Starting import"
        );

        let orchestrator = DownloadOrchestrator::new(config, connector, layout)?;
        run_with_progress(orchestrator, &manifest, shutdown, output_format, "Import").await
    }
}
