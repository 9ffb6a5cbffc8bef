//! Download command implementation

use crate::downloader::config::{
    DEFAULT_ANNOTATION_LAYER, DEFAULT_CLIP_LAYER, DEFAULT_SESSION_LABEL,
};
use crate::downloader::{
    DownloadConfig, DownloadOrchestrator, ItemOutcome, Manifest, RunSummary, WorkItem,
};
use crate::output::{BidsLayout, LayoutWriter};
use crate::remote::{Credentials, HttpConnector, SessionConnector};
use crate::shutdown::SharedShutdown;
use crate::{USEC_PER_MINUTE, USEC_PER_SEC};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use super::CliError;

/// Convert a non-negative number of seconds to microseconds
pub(super) fn seconds_to_usec(name: &str, seconds: f64) -> Result<i64, CliError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(CliError::InvalidArgument(format!(
            "--{name} must be a non-negative number of seconds, got {seconds}"
        )));
    }
    Ok((seconds * USEC_PER_SEC as f64).round() as i64)
}

/// Parse a non-negative seconds value into a [`Duration`]
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number of seconds"))?;
    Duration::try_from_secs_f64(value).map_err(|e| format!("invalid duration '{s}': {e}"))
}

/// iEEG BIDS Downloader CLI
#[derive(Parser, Debug)]
#[command(name = "ieeg-bids-downloader")]
#[command(about = "Download iEEG recordings and write them as a BIDS-style dataset", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every dataset listed in a manifest
    Download(DownloadArgs),

    /// Import local EDF files listed in a manifest
    Import(super::ImportArgs),

    /// Validate a manifest or a subject ledger
    Validate(super::ValidateCommand),
}

/// Download command arguments
#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// CSV manifest with columns source_reference,uid[,target]
    #[arg(long)]
    pub manifest: PathBuf,

    /// Root of the output dataset
    #[arg(long)]
    pub output_root: PathBuf,

    /// Base URL of the data service API
    #[arg(long, env = "IEEG_BASE_URL")]
    pub base_url: String,

    /// Service account name
    #[arg(long, env = "IEEG_USERNAME")]
    pub username: String,

    /// Service account password
    #[arg(long, env = "IEEG_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Download annotated clips instead of a fixed span
    #[arg(long, default_value_t = false)]
    pub annotations: bool,

    /// Span start in seconds
    #[arg(long, default_value_t = 0.0)]
    pub start: f64,

    /// Span duration in seconds (required without --annotations; 0 means the
    /// whole dataset when clip markers are missing)
    #[arg(long, default_value_t = 0.0)]
    pub duration: f64,

    /// Total attempts per remote call (range: 1-20)
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Timeout of a single remote call in seconds
    #[arg(long, default_value = "60", value_parser = parse_seconds)]
    pub timeout_secs: Duration,

    /// Wait between attempts in seconds
    #[arg(long, default_value = "5", value_parser = parse_seconds)]
    pub backoff_secs: Duration,

    /// Longest single data request in minutes
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_minutes: u64,

    /// Session directory label
    #[arg(long, default_value = DEFAULT_SESSION_LABEL)]
    pub session_label: String,

    /// Annotation layer holding clip start/end markers
    #[arg(long, default_value = DEFAULT_CLIP_LAYER)]
    pub clip_layer: String,

    /// Annotation layer holding free-text annotations
    #[arg(long, default_value = DEFAULT_ANNOTATION_LAYER)]
    pub annotation_layer: String,

    /// Subject ledger (default: <output-root>/subjects.csv)
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Failure log (default: <output-root>/failures.csv)
    #[arg(long)]
    pub failure_log: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

impl DownloadArgs {
    /// Build the run configuration from the flags
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
            .with_annotation_mode(self.annotations)
            .with_span(
                seconds_to_usec("start", self.start)?,
                seconds_to_usec("duration", self.duration)?,
            )
            .with_retry(self.max_attempts, self.timeout_secs, self.backoff_secs)
            .with_max_chunk_usec(chunk_usec)
            .with_layers(self.clip_layer.clone(), self.annotation_layer.clone())
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

    /// Run the download and print the summary
    pub async fn execute(
        &self,
        output_format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<RunSummary, CliError> {
        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr)?;
        }

        let config = self.to_config()?;
        let manifest = Manifest::load(&self.manifest)?;
        for duplicate in manifest.duplicates() {
            warn!(source = %duplicate, "Manifest lists source more than once");
        }

        let connector = HttpConnector::new(
            self.base_url.clone(),
            Credentials::new(self.username.clone(), self.password.clone()),
        )?;
        let layout = BidsLayout::new(config.output_root.clone(), &config.session_label);

        info!(
            manifest = %self.manifest.display(),
            items = manifest.len(),
            output_root = %config.output_root.display(),
            annotation_mode = config.annotation_mode,
            "Starting download"
        );

        let orchestrator = DownloadOrchestrator::new(config, connector, layout)?;
        run_with_progress(orchestrator, &manifest, shutdown, output_format, "Download").await
    }
}

/// Run `orchestrator` over `manifest` behind a progress bar, then print the summary
pub(super) async fn run_with_progress<C: SessionConnector, L: LayoutWriter>(
    orchestrator: DownloadOrchestrator<C, L>,
    manifest: &Manifest,
    shutdown: SharedShutdown,
    output_format: OutputFormat,
    label: &str,
) -> Result<RunSummary, CliError> {
    let progress = create_progress_bar(manifest.len() as u64, label);
    let observer_progress = progress.clone();
    let orchestrator = orchestrator
        .with_shutdown(shutdown)
        .with_observer(Box::new(move |item: &WorkItem, outcome: &ItemOutcome| {
            observer_progress.set_message(item.source_reference.clone());
            if let ItemOutcome::Failed { reason, error } = outcome {
                observer_progress.println(format!(
                    "{} failed ({reason}): {error}",
                    item.source_reference
                ));
            }
            observer_progress.inc(1);
        }));

    let result = orchestrator.run(manifest).await;
    progress.finish_and_clear();

    let summary = result?;
    match output_format {
        OutputFormat::Json => output_json(&summary),
        OutputFormat::Human => output_human(&summary, label),
    }
    Ok(summary)
}

/// Print the summary as one JSON object
fn output_json(summary: &RunSummary) {
    let output = serde_json::json!({
        "success": summary.failed == 0 && !summary.interrupted,
        "summary": summary,
    });
    println!("{output}");
}

/// Print the summary for a terminal
fn output_human(summary: &RunSummary, label: &str) {
    if summary.interrupted {
        println!("\n{label} interrupted; rerun to continue.");
    } else {
        println!("\n{label} finished.");
    }
    println!("Completed: {}", summary.completed);
    if summary.already_ledgered > 0 {
        println!("Already in the ledger: {}", summary.already_ledgered);
    }
    println!("Skipped: {}", summary.skipped);
    println!("Failed: {}", summary.failed);
    println!("Units written: {}", summary.units_written);
    if summary.units_fallback > 0 {
        println!("Units saved as fallback: {}", summary.units_fallback);
    }
    if summary.units_failed > 0 {
        eprintln!("Units lost: {}", summary.units_failed);
    }
}

/// Progress bar over manifest items
fn create_progress_bar(items: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(items);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(label.to_string());
    pb
}
