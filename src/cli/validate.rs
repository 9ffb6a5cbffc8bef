//! Validation subcommand

use super::CliError;
use crate::downloader::Manifest;
use crate::ledger::SubjectLedger;
use clap::Parser;
use std::path::{Path, PathBuf};

/// Validate command for checking manifests and ledgers
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// What to validate
    #[command(subcommand)]
    pub target: ValidateTarget,
}

/// Target type for validation
#[derive(clap::Subcommand, Debug)]
pub enum ValidateTarget {
    /// Parse a manifest and report duplicate sources
    Manifest {
        /// Manifest CSV
        path: PathBuf,
    },
    /// Load a subject ledger and check its numbering
    Ledger {
        /// Ledger CSV
        path: PathBuf,
    },
}

impl ValidateCommand {
    /// Execute the validation command
    pub async fn execute(&self) -> Result<(), CliError> {
        match &self.target {
            ValidateTarget::Manifest { path } => self.validate_manifest(path),
            ValidateTarget::Ledger { path } => self.validate_ledger(path),
        }
    }

    fn validate_manifest(&self, path: &Path) -> Result<(), CliError> {
        let manifest = Manifest::load(path).inspect_err(|e| {
            eprintln!("Invalid manifest: {e}");
        })?;

        println!("Valid manifest: {}", path.display());
        println!("  Items: {}", manifest.len());

        let duplicates = manifest.duplicates();
        if !duplicates.is_empty() {
            println!("  Duplicate sources ({}):", duplicates.len());
            for source in &duplicates {
                println!("    - {source}");
            }
        }
        Ok(())
    }

    fn validate_ledger(&self, path: &Path) -> Result<(), CliError> {
        if !path.exists() {
            println!("No ledger found at {}", path.display());
            return Ok(());
        }

        let ledger = SubjectLedger::load(path).inspect_err(|e| {
            eprintln!("Invalid ledger: {e}");
        })?;

        println!("Valid ledger: {}", path.display());
        println!("  Recordings: {}", ledger.len());
        match ledger.max_subject_number() {
            Some(max) => println!("  Highest subject number: {max}"),
            None => println!("  No subjects yet"),
        }
        Ok(())
    }
}
