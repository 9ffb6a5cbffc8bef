//! CLI command implementations

pub mod download;
pub mod error;
pub mod import;
pub mod validate;

pub use download::{Cli, Commands, DownloadArgs, OutputFormat};
pub use error::CliError;
pub use import::ImportArgs;
pub use validate::{ValidateCommand, ValidateTarget};
