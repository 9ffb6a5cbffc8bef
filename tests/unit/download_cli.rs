use clap::Parser;
use ieeg_bids_downloader::cli::download::{Cli, Commands, OutputFormat};
use ieeg_bids_downloader::cli::ValidateTarget;
use std::time::Duration;

fn download_argv(extra: &[&'static str]) -> Vec<&'static str> {
    let mut argv = vec![
        "ieeg-bids-downloader",
        "download",
        "--manifest",
        "manifest.csv",
        "--output-root",
        "bids",
        "--base-url",
        "http://localhost:8080/api",
        "--username",
        "user",
        "--password",
        "secret",
    ];
    argv.extend_from_slice(extra);
    argv
}

#[test]
fn test_cli_defaults() {
    let cli = Cli::parse_from(download_argv(&[]));
    assert_eq!(cli.output_format, OutputFormat::Human);

    let Commands::Download(args) = cli.command else {
        panic!("expected download command");
    };
    assert_eq!(args.max_attempts, 3);
    assert_eq!(args.timeout_secs, Duration::from_secs(60));
    assert_eq!(args.backoff_secs, Duration::from_secs(5));
    assert_eq!(args.chunk_minutes, 10);
    assert_eq!(args.session_label, "implant");
    assert_eq!(args.clip_layer, "EEG clip times");
    assert!(!args.annotations);
    assert!(args.metrics_addr.is_none());
}

#[test]
fn test_cli_rejects_out_of_range_attempts() {
    assert!(Cli::try_parse_from(download_argv(&["--max-attempts", "0"])).is_err());
    assert!(Cli::try_parse_from(download_argv(&["--max-attempts", "21"])).is_err());
    assert!(Cli::try_parse_from(download_argv(&["--chunk-minutes", "0"])).is_err());
}

#[test]
fn test_output_format_is_global() {
    let cli = Cli::parse_from(download_argv(&["--output-format", "json"]));
    assert_eq!(cli.output_format, OutputFormat::Json);
}

#[test]
fn test_validate_subcommands_parse() {
    let cli = Cli::parse_from(["ieeg-bids-downloader", "validate", "ledger", "subjects.csv"]);
    let Commands::Validate(cmd) = cli.command else {
        panic!("expected validate command");
    };
    assert!(matches!(cmd.target, ValidateTarget::Ledger { .. }));
}
