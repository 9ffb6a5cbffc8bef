//! Local EDF files imported through the orchestrator

use crate::common::{read_lines, write_edf};
use ieeg_bids_downloader::downloader::{DownloadConfig, DownloadOrchestrator, ItemOutcome, Manifest, WorkItem};
use ieeg_bids_downloader::fetcher::FailureLog;
use ieeg_bids_downloader::ledger::SubjectLedger;
use ieeg_bids_downloader::output::BidsLayout;
use ieeg_bids_downloader::remote::EdfConnector;
use ieeg_bids_downloader::USEC_PER_SEC;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn import_config(root: &Path) -> DownloadConfig {
    DownloadConfig::new(root)
        .with_span_to_end(true)
        .with_retry(1, Duration::from_secs(5), Duration::from_millis(1))
}

fn unit_file(root: &Path, subject: u32, suffix: &str) -> std::path::PathBuf {
    root.join(format!("sub-{subject:04}/ses-implant001/eeg"))
        .join(format!("sub-{subject:04}_ses-implant001_task-task_run-1_{suffix}"))
}

#[tokio::test]
async fn test_whole_file_is_imported_in_chunks() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_edf(
        &input.path().join("HUP150.edf"),
        &[("LA1", 4), ("Fp1", 4), ("EDF Annotations", 2)],
        5,
    );

    let config = import_config(out.path()).with_max_chunk_usec(2 * USEC_PER_SEC);
    let manifest = Manifest::from_items(vec![WorkItem::new("HUP150.edf", "150", "focal")]);
    let summary = DownloadOrchestrator::new(
        config,
        EdfConnector::new(input.path()),
        BidsLayout::new(out.path(), "implant"),
    )
    .unwrap()
    .run(&manifest)
    .await
    .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.units_written, 1);

    // 5 s at 4 Hz read as 2 s + 2 s + 1 s, in order, annotation signal left out
    let data = read_lines(&unit_file(out.path(), 1, "eeg.csv"));
    assert_eq!(data.len(), 21);
    assert_eq!(data[0], "LA1,Fp1");
    let firsts: Vec<f64> = data[1..]
        .iter()
        .map(|row| row.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(firsts, (0..20).map(f64::from).collect::<Vec<_>>());

    let channels = read_lines(&unit_file(out.path(), 1, "channels.tsv"));
    assert_eq!(channels[1], "LA1\tSEEG\t4.0");
    assert_eq!(channels[2], "Fp1\tEEG\t4.0");

    let ledger = SubjectLedger::load(out.path().join("subjects.csv")).unwrap();
    assert!(ledger.contains("HUP150.edf"));
}

#[tokio::test]
async fn test_unreadable_header_fails_item_and_run_continues() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(input.path().join("broken.edf"), b"not an edf header").unwrap();
    write_edf(&input.path().join("good.edf"), &[("LA1", 2)], 3);

    let manifest = Manifest::from_items(vec![
        WorkItem::new("broken.edf", "160", ""),
        WorkItem::new("missing.edf", "161", ""),
        WorkItem::new("good.edf", "162", ""),
    ]);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&outcomes);

    let orchestrator = DownloadOrchestrator::new(
        import_config(out.path()),
        EdfConnector::new(input.path()),
        BidsLayout::new(out.path(), "implant"),
    )
    .unwrap()
    .with_observer(Box::new(move |_: &WorkItem, outcome: &ItemOutcome| {
        seen.lock().unwrap().push(outcome.clone());
    }));
    let summary = orchestrator.run(&manifest).await.unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.skipped, 2);
    assert!(matches!(outcomes.lock().unwrap()[0], ItemOutcome::Skipped { .. }));

    // One failure-log line per bad file, no retries
    let failures = FailureLog::new(out.path().join("failures.csv")).read_all().unwrap();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].source_reference, "broken.edf");
    assert_eq!(failures[1].source_reference, "missing.edf");

    // The good file still gets the first subject number
    assert!(unit_file(out.path(), 1, "eeg.csv").exists());
    let ledger = SubjectLedger::load(out.path().join("subjects.csv")).unwrap();
    assert_eq!(ledger.subject_for_uid("162"), Some(1));
    assert!(!ledger.contains("broken.edf"));
}

#[tokio::test]
async fn test_mixed_rate_file_is_rejected_before_reading_data() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_edf(&input.path().join("mixed.edf"), &[("LA1", 4), ("ECG1", 2)], 2);

    let manifest = Manifest::from_items(vec![WorkItem::new("mixed.edf", "170", "")]);
    let summary = DownloadOrchestrator::new(
        import_config(out.path()),
        EdfConnector::new(input.path()),
        BidsLayout::new(out.path(), "implant"),
    )
    .unwrap()
    .run(&manifest)
    .await
    .unwrap();

    assert_eq!(summary.failed, 1);
    assert!(!out.path().join("sub-0001").exists());
    assert_eq!(read_lines(&out.path().join("failures.csv")).len(), 1);
}
