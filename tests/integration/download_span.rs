//! Span-mode downloads through the orchestrator

use crate::common::{fast_config, read_lines, FakeConnector, FakeDataset};
use ieeg_bids_downloader::downloader::{DownloadOrchestrator, ItemOutcome, Manifest, WorkItem};
use ieeg_bids_downloader::fetcher::FailureLog;
use ieeg_bids_downloader::ledger::SubjectLedger;
use ieeg_bids_downloader::output::BidsLayout;
use ieeg_bids_downloader::remote::SessionError;
use ieeg_bids_downloader::USEC_PER_MINUTE;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const SOURCE: &str = "HUP101_phaseII";

fn unit_dir(root: &Path) -> std::path::PathBuf {
    root.join("sub-0001").join("ses-implant001").join("eeg")
}

fn manifest() -> Manifest {
    Manifest::from_items(vec![WorkItem::new(SOURCE, "101", "focal")])
}

#[tokio::test]
async fn test_long_span_is_fetched_in_bounded_chunks() {
    let dir = TempDir::new().unwrap();
    let connector = FakeConnector::new().with_dataset(
        SOURCE,
        FakeDataset::new(30 * USEC_PER_MINUTE, &["LA1", "LA2"], 2.0),
    );
    let config = fast_config(dir.path()).with_span(0, 25 * USEC_PER_MINUTE);
    let layout = BidsLayout::new(dir.path(), "implant");

    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.units_written, 1);

    let windows: Vec<(i64, i64)> = connector
        .data_requests()
        .into_iter()
        .map(|(_, start, duration)| (start / USEC_PER_MINUTE, duration / USEC_PER_MINUTE))
        .collect();
    assert_eq!(windows, vec![(0, 10), (10, 10), (20, 5)]);

    // 25 minutes at 2 Hz, plus the header row
    let data = read_lines(&unit_dir(dir.path()).join("sub-0001_ses-implant001_task-task_run-1_eeg.csv"));
    assert_eq!(data.len(), 25 * 60 * 2 + 1);
    assert_eq!(data[0], "LA1,LA2");

    // Samples are concatenated in order across chunk boundaries
    let firsts: Vec<f64> = data[1..]
        .iter()
        .map(|row| row.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert!(firsts.windows(2).all(|w| w[1] == w[0] + 1.0));

    let sidecar = std::fs::read_to_string(
        unit_dir(dir.path()).join("sub-0001_ses-implant001_task-task_run-1_targets.json"),
    )
    .unwrap();
    assert!(sidecar.contains("\"focal\""));

    let ledger = SubjectLedger::load(dir.path().join("subjects.csv")).unwrap();
    assert_eq!(ledger.subject_for_uid("101"), Some(1));
    assert!(ledger.contains(SOURCE));

    // Every session that was opened was also closed
    assert_eq!(connector.opens(), connector.closes());
}

#[tokio::test]
async fn test_mixed_sampling_rates_fail_before_any_data_request() {
    let dir = TempDir::new().unwrap();
    let connector = FakeConnector::new().with_dataset(
        SOURCE,
        FakeDataset::new(USEC_PER_MINUTE, &["LA1", "LA2"], 512.0).with_channel("ECG1", 256.0),
    );
    let config = fast_config(dir.path()).with_span(0, USEC_PER_MINUTE);
    let layout = BidsLayout::new(dir.path(), "implant");

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&outcomes);
    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .with_observer(Box::new(move |_: &WorkItem, outcome: &ItemOutcome| {
            seen.lock().unwrap().push(outcome.clone())
        }))
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert!(connector.data_requests().is_empty());
    assert!(matches!(
        outcomes.lock().unwrap()[0],
        ItemOutcome::Failed {
            reason: "data_inconsistency",
            ..
        }
    ));

    let ledger = SubjectLedger::load(dir.path().join("subjects.csv")).unwrap();
    assert!(ledger.is_empty());
    assert!(!dir.path().join("sub-0001").exists());

    let failures = FailureLog::new(dir.path().join("failures.csv")).read_all().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].error_description.contains("256"));
}

#[tokio::test]
async fn test_exhausted_retries_are_logged_and_item_not_ledgered() {
    let dir = TempDir::new().unwrap();
    let connector = FakeConnector::new()
        .with_dataset(SOURCE, FakeDataset::new(USEC_PER_MINUTE, &["LA1"], 10.0))
        .fail_data(SOURCE, 100, SessionError::Connection("reset by peer".into()));
    let config = fast_config(dir.path()).with_span(0, USEC_PER_MINUTE);
    let layout = BidsLayout::new(dir.path(), "implant");

    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.completed, 0);
    assert_eq!(summary.skipped, 1);
    // max_attempts counts every try, including the first
    assert_eq!(connector.data_requests().len(), 3);

    let failures = FailureLog::new(dir.path().join("failures.csv")).read_all().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].source_reference, SOURCE);
    assert_eq!(failures[0].start_usec, 0);
    assert_eq!(failures[0].duration_usec, USEC_PER_MINUTE);
    assert!(failures[0].error_description.contains("reset by peer"));

    let ledger = SubjectLedger::load(dir.path().join("subjects.csv")).unwrap();
    assert!(!ledger.contains(SOURCE));
}

#[tokio::test]
async fn test_transient_failures_recover_within_budget() {
    let dir = TempDir::new().unwrap();
    let connector = FakeConnector::new()
        .with_dataset(SOURCE, FakeDataset::new(USEC_PER_MINUTE, &["LA1"], 10.0))
        .fail_data(SOURCE, 2, SessionError::Service("503".into()));
    let config = fast_config(dir.path()).with_span(0, USEC_PER_MINUTE);
    let layout = BidsLayout::new(dir.path(), "implant");

    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(connector.data_requests().len(), 3);
    assert!(read_lines(&dir.path().join("failures.csv")).is_empty());
}

#[tokio::test]
async fn test_rejected_call_is_not_retried_but_logged() {
    let dir = TempDir::new().unwrap();
    let connector = FakeConnector::new()
        .with_dataset(SOURCE, FakeDataset::new(USEC_PER_MINUTE, &["LA1"], 10.0))
        .fail_data(SOURCE, 100, SessionError::Rejected("403 forbidden".into()));
    let config = fast_config(dir.path()).with_span(0, USEC_PER_MINUTE);
    let layout = BidsLayout::new(dir.path(), "implant");

    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(connector.data_requests().len(), 1);
    assert_eq!(read_lines(&dir.path().join("failures.csv")).len(), 1);
}

#[tokio::test]
async fn test_sessions_are_closed_when_attempts_time_out() {
    let dir = TempDir::new().unwrap();
    let connector = FakeConnector::new()
        .with_dataset(SOURCE, FakeDataset::new(30 * USEC_PER_MINUTE, &["LA1"], 2.0))
        .slow_channels(Duration::from_secs(5));
    let config = fast_config(dir.path())
        .with_span(0, USEC_PER_MINUTE)
        .with_retry(3, Duration::from_millis(20), Duration::from_millis(1));
    let layout = BidsLayout::new(dir.path(), "implant");

    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.completed, 0);
    assert!(connector.data_requests().is_empty());
    assert_eq!(read_lines(&dir.path().join("failures.csv")).len(), 1);

    // Timed-out sessions are closed from background tasks
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.opens(), 3);
    assert_eq!(connector.closes(), 3);
}
