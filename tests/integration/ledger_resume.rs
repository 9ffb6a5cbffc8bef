//! Reruns, subject numbering and the run lock

use crate::common::{fast_config, read_lines, FakeConnector, FakeDataset};
use ieeg_bids_downloader::downloader::{DownloadError, DownloadOrchestrator, Manifest, WorkItem};
use ieeg_bids_downloader::ledger::{LedgerError, LedgerLock, SubjectLedger};
use ieeg_bids_downloader::output::BidsLayout;
use ieeg_bids_downloader::USEC_PER_SEC;
use tempfile::TempDir;

fn connector(sources: &[&str]) -> FakeConnector {
    sources.iter().fold(FakeConnector::new(), |connector, source| {
        connector.with_dataset(source, FakeDataset::new(60 * USEC_PER_SEC, &["LA1", "LA2"], 4.0))
    })
}

async fn run(dir: &TempDir, connector: &FakeConnector, manifest: &Manifest) -> ieeg_bids_downloader::downloader::RunSummary {
    let config = fast_config(dir.path()).with_span(0, 10 * USEC_PER_SEC);
    let layout = BidsLayout::new(dir.path(), "implant");
    DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(manifest)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_second_run_fetches_nothing() {
    let dir = TempDir::new().unwrap();
    let connector = connector(&["HUP101_phaseII"]);
    let manifest = Manifest::from_items(vec![WorkItem::new("HUP101_phaseII", "101", "")]);

    let first = run(&dir, &connector, &manifest).await;
    assert_eq!(first.completed, 1);
    let requests_after_first = connector.data_requests().len();
    let opens_after_first = connector.opens();

    let second = run(&dir, &connector, &manifest).await;
    assert_eq!(second.completed, 0);
    assert_eq!(second.already_ledgered, 1);
    assert_eq!(connector.data_requests().len(), requests_after_first);
    assert_eq!(connector.opens(), opens_after_first);

    // Header plus exactly one row
    assert_eq!(read_lines(&dir.path().join("subjects.csv")).len(), 2);
    assert!(!dir.path().join("sub-0001").join("ses-implant002").exists());
}

#[tokio::test]
async fn test_subject_numbers_stable_across_runs() {
    let dir = TempDir::new().unwrap();
    let connector = connector(&["HUP101_phaseI", "HUP101_phaseII", "HUP102_phaseII"]);

    let first = Manifest::from_items(vec![WorkItem::new("HUP101_phaseI", "101", "")]);
    run(&dir, &connector, &first).await;

    let second = Manifest::from_items(vec![
        WorkItem::new("HUP101_phaseI", "101", ""),
        WorkItem::new("HUP101_phaseII", "101", ""),
        WorkItem::new("HUP102_phaseII", "102", ""),
    ]);
    let summary = run(&dir, &connector, &second).await;
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.already_ledgered, 1);

    let ledger = SubjectLedger::load(dir.path().join("subjects.csv")).unwrap();
    assert_eq!(ledger.get("HUP101_phaseI").unwrap().subject_number, 1);
    assert_eq!(ledger.get("HUP101_phaseII").unwrap().subject_number, 1);
    assert_eq!(ledger.get("HUP102_phaseII").unwrap().subject_number, 2);

    // A second recording of the same subject opens a new session
    assert!(dir.path().join("sub-0001/ses-implant001/eeg").is_dir());
    assert!(dir.path().join("sub-0001/ses-implant002/eeg").is_dir());
    assert!(dir.path().join("sub-0002/ses-implant001/eeg").is_dir());

    let rows = read_lines(&dir.path().join("subjects.csv"));
    assert_eq!(rows[0], "source_reference,uid,subject_number");
    assert!(rows.contains(&"HUP102_phaseII,102,0002".to_string()));
}

#[tokio::test]
async fn test_new_subject_skips_numbers_already_on_disk() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("sub-0007/ses-implant001")).unwrap();
    let connector = connector(&["HUP120_phaseII"]);
    let manifest = Manifest::from_items(vec![WorkItem::new("HUP120_phaseII", "120", "")]);

    run(&dir, &connector, &manifest).await;

    let ledger = SubjectLedger::load(dir.path().join("subjects.csv")).unwrap();
    assert_eq!(ledger.subject_for_uid("120"), Some(8));
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let dir = TempDir::new().unwrap();
    let ledger_path = dir.path().join("subjects.csv");
    let _held = LedgerLock::try_acquire(&ledger_path).unwrap();

    let connector = connector(&["HUP101_phaseII"]);
    let manifest = Manifest::from_items(vec![WorkItem::new("HUP101_phaseII", "101", "")]);
    let config = fast_config(dir.path()).with_span(0, 10 * USEC_PER_SEC);
    let layout = BidsLayout::new(dir.path(), "implant");

    let result = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest)
        .await;

    assert!(matches!(
        result,
        Err(DownloadError::Ledger(LedgerError::LockError(_)))
    ));
    assert!(connector.data_requests().is_empty());
}

#[tokio::test]
async fn test_conflicting_ledger_aborts_run() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("subjects.csv"),
        "source_reference,uid,subject_number\na,1,0001\nb,2,0001\n",
    )
    .unwrap();

    let connector = connector(&["HUP101_phaseII"]);
    let manifest = Manifest::from_items(vec![WorkItem::new("HUP101_phaseII", "101", "")]);
    let config = fast_config(dir.path()).with_span(0, 10 * USEC_PER_SEC);
    let layout = BidsLayout::new(dir.path(), "implant");

    let result = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest)
        .await;
    assert!(matches!(result, Err(DownloadError::Ledger(_))));
    assert!(connector.data_requests().is_empty());
}
