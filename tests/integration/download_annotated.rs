//! Annotation-mode downloads: clips from markers, events aligned to clips

use crate::common::{clip_layer, fast_config, note_layer, read_lines, FakeConnector, FakeDataset};
use ieeg_bids_downloader::downloader::config::{DEFAULT_ANNOTATION_LAYER, DEFAULT_CLIP_LAYER};
use ieeg_bids_downloader::downloader::{DownloadOrchestrator, Manifest, WorkItem};
use ieeg_bids_downloader::fetcher::FailureLog;
use ieeg_bids_downloader::ledger::SubjectLedger;
use ieeg_bids_downloader::output::BidsLayout;
use ieeg_bids_downloader::remote::SessionError;
use ieeg_bids_downloader::USEC_PER_SEC;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SOURCE: &str = "HUP130_phaseII";

fn unit_file(root: &Path, run: u32, suffix: &str) -> PathBuf {
    root.join("sub-0001/ses-implant001/eeg")
        .join(format!("sub-0001_ses-implant001_task-task_run-{run}_{suffix}"))
}

fn annotated_dataset() -> FakeDataset {
    FakeDataset::new(60 * USEC_PER_SEC, &["LA1", "LA2", "RB1"], 10.0)
        .with_layer(
            DEFAULT_CLIP_LAYER,
            clip_layer(&[(10 * USEC_PER_SEC, 20 * USEC_PER_SEC), (30 * USEC_PER_SEC, 40 * USEC_PER_SEC)]),
        )
        .with_layer(
            DEFAULT_ANNOTATION_LAYER,
            note_layer(&[
                (15 * USEC_PER_SEC, "spike"),
                (20 * USEC_PER_SEC, "boundary"),
                (35 * USEC_PER_SEC, "seizure onset"),
                (50 * USEC_PER_SEC, "outside"),
            ]),
        )
}

fn manifest() -> Manifest {
    Manifest::from_items(vec![WorkItem::new(SOURCE, "130", "focal")])
}

#[tokio::test]
async fn test_each_clip_becomes_a_run_with_its_events() {
    let dir = TempDir::new().unwrap();
    let connector = FakeConnector::new().with_dataset(SOURCE, annotated_dataset());
    let config = fast_config(dir.path()).with_annotation_mode(true);
    let layout = BidsLayout::new(dir.path(), "implant");

    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.units_written, 2);

    let requests: Vec<(i64, i64)> = connector
        .data_requests()
        .into_iter()
        .map(|(_, start, duration)| (start / USEC_PER_SEC, duration / USEC_PER_SEC))
        .collect();
    assert_eq!(requests, vec![(10, 10), (30, 10)]);

    // 10 s at 10 Hz plus header
    assert_eq!(read_lines(&unit_file(dir.path(), 1, "eeg.csv")).len(), 101);

    // Event ids follow the sorted descriptions of the whole item:
    // boundary=0, seizure onset=1, spike=2; "outside" fell in no clip
    let first = read_lines(&unit_file(dir.path(), 1, "events.tsv"));
    assert_eq!(first.len(), 3);
    assert_eq!(first[0], "onset\tduration\tsample\tvalue\ttrial_type");
    assert_eq!(first[1], "5.0\t0.0\t50\t2\tspike");
    assert_eq!(first[2], "10.0\t0.0\t100\t0\tboundary");

    let second = read_lines(&unit_file(dir.path(), 2, "events.tsv"));
    assert_eq!(second.len(), 2);
    assert_eq!(second[1], "5.0\t0.0\t50\t1\tseizure onset");

    let sidecar = std::fs::read_to_string(unit_file(dir.path(), 2, "targets.json")).unwrap();
    assert!(sidecar.contains("seizure onset"));
    assert!(!sidecar.contains("outside"));

    let channels = read_lines(&unit_file(dir.path(), 1, "channels.tsv"));
    assert_eq!(channels.len(), 4);
}

#[tokio::test]
async fn test_missing_markers_download_whole_dataset_unannotated() {
    let dir = TempDir::new().unwrap();
    let dataset = FakeDataset::new(60 * USEC_PER_SEC, &["LA1"], 10.0)
        .with_layer(DEFAULT_CLIP_LAYER, clip_layer(&[]))
        .with_layer(DEFAULT_ANNOTATION_LAYER, note_layer(&[(5 * USEC_PER_SEC, "note")]));
    let connector = FakeConnector::new().with_dataset(SOURCE, dataset);
    let config = fast_config(dir.path()).with_annotation_mode(true);
    let layout = BidsLayout::new(dir.path(), "implant");

    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(connector.data_requests(), vec![(SOURCE.to_string(), 0, 60 * USEC_PER_SEC)]);
    assert!(unit_file(dir.path(), 1, "eeg.csv").exists());
    assert!(!unit_file(dir.path(), 1, "events.tsv").exists());
}

#[tokio::test]
async fn test_exhausted_clip_is_left_out_and_others_written() {
    let dir = TempDir::new().unwrap();
    let connector = FakeConnector::new()
        .with_dataset(SOURCE, annotated_dataset())
        .fail_data_at(SOURCE, 10 * USEC_PER_SEC, SessionError::Connection("timed out".into()));
    let config = fast_config(dir.path()).with_annotation_mode(true);
    let layout = BidsLayout::new(dir.path(), "implant");

    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.units_written, 1);
    // The clip keeps its index, so the surviving clip is still run 2
    assert!(!unit_file(dir.path(), 1, "eeg.csv").exists());
    assert!(unit_file(dir.path(), 2, "eeg.csv").exists());

    let failures = FailureLog::new(dir.path().join("failures.csv")).read_all().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].start_usec, 10 * USEC_PER_SEC);
}

#[tokio::test]
async fn test_unavailable_layers_skip_item() {
    let dir = TempDir::new().unwrap();
    let connector = FakeConnector::new()
        .with_dataset(SOURCE, annotated_dataset())
        .fail_layers(SOURCE, SessionError::Service("502".into()));
    let config = fast_config(dir.path()).with_annotation_mode(true);
    let layout = BidsLayout::new(dir.path(), "implant");

    let summary = DownloadOrchestrator::new(config, connector.clone(), layout)
        .unwrap()
        .run(&manifest())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert!(connector.data_requests().is_empty());
    assert_eq!(read_lines(&dir.path().join("failures.csv")).len(), 1);

    let ledger = SubjectLedger::load(dir.path().join("subjects.csv")).unwrap();
    assert!(ledger.is_empty());
}
