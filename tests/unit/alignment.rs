use ieeg_bids_downloader::align::{align, annotations_from_layer, markers_from_layer};
use ieeg_bids_downloader::remote::RawAnnotation;
use ieeg_bids_downloader::{Annotation, ClipMarker};

#[test]
fn test_startup_marker_dropped_and_trailing_clip_closed() {
    let markers = [
        ClipMarker::end(2000),
        ClipMarker::start(1_000_000),
        ClipMarker::end(2_000_000),
        ClipMarker::start(5_000_000),
    ];
    let alignment = align(&markers, &[], 9_000_000);

    let bounds: Vec<(i64, i64)> = alignment
        .clips
        .iter()
        .map(|c| (c.start_usec, c.end_usec))
        .collect();
    assert_eq!(bounds, vec![(1_000_000, 2_000_000), (5_000_000, 9_000_000)]);
    assert_eq!(alignment.clips[1].index, 1);
}

#[test]
fn test_recording_starting_inside_a_clip() {
    let markers = [ClipMarker::end(3_000_000), ClipMarker::start(4_000_000), ClipMarker::end(6_000_000)];
    let alignment = align(&markers, &[], 10_000_000);
    assert_eq!(alignment.clips[0].start_usec, 0);
    assert_eq!(alignment.clips[0].end_usec, 3_000_000);
    assert_eq!(alignment.clips.len(), 2);
}

#[test]
fn test_shared_boundary_goes_to_earlier_clip() {
    let markers = [
        ClipMarker::start(0),
        ClipMarker::end(1_000_000),
        ClipMarker::start(1_000_000),
        ClipMarker::end(2_000_000),
    ];
    let notes = [Annotation::new(1_000_000, "edge"), Annotation::new(1_500_000, "mid")];
    let alignment = align(&markers, &notes, 2_000_000);

    assert_eq!(alignment.annotations.events_for_clip(0).unwrap()[&1_000_000], "edge");
    assert_eq!(alignment.annotations.events_for_clip(1).unwrap()[&500_000], "mid");
    assert_eq!(alignment.annotations.assigned_count(), 2);
}

#[test]
fn test_annotations_outside_clips_are_dropped() {
    let markers = [ClipMarker::start(1_000_000), ClipMarker::end(2_000_000)];
    let notes = [Annotation::new(500_000, "before"), Annotation::new(3_000_000, "after")];
    let alignment = align(&markers, &notes, 4_000_000);
    assert_eq!(alignment.annotations.assigned_count(), 0);
    assert!(alignment.annotations.event_id_map().is_empty());
}

#[test]
fn test_no_markers_means_no_clips() {
    let alignment = align(&[ClipMarker::end(2000)], &[Annotation::new(10, "x")], 1_000_000);
    assert!(!alignment.has_clips());
}

#[test]
fn test_layer_conversion_ignores_unknown_marker_types() {
    let raw = vec![
        RawAnnotation::new("Clip Start", "", 10),
        RawAnnotation::new("Seizure", "not a marker", 20),
        RawAnnotation::new("clip end", "", 30),
    ];
    let markers = markers_from_layer(&raw);
    assert_eq!(markers, vec![ClipMarker::start(10), ClipMarker::end(30)]);

    let notes = annotations_from_layer(&raw);
    assert_eq!(notes[1], Annotation::new(20, "not a marker"));
}
