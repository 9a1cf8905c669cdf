#![allow(clippy::unwrap_used, reason = "allow in test files")]

use std::{cell::RefCell, num::NonZeroUsize};

use serde_json::{Value, json};

use super::*;
use crate::sink::CollectSink;

/// One inspector record with a uniform vector in 1/8 pel. Non-keyframes
/// predict every block from `LAST_FRAME`.
fn record(cols: usize, rows: usize, keyframe: bool, mv: (i32, i32)) -> Value {
    let reference = if keyframe { 0 } else { 1 };
    let mv_row = (0..cols).flat_map(|_| [mv.0, mv.1, 0, 0]).collect::<Vec<_>>();
    let ref_row = (0..cols).flat_map(|_| [reference, -1]).collect::<Vec<_>>();
    json!({
        "frameType": if keyframe { 0 } else { 1 },
        "showFrame": 1,
        "motionVectors": vec![mv_row; rows],
        "referenceFrame": vec![ref_row; rows],
    })
}

fn dump(records: Vec<Value>) -> Vec<InspectorFrame> {
    serde_json::from_value(Value::Array(records)).unwrap()
}

/// `len` records of a 2x2 grid moving a quarter pixel right per frame.
fn steady_dump(len: usize, keyframes: &[usize]) -> Vec<InspectorFrame> {
    dump(
        (0..len)
            .map(|f| record(2, 2, f == 0 || keyframes.contains(&f), (0, 2)))
            .collect(),
    )
}

fn gop(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap()
}

#[test]
fn emits_all_but_the_first_and_last_frame() {
    let mut collect = CollectSink::default();
    let mut sinks: [&mut dyn FrameSink; 1] = [&mut collect];
    let results =
        extract_motion_fields(steady_dump(10, &[]), ExtractionOptions::new(gop(16)), &mut sinks, None)
            .unwrap();

    assert_eq!(results.frame_count, 8);
    assert_eq!(results.keyframes, vec![0]);
    assert_eq!(results.slot_maps.keys().copied().collect::<Vec<_>>(), (0..9).collect::<Vec<_>>());
    assert_eq!(results.physical_frames, (0..10).collect::<Vec<_>>());

    assert!(collect.finished);
    let emitted = collect.frames.iter().map(|f| f.frame_number).collect::<Vec<_>>();
    assert_eq!(emitted, (1..9).collect::<Vec<_>>());
}

#[test]
fn fields_accumulate_from_the_keyframe() {
    let mut collect = CollectSink::default();
    let mut sinks: [&mut dyn FrameSink; 1] = [&mut collect];
    extract_motion_fields(steady_dump(10, &[]), ExtractionOptions::new(gop(16)), &mut sinks, None)
        .unwrap();

    for frame in &collect.frames {
        let expected = MotionVector::new(0.0, frame.frame_number as f32 * 0.25);
        assert!(frame.projected.cells().iter().all(|&mv| mv == expected));
        assert!(frame.dense.cells().iter().all(|&mv| mv == MotionVector::new(0.0, 0.25)));
        assert_eq!((frame.dense.cols, frame.dense.rows), (8, 8));
    }
}

#[test]
fn keyframe_records_move_the_anchor() {
    let mut collect = CollectSink::default();
    let progress = RefCell::new(Vec::new());
    let record_progress = |frames: usize, keyframes: usize| {
        progress.borrow_mut().push((frames, keyframes));
    };
    let mut sinks: [&mut dyn FrameSink; 1] = [&mut collect];
    let results = extract_motion_fields(
        steady_dump(12, &[8]),
        ExtractionOptions::new(gop(16)),
        &mut sinks,
        Some(&record_progress),
    )
    .unwrap();

    assert_eq!(results.keyframes, vec![0, 8]);
    assert_eq!(results.slot_maps[&9], ReferenceSlotMap::from_slots([8, 8, 8, 8, 8, 8, 8, 8]));

    let frame_8 = &collect.frames[7];
    assert!(frame_8.is_keyframe());
    assert!(frame_8.projected.cells().iter().all(|mv| mv.is_zero()));
    let frame_10 = &collect.frames[9];
    assert_eq!(frame_10.frame_number, 10);
    assert!(frame_10.projected.cells().iter().all(|&mv| mv == MotionVector::new(0.0, 0.5)));

    let progress = progress.into_inner();
    assert_eq!(progress.len(), 10);
    assert_eq!(progress[6], (7, 1));
    assert_eq!(progress.last(), Some(&(10, 2)));
}

#[test]
fn forward_direction_reverses_the_physical_mapping() {
    assert_eq!(Direction::Backward.physical_index(3, 10), 3);
    assert_eq!(Direction::Forward.physical_index(3, 10), 6);
    assert_eq!(Direction::Forward.physical_index(0, 0), 0);

    let mut opts = ExtractionOptions::new(gop(16));
    opts.direction = Direction::Forward;
    let results = extract_motion_fields(steady_dump(5, &[]), opts, &mut [], None).unwrap();
    assert_eq!(results.physical_frames, vec![4, 3, 2, 1, 0]);
}

#[test]
fn gop_size_must_be_a_positive_integer() {
    assert_eq!(parse_gop_size("16"), Ok(gop(16)));
    assert_eq!(parse_gop_size(" 8 "), Ok(gop(8)));
    for bad in ["0", "-4", "sixteen", ""] {
        assert_eq!(parse_gop_size(bad), Err(Error::InvalidGopSize(bad.to_owned())));
    }
}

#[test]
fn invalid_extent_is_rejected_before_any_frame() {
    let mut collect = CollectSink::default();
    let mut sinks: [&mut dyn FrameSink; 1] = [&mut collect];
    let mut opts = ExtractionOptions::new(gop(16));
    opts.extent = Some((9, 4));
    let err = extract_motion_fields(steady_dump(6, &[]), opts, &mut sinks, None).unwrap_err();

    assert_eq!(
        err.downcast_ref::<Error>(),
        Some(&Error::InvalidExtent {
            width: 9,
            height: 4,
            grid_width: 8,
            grid_height: 8
        })
    );
    assert!(collect.frames.is_empty());
    assert!(!collect.finished);
}

#[test]
fn cropped_extent_is_applied() {
    let mut collect = CollectSink::default();
    let mut sinks: [&mut dyn FrameSink; 1] = [&mut collect];
    let mut opts = ExtractionOptions::new(gop(16));
    opts.extent = Some((7, 5));
    extract_motion_fields(steady_dump(4, &[]), opts, &mut sinks, None).unwrap();

    for frame in &collect.frames {
        assert_eq!((frame.projected.cols, frame.projected.rows), (7, 5));
        assert_eq!((frame.block_vectors.cols, frame.block_vectors.rows), (2, 2));
    }
}

#[test]
fn malformed_frame_aborts_with_its_index() {
    let mut records = (0..8)
        .map(|f| record(2, 2, f == 0, (0, 2)))
        .collect::<Vec<_>>();
    records[3] = record(3, 2, false, (0, 2));

    let mut collect = CollectSink::default();
    let mut sinks: [&mut dyn FrameSink; 1] = [&mut collect];
    let err = extract_motion_fields(dump(records), ExtractionOptions::new(gop(16)), &mut sinks, None)
        .unwrap_err();

    assert!(format!("{err:#}").contains("Could not project frame 3"));
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::MalformedBlockGrid { frame: 3, .. })
    ));
    let emitted = collect.frames.iter().map(|f| f.frame_number).collect::<Vec<_>>();
    assert_eq!(emitted, vec![1, 2]);
    assert!(!collect.finished);
}

struct FailingSink {
    fail_at: usize,
}

impl FrameSink for FailingSink {
    fn consume(&mut self, frame: &ProjectedFrame) -> anyhow::Result<()> {
        if frame.frame_number == self.fail_at {
            anyhow::bail!("disk full");
        }
        Ok(())
    }
}

#[test]
fn sink_failure_aborts_the_run() {
    let mut failing = FailingSink { fail_at: 2 };
    let mut collect = CollectSink::default();
    let mut sinks: [&mut dyn FrameSink; 2] = [&mut failing, &mut collect];
    let err = extract_motion_fields(steady_dump(40, &[]), ExtractionOptions::new(gop(16)), &mut sinks, None)
        .unwrap_err();

    assert_eq!(format!("{err:#}"), "Could not write frame 2: disk full");
    // the second sink never saw the failing frame
    assert_eq!(collect.frames.len(), 1);
    assert!(!collect.finished);
}

#[test]
fn short_dumps_emit_nothing() {
    for len in 0..=2 {
        let mut collect = CollectSink::default();
        let mut sinks: [&mut dyn FrameSink; 1] = [&mut collect];
        let results =
            extract_motion_fields(steady_dump(len, &[]), ExtractionOptions::new(gop(16)), &mut sinks, None)
                .unwrap();
        assert_eq!(results.frame_count, len.saturating_sub(2));
        assert!(collect.finished);
    }
}
