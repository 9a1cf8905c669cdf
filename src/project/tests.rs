#![allow(clippy::unwrap_used, reason = "allow in test files")]

use std::{num::NonZeroUsize, sync::Arc};

use super::*;
use crate::topology::ReferenceTopologyResolver;

fn uniform(cols: usize, rows: usize, mv: MotionVector) -> BlockMotionGrid {
    Grid::filled(cols, rows, mv)
}

fn slots(cols: usize, rows: usize, slot: RefType) -> ProvenanceMap {
    Grid::filled(cols, rows, slot)
}

/// A projector whose cache already holds `field` for `frame`.
fn projector_with(frame: usize, field: BlockMotionGrid) -> MotionFieldProjector {
    let mut projector = MotionFieldProjector::new(None, SamplingMode::Nearest);
    projector.cache.insert(frame, Arc::new(field));
    projector
}

#[test]
fn keyframe_projects_to_zero() {
    let mut projector = MotionFieldProjector::new(None, SamplingMode::Nearest);
    let vectors = uniform(4, 3, MotionVector::new(1.0, 1.0));
    let frame = projector
        .project(0, vectors, slots(4, 3, RefType::INTRA_FRAME), &ReferenceSlotMap::filled(0))
        .unwrap();

    assert!(frame.is_keyframe());
    assert!(frame.projected.cells().iter().all(|mv| mv.is_zero()));
    assert_eq!((frame.projected.cols, frame.projected.rows), (16, 12));
    assert_eq!(projector.cache().frames().collect::<Vec<_>>(), vec![0]);
}

#[test]
fn dense_field_replicates_blocks() {
    let mut projector = MotionFieldProjector::new(Some((7, 5)), SamplingMode::Nearest);
    let mut vectors = Grid::new(2, 2);
    vectors[0][0] = MotionVector::new(1.0, 0.0);
    vectors[0][1] = MotionVector::new(2.0, 0.0);
    vectors[1][0] = MotionVector::new(3.0, 0.0);
    vectors[1][1] = MotionVector::new(4.0, 0.0);
    let frame = projector
        .project(0, vectors, slots(2, 2, RefType::INTRA_FRAME), &ReferenceSlotMap::filled(0))
        .unwrap();

    let dense = &frame.dense;
    assert_eq!((dense.cols, dense.rows), (7, 5));
    assert_eq!(dense[0][0].row, 1.0);
    assert_eq!(dense[3][3].row, 1.0);
    assert_eq!(dense[3][4].row, 2.0);
    assert_eq!(dense[4][0].row, 3.0);
    assert_eq!(dense[4][6].row, 4.0);
}

#[test]
fn composes_with_referenced_projection() {
    // frame 20 predicts from frame 15 through LAST_FRAME
    let mut projector = projector_with(15, uniform(8, 8, MotionVector::new(-1.0, 2.0)));
    let mut slot_map = ReferenceSlotMap::filled(0);
    slot_map[RefType::LAST_FRAME] = 15;

    let frame = projector
        .project(
            20,
            uniform(8, 8, MotionVector::new(0.5, 1.0)),
            slots(8, 8, RefType::LAST_FRAME),
            &slot_map,
        )
        .unwrap();

    assert_eq!(frame.projected_blocks[3][3], MotionVector::new(-0.5, 3.0));
    assert_eq!(frame.projected[13][13], MotionVector::new(-0.5, 3.0));
    assert!(projector.cache().get(20).is_some());
}

#[test]
fn intra_blocks_inherit_nothing() {
    let mut projector = projector_with(0, Grid::new(2, 2));
    projector
        .cache
        .insert(3, Arc::new(uniform(2, 2, MotionVector::new(5.0, 5.0))));
    let mut slot_map = ReferenceSlotMap::filled(0);
    slot_map[RefType::LAST_FRAME] = 3;

    let mut provenance = slots(2, 2, RefType::LAST_FRAME);
    provenance[1][1] = RefType::INTRA_FRAME;
    let frame = projector
        .project(4, Grid::new(2, 2), provenance, &slot_map)
        .unwrap();

    assert_eq!(frame.projected_blocks[0][0], MotionVector::new(5.0, 5.0));
    assert_eq!(frame.projected_blocks[1][1], MotionVector::ZERO);
}

#[test]
fn nearest_sampling_follows_the_vector() {
    let mut field = Grid::new(4, 1);
    for col in 0..4 {
        field[0][col] = MotionVector::new(0.0, col as f32 * 10.0);
    }
    // block 0 centre is x = 2; moving 5 px lands in block 1
    let sampled = sample_at(&field, 0, 0, MotionVector::new(0.0, 5.0), SamplingMode::Nearest);
    assert_eq!(sampled.col, 10.0);
    // moving 6 px lands exactly on block 2's left edge
    let sampled = sample_at(&field, 0, 0, MotionVector::new(0.0, 6.0), SamplingMode::Nearest);
    assert_eq!(sampled.col, 20.0);
}

#[test]
fn sampling_clamps_outside_the_frame() {
    let mut field = Grid::new(3, 3);
    field[0][0] = MotionVector::new(7.0, 7.0);
    field[2][2] = MotionVector::new(-7.0, -7.0);

    for mode in [SamplingMode::Nearest, SamplingMode::Bilinear] {
        let far_up_left = sample_at(&field, 1, 1, MotionVector::new(-100.0, -100.0), mode);
        assert_eq!(far_up_left, MotionVector::new(7.0, 7.0));
        let far_down_right = sample_at(&field, 1, 1, MotionVector::new(100.0, 100.0), mode);
        assert_eq!(far_down_right, MotionVector::new(-7.0, -7.0));
    }
}

#[test]
fn bilinear_sampling_interpolates_between_centres() {
    let mut field = Grid::new(2, 1);
    field[0][0] = MotionVector::new(0.0, 0.0);
    field[0][1] = MotionVector::new(0.0, 8.0);

    // half way between the two block centres
    let sampled = sample_at(&field, 0, 0, MotionVector::new(0.0, 2.0), SamplingMode::Bilinear);
    assert_eq!(sampled.col, 4.0);
    // exactly on a centre
    let sampled = sample_at(&field, 0, 0, MotionVector::new(0.0, 4.0), SamplingMode::Bilinear);
    assert_eq!(sampled.col, 8.0);
}

#[test]
fn missing_reference_is_fatal() {
    let mut projector = projector_with(0, Grid::new(2, 2));
    let mut slot_map = ReferenceSlotMap::filled(0);
    slot_map[RefType::GOLDEN_FRAME] = 8;

    let err = projector
        .project(12, Grid::new(2, 2), slots(2, 2, RefType::GOLDEN_FRAME), &slot_map)
        .unwrap_err();
    assert_eq!(
        err,
        Error::EvictedReference {
            frame: 12,
            slot: RefType::GOLDEN_FRAME,
            reference: 8
        }
    );
    assert!(projector.cache().get(12).is_none());
}

#[test]
fn unused_slots_need_not_be_retained() {
    let mut projector = projector_with(0, Grid::new(2, 2));
    let mut slot_map = ReferenceSlotMap::filled(0);
    slot_map[RefType::ALTREF_FRAME] = 99;

    assert!(
        projector
            .project(1, Grid::new(2, 2), slots(2, 2, RefType::INTRA_FRAME), &slot_map)
            .is_ok()
    );
}

#[test]
fn mismatched_grids_are_rejected() {
    let mut projector = MotionFieldProjector::new(None, SamplingMode::Nearest);
    let err = projector
        .project(0, Grid::new(2, 2), Grid::new(3, 2), &ReferenceSlotMap::filled(0))
        .unwrap_err();
    assert!(matches!(err, Error::MalformedBlockGrid { frame: 0, .. }));

    let mut projector = projector_with(0, Grid::new(4, 4));
    let err = projector
        .project(1, Grid::new(2, 2), Grid::new(2, 2), &ReferenceSlotMap::filled(0))
        .unwrap_err();
    assert!(matches!(err, Error::MalformedBlockGrid { frame: 1, .. }));
}

#[test]
fn extent_larger_than_grid_is_rejected() {
    let mut projector = MotionFieldProjector::new(Some((20, 8)), SamplingMode::Nearest);
    let err = projector
        .project(0, Grid::new(4, 2), Grid::new(4, 2), &ReferenceSlotMap::filled(0))
        .unwrap_err();
    assert_eq!(
        err,
        Error::InvalidExtent {
            width: 20,
            height: 8,
            grid_width: 16,
            grid_height: 8
        }
    );
}

#[test]
fn eviction_keeps_keyframe_golden_and_window() {
    let mut cache = ProjectedFieldCache::new();
    for frame in 0..=60 {
        cache.insert(frame, Arc::new(Grid::new(1, 1)));
    }
    let golden = GoldenFrameSet::from_frames(&[16, 24, 32, 40]);
    let evicted = cache.evict_stale(60, 0, &golden);

    let kept = cache.frames().collect::<Vec<_>>();
    assert_eq!(kept, vec![0, 16, 24, 32, 40, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60]);
    assert_eq!(evicted, 61 - kept.len());

    // a new keyframe drops everything before it
    cache.evict_stale(64, 64, &GoldenFrameSet::anchored_at(64));
    assert!(cache.is_empty());
}

#[test]
fn cache_stays_bounded_over_long_sequence() {
    let gop = NonZeroUsize::new(16).unwrap();
    let mut resolver = ReferenceTopologyResolver::new(gop);
    let mut projector = MotionFieldProjector::new(None, SamplingMode::Nearest);

    for frame in 0..500 {
        let slot_map = resolver.resolve_next(frame, frame == 0).unwrap();
        // every block uses a different slot, so every slot must be retained
        let mut provenance = Grid::new(4, 2);
        for (cell, slot) in provenance.cells_mut().iter_mut().zip(ALL_REF_SLOTS) {
            *cell = slot;
        }
        projector
            .project(frame, uniform(4, 2, MotionVector::new(0.0, 0.25)), provenance, &slot_map)
            .unwrap();
        projector.evict_stale(frame, resolver.last_keyframe(), resolver.golden());
        assert!(projector.cache().len() <= 1 + 5 + LOOKBACK_WINDOW + 1);
    }
}

#[test]
fn projection_accumulates_along_last_frame_chain() {
    let gop = NonZeroUsize::new(16).unwrap();
    let mut resolver = ReferenceTopologyResolver::new(gop);
    let mut projector = MotionFieldProjector::new(None, SamplingMode::Nearest);

    let mut last = None;
    for frame in 0..=6 {
        let slot_map = resolver.resolve_next(frame, frame == 0).unwrap();
        // quarter-pel steps never leave the block, so each frame adds one step
        let vectors = uniform(3, 3, MotionVector::new(0.0, 0.25));
        let provenance = slots(3, 3, RefType::LAST_FRAME);
        last = Some(projector.project(frame, vectors, provenance, &slot_map).unwrap());
    }

    let last = last.unwrap();
    assert_eq!(last.slot_map[RefType::LAST_FRAME], 5);
    assert!(
        last.projected
            .cells()
            .iter()
            .all(|&mv| mv == MotionVector::new(0.0, 1.5))
    );
}
