//! Retention of projected fields for later frames.

use std::{collections::BTreeMap, sync::Arc};

use crate::{data::grid::BlockMotionGrid, topology::GoldenFrameSet};

/// Number of most recent frames always retained.
///
/// Covers the longest look-back any tier takes, including golden skips.
pub const LOOKBACK_WINDOW: usize = 10;

/// Block-level projected fields of frames that later frames may still
/// reference.
///
/// The projector is the only writer. Entries are handed out as `Arc`s, so a
/// finished field stays readable by sinks after it has been evicted here.
#[derive(Debug, Default)]
pub struct ProjectedFieldCache {
    entries: BTreeMap<usize, Arc<BlockMotionGrid>>,
}

impl ProjectedFieldCache {
    /// An empty cache.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the projected field of `frame_number`.
    #[inline]
    pub fn insert(&mut self, frame_number: usize, field: Arc<BlockMotionGrid>) {
        self.entries.insert(frame_number, field);
    }

    /// Projected field of `frame_number`, if still retained.
    #[inline]
    pub fn get(&self, frame_number: usize) -> Option<&Arc<BlockMotionGrid>> {
        self.entries.get(&frame_number)
    }

    /// Retained frame numbers, ascending.
    #[inline]
    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    /// Number of retained fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is retained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every field no frame after `current` can reference.
    ///
    /// Later frames only ever address the last keyframe, a golden frame, or a
    /// frame within [`LOOKBACK_WINDOW`] of themselves. Returns the number of
    /// evicted fields.
    #[inline]
    pub fn evict_stale(
        &mut self,
        current: usize,
        last_keyframe: usize,
        golden: &GoldenFrameSet,
    ) -> usize {
        let before = self.entries.len();
        self.entries.retain(|&frame, _| {
            frame >= last_keyframe
                && (frame == last_keyframe
                    || golden.contains(frame)
                    || frame + LOOKBACK_WINDOW >= current)
        });
        before - self.entries.len()
    }
}
