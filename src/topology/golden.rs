//! The golden-frame set.

use arrayvec::ArrayVec;

/// Maximum number of golden frames held at once.
///
/// The set only reaches this size transiently, between a half-GOP boundary
/// and the next deep-tier trim.
pub const GOLDEN_CAPACITY: usize = 5;
/// Size the set settles at once the original keyframe anchor has aged out.
pub const GOLDEN_STEADY_LEN: usize = 4;

/// Ordered set of golden frames, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GoldenFrameSet {
    frames: ArrayVec<usize, GOLDEN_CAPACITY>,
}

impl GoldenFrameSet {
    /// A set holding only the keyframe anchor.
    #[inline]
    pub fn anchored_at(keyframe: usize) -> Self {
        let mut frames = ArrayVec::new();
        frames.push(keyframe);
        Self { frames }
    }

    /// Builds a set from explicit entries, oldest first.
    ///
    /// # Panics
    ///
    /// - If more than [`GOLDEN_CAPACITY`] entries are given.
    #[inline]
    pub fn from_frames(frames: &[usize]) -> Self {
        assert!(frames.len() <= GOLDEN_CAPACITY);
        Self {
            frames: frames.iter().copied().collect(),
        }
    }

    /// Applies the golden rotation policy for a newly minted golden frame.
    ///
    /// - `reset` restarts the set at `last_keyframe`.
    /// - Below [`GOLDEN_STEADY_LEN`] entries the candidate is appended.
    /// - At exactly [`GOLDEN_STEADY_LEN`] entries that still contain the
    ///   keyframe, the candidate is appended and the oldest entry evicted.
    /// - Otherwise the candidate is appended, growing the set to its
    ///   capacity until the resolver trims it.
    #[must_use]
    #[inline]
    pub fn update(mut self, candidate: usize, last_keyframe: usize, reset: bool) -> Self {
        if reset {
            return Self::anchored_at(last_keyframe);
        }

        if self.frames.len() == GOLDEN_STEADY_LEN && self.contains(last_keyframe) {
            self.frames.remove(0);
            self.frames.push(candidate);
            return self;
        }

        if self.frames.is_full() {
            // Unreachable when driven from a keyframe: a full set is always
            // trimmed before the next half-GOP boundary.
            log::warn!(
                "golden set {:?} is full, dropping {} to admit {}",
                self.frames,
                self.frames[0],
                candidate
            );
            self.frames.remove(0);
        }
        self.frames.push(candidate);
        self
    }

    /// Drops the oldest entry.
    #[inline]
    pub(crate) fn evict_oldest(&mut self) {
        if !self.frames.is_empty() {
            self.frames.remove(0);
        }
    }

    /// Whether `frame` is currently a golden frame.
    #[inline]
    pub fn contains(&self, frame: usize) -> bool {
        self.frames.contains(&frame)
    }

    /// Entry at `index`, oldest first.
    #[inline]
    pub fn get(&self, index: usize) -> Option<usize> {
        self.frames.get(index).copied()
    }

    /// Most recently minted golden frame.
    #[inline]
    pub fn last(&self) -> Option<usize> {
        self.frames.last().copied()
    }

    /// Number of golden frames held.
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Entries, oldest first.
    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.frames
    }
}
