//! Reference topology of the hierarchical golden-frame GOP.
//!
//! For each coded frame this works out which earlier frame each of the eight
//! reference slots points at. The rules were derived from the reference
//! structure of one specific encoder preset, so the tier tables are
//! reproduced as fixed behaviour rather than derived from AV1 syntax.


pub mod golden;

use std::num::NonZeroUsize;

use arrayvec::ArrayVec;
use log::debug;

pub use self::golden::GoldenFrameSet;
use crate::{
    error::{Error, Result},
    refs::{REF_FRAMES, ReferenceSlotMap},
};

/// Longest look-back chain any tier builds.
pub const MAX_LOOK_BACK: usize = 5;

/// Where a slot takes its frame from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotSource {
    /// The last keyframe
    Keyframe,
    /// `max(last_keyframe, frame - n)`
    Behind(usize),
    /// n-th entry of the look-back chain
    LookBack(usize),
    /// n-th golden frame, oldest first
    Golden(usize),
}

use self::SlotSource::{Behind, Golden, Keyframe, LookBack};

/// Fixed slot assignment of one tier.
#[derive(Debug)]
struct TierTable {
    /// Length of the look-back chain to build
    look_backs: usize,
    slots: [SlotSource; REF_FRAMES],
}

const BASE_TABLE: TierTable = TierTable {
    look_backs: 0,
    slots: [
        Keyframe,
        Behind(1),
        Behind(2),
        Behind(3),
        Keyframe,
        Behind(4),
        Behind(5),
        Behind(6),
    ],
};

const SECOND_TABLE: TierTable = TierTable {
    look_backs: 5,
    slots: [
        Keyframe,
        LookBack(0),
        LookBack(1),
        LookBack(2),
        Golden(1),
        Golden(0),
        LookBack(3),
        LookBack(4),
    ],
};

const THIRD_TABLE: TierTable = TierTable {
    look_backs: 4,
    slots: [
        Keyframe,
        LookBack(0),
        LookBack(1),
        LookBack(2),
        Golden(2),
        Golden(0),
        LookBack(3),
        Golden(1),
    ],
};

const FOURTH_TABLE: TierTable = TierTable {
    look_backs: 3,
    slots: [
        Keyframe,
        LookBack(0),
        LookBack(1),
        LookBack(2),
        Golden(3),
        Golden(0),
        Golden(2),
        Golden(1),
    ],
};

// Latest golden frame first from here on.
const FIFTH_TABLE: TierTable = TierTable {
    look_backs: 3,
    slots: [
        Keyframe,
        LookBack(0),
        LookBack(1),
        LookBack(2),
        Golden(3),
        Golden(2),
        Golden(1),
        Golden(0),
    ],
};

/// Deep tier, shortly after a golden frame was minted: the set still holds
/// five entries and all of them are addressed.
const DEEP_RECENT_TABLE: TierTable = TierTable {
    look_backs: 2,
    slots: [
        Keyframe,
        LookBack(0),
        LookBack(1),
        Golden(3),
        Golden(4),
        Golden(2),
        Golden(1),
        Golden(0),
    ],
};

/// Deep tier once the set has been trimmed back to four entries.
const DEEP_TRIMMED_TABLE: TierTable = FIFTH_TABLE;

/// Hierarchy depth of a frame within its keyframe interval.
///
/// Depth is `(frame - last_keyframe) / (gop_size / 2)`, bucketed. Each tier
/// has its own handler and slot table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// The keyframe itself
    Keyframe,
    /// Within the first half GOP
    Base,
    /// Depth in `(1, 2]`
    Second,
    /// Depth in `(2, 3]`
    Third,
    /// Depth in `(3, 4]`
    Fourth,
    /// Depth in `(4, 5]`
    Fifth,
    /// Depth above 5
    Deep,
}

impl Tier {
    /// Classifies `frame_number` relative to the last keyframe.
    ///
    /// Uses exact integer arithmetic, so odd GOP sizes split their half-GOP
    /// the same way real-valued division would.
    #[inline]
    pub fn classify(frame_number: usize, gop_size: NonZeroUsize, last_keyframe: usize) -> Tier {
        debug_assert!(frame_number >= last_keyframe);
        if frame_number == last_keyframe {
            return Tier::Keyframe;
        }

        // depth <= k  <=>  2 * distance <= k * gop_size
        let twice_distance = 2 * frame_number.saturating_sub(last_keyframe);
        let gop = gop_size.get();
        match (1..=5).find(|&k| twice_distance <= k * gop) {
            Some(1) => Tier::Base,
            Some(2) => Tier::Second,
            Some(3) => Tier::Third,
            Some(4) => Tier::Fourth,
            Some(_) => Tier::Fifth,
            None => Tier::Deep,
        }
    }
}

/// Whether a new golden frame is minted when coding `frame_number`.
///
/// This happens on every half-GOP boundary, counted from frame 0 rather than
/// from the last keyframe.
#[inline]
pub fn mints_golden(frame_number: usize, gop_size: NonZeroUsize) -> bool {
    frame_number >= 1 && (2 * (frame_number - 1)) % gop_size.get() == 0
}

/// Walks back from `frame_number`, skipping golden frames.
///
/// Golden frames are never reused as short-term references, so a candidate
/// that is a golden frame gives way to the next older frame. The chain
/// saturates at the last keyframe.
fn look_back_chain(
    frame_number: usize,
    count: usize,
    last_keyframe: usize,
    golden: &GoldenFrameSet,
) -> ArrayVec<usize, MAX_LOOK_BACK> {
    let mut chain = ArrayVec::new();
    let mut last = frame_number;
    for _ in 0..count {
        let mut candidate = last.saturating_sub(1);
        if golden.contains(candidate) {
            candidate = candidate.saturating_sub(1);
        }
        if candidate < last_keyframe {
            debug!(
                "look-back of frame {} saturated at keyframe {}",
                frame_number, last_keyframe
            );
        }
        last = candidate.max(last_keyframe);
        chain.push(last);
    }
    chain
}

fn fill_slots(
    table: &TierTable,
    frame_number: usize,
    last_keyframe: usize,
    golden: &GoldenFrameSet,
) -> Result<ReferenceSlotMap> {
    let chain = look_back_chain(frame_number, table.look_backs, last_keyframe, golden);
    let mut slots = [last_keyframe; REF_FRAMES];
    for (slot, source) in slots.iter_mut().zip(table.slots.iter()) {
        *slot = match *source {
            Keyframe => last_keyframe,
            Behind(n) => frame_number.saturating_sub(n).max(last_keyframe),
            LookBack(n) => chain[n],
            Golden(n) => golden.get(n).ok_or(Error::GoldenSetUnderflow {
                frame: frame_number,
                index: n,
                len: golden.len(),
            })?,
        };
    }
    Ok(ReferenceSlotMap::from_slots(slots))
}

/// Resolves the reference slots of `frame_number`.
///
/// Takes the golden set left behind by the previous frame and returns the
/// set to hand to the next one. Frames must be driven in increasing order
/// starting at a keyframe. Nothing else is validated.
///
/// # Errors
///
/// - [`Error::GoldenSetUnderflow`] if a tier table addresses a golden frame
///   that has not been minted, which only happens when the driving contract
///   above is broken.
#[inline]
pub fn resolve(
    frame_number: usize,
    gop_size: NonZeroUsize,
    last_keyframe: usize,
    golden: GoldenFrameSet,
) -> Result<(ReferenceSlotMap, GoldenFrameSet)> {
    let tier = Tier::classify(frame_number, gop_size, last_keyframe);

    let mut golden = match tier {
        Tier::Keyframe => {
            return Ok((
                ReferenceSlotMap::filled(last_keyframe),
                golden.update(last_keyframe, last_keyframe, true),
            ));
        }
        Tier::Base => {
            let map = fill_slots(&BASE_TABLE, frame_number, last_keyframe, &golden)?;
            return Ok((map, golden));
        }
        _ if mints_golden(frame_number, gop_size) => {
            golden.update(frame_number - 1, last_keyframe, false)
        }
        _ => golden,
    };

    let table = match tier {
        Tier::Keyframe | Tier::Base => unreachable!("handled above"),
        Tier::Second => &SECOND_TABLE,
        Tier::Third => &THIRD_TABLE,
        Tier::Fourth => &FOURTH_TABLE,
        Tier::Fifth => &FIFTH_TABLE,
        Tier::Deep => deep_table(frame_number, &mut golden)?,
    };

    let map = fill_slots(table, frame_number, last_keyframe, &golden)?;
    Ok((map, golden))
}

/// Picks the deep-tier table, trimming the golden set when the newest golden
/// frame is more than two frames behind.
fn deep_table(frame_number: usize, golden: &mut GoldenFrameSet) -> Result<&'static TierTable> {
    let newest = golden.last().ok_or(Error::GoldenSetUnderflow {
        frame: frame_number,
        index: 0,
        len: 0,
    })?;

    if frame_number.saturating_sub(3) <= newest {
        return Ok(&DEEP_RECENT_TABLE);
    }

    if golden.len() > golden::GOLDEN_STEADY_LEN {
        golden.evict_oldest();
    }
    Ok(&DEEP_TRIMMED_TABLE)
}

/// Topology state threaded from one frame to the next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyState {
    /// GOP size the sequence was encoded with
    pub gop_size: NonZeroUsize,
    /// Most recent keyframe
    pub last_keyframe: usize,
    /// Golden frames in use
    pub golden: GoldenFrameSet,
}

/// Drives [`resolve`] over a sequence, one frame at a time.
///
/// Owns the topology state for the single loop that walks the sequence.
#[derive(Clone, Debug)]
pub struct ReferenceTopologyResolver {
    state: TopologyState,
}

impl ReferenceTopologyResolver {
    /// Starts a resolver anchored at keyframe 0.
    #[inline]
    pub fn new(gop_size: NonZeroUsize) -> Self {
        Self::with_keyframe(gop_size, 0)
    }

    /// Starts a resolver anchored at `last_keyframe`.
    #[inline]
    pub fn with_keyframe(gop_size: NonZeroUsize, last_keyframe: usize) -> Self {
        Self {
            state: TopologyState {
                gop_size,
                last_keyframe,
                golden: GoldenFrameSet::anchored_at(last_keyframe),
            },
        }
    }

    /// Resolves the next frame. `is_keyframe` moves the anchor to this frame
    /// before resolving.
    ///
    /// On error the state is left as it was before the call.
    ///
    /// # Errors
    ///
    /// - See [`resolve`].
    #[inline]
    pub fn resolve_next(
        &mut self,
        frame_number: usize,
        is_keyframe: bool,
    ) -> Result<ReferenceSlotMap> {
        let last_keyframe = if is_keyframe {
            frame_number
        } else {
            self.state.last_keyframe
        };

        let (map, golden) = resolve(
            frame_number,
            self.state.gop_size,
            last_keyframe,
            self.state.golden.clone(),
        )?;

        debug!(
            "frame {}: tier {:?}, slots {}, golden {:?}",
            frame_number,
            Tier::classify(frame_number, self.state.gop_size, last_keyframe),
            map,
            golden.as_slice()
        );

        self.state.last_keyframe = last_keyframe;
        self.state.golden = golden;
        Ok(map)
    }

    /// Current state snapshot.
    #[inline]
    pub fn state(&self) -> &TopologyState {
        &self.state
    }

    /// Most recent keyframe.
    #[inline]
    pub fn last_keyframe(&self) -> usize {
        self.state.last_keyframe
    }

    /// Golden frames in use.
    #[inline]
    pub fn golden(&self) -> &GoldenFrameSet {
        &self.state.golden
    }
}
