use std::{
    fmt,
    ops::{Index, IndexMut},
};

pub const REF_FRAMES_LOG2: usize = 3;
/// Number of reference slots a coded frame can address.
pub const REF_FRAMES: usize = 1 << REF_FRAMES_LOG2;

/// All slots, in slot order.
pub const ALL_REF_SLOTS: [RefType; REF_FRAMES] = [
    RefType::INTRA_FRAME,
    RefType::LAST_FRAME,
    RefType::LAST2_FRAME,
    RefType::LAST3_FRAME,
    RefType::GOLDEN_FRAME,
    RefType::BWDREF_FRAME,
    RefType::ALTREF2_FRAME,
    RefType::ALTREF_FRAME,
];

/// A reference slot, as annotated per block by the bitstream inspector.
///
/// Slot 0 is used by intra blocks and always resolves to the last keyframe,
/// whose projected field is zero.
#[allow(non_camel_case_types)]
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug, Hash, Default)]
#[repr(u8)]
pub enum RefType {
    /// Intra-coded block, anchored at the last keyframe
    #[default]
    INTRA_FRAME = 0,
    /// Nearest past frame
    LAST_FRAME = 1,
    /// Second nearest past frame
    LAST2_FRAME = 2,
    /// Third nearest past frame
    LAST3_FRAME = 3,
    /// Long-lived golden frame
    GOLDEN_FRAME = 4,
    /// Backward reference
    BWDREF_FRAME = 5,
    /// Second alternate reference
    ALTREF2_FRAME = 6,
    /// Alternate reference
    ALTREF_FRAME = 7,
}

impl RefType {
    /// Maps an inspector reference annotation to a slot.
    ///
    /// Negative values (no reference) are treated like intra blocks.
    /// Returns `None` for values outside the eight slots.
    #[inline]
    pub const fn from_annotation(value: i32) -> Option<Self> {
        Some(match value {
            i32::MIN..=0 => RefType::INTRA_FRAME,
            1 => RefType::LAST_FRAME,
            2 => RefType::LAST2_FRAME,
            3 => RefType::LAST3_FRAME,
            4 => RefType::GOLDEN_FRAME,
            5 => RefType::BWDREF_FRAME,
            6 => RefType::ALTREF2_FRAME,
            7 => RefType::ALTREF_FRAME,
            _ => return None,
        })
    }

    /// Slot index, 0-7.
    #[inline]
    pub const fn to_index(self) -> usize {
        self as usize
    }
}

/// Which source frame each of the eight reference slots points at.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ReferenceSlotMap([usize; REF_FRAMES]);

impl ReferenceSlotMap {
    /// A map with every slot pointing at `frame`.
    #[inline]
    pub const fn filled(frame: usize) -> Self {
        Self([frame; REF_FRAMES])
    }

    /// Builds a map from slot values in slot order.
    #[inline]
    pub const fn from_slots(slots: [usize; REF_FRAMES]) -> Self {
        Self(slots)
    }

    /// Slot values in slot order.
    #[inline]
    pub const fn slots(&self) -> &[usize; REF_FRAMES] {
        &self.0
    }

    /// Oldest frame referenced by any slot.
    #[inline]
    pub fn oldest(&self) -> usize {
        self.0.iter().copied().min().unwrap_or_default()
    }

    /// Iterates `(slot, frame)` pairs in slot order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (RefType, usize)> + '_ {
        ALL_REF_SLOTS.iter().copied().zip(self.0.iter().copied())
    }
}

impl Index<RefType> for ReferenceSlotMap {
    type Output = usize;

    #[inline]
    fn index(&self, slot: RefType) -> &usize {
        &self.0[slot.to_index()]
    }
}

impl IndexMut<RefType> for ReferenceSlotMap {
    #[inline]
    fn index_mut(&mut self, slot: RefType) -> &mut usize {
        &mut self.0[slot.to_index()]
    }
}

impl fmt::Display for ReferenceSlotMap {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, frame) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{i}: {frame}")?;
        }
        write!(f, "}}")
    }
}
