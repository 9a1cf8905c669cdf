use thiserror::Error;

use crate::refs::RefType;

/// Errors raised by topology resolution and motion-field projection.
///
/// Every variant is fatal for the sequence being processed. The computation
/// is deterministic, so recovery means restarting from the last keyframe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The GOP size must be a positive integer.
    #[error("invalid GOP size {0:?}, expected a positive integer")]
    InvalidGopSize(String),
    /// The requested output extent does not fit the coded block grid.
    #[error("output extent {width}x{height} exceeds the coded grid extent {grid_width}x{grid_height}")]
    InvalidExtent {
        /// Requested output width in pixels
        width: usize,
        /// Requested output height in pixels
        height: usize,
        /// Width covered by the block grid
        grid_width: usize,
        /// Height covered by the block grid
        grid_height: usize,
    },
    /// A metric name did not match any known metric.
    #[error("unknown metric {0:?}")]
    UnknownMetric(String),
    /// The per-frame block data does not form a consistent grid.
    #[error("malformed block grid in frame {frame}: {reason}")]
    MalformedBlockGrid {
        /// Frame whose data is malformed
        frame: usize,
        /// What is wrong with it
        reason: String,
    },
    /// A block references a frame whose projected field is no longer retained.
    #[error("frame {frame} references frame {reference} through slot {slot:?}, which is not retained")]
    EvictedReference {
        /// Frame being projected
        frame: usize,
        /// Reference slot used by the block
        slot: RefType,
        /// Frame the slot resolved to
        reference: usize,
    },
    /// A tier table read past the end of the golden-frame set.
    ///
    /// Only happens when frames are not driven in order from a keyframe, or
    /// with GOP structures other than the hierarchical one reproduced here.
    #[error("frame {frame} needs golden frame #{index} but the golden set holds {len}")]
    GoldenSetUnderflow {
        /// Frame being resolved
        frame: usize,
        /// Golden-set position requested
        index: usize,
        /// Current golden-set length
        len: usize,
    },
}

/// Shorthand for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
