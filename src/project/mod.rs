//! Composition of coded motion vectors along the resolved reference chain.
//!
//! Each block's projected vector is its own vector plus the projected vector
//! of the frame it references, sampled where the block's vector points. The
//! chain bottoms out at the last keyframe, whose projected field is zero, so
//! every projected field expresses displacement relative to that keyframe.

#[cfg(test)]
mod tests;

pub mod cache;

use std::{fmt, str::FromStr, sync::Arc};

use log::debug;

pub use self::cache::{LOOKBACK_WINDOW, ProjectedFieldCache};
use crate::{
    data::{
        grid::{BLOCK_SIZE, BlockMotionGrid, Grid, MotionField, ProvenanceMap},
        motion::MotionVector,
    },
    error::{Error, Result},
    refs::{ALL_REF_SLOTS, REF_FRAMES, RefType, ReferenceSlotMap},
    topology::GoldenFrameSet,
};

/// How a reference frame's projected field is read at a non-integer
/// position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[derive(serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Value of the block containing the position
    #[default]
    Nearest,
    /// Interpolated between the four surrounding block centres
    Bilinear,
}

impl FromStr for SamplingMode {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(SamplingMode::Nearest),
            "bilinear" => Ok(SamplingMode::Bilinear),
            _ => Err(format!("unknown sampling mode {s:?}, expected nearest or bilinear")),
        }
    }
}

impl fmt::Display for SamplingMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SamplingMode::Nearest => "nearest",
            SamplingMode::Bilinear => "bilinear",
        })
    }
}

/// Everything derived for one frame.
#[derive(Clone, Debug)]
pub struct ProjectedFrame {
    /// Logical frame index
    pub frame_number: usize,
    /// Resolved reference slots
    pub slot_map: ReferenceSlotMap,
    /// Coded block vectors, as supplied
    pub block_vectors: BlockMotionGrid,
    /// Per-block reference slot, as supplied
    pub provenance: ProvenanceMap,
    /// Block vectors upsampled to pixels and cropped to the output extent
    pub dense: MotionField,
    /// Keyframe-anchored vectors at block resolution
    pub projected_blocks: Arc<BlockMotionGrid>,
    /// Keyframe-anchored vectors upsampled to pixels
    pub projected: MotionField,
}

impl ProjectedFrame {
    /// Whether this frame is the keyframe its slots are anchored at.
    #[inline]
    pub fn is_keyframe(&self) -> bool {
        self.slot_map[RefType::INTRA_FRAME] == self.frame_number
    }
}

/// Projects frames in increasing order, retaining the fields later frames
/// still need.
#[derive(Debug)]
pub struct MotionFieldProjector {
    extent: Option<(usize, usize)>,
    sampling: SamplingMode,
    cache: ProjectedFieldCache,
}

impl MotionFieldProjector {
    /// Creates a projector.
    ///
    /// `extent` is the output `(width, height)` in pixels. `None` uses the
    /// full extent of the first frame's block grid.
    #[inline]
    pub fn new(extent: Option<(usize, usize)>, sampling: SamplingMode) -> Self {
        Self {
            extent,
            sampling,
            cache: ProjectedFieldCache::new(),
        }
    }

    /// Output `(width, height)`, once known.
    #[inline]
    pub fn extent(&self) -> Option<(usize, usize)> {
        self.extent
    }

    /// Retained projected fields.
    #[inline]
    pub fn cache(&self) -> &ProjectedFieldCache {
        &self.cache
    }

    /// Projects one frame.
    ///
    /// `provenance` holds the slot each block was predicted from. Blocks are
    /// composed with the retained projected field of `slot_map[slot]`. On a
    /// keyframe the projected field is zero. The result is retained for
    /// later frames.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedBlockGrid`] if the vector and provenance grids
    ///   differ in shape, or differ from a referenced frame's grid.
    /// - [`Error::InvalidExtent`] if the output extent does not fit the grid.
    /// - [`Error::EvictedReference`] if a referenced frame is not retained.
    #[inline]
    pub fn project(
        &mut self,
        frame_number: usize,
        block_vectors: BlockMotionGrid,
        provenance: ProvenanceMap,
        slot_map: &ReferenceSlotMap,
    ) -> Result<ProjectedFrame> {
        if !block_vectors.same_shape(&provenance) {
            return Err(Error::MalformedBlockGrid {
                frame: frame_number,
                reason: format!(
                    "{}x{} motion vectors but {}x{} reference annotations",
                    block_vectors.cols, block_vectors.rows, provenance.cols, provenance.rows
                ),
            });
        }
        let (width, height) = self.checked_extent(&block_vectors)?;

        let is_keyframe = slot_map[RefType::INTRA_FRAME] == frame_number;
        let projected_blocks = if is_keyframe {
            Grid::new(block_vectors.cols, block_vectors.rows)
        } else {
            let references =
                self.reference_fields(frame_number, &block_vectors, &provenance, slot_map)?;
            compose(&block_vectors, &provenance, &references, self.sampling)
        };
        let projected_blocks = Arc::new(projected_blocks);

        self.cache.insert(frame_number, Arc::clone(&projected_blocks));

        Ok(ProjectedFrame {
            frame_number,
            slot_map: *slot_map,
            dense: block_vectors.upsample_blocks(width, height),
            projected: projected_blocks.upsample_blocks(width, height),
            block_vectors,
            provenance,
            projected_blocks,
        })
    }

    /// Evicts fields no later frame can reference. See
    /// [`ProjectedFieldCache::evict_stale`].
    #[inline]
    pub fn evict_stale(&mut self, current: usize, last_keyframe: usize, golden: &GoldenFrameSet) {
        let evicted = self.cache.evict_stale(current, last_keyframe, golden);
        if evicted > 0 {
            debug!(
                "frame {}: evicted {} projected fields, {} retained",
                current,
                evicted,
                self.cache.len()
            );
        }
    }

    fn checked_extent(&mut self, grid: &BlockMotionGrid) -> Result<(usize, usize)> {
        let grid_width = grid.cols * BLOCK_SIZE;
        let grid_height = grid.rows * BLOCK_SIZE;
        let (width, height) = *self.extent.get_or_insert((grid_width, grid_height));
        if width > grid_width || height > grid_height {
            return Err(Error::InvalidExtent {
                width,
                height,
                grid_width,
                grid_height,
            });
        }
        Ok((width, height))
    }

    /// Looks up the retained field of every slot used by at least one block.
    fn reference_fields(
        &self,
        frame_number: usize,
        block_vectors: &BlockMotionGrid,
        provenance: &ProvenanceMap,
        slot_map: &ReferenceSlotMap,
    ) -> Result<[Option<Arc<BlockMotionGrid>>; REF_FRAMES]> {
        let mut used = [false; REF_FRAMES];
        for &slot in provenance.cells() {
            used[slot.to_index()] = true;
        }

        let mut fields: [Option<Arc<BlockMotionGrid>>; REF_FRAMES] = Default::default();
        for slot in ALL_REF_SLOTS.into_iter().filter(|s| used[s.to_index()]) {
            let reference = slot_map[slot];
            let field = self.cache.get(reference).ok_or(Error::EvictedReference {
                frame: frame_number,
                slot,
                reference,
            })?;
            if !field.same_shape(block_vectors) {
                return Err(Error::MalformedBlockGrid {
                    frame: frame_number,
                    reason: format!(
                        "{}x{} blocks but reference frame {} has {}x{}",
                        block_vectors.cols, block_vectors.rows, reference, field.cols, field.rows
                    ),
                });
            }
            fields[slot.to_index()] = Some(Arc::clone(field));
        }
        Ok(fields)
    }
}

fn compose(
    block_vectors: &BlockMotionGrid,
    provenance: &ProvenanceMap,
    references: &[Option<Arc<BlockMotionGrid>>; REF_FRAMES],
    sampling: SamplingMode,
) -> BlockMotionGrid {
    let mut projected = Grid::new(block_vectors.cols, block_vectors.rows);
    for row in 0..block_vectors.rows {
        for col in 0..block_vectors.cols {
            let mv = block_vectors[row][col];
            let slot = provenance[row][col];
            // Every used slot was resolved by `reference_fields`.
            let inherited = references[slot.to_index()]
                .as_deref()
                .map_or(MotionVector::ZERO, |field| {
                    sample_at(field, row, col, mv, sampling)
                });
            projected[row][col] = mv + inherited;
        }
    }
    projected
}

/// Reads `field` where the block at `(row, col)` lands after moving by `mv`.
///
/// Positions are taken from the block centre, in pixels, and clamped to the
/// grid.
pub(crate) fn sample_at(
    field: &BlockMotionGrid,
    row: usize,
    col: usize,
    mv: MotionVector,
    sampling: SamplingMode,
) -> MotionVector {
    let block = BLOCK_SIZE as f32;
    let y = (row as f32 + 0.5) * block + mv.row;
    let x = (col as f32 + 0.5) * block + mv.col;

    match sampling {
        SamplingMode::Nearest => {
            field.clamped((y / block).floor() as isize, (x / block).floor() as isize)
        }
        SamplingMode::Bilinear => {
            // block centres sit at half-integer block coordinates
            let v = y / block - 0.5;
            let u = x / block - 0.5;
            let (r0, c0) = (v.floor(), u.floor());
            let (fy, fx) = (v - r0, u - c0);
            let (r0, c0) = (r0 as isize, c0 as isize);

            let top = field.clamped(r0, c0) * (1.0 - fx) + field.clamped(r0, c0 + 1) * fx;
            let bottom =
                field.clamped(r0 + 1, c0) * (1.0 - fx) + field.clamped(r0 + 1, c0 + 1) * fx;
            top * (1.0 - fy) + bottom * fy
        }
    }
}
