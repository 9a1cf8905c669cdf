//! Reader for the per-frame JSON dump of an AV1 bitstream inspector.
//!
//! The dump is a JSON array with one object per decoded frame. Only the
//! fields needed for projection are read:
//!
//! ```text
//! [{ "frame": 0, "frameType": 0, "showFrame": 1,
//!    "motionVectors": [[r0, c0, r1, c1, ...], ...],
//!    "referenceFrame": [[ref0, ref1, ...], ...] }, ...]
//! ```
//!
//! Rows may also be written as lists of per-block tuples. Motion vectors are
//! in 1/8 pel, row component first. Reference annotations use the AV1
//! numbering: 0 is intra, 1-7 are `LAST_FRAME` through `ALTREF_FRAME`, and a
//! negative value means no reference.


use std::{fs::File, io::BufReader, path::Path};

use anyhow::Context;
use serde::Deserialize;

use crate::{
    data::{
        grid::{BlockMotionGrid, Grid, ProvenanceMap},
        motion::MotionVector,
    },
    error::{Error, Result},
    refs::RefType,
};

/// `frameType` of an intra-only keyframe.
pub const KEY_FRAME: u8 = 0;

const MV_FIELDS: usize = 4;
const REF_FIELDS: usize = 2;

/// One row of a per-block array, either flat or grouped per block.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MiRow {
    Flat(Vec<i32>),
    Grouped(Vec<Vec<i32>>),
}

impl MiRow {
    /// Splits the row into blocks of `fields` values.
    fn blocks(&self, fields: usize) -> Option<Vec<&[i32]>> {
        match self {
            MiRow::Flat(values) => {
                if values.len() % fields != 0 {
                    return None;
                }
                Some(values.chunks(fields).collect())
            }
            MiRow::Grouped(blocks) => Some(blocks.iter().map(Vec::as_slice).collect()),
        }
    }
}

/// A frame record as written by the inspector.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorFrame {
    /// Frame counter written by the inspector, if any
    #[serde(default)]
    pub frame: Option<usize>,
    /// AV1 frame type, [`KEY_FRAME`] for keyframes
    #[serde(default)]
    pub frame_type: Option<u8>,
    /// Whether the frame is shown
    #[serde(default)]
    pub show_frame: Option<u8>,
    motion_vectors: Vec<MiRow>,
    reference_frame: Vec<MiRow>,
}

/// Block-level data of one frame, validated.
#[derive(Debug, Clone)]
pub struct FrameMotion {
    /// Whether the frame is a keyframe
    pub is_keyframe: bool,
    /// First motion vector of every block
    pub vectors: BlockMotionGrid,
    /// First reference slot of every block
    pub references: ProvenanceMap,
}

impl InspectorFrame {
    /// Whether the inspector tagged this frame as a keyframe.
    #[inline]
    pub fn is_keyframe(&self) -> bool {
        self.frame_type == Some(KEY_FRAME)
    }

    /// Validates the record and extracts the per-block grids.
    ///
    /// `frame_number` is the record's position in the dump, used in errors.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedBlockGrid`] for ragged rows, arrays of different
    ///   shapes, short block tuples or reference values outside the eight
    ///   slots.
    #[inline]
    pub fn to_motion(&self, frame_number: usize) -> Result<FrameMotion> {
        let malformed = |reason: String| Error::MalformedBlockGrid {
            frame: frame_number,
            reason,
        };

        let vectors = read_grid(&self.motion_vectors, MV_FIELDS, |block| {
            block
                .get(..2)
                .map(|mv| MotionVector::from_eighth_pel(mv[0], mv[1]))
                .ok_or_else(|| format!("motion vector tuple {block:?} is too short"))
        })
        .map_err(|reason| malformed(format!("motionVectors: {reason}")))?;

        let references = read_grid(&self.reference_frame, REF_FIELDS, |block| {
            let value = block.first().copied().unwrap_or(-1);
            RefType::from_annotation(value)
                .ok_or_else(|| format!("reference value {value} is not a slot"))
        })
        .map_err(|reason| malformed(format!("referenceFrame: {reason}")))?;

        if !vectors.same_shape(&references) {
            return Err(malformed(format!(
                "{}x{} motion vectors but {}x{} reference annotations",
                vectors.cols, vectors.rows, references.cols, references.rows
            )));
        }

        Ok(FrameMotion {
            is_keyframe: self.is_keyframe(),
            vectors,
            references,
        })
    }
}

fn read_grid<T, F>(
    rows: &[MiRow],
    fields: usize,
    mut read_block: F,
) -> std::result::Result<Grid<T>, String>
where
    F: FnMut(&[i32]) -> std::result::Result<T, String>,
{
    let mut cells = Vec::new();
    let mut cols = None;
    for (y, row) in rows.iter().enumerate() {
        let blocks = row
            .blocks(fields)
            .ok_or_else(|| format!("row {y} does not hold whole blocks of {fields} values"))?;
        match cols {
            None => cols = Some(blocks.len()),
            Some(c) if c != blocks.len() => {
                return Err(format!("row {y} has {} blocks, expected {c}", blocks.len()));
            }
            Some(_) => {}
        }
        for block in blocks {
            cells.push(read_block(block)?);
        }
    }

    let cols = cols.unwrap_or(0);
    Grid::from_cells(cols, rows.len(), cells).ok_or_else(|| "inconsistent grid size".to_owned())
}

/// Parses a whole inspector dump from a JSON string.
///
/// # Errors
///
/// - If the text is not a JSON array of frame records.
#[inline]
pub fn parse_inspector_dump(json: &str) -> anyhow::Result<Vec<InspectorFrame>> {
    serde_json::from_str(json).context("Could not parse inspector dump")
}

/// Reads a whole inspector dump from disk.
///
/// # Errors
///
/// - If the file cannot be opened or is not a JSON array of frame records.
#[inline]
pub fn read_inspector_dump<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<InspectorFrame>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Could not open inspector dump {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Could not parse inspector dump {}", path.display()))
}
