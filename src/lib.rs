//! Dense motion fields from the motion vectors of an AV1 bitstream.
//!
//! The encoder's own motion vectors only describe displacement relative to
//! whichever reference frame each block was predicted from. This crate
//! reconstructs which source frame every reference slot pointed at, for the
//! hierarchical golden-frame GOP structure of a fixed encoder preset, and
//! composes the vectors along that chain so that every frame's field is
//! expressed relative to the last keyframe.
//!
//! The input is the per-frame JSON dump of a bitstream inspector (see
//! [`inspect`]). Finished frames are handed to [`FrameSink`]s.

#[cfg(test)]
mod tests;

mod data;
mod error;
pub mod inspect;
pub mod project;
mod refs;
pub mod sink;
pub mod topology;

use std::{
    collections::BTreeMap,
    fmt,
    num::NonZeroUsize,
    str::FromStr,
    sync::{Arc, mpsc::sync_channel},
    thread,
    time::Instant,
};

use anyhow::Context;
use log::info;

pub use crate::{
    data::{
        grid::{BLOCK_SIZE, BlockMotionGrid, Grid, MotionField, ProvenanceMap},
        motion::MotionVector,
    },
    error::Error,
    inspect::{InspectorFrame, read_inspector_dump},
    project::{MotionFieldProjector, ProjectedFrame, SamplingMode},
    refs::{ALL_REF_SLOTS, REF_FRAMES, RefType, ReferenceSlotMap},
    sink::FrameSink,
    topology::{GoldenFrameSet, ReferenceTopologyResolver, Tier},
};

const FRAME_PREFETCH_DEPTH: usize = 4;

/// Order in which the source video was fed to the encoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Direction {
    /// Frames were encoded in display order, giving backward motion
    #[default]
    Backward,
    /// Frames were encoded in reverse, giving forward motion
    Forward,
}

impl Direction {
    /// Physical video frame shown at logical index `logical` of a sequence
    /// of `total` frames.
    #[inline]
    pub fn physical_index(self, logical: usize, total: usize) -> usize {
        match self {
            Direction::Backward => logical,
            Direction::Forward => total.saturating_sub(1).saturating_sub(logical),
        }
    }
}

impl fmt::Display for Direction {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Backward => "backward",
            Direction::Forward => "forward",
        })
    }
}

/// Parses a GOP size given as text.
///
/// # Errors
///
/// - [`Error::InvalidGopSize`] unless the text is a positive integer.
#[inline]
pub fn parse_gop_size(value: &str) -> Result<NonZeroUsize, Error> {
    NonZeroUsize::from_str(value.trim()).map_err(|_| Error::InvalidGopSize(value.to_owned()))
}

/// Options determining how motion fields are extracted.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionOptions {
    /// Keyframe interval the sequence was encoded with.
    /// Golden frames are minted every half GOP.
    pub gop_size: NonZeroUsize,
    /// Encoding order of the source video.
    pub direction: Direction,
    /// How reference fields are read at non-integer positions.
    pub sampling: SamplingMode,
    /// Output `(width, height)` in pixels.
    /// Defaults to the full extent of the block grid.
    pub extent: Option<(usize, usize)>,
}

impl ExtractionOptions {
    /// Options with the given GOP size and everything else at its default.
    #[inline]
    pub fn new(gop_size: NonZeroUsize) -> Self {
        Self {
            gop_size,
            direction: Direction::default(),
            sampling: SamplingMode::default(),
            extent: None,
        }
    }

    /// Checks the options against the block grid of the sequence.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidExtent`] if the output extent is empty or larger
    ///   than the grid.
    #[inline]
    pub fn validate(&self, grid: &BlockMotionGrid) -> Result<(), Error> {
        let Some((width, height)) = self.extent else {
            return Ok(());
        };
        let grid_width = grid.cols * BLOCK_SIZE;
        let grid_height = grid.rows * BLOCK_SIZE;
        if width == 0 || height == 0 || width > grid_width || height > grid_height {
            return Err(Error::InvalidExtent {
                width,
                height,
                grid_width,
                grid_height,
            });
        }
        Ok(())
    }
}

/// Results from a motion field extraction pass.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ExtractionResults {
    /// The number of frames handed to the sinks.
    pub frame_count: usize,
    /// The frames the projection was anchored at, including frame 0.
    pub keyframes: Vec<usize>,
    /// The resolved reference slots of every processed frame.
    pub slot_maps: BTreeMap<usize, ReferenceSlotMap>,
    /// The physical video frame of each logical frame index.
    pub physical_frames: Vec<usize>,
    /// Average speed (FPS)
    pub speed: f64,
}

/// Resolves and projects a whole inspector dump, handing every frame to
/// `sinks` in order.
///
/// Frame 0 seeds the state and is not emitted, nor is the last record of
/// the dump. Records tagged as keyframes move the anchor.
///
/// # Arguments
///
/// - `progress_callback`: An optional callback that will fire after each frame
///   is consumed by the sinks. Arguments passed in will be, in order, the
///   number of frames emitted, and the number of keyframes seen.
///
/// # Errors
///
/// - If the options do not fit the sequence.
/// - If a record is malformed or references a frame that is no longer
///   retained. The error names the frame.
/// - If a sink fails.
#[inline]
pub fn extract_motion_fields(
    frames: Vec<InspectorFrame>,
    opts: ExtractionOptions,
    sinks: &mut [&mut dyn FrameSink],
    progress_callback: Option<&dyn Fn(usize, usize)>,
) -> anyhow::Result<ExtractionResults> {
    let total = frames.len();
    if let Some(first) = frames.first() {
        let motion = first.to_motion(0)?;
        opts.validate(&motion.vectors)?;
    }
    info!(
        "extracting {} frames, gop {}, {} sampling, {} motion",
        total, opts.gop_size, opts.sampling, opts.direction
    );

    let (frame_tx, frame_rx) = sync_channel::<Arc<ProjectedFrame>>(FRAME_PREFETCH_DEPTH);

    let projection_handle = thread::spawn(move || -> anyhow::Result<ExtractionResults> {
        let mut resolver = ReferenceTopologyResolver::new(opts.gop_size);
        let mut projector = MotionFieldProjector::new(opts.extent, opts.sampling);
        let mut keyframes = Vec::new();
        let mut slot_maps = BTreeMap::new();

        let start_time = Instant::now();
        let mut emitted = 0usize;
        for (frameno, record) in frames.into_iter().enumerate().take(total.saturating_sub(1)) {
            let motion = record.to_motion(frameno)?;
            let is_keyframe = frameno == 0 || motion.is_keyframe;

            let slot_map = resolver
                .resolve_next(frameno, is_keyframe)
                .with_context(|| format!("Could not resolve the references of frame {}", frameno))?;
            let frame = projector
                .project(frameno, motion.vectors, motion.references, &slot_map)
                .with_context(|| format!("Could not project frame {}", frameno))?;
            projector.evict_stale(frameno, resolver.last_keyframe(), resolver.golden());

            if is_keyframe {
                keyframes.push(frameno);
            }
            slot_maps.insert(frameno, slot_map);

            if frameno == 0 {
                continue;
            }
            emitted += 1;
            if frame_tx.send(Arc::new(frame)).is_err() {
                // the sink side failed and stopped listening
                break;
            }
        }

        Ok(ExtractionResults {
            frame_count: emitted,
            keyframes,
            slot_maps,
            physical_frames: (0..total)
                .map(|logical| opts.direction.physical_index(logical, total))
                .collect(),
            speed: emitted as f64 / start_time.elapsed().as_secs_f64(),
        })
    });

    let mut consumed = 0usize;
    let mut keyframe_count = usize::from(total > 0);
    let mut sink_result = Ok(());
    'frames: for frame in frame_rx.iter() {
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.consume(&frame) {
                sink_result =
                    Err(e.context(format!("Could not write frame {}", frame.frame_number)));
                break 'frames;
            }
        }
        consumed += 1;
        if frame.is_keyframe() {
            keyframe_count += 1;
        }
        if let Some(progress_fn) = progress_callback {
            progress_fn(consumed, keyframe_count);
        }
    }
    drop(frame_rx);

    let results = projection_handle
        .join()
        .map_err(|_| anyhow::anyhow!("motion field projection thread panicked"))?;
    sink_result?;
    let results = results?;

    for sink in sinks.iter_mut() {
        sink.finish()?;
    }

    info!(
        "emitted {} frames, {} keyframes, {:.2} fps",
        results.frame_count,
        results.keyframes.len(),
        results.speed
    );
    Ok(results)
}

