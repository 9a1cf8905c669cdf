//! PNG renderings of motion fields and reference maps.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use image::{GrayImage, RgbImage};
use rayon::prelude::*;

use super::FrameSink;
use crate::{
    data::grid::{MotionField, ProvenanceMap},
    project::ProjectedFrame,
};

// Hue segments of the Middlebury flow color wheel.
const RY: usize = 15;
const YG: usize = 6;
const GC: usize = 4;
const CB: usize = 11;
const BM: usize = 13;
const MR: usize = 6;
const WHEEL_LEN: usize = RY + YG + GC + CB + BM + MR;

/// Gray level step between two reference slots in provenance renderings.
pub const SLOT_GRAY_STEP: u8 = 32;

fn color_wheel() -> [[f32; 3]; WHEEL_LEN] {
    let mut wheel = [[0.0; 3]; WHEEL_LEN];
    let mut i = 0;
    let mut segment = |len: usize, color: &dyn Fn(f32) -> [f32; 3]| {
        for step in 0..len {
            wheel[i] = color(step as f32 / len as f32);
            i += 1;
        }
    };
    segment(RY, &|t| [1.0, t, 0.0]);
    segment(YG, &|t| [1.0 - t, 1.0, 0.0]);
    segment(GC, &|t| [0.0, 1.0, t]);
    segment(CB, &|t| [0.0, 1.0 - t, 1.0]);
    segment(BM, &|t| [t, 0.0, 1.0]);
    segment(MR, &|t| [1.0, 0.0, 1.0 - t]);
    wheel
}

/// Color of a flow vector already normalised so that the largest vector in
/// the field has length 1.
fn wheel_color(wheel: &[[f32; 3]; WHEEL_LEN], u: f32, v: f32) -> [u8; 3] {
    let radius = u.hypot(v);
    let angle = (-v).atan2(-u) / std::f32::consts::PI;
    let fk = (angle + 1.0) / 2.0 * (WHEEL_LEN - 1) as f32;
    let k0 = (fk.floor() as usize).min(WHEEL_LEN - 1);
    let k1 = (k0 + 1) % WHEEL_LEN;
    let f = fk - k0 as f32;

    let mut rgb = [0; 3];
    for (channel, out) in rgb.iter_mut().enumerate() {
        let mut col = (1.0 - f) * wheel[k0][channel] + f * wheel[k1][channel];
        if radius <= 1.0 {
            col = 1.0 - radius * (1.0 - col);
        } else {
            col *= 0.75;
        }
        *out = (255.0 * col).clamp(0.0, 255.0) as u8;
    }
    rgb
}

fn max_magnitude(field: &MotionField) -> f32 {
    field
        .cells()
        .iter()
        .map(|mv| mv.magnitude())
        .fold(0.0, f32::max)
}

/// Renders a motion field on the Middlebury color wheel.
///
/// Hue encodes direction, saturation encodes magnitude relative to the
/// largest vector in the field. A zero field renders white.
#[inline]
pub fn render_flow(field: &MotionField) -> RgbImage {
    let wheel = color_wheel();
    let scale = max_magnitude(field).max(f32::EPSILON);
    let width = field.cols;
    let mut image = RgbImage::new(width as u32, field.rows as u32);

    image
        .par_chunks_mut((width * 3).max(1))
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let mv = field[y][x];
                px.copy_from_slice(&wheel_color(&wheel, mv.col / scale, mv.row / scale));
            }
        });

    image
}

/// Renders vector magnitude as gray levels, brightest at the largest vector.
#[inline]
pub fn render_magnitude(field: &MotionField) -> GrayImage {
    let scale = max_magnitude(field).max(f32::EPSILON);
    GrayImage::from_fn(field.cols as u32, field.rows as u32, |x, y| {
        let mv = field[y as usize][x as usize];
        image::Luma([(255.0 * mv.magnitude() / scale).round() as u8])
    })
}

/// Renders a provenance map cropped to `width` x `height` pixels, one gray
/// level per slot.
#[inline]
pub fn render_provenance(provenance: &ProvenanceMap, width: usize, height: usize) -> GrayImage {
    let dense = provenance.upsample_blocks(width, height);
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let slot = dense[y as usize][x as usize];
        image::Luma([slot as u8 * SLOT_GRAY_STEP])
    })
}

/// Writes PNG renderings of every frame.
///
/// Files are keyed by the zero-padded frame index:
/// `mv/`, `proj/`, `intensity/` and `reference/` under the output directory.
#[derive(Debug)]
pub struct ImageSink {
    root: PathBuf,
}

impl ImageSink {
    const SUBDIRS: [&'static str; 4] = ["mv", "proj", "intensity", "reference"];

    /// Creates the output directories under `root`.
    ///
    /// # Errors
    ///
    /// - If a directory cannot be created.
    #[inline]
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in Self::SUBDIRS {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("Could not create {}", path.display()))?;
        }
        Ok(Self { root })
    }

    fn path(&self, dir: &str, frame_number: usize, name: &str) -> PathBuf {
        self.root
            .join(dir)
            .join(format!("{:06}_{}.png", frame_number, name))
    }
}

impl FrameSink for ImageSink {
    fn consume(&mut self, frame: &ProjectedFrame) -> anyhow::Result<()> {
        let n = frame.frame_number;
        let (width, height) = (frame.dense.cols, frame.dense.rows);

        let path = self.path("mv", n, "motion_field");
        render_flow(&frame.dense)
            .save(&path)
            .with_context(|| format!("Could not write {}", path.display()))?;

        let path = self.path("proj", n, "projected_field");
        render_flow(&frame.projected)
            .save(&path)
            .with_context(|| format!("Could not write {}", path.display()))?;

        let path = self.path("intensity", n, "motion_intensity");
        render_magnitude(&frame.dense)
            .save(&path)
            .with_context(|| format!("Could not write {}", path.display()))?;

        let path = self.path("reference", n, "reference_map");
        render_provenance(&frame.provenance, width, height)
            .save(&path)
            .with_context(|| format!("Could not write {}", path.display()))?;

        Ok(())
    }
}
