//! Per-frame scalar metrics and their text log.

use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    str::FromStr,
};

use anyhow::Context;

use super::FrameSink;
use crate::{data::grid::MotionField, error::Error, project::ProjectedFrame};

/// A per-frame scalar computed from the projected field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum MetricKind {
    /// Mean absolute difference between neighbouring pixels, summed over
    /// both directions and both components
    TotalVariation,
    /// Mean vector length
    MeanMagnitude,
    /// Largest vector length
    MaxMagnitude,
}

impl MetricKind {
    /// Column name in the metrics log.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            MetricKind::TotalVariation => "total_variation",
            MetricKind::MeanMagnitude => "mean_magnitude",
            MetricKind::MaxMagnitude => "max_magnitude",
        }
    }

    /// Computes the metric. An empty field yields 0.
    #[inline]
    pub fn compute(self, field: &MotionField) -> f64 {
        let cells = field.cells();
        if cells.is_empty() {
            return 0.0;
        }
        match self {
            MetricKind::TotalVariation => {
                let mut sum = 0.0f64;
                for y in 0..field.rows {
                    for x in 0..field.cols {
                        let here = field[y][x];
                        if x + 1 < field.cols {
                            let d = field[y][x + 1] - here;
                            sum += f64::from(d.row.abs() + d.col.abs());
                        }
                        if y + 1 < field.rows {
                            let d = field[y + 1][x] - here;
                            sum += f64::from(d.row.abs() + d.col.abs());
                        }
                    }
                }
                sum / cells.len() as f64
            }
            MetricKind::MeanMagnitude => {
                cells.iter().map(|mv| f64::from(mv.magnitude())).sum::<f64>() / cells.len() as f64
            }
            MetricKind::MaxMagnitude => cells
                .iter()
                .map(|mv| f64::from(mv.magnitude()))
                .fold(0.0, f64::max),
        }
    }
}

impl FromStr for MetricKind {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "tv" | "total_variation" => Ok(MetricKind::TotalVariation),
            "mean" | "mean_magnitude" => Ok(MetricKind::MeanMagnitude),
            "max" | "max_magnitude" => Ok(MetricKind::MaxMagnitude),
            _ => Err(Error::UnknownMetric(s.to_owned())),
        }
    }
}

impl fmt::Display for MetricKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comma-separated log with one row per frame.
///
/// The header `frame,<metric>,...` is written on creation.
#[derive(Debug)]
pub struct MetricsLog<W: Write = BufWriter<File>> {
    writer: W,
    metrics: Vec<MetricKind>,
}

impl MetricsLog {
    /// Creates the log file at `path`, truncating it.
    ///
    /// # Errors
    ///
    /// - If the file cannot be created.
    #[inline]
    pub fn create<P: AsRef<Path>>(path: P, metrics: Vec<MetricKind>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file =
            File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
        Self::from_writer(BufWriter::new(file), metrics)
    }
}

impl<W: Write> MetricsLog<W> {
    /// Wraps any writer.
    ///
    /// # Errors
    ///
    /// - If the header cannot be written.
    #[inline]
    pub fn from_writer(mut writer: W, metrics: Vec<MetricKind>) -> anyhow::Result<Self> {
        let mut header = String::from("frame");
        for metric in &metrics {
            header.push(',');
            header.push_str(metric.name());
        }
        writeln!(writer, "{}", header).context("Could not write metrics header")?;
        Ok(Self { writer, metrics })
    }

    /// Metrics written per row.
    #[inline]
    pub fn metrics(&self) -> &[MetricKind] {
        &self.metrics
    }

    /// Appends one row.
    ///
    /// # Errors
    ///
    /// - If the row cannot be written.
    #[inline]
    pub fn append(&mut self, frame_number: usize, field: &MotionField) -> anyhow::Result<()> {
        let mut row = frame_number.to_string();
        for metric in &self.metrics {
            row.push_str(&format!(",{:.6}", metric.compute(field)));
        }
        writeln!(self.writer, "{}", row)
            .with_context(|| format!("Could not write metrics of frame {}", frame_number))
    }

    /// Returns the underlying writer.
    #[inline]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FrameSink for MetricsLog<W> {
    #[inline]
    fn consume(&mut self, frame: &ProjectedFrame) -> anyhow::Result<()> {
        self.append(frame.frame_number, &frame.projected)
    }

    #[inline]
    fn finish(&mut self) -> anyhow::Result<()> {
        self.writer.flush().context("Could not flush metrics log")
    }
}
