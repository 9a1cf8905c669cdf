//! Consumers of projected frames.
//!
//! The driver hands every emitted frame to each sink in turn, on the calling
//! thread. A sink error aborts the run.


pub mod metrics;
pub mod raw;
pub mod render;

pub use self::{
    metrics::{MetricKind, MetricsLog},
    raw::RawSink,
    render::ImageSink,
};
use crate::project::ProjectedFrame;

/// Receives frames in increasing frame order.
pub trait FrameSink {
    /// Called once per emitted frame.
    ///
    /// # Errors
    ///
    /// - If the frame could not be written.
    fn consume(&mut self, frame: &ProjectedFrame) -> anyhow::Result<()>;

    /// Called once after the last frame.
    ///
    /// # Errors
    ///
    /// - If buffered output could not be flushed.
    #[inline]
    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps every frame in memory.
#[derive(Debug, Default)]
pub struct CollectSink {
    /// Frames received so far
    pub frames: Vec<ProjectedFrame>,
    /// Whether [`FrameSink::finish`] was called
    pub finished: bool,
}

impl FrameSink for CollectSink {
    #[inline]
    fn consume(&mut self, frame: &ProjectedFrame) -> anyhow::Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    #[inline]
    fn finish(&mut self) -> anyhow::Result<()> {
        self.finished = true;
        Ok(())
    }
}
