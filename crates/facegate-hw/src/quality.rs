//! Frame quality gate.
//!
//! Rejects frames that cannot produce a meaningful decision before the
//! detector is invoked: stream not warmed up, camera covered (dark), or a
//! flat/frozen picture that still passes the brightness check.

use crate::frame::{self, Frame, LumaStats};

pub const DEFAULT_DARK_THRESHOLD: f32 = 20.0;
pub const DEFAULT_FLATNESS_THRESHOLD: f32 = 8.0;
/// Samples per axis for the downsampled statistics.
pub const DEFAULT_SAMPLE_GRID: u32 = 64;

/// Outcome of inspecting one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameVerdict {
    Usable(LumaStats),
    /// Reported dimensions are zero or the buffer is incomplete.
    NotReady,
    Occluded { mean_luma: f32 },
    Static { variance: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    /// Mean luma (0–255) below which the camera counts as occluded.
    pub dark_threshold: f32,
    /// Luma variance below which the picture counts as static.
    pub flatness_threshold: f32,
    pub sample_grid: u32,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            dark_threshold: DEFAULT_DARK_THRESHOLD,
            flatness_threshold: DEFAULT_FLATNESS_THRESHOLD,
            sample_grid: DEFAULT_SAMPLE_GRID,
        }
    }
}

impl QualityGate {
    pub fn new(dark_threshold: f32, flatness_threshold: f32) -> Self {
        Self { dark_threshold, flatness_threshold, ..Self::default() }
    }

    /// Inspect `frame`, given the dimensions the stream currently reports.
    ///
    /// Pure: fails closed and touches nothing beyond its inputs.
    pub fn inspect(&self, frame: &Frame, reported_width: u32, reported_height: u32) -> FrameVerdict {
        if reported_width == 0 || reported_height == 0 || !frame.is_complete() {
            return FrameVerdict::NotReady;
        }

        let Some(stats) = frame::sample_luma(&frame.data, frame.width, frame.height, self.sample_grid)
        else {
            return FrameVerdict::NotReady;
        };

        if stats.mean < self.dark_threshold {
            return FrameVerdict::Occluded { mean_luma: stats.mean };
        }
        if stats.variance < self.flatness_threshold {
            return FrameVerdict::Static { variance: stats.variance };
        }
        FrameVerdict::Usable(stats)
    }
}
