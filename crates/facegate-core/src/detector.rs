//! Detector adapter: the boundary to the external face analyzer.
//!
//! Runs detection through an ordered list of configurations, from balanced to
//! permissive, stopping at the first one that finds a face. Every box the
//! analyzer reports is embedded; suppression of duplicate boxes belongs to
//! the analyzer, and the multi-face policy belongs to the evaluator.

use crate::types::{BoundingBox, DetectionSample, Embedding, EmbeddingError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Sensitivity configuration passed to the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub input_size: u32,
    pub score_threshold: f32,
}

impl DetectorConfig {
    pub const fn new(input_size: u32, score_threshold: f32) -> Self {
        Self { input_size, score_threshold }
    }
}

/// Escalation tiers: primary, then two progressively more permissive retries.
pub const DEFAULT_TIERS: [DetectorConfig; 3] = [
    DetectorConfig::new(416, 0.50),
    DetectorConfig::new(512, 0.30),
    DetectorConfig::new(1024, 0.01),
];

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("analyzer protocol error: {0}")]
    Protocol(String),
    #[error("analyzer reported: {0}")]
    Remote(String),
    #[error("analyzer did not answer within {0:?}")]
    Timeout(Duration),
}

/// Why a detection cycle produced no usable samples.
#[derive(Error, Debug)]
pub enum DetectionFailure {
    #[error("face analyzer failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("analyzer returned an invalid embedding: {0}")]
    InvalidEmbedding(#[from] EmbeddingError),
}

/// External detection and embedding capability.
///
/// Frames are 8-bit grayscale, `width * height` bytes, row-major.
#[allow(async_fn_in_trait)]
pub trait FaceAnalyzer {
    async fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        config: &DetectorConfig,
    ) -> Result<Vec<BoundingBox>, AnalyzerError>;

    async fn embed(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Vec<f32>, AnalyzerError>;
}

/// Samples from one frame, plus which tier produced them.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Sorted by confidence, highest first.
    pub samples: Vec<DetectionSample>,
    pub tier: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DetectorAdapter {
    tiers: Vec<DetectorConfig>,
}

impl Default for DetectorAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_TIERS.to_vec())
    }
}

impl DetectorAdapter {
    pub fn new(tiers: Vec<DetectorConfig>) -> Self {
        Self { tiers }
    }

    /// Detect and embed every face in `frame`.
    ///
    /// An empty result is not an error; any analyzer failure is.
    pub async fn detect<A: FaceAnalyzer>(
        &self,
        analyzer: &mut A,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Detection, DetectionFailure> {
        for (tier, config) in self.tiers.iter().enumerate() {
            let mut faces: Vec<BoundingBox> = analyzer
                .detect(frame, width, height, config)
                .await?
                .into_iter()
                .filter(|f| f.confidence >= config.score_threshold)
                .collect();

            if faces.is_empty() {
                tracing::trace!(tier, input_size = config.input_size, "no face at this tier");
                continue;
            }

            faces.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            tracing::debug!(
                tier,
                input_size = config.input_size,
                score_threshold = config.score_threshold,
                faces = faces.len(),
                "faces detected"
            );

            let mut samples = Vec::with_capacity(faces.len());
            for face in faces {
                let values = analyzer.embed(frame, width, height, &face).await?;
                samples.push(DetectionSample {
                    embedding: Embedding::new(values)?,
                    confidence: face.confidence,
                    bounding_box: Some(face),
                });
            }

            return Ok(Detection { samples, tier: Some(tier) });
        }

        Ok(Detection::default())
    }
}
