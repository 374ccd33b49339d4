use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of every face embedding produced by the analyzer.
pub const EMBEDDING_DIM: usize = 128;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    #[serde(default)]
    pub landmarks: Option<[(f32, f32); 5]>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("expected {EMBEDDING_DIM}-dim embedding, got {0}")]
    WrongDimension(usize),
    #[error("embedding contains a non-finite value at index {0}")]
    NonFinite(usize),
}

/// Face embedding vector, always [`EMBEDDING_DIM`] finite floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::WrongDimension(values.len()));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite(idx));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance between two embeddings. Smaller = more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Embedding::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.values
    }
}

/// Map a distance onto [0, 1]: `1 - min(distance, 1)`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance.min(1.0)).clamp(0.0, 1.0)
}

/// One enrollment photo's embedding. Several entries may share a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub name: String,
    pub embedding: Embedding,
}

/// A face found in one capture cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSample {
    pub embedding: Embedding,
    pub confidence: f32,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Best similarity achieved against one distinct enrolled name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetingMatch {
    pub name: String,
    pub similarity: f32,
}

/// Result of matching a probe embedding against the repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub best_name: String,
    /// Euclidean distance of the closest entry (unbounded above).
    pub best_distance: f32,
    pub is_accepted: bool,
    /// Every distinct enrolled name with its best similarity, highest first.
    pub competing_matches: Vec<CompetingMatch>,
}

impl MatchResult {
    pub fn best_similarity(&self) -> f32 {
        similarity_from_distance(self.best_distance)
    }
}

/// Why a cycle was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NotRecognized,
    MultipleFacesDetected,
    PossibleInterference,
    NoEnrollment,
}

impl DenyReason {
    pub fn describe(&self) -> &'static str {
        match self {
            DenyReason::NotRecognized => "face not recognized",
            DenyReason::MultipleFacesDetected => "multiple faces detected",
            DenyReason::PossibleInterference => "possible interference from another face",
            DenyReason::NoEnrollment => "no enrolled identities",
        }
    }
}

/// Access outcome of one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AccessDecision {
    Granted(String),
    Denied(DenyReason),
    Inconclusive,
}

impl AccessDecision {
    pub fn display_text(&self) -> String {
        match self {
            AccessDecision::Granted(name) => format!("Access granted: {name}"),
            AccessDecision::Denied(reason) => format!("Access denied: {}", reason.describe()),
            AccessDecision::Inconclusive => "No face detected".to_string(),
        }
    }
}

/// Everything the Match Evaluator produced for one cycle.
///
/// `result` carries the best match for diagnostics only; a denied cycle's
/// best name is never a near-match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub decision: AccessDecision,
    pub result: Option<MatchResult>,
}

impl Evaluation {
    pub fn inconclusive() -> Self {
        Self { decision: AccessDecision::Inconclusive, result: None }
    }

    pub fn denied(reason: DenyReason) -> Self {
        Self { decision: AccessDecision::Denied(reason), result: None }
    }
}
