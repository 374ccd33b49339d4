//! facegate-core — Enrolled embeddings and the access decision.
//!
//! Holds the embedding repository, the match evaluator, and the adapter
//! around the external face analyzer (detection + 128-d embeddings).

pub mod detector;
pub mod enrollment;
pub mod matcher;
pub mod protocol;
pub mod remote;
pub mod repository;
pub mod types;

pub use detector::{
    AnalyzerError, Detection, DetectionFailure, DetectorAdapter, DetectorConfig, FaceAnalyzer,
    DEFAULT_TIERS,
};
pub use matcher::{EuclideanMatcher, MatchEvaluator, MatchThresholds, Matcher};
pub use remote::RemoteAnalyzer;
pub use repository::EmbeddingRepository;
pub use types::{
    AccessDecision, BoundingBox, DenyReason, DetectionSample, Embedding, EnrolledIdentity,
    Evaluation, MatchResult, EMBEDDING_DIM,
};
