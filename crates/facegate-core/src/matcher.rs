//! Match evaluation: one capture cycle's detections against the repository.
//!
//! Distance is Euclidean over the embedding space and is the single source
//! of truth for acceptance: a probe matches when its closest enrolled entry
//! is strictly nearer than the acceptance threshold.

use crate::repository::EmbeddingRepository;
use crate::types::{
    similarity_from_distance, AccessDecision, CompetingMatch, DenyReason, DetectionSample,
    Embedding, Evaluation, MatchResult,
};
use std::cmp::Ordering;
use std::sync::Arc;

pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 0.50;
pub const DEFAULT_LOW_CONFIDENCE_CUTOFF: f32 = 0.50;
pub const DEFAULT_HIGH_SIMILARITY_CUTOFF: f32 = 0.45;

/// The tunable surface of the evaluator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    /// Maximum (exclusive) Euclidean distance for a match.
    pub acceptance_threshold: f32,
    /// Secondary faces below this detector confidence are treated as noise.
    pub low_confidence_cutoff: f32,
    /// Similarity above which a distinct identity counts as contributing signal.
    pub high_similarity_cutoff: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            low_confidence_cutoff: DEFAULT_LOW_CONFIDENCE_CUTOFF,
            high_similarity_cutoff: DEFAULT_HIGH_SIMILARITY_CUTOFF,
        }
    }
}

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    /// Returns `None` only when the gallery is empty.
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &EmbeddingRepository,
        threshold: f32,
    ) -> Option<MatchResult>;
}

/// Euclidean nearest-neighbour matcher.
///
/// Always visits every gallery entry; ties in distance keep the earliest entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &EmbeddingRepository,
        threshold: f32,
    ) -> Option<MatchResult> {
        let (best, best_distance) = gallery.nearest(probe)?;

        // Best distance per distinct name, in first-enrolled order.
        let mut per_name: Vec<(&str, f32)> = Vec::new();
        for identity in gallery.iter() {
            let distance = probe.euclidean_distance(&identity.embedding);
            match per_name.iter_mut().find(|(name, _)| *name == identity.name) {
                Some(slot) => slot.1 = slot.1.min(distance),
                None => per_name.push((identity.name.as_str(), distance)),
            }
        }

        let mut competing_matches: Vec<CompetingMatch> = per_name
            .into_iter()
            .map(|(name, distance)| CompetingMatch {
                name: name.to_string(),
                similarity: similarity_from_distance(distance),
            })
            .collect();
        competing_matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });

        Some(MatchResult {
            best_name: best.name.clone(),
            best_distance,
            is_accepted: best_distance < threshold,
            competing_matches,
        })
    }
}

/// Turns the samples of one cycle into an [`Evaluation`].
///
/// Pure and deterministic: the same samples against the same repository
/// always produce the same evaluation.
#[derive(Clone)]
pub struct MatchEvaluator<M = EuclideanMatcher> {
    repository: Arc<EmbeddingRepository>,
    thresholds: MatchThresholds,
    matcher: M,
}

impl MatchEvaluator {
    pub fn new(repository: Arc<EmbeddingRepository>, thresholds: MatchThresholds) -> Self {
        Self::with_matcher(repository, thresholds, EuclideanMatcher)
    }
}

impl<M: Matcher> MatchEvaluator<M> {
    pub fn with_matcher(repository: Arc<EmbeddingRepository>, thresholds: MatchThresholds, matcher: M) -> Self {
        Self { repository, thresholds, matcher }
    }

    pub fn repository(&self) -> &EmbeddingRepository {
        &self.repository
    }

    pub fn evaluate(&self, samples: &[DetectionSample]) -> Evaluation {
        if self.repository.is_empty() {
            return Evaluation::denied(DenyReason::NoEnrollment);
        }

        let mut ranked: Vec<&DetectionSample> = samples.iter().collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });

        let Some(primary) = ranked.first() else {
            return Evaluation::inconclusive();
        };

        if let Some(secondary) = ranked.get(1) {
            if secondary.confidence >= self.thresholds.low_confidence_cutoff {
                tracing::debug!(
                    faces = ranked.len(),
                    primary = primary.confidence,
                    secondary = secondary.confidence,
                    "more than one face in frame"
                );
                return Evaluation::denied(DenyReason::MultipleFacesDetected);
            }
            tracing::trace!(
                secondary = secondary.confidence,
                "ignoring low-confidence secondary detection"
            );
        }

        let Some(result) = self.matcher.compare(
            &primary.embedding,
            &self.repository,
            self.thresholds.acceptance_threshold,
        ) else {
            return Evaluation::denied(DenyReason::NoEnrollment);
        };

        let strong = result
            .competing_matches
            .iter()
            .filter(|m| m.similarity > self.thresholds.high_similarity_cutoff)
            .count();

        let decision = if strong >= 2 {
            AccessDecision::Denied(DenyReason::PossibleInterference)
        } else if result.is_accepted {
            AccessDecision::Granted(result.best_name.clone())
        } else {
            AccessDecision::Denied(DenyReason::NotRecognized)
        };

        Evaluation { decision, result: Some(result) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::axis;
    use crate::types::EnrolledIdentity;

    fn repo(entries: Vec<(&str, Embedding)>) -> Arc<EmbeddingRepository> {
        Arc::new(
            entries
                .into_iter()
                .map(|(name, embedding)| EnrolledIdentity { name: name.into(), embedding })
                .collect(),
        )
    }

    fn sample(embedding: Embedding, confidence: f32) -> DetectionSample {
        DetectionSample { embedding, confidence, bounding_box: None }
    }

    fn evaluator(repository: Arc<EmbeddingRepository>, threshold: f32) -> MatchEvaluator {
        MatchEvaluator::new(
            repository,
            MatchThresholds { acceptance_threshold: threshold, ..MatchThresholds::default() },
        )
    }

    #[test]
    fn test_identical_embedding_accepted() {
        let v = axis(5, 0.8);
        let eval = evaluator(repo(vec![("Alice", v.clone())]), 0.5).evaluate(&[sample(v, 0.9)]);
        assert_eq!(eval.decision, AccessDecision::Granted("Alice".into()));
        let result = eval.result.unwrap();
        assert_eq!(result.best_distance, 0.0);
        assert_eq!(result.best_similarity(), 1.0);
        assert!(result.is_accepted);
    }

    #[test]
    fn test_identical_embedding_accepted_at_tiny_threshold() {
        let v = axis(2, 0.3);
        let eval = evaluator(repo(vec![("Alice", v.clone())]), 1e-6).evaluate(&[sample(v, 0.9)]);
        assert_eq!(eval.decision, AccessDecision::Granted("Alice".into()));
    }

    #[test]
    fn test_far_sample_not_recognized_carries_best_name() {
        let eval = evaluator(repo(vec![("Alice", axis(0, 0.0))]), 0.5)
            .evaluate(&[sample(axis(0, 0.9), 0.9)]);
        assert_eq!(eval.decision, AccessDecision::Denied(DenyReason::NotRecognized));
        let result = eval.result.unwrap();
        assert_eq!(result.best_name, "Alice");
        assert!(!result.is_accepted);
        assert!((result.best_similarity() - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_distance_equal_to_threshold_is_rejected() {
        let eval = evaluator(repo(vec![("Alice", axis(0, 0.0))]), 0.5)
            .evaluate(&[sample(axis(0, 0.5), 0.9)]);
        assert_eq!(eval.decision, AccessDecision::Denied(DenyReason::NotRecognized));
    }

    #[test]
    fn test_empty_repository_denies_no_enrollment() {
        let eval = evaluator(Arc::new(EmbeddingRepository::default()), 0.5)
            .evaluate(&[sample(axis(0, 1.0), 0.99)]);
        assert_eq!(eval.decision, AccessDecision::Denied(DenyReason::NoEnrollment));
        assert!(eval.result.is_none());
    }

    #[test]
    fn test_no_samples_is_inconclusive() {
        let eval = evaluator(repo(vec![("Alice", axis(0, 1.0))]), 0.5).evaluate(&[]);
        assert_eq!(eval, Evaluation::inconclusive());
    }

    #[test]
    fn test_low_confidence_secondary_matches_single_sample() {
        let v = axis(1, 0.4);
        let ev = evaluator(repo(vec![("Alice", v.clone()), ("Bob", axis(9, 1.0))]), 0.5);

        let primary = sample(axis(1, 0.5), 0.92);
        let noise = sample(axis(9, 1.0), 0.2);

        let alone = ev.evaluate(&[primary.clone()]);
        // Order of samples must not matter.
        assert_eq!(ev.evaluate(&[primary.clone(), noise.clone()]), alone);
        assert_eq!(ev.evaluate(&[noise, primary]), alone);
        assert_eq!(alone.decision, AccessDecision::Granted("Alice".into()));
    }

    #[test]
    fn test_two_confident_faces_denied_regardless_of_embeddings() {
        let v = axis(1, 0.4);
        let ev = evaluator(repo(vec![("Alice", v.clone())]), 0.5);
        let both_alice = ev.evaluate(&[sample(v.clone(), 0.9), sample(v.clone(), 0.8)]);
        assert_eq!(both_alice, Evaluation::denied(DenyReason::MultipleFacesDetected));

        let strangers = ev.evaluate(&[sample(axis(3, 1.0), 0.6), sample(axis(4, 1.0), 0.55)]);
        assert_eq!(strangers, Evaluation::denied(DenyReason::MultipleFacesDetected));
    }

    #[test]
    fn test_secondary_at_cutoff_counts_as_face() {
        let v = axis(1, 0.4);
        let ev = evaluator(repo(vec![("Alice", v.clone())]), 0.5);
        let eval = ev.evaluate(&[sample(v.clone(), 0.9), sample(v, DEFAULT_LOW_CONFIDENCE_CUTOFF)]);
        assert_eq!(eval.decision, AccessDecision::Denied(DenyReason::MultipleFacesDetected));
    }

    #[test]
    fn test_cross_identity_interference() {
        // Alice at distance 0.3 (accepted), Bob at 0.52 (similarity 0.48 > 0.45).
        let ev = evaluator(
            repo(vec![("Alice", axis(0, 0.3)), ("Bob", axis(1, 0.52))]),
            0.5,
        );
        let probe = sample(axis(0, 0.0), 0.95);

        let alice_only = evaluator(repo(vec![("Alice", axis(0, 0.3))]), 0.5).evaluate(&[probe.clone()]);
        assert_eq!(alice_only.decision, AccessDecision::Granted("Alice".into()));

        let eval = ev.evaluate(&[probe]);
        assert_eq!(eval.decision, AccessDecision::Denied(DenyReason::PossibleInterference));
        let result = eval.result.unwrap();
        assert_eq!(result.best_name, "Alice");
        assert_eq!(result.competing_matches.len(), 2);
        assert_eq!(result.competing_matches[0].name, "Alice");
    }

    #[test]
    fn test_same_name_entries_do_not_interfere() {
        // Two photos of Alice both close to the probe: one identity, no interference.
        let ev = evaluator(
            repo(vec![("Alice", axis(0, 0.1)), ("Alice", axis(1, 0.2))]),
            0.5,
        );
        let eval = ev.evaluate(&[sample(axis(0, 0.0), 0.9)]);
        assert_eq!(eval.decision, AccessDecision::Granted("Alice".into()));
        assert_eq!(eval.result.unwrap().competing_matches.len(), 1);
    }

    #[test]
    fn test_acceptance_monotonic_in_threshold() {
        let ev_repo = repo(vec![("Alice", axis(0, 0.0)), ("Bob", axis(1, 1.0))]);
        let probes: Vec<DetectionSample> =
            [0.05, 0.2, 0.35, 0.49, 0.6, 0.8].iter().map(|d| sample(axis(0, *d), 0.9)).collect();
        let thresholds = [0.1, 0.3, 0.4, 0.5, 0.7, 0.9];

        for probe in &probes {
            for (i, t1) in thresholds.iter().enumerate() {
                for t2 in &thresholds[i + 1..] {
                    let lo = EuclideanMatcher.compare(&probe.embedding, &ev_repo, *t1).unwrap();
                    let hi = EuclideanMatcher.compare(&probe.embedding, &ev_repo, *t2).unwrap();
                    if lo.is_accepted {
                        assert!(hi.is_accepted, "accepted at {t1} but not at {t2}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let ev = evaluator(repo(vec![("Alice", axis(0, 0.3)), ("Bob", axis(1, 0.7))]), 0.5);
        let samples = vec![sample(axis(0, 0.1), 0.8), sample(axis(2, 0.4), 0.1)];
        assert_eq!(ev.evaluate(&samples), ev.evaluate(&samples));
    }

    #[test]
    fn test_matcher_tie_resolves_to_first_entry() {
        let gallery = repo(vec![("Bob", axis(1, 0.4)), ("Alice", axis(2, 0.4))]);
        let result = EuclideanMatcher.compare(&axis(0, 0.0), &gallery, 0.5).unwrap();
        assert_eq!(result.best_name, "Bob");
    }

    #[test]
    fn test_matcher_visits_all_entries() {
        // Best match is the last entry.
        let gallery = repo(vec![
            ("decoy1", axis(1, 1.0)),
            ("decoy2", axis(2, 1.0)),
            ("match", axis(0, 0.95)),
        ]);
        let result = EuclideanMatcher.compare(&axis(0, 1.0), &gallery, 0.5).unwrap();
        assert_eq!(result.best_name, "match");
        assert!(result.is_accepted);
    }

    /// Accepts whoever was enrolled first, at a fixed distance.
    struct FirstEntryMatcher {
        distance: f32,
    }

    impl Matcher for FirstEntryMatcher {
        fn compare(&self, _embedding: &Embedding, gallery: &EmbeddingRepository, threshold: f32) -> Option<MatchResult> {
            let first = gallery.iter().next()?;
            Some(MatchResult {
                best_name: first.name.clone(),
                best_distance: self.distance,
                is_accepted: self.distance < threshold,
                competing_matches: vec![CompetingMatch {
                    name: first.name.clone(),
                    similarity: similarity_from_distance(self.distance),
                }],
            })
        }
    }

    #[test]
    fn test_evaluator_uses_supplied_matcher() {
        let gallery = repo(vec![("Bob", axis(1, 1.0)), ("Alice", axis(0, 0.0))]);
        let subject = sample(axis(0, 0.0), 0.9);

        // The Euclidean matcher picks Alice; the supplied one always answers Bob.
        let euclidean = MatchEvaluator::new(gallery.clone(), MatchThresholds::default());
        assert_eq!(euclidean.evaluate(&[subject.clone()]).decision, AccessDecision::Granted("Alice".into()));

        let custom = MatchEvaluator::with_matcher(
            gallery.clone(),
            MatchThresholds::default(),
            FirstEntryMatcher { distance: 0.1 },
        );
        assert_eq!(custom.evaluate(&[subject.clone()]).decision, AccessDecision::Granted("Bob".into()));

        let rejecting = MatchEvaluator::with_matcher(gallery, MatchThresholds::default(), FirstEntryMatcher { distance: 0.9 });
        assert_eq!(rejecting.evaluate(&[subject]).decision, AccessDecision::Denied(DenyReason::NotRecognized));
    }
}
