//! Enrolled identities for the current session.

use crate::types::{Embedding, EnrolledIdentity};

/// Immutable set of enrolled (name, embedding) pairs.
///
/// Built once at load time; order is preserved so that distance ties resolve
/// to the earliest enrolled entry.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingRepository {
    identities: Vec<EnrolledIdentity>,
}

impl EmbeddingRepository {
    pub fn new(identities: Vec<EnrolledIdentity>) -> Self {
        Self { identities }
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Number of enrolled entries (photos), not people.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnrolledIdentity> {
        self.identities.iter()
    }

    /// Distinct names in first-enrolled order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for identity in &self.identities {
            if !names.contains(&identity.name.as_str()) {
                names.push(&identity.name);
            }
        }
        names
    }

    /// Closest entry to `probe`, ties going to the earliest entry.
    pub fn nearest(&self, probe: &Embedding) -> Option<(&EnrolledIdentity, f32)> {
        let mut best: Option<(&EnrolledIdentity, f32)> = None;
        for identity in &self.identities {
            let distance = probe.euclidean_distance(&identity.embedding);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((identity, distance)),
            }
        }
        best
    }
}

impl FromIterator<EnrolledIdentity> for EmbeddingRepository {
    fn from_iter<I: IntoIterator<Item = EnrolledIdentity>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::axis;

    fn entry(name: &str, embedding: Embedding) -> EnrolledIdentity {
        EnrolledIdentity { name: name.into(), embedding }
    }

    #[test]
    fn test_names_are_distinct_and_ordered() {
        let repo = EmbeddingRepository::new(vec![
            entry("bob", axis(0, 1.0)),
            entry("alice", axis(1, 1.0)),
            entry("bob", axis(2, 1.0)),
        ]);
        assert_eq!(repo.len(), 3);
        assert_eq!(repo.names(), vec!["bob", "alice"]);
    }

    #[test]
    fn test_nearest_tie_goes_to_first_entry() {
        let repo = EmbeddingRepository::new(vec![
            entry("first", axis(1, 0.5)),
            entry("second", axis(2, 0.5)),
        ]);
        let (identity, distance) = repo.nearest(&axis(0, 0.0)).unwrap();
        assert_eq!(identity.name, "first");
        assert!((distance - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_empty() {
        let repo = EmbeddingRepository::default();
        assert!(repo.is_empty());
        assert!(repo.nearest(&axis(0, 1.0)).is_none());
    }
}
