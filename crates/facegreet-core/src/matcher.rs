//! Nearest-identity matching of face descriptors.

use crate::reference::ReferenceSet;
use crate::types::{Descriptor, MatchLabel, MatchResult};

/// Distance above which a face is reported as unknown.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Euclidean nearest-neighbour matcher over an immutable [`ReferenceSet`].
///
/// Built once and reused for every frame.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    references: ReferenceSet,
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(references: ReferenceSet, threshold: f32) -> Self {
        Self { references, threshold }
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Closest identity for `query`, or unknown when it is farther than the threshold.
    ///
    /// Equal distances resolve to the identity that comes first in the
    /// reference set.
    ///
    /// # Panics
    ///
    /// If `query` does not have the reference set's dimension.
    pub fn best_match(&self, query: &Descriptor) -> MatchResult {
        assert_eq!(
            query.len(),
            self.references.dimension(),
            "query descriptor dimension does not match reference set"
        );

        let mut best: Option<(&str, f32)> = None;
        for (identity, descriptors) in self.references.iter() {
            let nearest = descriptors
                .iter()
                .map(|d| query.euclidean_distance(d))
                .fold(f32::INFINITY, f32::min);

            // Strict comparison keeps the earlier identity on ties.
            if best.map_or(true, |(_, d)| nearest < d) {
                best = Some((identity, nearest));
            }
        }

        match best {
            Some((identity, distance)) if distance <= self.threshold => MatchResult {
                label: MatchLabel::Known(identity.to_string()),
                distance,
            },
            Some((_, distance)) => MatchResult::unknown(distance),
            // ReferenceSet is never empty
            None => MatchResult::unknown(f32::INFINITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec())
    }

    fn matcher(entries: &[(&str, &[&[f32]])]) -> FaceMatcher {
        let set = ReferenceSet::new(
            entries
                .iter()
                .map(|(id, ds)| (id.to_string(), ds.iter().map(|v| d(v)).collect()))
                .collect(),
        )
        .unwrap();
        FaceMatcher::new(set, DEFAULT_MATCH_THRESHOLD)
    }

    #[test]
    fn test_exact_reference_matches_with_zero_distance() {
        let m = matcher(&[
            ("alice", &[&[0.1, 0.2, 0.3], &[0.5, 0.5, 0.5]]),
            ("bob", &[&[0.9, 0.9, 0.9]]),
        ]);
        let result = m.best_match(&d(&[0.5, 0.5, 0.5]));
        assert_eq!(result.label, MatchLabel::Known("alice".into()));
        assert!(result.distance.abs() < 1e-6);

        let result = m.best_match(&d(&[0.9, 0.9, 0.9]));
        assert_eq!(result.label.identity(), Some("bob"));
    }

    #[test]
    fn test_identity_scored_by_closest_descriptor() {
        // bob's second descriptor is closer than anything alice has
        let m = matcher(&[
            ("alice", &[&[0.3, 0.0]]),
            ("bob", &[&[1.0, 1.0], &[0.1, 0.0]]),
        ]);
        let result = m.best_match(&d(&[0.0, 0.0]));
        assert_eq!(result.label.identity(), Some("bob"));
        assert!((result.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_beyond_threshold_is_unknown() {
        let m = matcher(&[("alice", &[&[0.0, 0.0]]), ("bob", &[&[3.0, 0.0]])]);
        let result = m.best_match(&d(&[0.0, 0.7]));
        assert!(result.label.is_unknown());
        // Raw distance to the nearest identity is still reported
        assert!((result.distance - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let m = FaceMatcher::new(
            ReferenceSet::new(vec![("alice".into(), vec![d(&[0.0, 0.0])])]).unwrap(),
            0.5,
        );
        assert_eq!(m.best_match(&d(&[0.0, 0.5])).label.identity(), Some("alice"));
        assert!(m.best_match(&d(&[0.0, 0.5001])).label.is_unknown());
    }

    #[test]
    fn test_tie_goes_to_first_identity() {
        let m = matcher(&[("first", &[&[1.0, 0.0]]), ("second", &[&[-1.0, 0.0]])]);
        let result = m.best_match(&d(&[0.0, 0.0]));
        // Both at distance 1.0 > 0.6, so look at a tie inside the threshold instead
        assert!(result.label.is_unknown());

        let m = matcher(&[("first", &[&[0.2, 0.0]]), ("second", &[&[-0.2, 0.0]])]);
        assert_eq!(m.best_match(&d(&[0.0, 0.0])).label.identity(), Some("first"));
        let m = matcher(&[("second", &[&[-0.2, 0.0]]), ("first", &[&[0.2, 0.0]])]);
        assert_eq!(m.best_match(&d(&[0.0, 0.0])).label.identity(), Some("second"));
    }

    #[test]
    fn test_matching_is_repeatable() {
        let m = matcher(&[("alice", &[&[0.1, 0.4]]), ("bob", &[&[0.3, 0.2]])]);
        let query = d(&[0.2, 0.3]);
        assert_eq!(m.best_match(&query), m.best_match(&query));
    }

    #[test]
    #[should_panic(expected = "dimension")]
    fn test_dimension_mismatch_panics() {
        let m = matcher(&[("alice", &[&[0.0, 0.0]])]);
        m.best_match(&d(&[0.0, 0.0, 0.0]));
    }
}
