//! Embedding matching and per-tick face selection.

use crate::reference::ReferenceSet;
use crate::types::{Embedding, Face, FaceReport, MatchResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding has zero norm")]
    DegenerateEmbedding,
    #[error("embedding has dimension {actual}, reference set expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Strategy for comparing a probe embedding against the reference set.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        reference: &ReferenceSet,
        tolerance: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Cosine-distance matcher.
///
/// Normalizes the probe, then takes the best dot product over every
/// reference vector. Always visits the whole set, no early exit.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        reference: &ReferenceSet,
        tolerance: f32,
    ) -> Result<MatchResult, MatchError> {
        if probe.dim() != reference.dim() {
            return Err(MatchError::DimensionMismatch {
                expected: reference.dim(),
                actual: probe.dim(),
            });
        }
        let unit = probe.normalized().ok_or(MatchError::DegenerateEmbedding)?;

        let mut best_sim = f32::NEG_INFINITY;
        let mut closest = 0;
        for (i, r) in reference.iter().enumerate() {
            let sim = unit.dot(r);
            if sim > best_sim {
                best_sim = sim;
                closest = i;
            }
        }

        // Rounding can push a unit dot product a hair outside [-1, 1].
        let distance = (1.0 - best_sim).clamp(0.0, 2.0);
        Ok(MatchResult {
            is_match: distance < tolerance,
            distance,
            closest,
        })
    }
}

/// How the faces of one frame collapse into a single tick outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaceSelection {
    /// Positive if any detected face matches.
    #[default]
    AnyMatch,
    /// Only the face with the largest box counts.
    LargestFace,
}

impl FaceSelection {
    /// Reduce a tick's face reports to one boolean. No faces means negative.
    pub fn reduce(&self, reports: &[FaceReport]) -> bool {
        match self {
            FaceSelection::AnyMatch => reports.iter().any(FaceReport::is_match),
            FaceSelection::LargestFace => {
                let mut largest: Option<&FaceReport> = None;
                for report in reports {
                    // First face wins ties.
                    if largest.map_or(true, |l| report.bbox.area() > l.bbox.area()) {
                        largest = Some(report);
                    }
                }
                largest.is_some_and(FaceReport::is_match)
            }
        }
    }
}

impl std::str::FromStr for FaceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any-match" | "any" => Ok(FaceSelection::AnyMatch),
            "largest-face" | "largest" => Ok(FaceSelection::LargestFace),
            other => Err(format!(
                "unknown face selection policy '{other}' (expected any-match or largest-face)"
            )),
        }
    }
}

/// Match every face of a frame. Faces that cannot be matched are logged and
/// reported without a result, which counts as non-matching.
pub fn evaluate_faces(
    matcher: &dyn Matcher,
    faces: &[Face],
    reference: &ReferenceSet,
    tolerance: f32,
) -> Vec<FaceReport> {
    faces
        .iter()
        .map(|face| {
            let result = match matcher.compare(&face.embedding, reference, tolerance) {
                Ok(r) => {
                    tracing::debug!(
                        distance = r.distance,
                        similarity = 1.0 - r.distance,
                        area = face.bbox.area(),
                        matched = r.is_match,
                        "face evaluated"
                    );
                    Some(r)
                }
                Err(err) => {
                    tracing::warn!(error = %err, area = face.bbox.area(), "face skipped");
                    None
                }
            };
            FaceReport {
                bbox: face.bbox,
                result,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn refs(vectors: Vec<Vec<f32>>) -> ReferenceSet {
        ReferenceSet::from_vectors(vectors).unwrap()
    }

    fn report(x2: f32, y2: f32, is_match: Option<bool>) -> FaceReport {
        FaceReport {
            bbox: BoundingBox::new(0.0, 0.0, x2, y2),
            result: is_match.map(|m| MatchResult {
                is_match: m,
                distance: if m { 0.1 } else { 0.9 },
                closest: 0,
            }),
        }
    }

    #[test]
    fn test_identical_is_zero_distance() {
        let r = refs(vec![vec![1.0, 0.0, 0.0]]);
        let result = CosineMatcher
            .compare(&Embedding::new(vec![5.0, 0.0, 0.0]), &r, 0.4)
            .unwrap();
        assert!(result.is_match);
        assert!(result.distance.abs() < 1e-6);
    }

    #[test]
    fn test_opposite_is_max_distance() {
        let r = refs(vec![vec![1.0, 0.0]]);
        let result = CosineMatcher
            .compare(&Embedding::new(vec![-1.0, 0.0]), &r, 0.4)
            .unwrap();
        assert!(!result.is_match);
        assert!((result.distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_closest_reference_wins() {
        // Best match is the last entry; every entry is visited.
        let r = refs(vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0]]);
        let result = CosineMatcher
            .compare(&Embedding::new(vec![1.0, 0.1, 0.0]), &r, 0.4)
            .unwrap();
        assert!(result.is_match);
        assert_eq!(result.closest, 2);
    }

    #[test]
    fn test_degenerate_probe() {
        let r = refs(vec![vec![1.0, 0.0]]);
        let err = CosineMatcher
            .compare(&Embedding::new(vec![0.0, 0.0]), &r, 0.4)
            .unwrap_err();
        assert_eq!(err, MatchError::DegenerateEmbedding);
    }

    #[test]
    fn test_dimension_mismatch() {
        let r = refs(vec![vec![1.0, 0.0]]);
        let err = CosineMatcher
            .compare(&Embedding::new(vec![1.0, 0.0, 0.0]), &r, 0.4)
            .unwrap_err();
        assert_eq!(err, MatchError::DimensionMismatch { expected: 2, actual: 3 });
    }

    #[test]
    fn test_tolerance_boundary_is_exclusive() {
        // Orthogonal vectors: distance exactly 1.0
        let r = refs(vec![vec![1.0, 0.0]]);
        let probe = Embedding::new(vec![0.0, 1.0]);
        let at = CosineMatcher.compare(&probe, &r, 1.0).unwrap();
        assert!((at.distance - 1.0).abs() < 1e-6);
        assert!(!at.is_match);
        let above = CosineMatcher.compare(&probe, &r, 1.0001).unwrap();
        assert!(above.is_match);
    }

    #[test]
    fn test_distance_range_and_tolerance_monotonic() {
        let r = refs(vec![vec![1.0, 0.0, 0.0], vec![0.3, 0.9, 0.1]]);
        let probes = [
            vec![1.0, 2.0, 3.0],
            vec![-4.0, 0.5, 0.0],
            vec![0.0, 0.0, -1.0],
            vec![1e-3, 1e-3, 0.0],
            vec![-1.0, -1.0, -1.0],
        ];
        let tolerances = [0.05, 0.2, 0.4, 0.8, 1.2, 1.9];
        for p in probes {
            let probe = Embedding::new(p);
            let mut seen_match = false;
            for &t in &tolerances {
                let result = CosineMatcher.compare(&probe, &r, t).unwrap();
                assert!((0.0..=2.0).contains(&result.distance));
                assert_eq!(result.is_match, result.distance < t);
                // Once matched at a tolerance, matched at every larger one.
                if seen_match {
                    assert!(result.is_match);
                }
                seen_match |= result.is_match;
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let r = refs(vec![vec![0.2, 0.7, 0.1], vec![0.9, 0.1, 0.3]]);
        let probe = Embedding::new(vec![0.5, 0.5, 0.2]);
        let a = CosineMatcher.compare(&probe, &r, 0.4).unwrap();
        let b = CosineMatcher.compare(&probe, &r, 0.4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_any_match_policy() {
        let reports = vec![report(10.0, 10.0, Some(false)), report(5.0, 5.0, Some(true))];
        assert!(FaceSelection::AnyMatch.reduce(&reports));
        assert!(!FaceSelection::AnyMatch.reduce(&[]));
    }

    #[test]
    fn test_largest_face_policy_uses_only_largest() {
        // Small matching face, large non-matching face
        let reports = vec![report(5.0, 5.0, Some(true)), report(50.0, 50.0, Some(false))];
        assert!(!FaceSelection::LargestFace.reduce(&reports));

        let reports = vec![report(50.0, 50.0, Some(true)), report(5.0, 5.0, Some(false))];
        assert!(FaceSelection::LargestFace.reduce(&reports));
    }

    #[test]
    fn test_largest_face_tie_first_wins() {
        let reports = vec![report(10.0, 10.0, Some(false)), report(10.0, 10.0, Some(true))];
        assert!(!FaceSelection::LargestFace.reduce(&reports));
    }

    #[test]
    fn test_largest_face_degenerate_is_negative() {
        let reports = vec![report(50.0, 50.0, None), report(5.0, 5.0, Some(true))];
        assert!(!FaceSelection::LargestFace.reduce(&reports));
        assert!(FaceSelection::AnyMatch.reduce(&reports));
    }

    #[test]
    fn test_evaluate_faces_isolates_degenerate() {
        let r = refs(vec![vec![1.0, 0.0]]);
        let faces = vec![
            Face {
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                confidence: 0.9,
                embedding: Embedding::new(vec![0.0, 0.0]),
            },
            Face {
                bbox: BoundingBox::new(20.0, 20.0, 25.0, 25.0),
                confidence: 0.8,
                embedding: Embedding::new(vec![3.0, 0.1]),
            },
        ];
        let reports = evaluate_faces(&CosineMatcher, &faces, &r, 0.4);
        assert_eq!(reports.len(), 2);
        assert!(reports[0].result.is_none());
        assert!(reports[1].is_match());
    }

    #[test]
    fn test_face_selection_from_str() {
        assert_eq!("any-match".parse::<FaceSelection>(), Ok(FaceSelection::AnyMatch));
        assert_eq!("Largest-Face".parse::<FaceSelection>(), Ok(FaceSelection::LargestFace));
        assert!("biggest".parse::<FaceSelection>().is_err());
    }
}
