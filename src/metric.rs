use crate::Real;
use crate::instance::FeatureMask;

/// Norm under which point-to-centroid distances are computed.
///
/// L2 distances are kept squared throughout the engine; only the pruning
/// comparisons that need true half-distances take square roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DistanceNorm {
    L1,
    L2,
    Cosine,
}

impl DistanceNorm {
    pub const ALL: [DistanceNorm; 3] = [DistanceNorm::L1, DistanceNorm::L2, DistanceNorm::Cosine];

    /// slot of this norm in the per-norm statistic arrays
    pub fn index(self) -> usize {
        match self {
            DistanceNorm::L1 => 0,
            DistanceNorm::L2 => 1,
            DistanceNorm::Cosine => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DistanceNorm::L1 => "L1",
            DistanceNorm::L2 => "L2",
            DistanceNorm::Cosine => "Cosine",
        }
    }
}

/// Distance between two fixed-arity vectors over the active positions.
/// Comparing against an empty or mismatched vector (a dropped cluster's
/// centroid) yields MAX so the candidate loses every comparison.
pub fn distance(norm: DistanceNorm, a: &[Real], b: &[Real], mask: &FeatureMask) -> Real {
    distance_with_abort(norm, a, b, mask, None)
}

/// Same as `distance`, with an optional early-abort threshold for L1/L2:
/// once the running partial exceeds the threshold the partial is returned
/// and the caller treats the result as "at least threshold". Cosine cannot
/// abort early since its value is not a monotone accumulation.
pub fn distance_with_abort(
    norm: DistanceNorm,
    a: &[Real],
    b: &[Real],
    mask: &FeatureMask,
    early_abort: Option<Real>,
) -> Real {
    if a.is_empty() || a.len() != b.len() {
        return Real::MAX;
    }
    match norm {
        DistanceNorm::L1 => {
            let mut sum = 0.0;
            for i in mask.active() {
                sum += (a[i] - b[i]).abs();
                if let Some(abort) = early_abort {
                    if sum > abort {
                        return sum;
                    }
                }
            }
            sum
        }
        DistanceNorm::L2 => {
            let mut sum = 0.0;
            for i in mask.active() {
                let d = a[i] - b[i];
                sum += d * d;
                if let Some(abort) = early_abort {
                    if sum > abort {
                        return sum;
                    }
                }
            }
            sum
        }
        DistanceNorm::Cosine => {
            let mut dot = 0.0;
            let mut norm_a = 0.0;
            let mut norm_b = 0.0;
            for i in mask.active() {
                dot += a[i] * b[i];
                norm_a += a[i] * a[i];
                norm_b += b[i] * b[i];
            }
            let denominator = norm_a.sqrt() * norm_b.sqrt();
            1.0 - if denominator == 0.0 {
                0.0
            } else {
                dot / denominator
            }
        }
    }
}

/// Distance restricted to a single active position.
pub fn feature_distance(norm: DistanceNorm, a: &[Real], b: &[Real], feature: usize) -> Real {
    if a.is_empty() || a.len() != b.len() {
        return Real::MAX;
    }
    match norm {
        DistanceNorm::L1 => (a[feature] - b[feature]).abs(),
        DistanceNorm::L2 => {
            let d = a[feature] - b[feature];
            d * d
        }
        DistanceNorm::Cosine => {
            let denominator = (a[feature] * a[feature]).sqrt() * (b[feature] * b[feature]).sqrt();
            1.0 - if denominator == 0.0 {
                0.0
            } else {
                a[feature] * b[feature] / denominator
            }
        }
    }
}

/// Similarity between an instance and a gravity center, weighted by target
/// agreement: 1 - q / (1 + d), where q is 1 on matching target modalities
/// and e^-1 otherwise, and d is the per-feature-normalised (squared)
/// distance. Used by the compactness statistic.
pub fn similarity(
    norm: DistanceNorm,
    a: &[Real],
    b: &[Real],
    mask: &FeatureMask,
    target_a: &str,
    target_b: &str,
) -> Real {
    if a.is_empty() || a.len() != b.len() {
        return Real::MAX;
    }
    let d = distance(norm, a, b, mask);
    // L2 is already squared
    let squared = match norm {
        DistanceNorm::L2 => d,
        _ => d * d,
    };
    let denominator = squared / mask.active_count() as Real + 1.0;
    let numerator = if target_a == target_b {
        1.0
    } else {
        (-1.0 as Real).exp()
    };
    1.0 - numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(n: usize) -> FeatureMask {
        FeatureMask::all_active(n)
    }

    #[test]
    fn l1_sums_absolute_differences() {
        let d = distance(DistanceNorm::L1, &[0.0, 1.0], &[3.0, -1.0], &mask(2));
        assert_eq!(d, 5.0);
    }

    #[test]
    fn l2_stays_squared() {
        let d = distance(DistanceNorm::L2, &[0.0, 0.0], &[3.0, 4.0], &mask(2));
        assert_eq!(d, 25.0);
    }

    #[test]
    fn cosine_of_parallel_vectors_is_zero() {
        let d = distance(DistanceNorm::Cosine, &[1.0, 2.0], &[2.0, 4.0], &mask(2));
        assert!(d.abs() < 1e-12);
    }

    #[test]
    fn cosine_zero_denominator_is_one() {
        let d = distance(DistanceNorm::Cosine, &[0.0, 0.0], &[1.0, 1.0], &mask(2));
        assert_eq!(d, 1.0);
    }

    #[test]
    fn inactive_positions_are_ignored() {
        let partial = FeatureMask::new(vec![Some(0), None]);
        let d = distance(DistanceNorm::L1, &[1.0, 100.0], &[2.0, -100.0], &partial);
        assert_eq!(d, 1.0);
    }

    #[test]
    fn early_abort_returns_at_least_threshold() {
        let a = vec![0.0; 8];
        let b = vec![10.0; 8];
        let d = distance_with_abort(DistanceNorm::L1, &a, &b, &mask(8), Some(15.0));
        assert!(d > 15.0);
        assert!(d < 80.0);
    }

    #[test]
    fn mismatched_arity_is_max() {
        let d = distance(DistanceNorm::L2, &[], &[1.0], &mask(1));
        assert_eq!(d, Real::MAX);
    }

    #[test]
    fn single_feature_matches_full_distance_on_arity_one() {
        let a = [2.5];
        let b = [4.0];
        for norm in DistanceNorm::ALL {
            let full = distance(norm, &a, &b, &mask(1));
            let single = feature_distance(norm, &a, &b, 0);
            assert!((full - single).abs() < 1e-12);
        }
    }

    #[test]
    fn similarity_rewards_matching_targets() {
        let m = mask(2);
        let same = similarity(DistanceNorm::L2, &[0.0, 0.0], &[0.0, 0.0], &m, "a", "a");
        let diff = similarity(DistanceNorm::L2, &[0.0, 0.0], &[0.0, 0.0], &m, "a", "b");
        assert!(same < diff);
        assert!(same.abs() < 1e-12);
    }
}
