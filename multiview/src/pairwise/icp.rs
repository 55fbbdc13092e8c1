//! Iterative closest point matching on world coordinates.

use glam::DVec3;

use crate::config::IcpMatcherConfig;
use crate::error::MatchError;
use crate::interest_points::GroupedPoint;
use crate::pairwise::{PairwiseMatch, PairwiseMatcher, PointMatch};
use crate::spatial::KdTree;
use crate::transform::{Transform, TransformModel, estimate_transform, mean_residual};

/// Moves the points of A onto their nearest neighbours in B until the
/// pairing stabilises. Suited to views that are already roughly aligned.
pub struct IcpMatcher {
    config: IcpMatcherConfig,
    model: TransformModel,
}

impl IcpMatcher {
    pub fn new(config: IcpMatcherConfig, model: TransformModel) -> Self {
        config.validate();
        Self { config, model }
    }

    /// Nearest B point for every transformed A point within `max_distance`.
    fn closest_pairs(&self, tree: &KdTree, points_a: &[GroupedPoint], transform: &Transform) -> Vec<(usize, usize)> {
        points_a
            .iter()
            .enumerate()
            .filter_map(|(ia, a)| {
                let (ib, distance) = tree.nearest(transform.apply(a.world))?;
                (distance <= self.config.max_distance).then_some((ia, ib))
            })
            .collect()
    }
}

impl PairwiseMatcher for IcpMatcher {
    fn name(&self) -> &'static str {
        "icp"
    }

    fn match_pair(
        &self,
        points_a: &[GroupedPoint],
        points_b: &[GroupedPoint],
        pair: &mut PairwiseMatch,
    ) -> Result<(), MatchError> {
        let required = self.model.min_points();
        let found = points_a.len().min(points_b.len());
        if found < required {
            return Err(MatchError::TooFewPoints { found, required });
        }

        let positions_b: Vec<DVec3> = points_b.iter().map(|p| p.world).collect();
        let Some(tree) = KdTree::build(&positions_b) else {
            return Err(MatchError::TooFewPoints { found: 0, required });
        };

        let mut transform = Transform::identity();
        let mut pairs = Vec::new();
        let mut previous_error = f64::INFINITY;

        for _ in 0..self.config.max_iterations {
            pairs = self.closest_pairs(&tree, points_a, &transform);
            if pairs.len() < required {
                return Err(MatchError::NoOverlap {
                    max_distance: self.config.max_distance,
                });
            }

            let src: Vec<DVec3> = pairs.iter().map(|&(ia, _)| points_a[ia].world).collect();
            let dst: Vec<DVec3> = pairs.iter().map(|&(_, ib)| positions_b[ib]).collect();
            let Some(fitted) = estimate_transform(&src, &dst, self.model) else {
                return Err(MatchError::NoOverlap {
                    max_distance: self.config.max_distance,
                });
            };

            transform = fitted;
            let error = mean_residual(&transform, &src, &dst);
            let converged = (previous_error - error).abs() < self.config.convergence;
            previous_error = error;
            if converged {
                break;
            }
        }

        let candidates: Vec<PointMatch> = pairs
            .iter()
            .map(|&(ia, ib)| PointMatch {
                a: points_a[ia],
                b: points_b[ib],
                similarity: Some(transform.apply(points_a[ia].world).distance(positions_b[ib])),
            })
            .collect();

        let inliers: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, m)| m.similarity.is_some_and(|d| d <= self.config.max_distance))
            .map(|(i, _)| i)
            .collect();

        let error = if inliers.is_empty() {
            0.0
        } else {
            inliers
                .iter()
                .filter_map(|&i| candidates[i].similarity)
                .sum::<f64>()
                / inliers.len() as f64
        };

        pair.set_candidates(candidates);
        if inliers.len() < required {
            return Err(MatchError::NoOverlap {
                max_distance: self.config.max_distance,
            });
        }
        pair.set_inliers(inliers, transform, error);
        Ok(())
    }
}
