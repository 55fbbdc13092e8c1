//! Geometric local descriptor matching.
//!
//! Every point is described by the constellation of its nearest neighbours:
//! the distances from the point to each neighbour followed by the distances
//! between the neighbours. These are invariant under rotation and translation,
//! so descriptors of the same bead seen from two views agree up to noise.

use glam::DVec3;
use hashbrown::HashSet;

use crate::config::DescriptorMatcherConfig;
use crate::error::MatchError;
use crate::interest_points::GroupedPoint;
use crate::pairwise::ransac::RansacEstimator;
use crate::pairwise::{PairwiseMatch, PairwiseMatcher, PointMatch};
use crate::spatial::KdTree;
use crate::transform::TransformModel;

pub struct GeometricDescriptorMatcher {
    config: DescriptorMatcherConfig,
    ransac: RansacEstimator,
    model: TransformModel,
}

impl GeometricDescriptorMatcher {
    pub fn new(config: DescriptorMatcherConfig, ransac: RansacEstimator, model: TransformModel) -> Self {
        config.validate();
        Self {
            config,
            ransac,
            model,
        }
    }

    fn neighbourhood(&self) -> usize {
        self.config.num_neighbors + self.config.redundancy
    }

    /// Candidate correspondences from descriptor similarity, before RANSAC.
    pub fn candidates(&self, points_a: &[GroupedPoint], points_b: &[GroupedPoint]) -> Vec<PointMatch> {
        let subsets = combinations(self.neighbourhood(), self.config.num_neighbors);
        let descriptors_a = describe(points_a, self.neighbourhood(), &subsets);
        let descriptors_b = describe(points_b, self.neighbourhood(), &subsets);

        // (index in A, index in B, best distance)
        let mut proposals: Vec<(usize, usize, f64)> = Vec::new();
        for (ia, desc_a) in descriptors_a.iter().enumerate() {
            let mut best = (usize::MAX, f64::INFINITY);
            let mut second = f64::INFINITY;

            for (ib, desc_b) in descriptors_b.iter().enumerate() {
                let d = descriptor_distance(desc_a, desc_b);
                if d < best.1 {
                    second = best.1;
                    best = (ib, d);
                } else if d < second {
                    second = d;
                }
            }

            if best.0 == usize::MAX {
                continue;
            }
            // An exact descriptor hit always passes the ratio test.
            if second >= self.config.significance * best.1 {
                proposals.push((ia, best.0, best.1));
            }
        }

        // Each B point is claimed at most once, by its most similar A point.
        proposals.sort_by(|x, y| x.2.total_cmp(&y.2));
        let mut used_b = HashSet::new();
        let mut candidates: Vec<PointMatch> = proposals
            .into_iter()
            .filter(|&(_, ib, _)| used_b.insert(ib))
            .map(|(ia, ib, distance)| PointMatch {
                a: points_a[ia],
                b: points_b[ib],
                similarity: Some(distance),
            })
            .collect();

        candidates.sort_by_key(|m| (m.a.view_id, m.a.id));
        candidates
    }
}

impl PairwiseMatcher for GeometricDescriptorMatcher {
    fn name(&self) -> &'static str {
        "geometric descriptor"
    }

    fn match_pair(
        &self,
        points_a: &[GroupedPoint],
        points_b: &[GroupedPoint],
        pair: &mut PairwiseMatch,
    ) -> Result<(), MatchError> {
        let required = self.neighbourhood() + 1;
        let found = points_a.len().min(points_b.len());
        if found < required {
            return Err(MatchError::TooFewPoints { found, required });
        }

        let candidates = self.candidates(points_a, points_b);
        let src: Vec<DVec3> = candidates.iter().map(|m| m.a.world).collect();
        let dst: Vec<DVec3> = candidates.iter().map(|m| m.b.world).collect();
        pair.set_candidates(candidates);

        let required = self.ransac.min_inliers(self.model);
        if src.len() < required {
            return Err(MatchError::TooFewCandidates {
                found: src.len(),
                required,
            });
        }

        let result = self
            .ransac
            .estimate(&src, &dst, self.model)
            .map_err(|failure| MatchError::Ransac {
                reason: failure.reason,
                best_inlier_count: failure.best_inlier_count,
            })?;

        pair.set_inliers(result.inliers, result.transform, result.error);
        Ok(())
    }
}

/// One entry per point: a descriptor for every neighbour subset.
/// Points with too few neighbours get none.
fn describe(points: &[GroupedPoint], neighbourhood: usize, subsets: &[Vec<usize>]) -> Vec<Vec<Vec<f64>>> {
    let positions: Vec<DVec3> = points.iter().map(|p| p.world).collect();
    let Some(tree) = KdTree::build(&positions) else {
        return Vec::new();
    };

    positions
        .iter()
        .enumerate()
        .map(|(index, &center)| {
            let neighbours: Vec<DVec3> = tree
                .k_nearest(center, neighbourhood + 1)
                .into_iter()
                .filter(|&(i, _)| i != index)
                .take(neighbourhood)
                .map(|(i, _)| positions[i])
                .collect();

            if neighbours.len() < neighbourhood {
                return Vec::new();
            }

            subsets
                .iter()
                .map(|subset| {
                    let chosen: Vec<DVec3> = subset.iter().map(|&i| neighbours[i]).collect();
                    constellation(center, &chosen)
                })
                .collect()
        })
        .collect()
}

/// Distances center->neighbour (neighbours sorted by that distance), then
/// all neighbour->neighbour distances.
fn constellation(center: DVec3, neighbours: &[DVec3]) -> Vec<f64> {
    let mut descriptor: Vec<f64> = neighbours.iter().map(|n| n.distance(center)).collect();
    for i in 0..neighbours.len() {
        for j in (i + 1)..neighbours.len() {
            descriptor.push(neighbours[i].distance(neighbours[j]));
        }
    }
    descriptor
}

/// Smallest distance between any descriptor of `a` and any of `b`.
fn descriptor_distance(a: &[Vec<f64>], b: &[Vec<f64>]) -> f64 {
    let mut best = f64::INFINITY;
    for da in a {
        for db in b {
            let d: f64 = da.iter().zip(db).map(|(x, y)| (x - y) * (x - y)).sum();
            best = best.min(d);
        }
    }
    best.sqrt()
}

/// All `k`-element subsets of `0..n` in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    fn recurse(start: usize, n: usize, k: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..n {
            current.push(i);
            recurse(i + 1, n, k, current, out);
            current.pop();
        }
    }

    let mut out = Vec::new();
    recurse(0, n, k, &mut Vec::with_capacity(k), &mut out);
    out
}
