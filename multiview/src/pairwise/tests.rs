use glam::{DQuat, DVec3};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use super::ransac::adaptive_iterations;
use super::*;
use crate::config::{DescriptorMatcherConfig, IcpMatcherConfig, RansacConfig};
use crate::transform::TransformModel;

fn seeded_ransac() -> RansacEstimator {
    RansacEstimator::new(RansacConfig {
        seed: Some(42),
        ..Default::default()
    })
}

fn random_cloud(n: usize, seed: u64) -> Vec<DVec3> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            DVec3::new(
                rng.random_range(0.0..100.0),
                rng.random_range(0.0..100.0),
                rng.random_range(0.0..100.0),
            )
        })
        .collect()
}

fn grouped(view_id: ViewId, positions: &[DVec3]) -> Vec<GroupedPoint> {
    positions
        .iter()
        .enumerate()
        .map(|(id, &pos)| GroupedPoint {
            view_id,
            id,
            local: pos,
            world: pos,
        })
        .collect()
}

fn view_a() -> ViewId {
    ViewId::new(0, 0)
}

fn view_b() -> ViewId {
    ViewId::new(0, 1)
}

// ============================================================================
// PairwiseMatch
// ============================================================================

#[test]
#[should_panic(expected = "two distinct views")]
fn test_pair_requires_distinct_views() {
    PairwiseMatch::new(view_a(), view_a());
}

#[test]
fn test_inliers_are_subset_of_candidates() {
    let points = grouped(view_a(), &[DVec3::ZERO, DVec3::X, DVec3::Y]);
    let others = grouped(view_b(), &[DVec3::ZERO, DVec3::X, DVec3::Y]);
    let mut pair = PairwiseMatch::new(view_a(), view_b());
    pair.set_candidates(
        points
            .iter()
            .zip(&others)
            .map(|(a, b)| PointMatch::new(*a, *b))
            .collect(),
    );
    pair.set_inliers(vec![2, 0, 2], Transform::identity(), 0.0);

    assert_eq!(pair.inlier_indices(), &[0, 2]);
    assert_eq!(pair.inliers().count(), 2);
    assert!(pair.inliers().all(|m| pair.candidates().contains(m)));

    let result = pair.result();
    assert_eq!(result.num_candidates, 3);
    assert_eq!(result.num_inliers, 2);
    assert_eq!(result.failure, None);
}

#[test]
#[should_panic(expected = "inlier index out of range")]
fn test_inlier_index_out_of_range() {
    let mut pair = PairwiseMatch::new(view_a(), view_b());
    pair.set_inliers(vec![0], Transform::identity(), 0.0);
}

#[test]
fn test_failure_clears_inliers_but_keeps_candidates() {
    let a = grouped(view_a(), &[DVec3::ZERO]);
    let b = grouped(view_b(), &[DVec3::ZERO]);
    let mut pair = PairwiseMatch::new(view_a(), view_b());
    pair.set_candidates(vec![PointMatch::new(a[0], b[0])]);
    pair.set_inliers(vec![0], Transform::identity(), 0.0);

    pair.set_failure(MatchError::Interrupted);
    assert_eq!(pair.num_candidates(), 1);
    assert_eq!(pair.num_inliers(), 0);
    assert!(pair.model().is_none());
    assert_eq!(pair.result().failure.as_deref(), Some("skipped after interruption"));
}

// ============================================================================
// RANSAC
// ============================================================================

#[test]
fn test_ransac_recovers_rigid_among_outliers() {
    let known = Transform::rigid(DQuat::from_rotation_z(0.4), DVec3::new(12.0, -7.0, 3.0));
    let src = random_cloud(60, 1);
    let mut dst: Vec<DVec3> = src.iter().map(|p| known.apply(*p)).collect();

    // A third of the pairs are garbage.
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    for p in dst.iter_mut().step_by(3) {
        *p += DVec3::new(
            rng.random_range(20.0..60.0),
            rng.random_range(-60.0..-20.0),
            rng.random_range(20.0..60.0),
        );
    }

    let result = seeded_ransac()
        .estimate(&src, &dst, TransformModel::Rigid)
        .unwrap();

    assert_eq!(result.inliers.len(), 40);
    assert!(result.inliers.iter().all(|i| i % 3 != 0));
    assert!(result.transform.abs_diff_eq(&known, 1e-6));
    assert!(result.error < 1e-6);
}

#[test]
fn test_ransac_too_few_candidates() {
    let src = vec![DVec3::ZERO, DVec3::X];
    let failure = seeded_ransac()
        .estimate(&src, &src, TransformModel::Rigid)
        .unwrap_err();
    assert_eq!(failure.reason, RansacFailureReason::TooFewCandidates);
}

#[test]
fn test_ransac_degenerate_points() {
    let src: Vec<DVec3> = (0..10).map(|i| DVec3::splat(i as f64)).collect();
    let failure = seeded_ransac()
        .estimate(&src, &src, TransformModel::Rigid)
        .unwrap_err();
    assert_eq!(failure.reason, RansacFailureReason::DegeneratePointSet);
}

#[test]
fn test_ransac_insufficient_inliers() {
    let src = random_cloud(30, 5);
    let dst = random_cloud(30, 6);
    let estimator = RansacEstimator::new(RansacConfig {
        seed: Some(7),
        max_epsilon: 0.5,
        min_inlier_ratio: 0.5,
        max_iterations: 500,
        ..Default::default()
    });

    let failure = estimator
        .estimate(&src, &dst, TransformModel::Rigid)
        .unwrap_err();
    assert!(matches!(
        failure.reason,
        RansacFailureReason::InsufficientInliers | RansacFailureReason::NoInliersFound
    ));
}

#[test]
fn test_adaptive_iterations() {
    assert_eq!(adaptive_iterations(1.0, 3, 0.99), 1);
    let few = adaptive_iterations(0.9, 3, 0.99);
    let many = adaptive_iterations(0.2, 3, 0.99);
    assert!(few < many);
    assert!(few >= 1);
}

// ============================================================================
// Matchers
// ============================================================================

#[test]
fn test_descriptor_matcher_recovers_rigid_motion() {
    let known = Transform::rigid(DQuat::from_rotation_x(0.3), DVec3::new(5.0, -3.0, 2.0));
    let positions_a = random_cloud(80, 10);
    // B sees every bead of A plus a few of its own.
    let mut positions_b: Vec<DVec3> = positions_a.iter().map(|p| known.apply(*p)).collect();
    positions_b.extend(random_cloud(5, 11).into_iter().map(|p| p + DVec3::splat(300.0)));

    let matcher = GeometricDescriptorMatcher::new(
        DescriptorMatcherConfig::default(),
        seeded_ransac(),
        TransformModel::Rigid,
    );
    let mut pair = PairwiseMatch::new(view_a(), view_b());
    matcher
        .match_pair(
            &grouped(view_a(), &positions_a),
            &grouped(view_b(), &positions_b),
            &mut pair,
        )
        .unwrap();

    assert!(pair.num_inliers() >= 70, "only {} inliers", pair.num_inliers());
    assert!(pair.inliers().all(|m| m.a.id == m.b.id));
    assert!(pair.model().unwrap().abs_diff_eq(&known, 1e-6));
}

#[test]
fn test_descriptor_matcher_needs_enough_points() {
    let matcher = GeometricDescriptorMatcher::new(
        DescriptorMatcherConfig::default(),
        seeded_ransac(),
        TransformModel::Rigid,
    );
    let mut pair = PairwiseMatch::new(view_a(), view_b());
    let err = matcher
        .match_pair(
            &grouped(view_a(), &random_cloud(3, 1)),
            &grouped(view_b(), &random_cloud(30, 2)),
            &mut pair,
        )
        .unwrap_err();
    assert_eq!(
        err,
        MatchError::TooFewPoints {
            found: 3,
            required: 5
        }
    );
}

#[test]
fn test_icp_recovers_small_translation() {
    let shift = DVec3::new(0.8, -0.5, 0.3);
    let positions_a = random_cloud(100, 20);
    let positions_b: Vec<DVec3> = positions_a.iter().map(|p| *p + shift).collect();

    let matcher = IcpMatcher::new(
        IcpMatcherConfig {
            max_distance: 3.0,
            ..Default::default()
        },
        TransformModel::Translation,
    );
    let mut pair = PairwiseMatch::new(view_a(), view_b());
    matcher
        .match_pair(
            &grouped(view_a(), &positions_a),
            &grouped(view_b(), &positions_b),
            &mut pair,
        )
        .unwrap();

    let model = pair.model().unwrap();
    assert!((model.translation_components() - shift).length() < 1e-9);
    assert_eq!(pair.num_inliers(), 100);
    assert!(pair.error() < 1e-9);
}

#[test]
fn test_icp_without_overlap_fails() {
    let positions_a = random_cloud(20, 1);
    let positions_b: Vec<DVec3> = positions_a.iter().map(|p| *p + DVec3::splat(500.0)).collect();
    let matcher = IcpMatcher::new(IcpMatcherConfig::default(), TransformModel::Rigid);
    let mut pair = PairwiseMatch::new(view_a(), view_b());

    let err = matcher
        .match_pair(
            &grouped(view_a(), &positions_a),
            &grouped(view_b(), &positions_b),
            &mut pair,
        )
        .unwrap_err();
    assert!(matches!(err, MatchError::NoOverlap { .. }));
}

// ============================================================================
// compute_pairwise
// ============================================================================

struct PanickingMatcher;

impl PairwiseMatcher for PanickingMatcher {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn match_pair(
        &self,
        points_a: &[GroupedPoint],
        points_b: &[GroupedPoint],
        pair: &mut PairwiseMatch,
    ) -> Result<(), MatchError> {
        pair.set_candidates(vec![PointMatch::new(points_a[0], points_b[0])]);
        panic!("matcher exploded");
    }
}

#[test]
fn test_compute_pairwise_contains_panics() {
    let a = grouped(view_a(), &[DVec3::ZERO]);
    let b = grouped(view_b(), &[DVec3::ZERO]);
    let mut pair = PairwiseMatch::new(view_a(), view_b());

    compute_pairwise(&PanickingMatcher, &mut pair, &a, &b);

    assert_eq!(pair.num_candidates(), 0);
    assert_eq!(pair.num_inliers(), 0);
    assert_eq!(
        pair.failure(),
        Some(&MatchError::Panicked("matcher exploded".to_string()))
    );
}

#[test]
fn test_compute_pairwise_records_errors() {
    let matcher = IcpMatcher::new(IcpMatcherConfig::default(), TransformModel::Rigid);
    let mut pair = PairwiseMatch::new(view_a(), view_b());

    compute_pairwise(&matcher, &mut pair, &[], &[]);

    assert!(matches!(
        pair.failure(),
        Some(MatchError::TooFewPoints { found: 0, .. })
    ));
}
