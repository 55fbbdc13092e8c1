
use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec3;

use crate::error::MatchError;
use crate::interest_points::GroupedPoint;
use crate::pairwise::{PairwiseMatch, PairwiseMatcher, PointMatch};
use crate::registration::Interrupt;
use crate::transform::{TransformModel, estimate_transform, mean_residual};
use crate::view::ViewId;

/// Pairs points carrying the same id and keeps up to `limit` of them as inliers.
pub(super) struct IdMatcher {
    pub limit: Option<usize>,
}

impl IdMatcher {
    pub fn all() -> Self {
        Self { limit: None }
    }
}

impl PairwiseMatcher for IdMatcher {
    fn name(&self) -> &'static str {
        "by-id"
    }

    fn match_pair(
        &self,
        points_a: &[GroupedPoint],
        points_b: &[GroupedPoint],
        pair: &mut PairwiseMatch,
    ) -> Result<(), MatchError> {
        let mut candidates: Vec<PointMatch> = points_a
            .iter()
            .filter_map(|a| {
                points_b
                    .iter()
                    .find(|b| b.id == a.id)
                    .map(|b| PointMatch::new(*a, *b))
            })
            .collect();
        if let Some(limit) = self.limit {
            candidates.truncate(limit);
        }

        let src: Vec<DVec3> = candidates.iter().map(|m| m.a.world).collect();
        let dst: Vec<DVec3> = candidates.iter().map(|m| m.b.world).collect();
        let model = estimate_transform(&src, &dst, TransformModel::Rigid).ok_or(
            MatchError::TooFewCandidates {
                found: candidates.len(),
                required: TransformModel::Rigid.min_points(),
            },
        )?;
        let error = mean_residual(&model, &src, &dst);

        let n = candidates.len();
        pair.set_candidates(candidates);
        pair.set_inliers((0..n).collect(), model, error);
        Ok(())
    }
}

/// Panics on one specific pair and matches every other pair by id.
pub(super) struct PanickingMatcher {
    pub fail_on: (ViewId, ViewId),
}

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
        if (pair.view_a(), pair.view_b()) == self.fail_on {
            panic!("corrupt interest points");
        }
        IdMatcher::all().match_pair(points_a, points_b, pair)
    }
}

/// Raises the interrupt the first time it is called, then behaves like [`IdMatcher`].
pub(super) struct InterruptingMatcher {
    pub interrupt: Interrupt,
    pub fired: AtomicBool,
}

impl InterruptingMatcher {
    pub fn new(interrupt: Interrupt) -> Self {
        Self {
            interrupt,
            fired: AtomicBool::new(false),
        }
    }
}

impl PairwiseMatcher for InterruptingMatcher {
    fn name(&self) -> &'static str {
        "interrupting"
    }

    fn match_pair(
        &self,
        points_a: &[GroupedPoint],
        points_b: &[GroupedPoint],
        pair: &mut PairwiseMatch,
    ) -> Result<(), MatchError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.interrupt.store(true, Ordering::SeqCst);
        }
        IdMatcher::all().match_pair(points_a, points_b, pair)
    }
}
