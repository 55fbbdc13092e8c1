//! Pairwise correspondence search between two view groups.
//!
//! A matcher proposes candidate correspondences and verifies them into an
//! inlier set. Each invocation only touches the [`PairwiseMatch`] it was
//! handed, so disjoint pairs can run concurrently.

pub mod descriptor;
pub mod icp;
pub mod ransac;

#[cfg(test)]
mod tests;

use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{MatcherConfig, RegistrationConfig};
use crate::error::MatchError;
use crate::interest_points::GroupedPoint;
use crate::transform::Transform;
use crate::view::ViewId;

pub use descriptor::GeometricDescriptorMatcher;
pub use icp::IcpMatcher;
pub use ransac::{RansacEstimator, RansacFailureReason};

/// An unverified pairing of one point of view A with one point of view B.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointMatch {
    pub a: GroupedPoint,
    pub b: GroupedPoint,
    /// Descriptor distance or residual; lower is better.
    pub similarity: Option<f64>,
}

impl PointMatch {
    pub fn new(a: GroupedPoint, b: GroupedPoint) -> Self {
        Self {
            a,
            b,
            similarity: None,
        }
    }
}

/// Candidates and verified inliers between two view groups, identified by
/// their representatives.
#[derive(Clone, Debug)]
pub struct PairwiseMatch {
    view_a: ViewId,
    view_b: ViewId,
    candidates: Vec<PointMatch>,
    /// Sorted indices into `candidates`.
    inliers: Vec<usize>,
    model: Option<Transform>,
    error: f64,
    description: String,
    failure: Option<MatchError>,
}

impl PairwiseMatch {
    pub fn new(view_a: ViewId, view_b: ViewId) -> Self {
        assert_ne!(view_a, view_b, "a pair needs two distinct views");
        Self {
            view_a,
            view_b,
            candidates: Vec::new(),
            inliers: Vec::new(),
            model: None,
            error: 0.0,
            description: format!("{view_a} <-> {view_b}"),
            failure: None,
        }
    }

    pub fn view_a(&self) -> ViewId {
        self.view_a
    }

    pub fn view_b(&self) -> ViewId {
        self.view_b
    }

    pub fn contains(&self, view_id: ViewId) -> bool {
        self.view_a == view_id || self.view_b == view_id
    }

    /// Replaces the candidates. Any previous inliers are dropped.
    pub fn set_candidates(&mut self, candidates: Vec<PointMatch>) {
        self.candidates = candidates;
        self.inliers.clear();
        self.model = None;
        self.error = 0.0;
    }

    /// Records the verified subset of the candidates and the model fitted to it.
    pub fn set_inliers(&mut self, mut indices: Vec<usize>, model: Transform, error: f64) {
        indices.sort_unstable();
        indices.dedup();
        assert!(
            indices.last().is_none_or(|&i| i < self.candidates.len()),
            "inlier index out of range of {} candidates",
            self.candidates.len()
        );

        self.inliers = indices;
        self.model = Some(model);
        self.error = error;
        self.failure = None;
    }

    /// Marks the match as failed; candidates are kept for statistics.
    pub fn set_failure(&mut self, failure: MatchError) {
        self.inliers.clear();
        self.model = None;
        self.error = 0.0;
        self.failure = Some(failure);
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn candidates(&self) -> &[PointMatch] {
        &self.candidates
    }

    pub fn inlier_indices(&self) -> &[usize] {
        &self.inliers
    }

    pub fn inliers(&self) -> impl Iterator<Item = &PointMatch> + '_ {
        self.inliers.iter().map(|&i| &self.candidates[i])
    }

    pub fn num_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn num_inliers(&self) -> usize {
        self.inliers.len()
    }

    pub fn model(&self) -> Option<&Transform> {
        self.model.as_ref()
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn failure(&self) -> Option<&MatchError> {
        self.failure.as_ref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn result(&self) -> PairwiseResult {
        PairwiseResult {
            view_a: self.view_a,
            view_b: self.view_b,
            num_candidates: self.num_candidates(),
            num_inliers: self.num_inliers(),
            error: self.error,
            description: self.description.clone(),
            failure: self.failure.as_ref().map(ToString::to_string),
        }
    }
}

/// Per-pair summary kept when statistics are requested.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PairwiseResult {
    pub view_a: ViewId,
    pub view_b: ViewId,
    pub num_candidates: usize,
    pub num_inliers: usize,
    pub error: f64,
    pub description: String,
    pub failure: Option<String>,
}

/// Computes candidates and inliers for one pair.
pub trait PairwiseMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fills `pair` from the world positions of both groups. Must not touch
    /// anything but `pair`.
    fn match_pair(
        &self,
        points_a: &[GroupedPoint],
        points_b: &[GroupedPoint],
        pair: &mut PairwiseMatch,
    ) -> Result<(), MatchError>;
}

/// Runs `matcher` on `pair`. Errors and panics are contained here: the pair
/// ends up with no inliers and a failure reason.
pub fn compute_pairwise(
    matcher: &dyn PairwiseMatcher,
    pair: &mut PairwiseMatch,
    points_a: &[GroupedPoint],
    points_b: &[GroupedPoint],
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        matcher.match_pair(points_a, points_b, pair)
    }));

    match outcome {
        Ok(Ok(())) => debug!(
            "{} ({}): {} candidates, {} inliers, error {:.3}",
            pair.description(),
            matcher.name(),
            pair.num_candidates(),
            pair.num_inliers(),
            pair.error()
        ),
        Ok(Err(err)) => {
            warn!("{} ({}): {err}", pair.description(), matcher.name());
            pair.set_failure(err);
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(
                "{} ({}) panicked: {message}",
                pair.description(),
                matcher.name()
            );
            pair.set_candidates(Vec::new());
            pair.set_failure(MatchError::Panicked(message));
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Instantiates the matcher selected in `config`.
pub fn build_matcher(config: &RegistrationConfig) -> Box<dyn PairwiseMatcher> {
    match &config.matcher {
        MatcherConfig::GeometricDescriptor(descriptor) => Box::new(GeometricDescriptorMatcher::new(
            descriptor.clone(),
            RansacEstimator::new(config.ransac.clone()),
            config.pairwise_model,
        )),
        MatcherConfig::Icp(icp) => Box::new(IcpMatcher::new(icp.clone(), config.pairwise_model)),
    }
}
