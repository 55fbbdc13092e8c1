//! Global optimization of one subset.
//!
//! Nodes are the subset's view groups, edges carry the inlier point pairs of
//! the pairwise matches in world coordinates. A [`GlobalSolver`] computes one
//! world-to-world correction per group; anchoring (fixed views or map-back)
//! removes the remaining gauge freedom.

pub mod map_back;
mod relaxation;


use glam::DVec3;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, warn};

use crate::config::{OptimizerConfig, SolverKind};
use crate::error::OptimizationError;
use crate::interest_points::InterestPointGrouping;
use crate::subset::GlobalOptimizationSubset;
use crate::transform::{Transform, TransformModel, estimate_transform};
use crate::view::ViewId;

pub use map_back::{MapBackModel, apply_map_back, map_back_samples};
pub use relaxation::RelaxationSolver;

/// Lifecycle of one subset within a `register` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum SubsetState {
    #[default]
    Pending,
    Solving,
    Solved,
    Failed,
}

impl SubsetState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubsetState::Solved | SubsetState::Failed)
    }
}

/// Which views keep their transform during the solve.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FixedViews {
    None,
    /// The anchor view of each subset: the first view of the reference
    /// timepoint if there is one, the smallest view otherwise.
    #[default]
    FirstView,
    Selected { views: Vec<ViewId> },
}

/// How a free solve is brought back into the original frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapBack {
    #[default]
    Disabled,
    /// Map back to the anchor view of each subset.
    FirstView { model: MapBackModel },
    /// Map back to the selected view contained in each subset.
    Selected { model: MapBackModel, views: Vec<ViewId> },
}

/// Anchoring of the global solve plus the grouping the subsets were built with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixMapBackParameters {
    pub fixed_views: FixedViews,
    pub map_back: MapBack,
    pub grouping: InterestPointGrouping,
}

impl FixMapBackParameters {
    pub fn fix_first_view() -> Self {
        Self::default()
    }

    pub fn map_back_to_first_view(model: MapBackModel) -> Self {
        Self {
            fixed_views: FixedViews::None,
            map_back: MapBack::FirstView { model },
            grouping: InterestPointGrouping::DoNotGroup,
        }
    }

    /// Fixed views of `subset`. Selected views outside the subset are ignored.
    pub fn resolve_fixed(&self, subset: &GlobalOptimizationSubset) -> Vec<ViewId> {
        match &self.fixed_views {
            FixedViews::None => Vec::new(),
            FixedViews::FirstView => vec![subset.anchor_view()],
            FixedViews::Selected { views } => {
                let mut fixed: Vec<ViewId> =
                    views.iter().copied().filter(|v| subset.contains(*v)).collect();
                fixed.sort();
                fixed.dedup();
                fixed
            }
        }
    }

    /// Reference view and model for map-back, if enabled. A selection that
    /// misses the subset falls back to its first view.
    pub fn resolve_map_back(&self, subset: &GlobalOptimizationSubset) -> Option<(ViewId, MapBackModel)> {
        match &self.map_back {
            MapBack::Disabled => None,
            MapBack::FirstView { model } => Some((subset.anchor_view(), *model)),
            MapBack::Selected { model, views } => {
                let reference = views
                    .iter()
                    .copied()
                    .filter(|v| subset.contains(*v))
                    .min()
                    .unwrap_or_else(|| subset.anchor_view());
                Some((reference, *model))
            }
        }
    }
}

/// Inlier point pairs between two nodes, in world coordinates.
#[derive(Debug, Clone)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
    pub points_a: Vec<DVec3>,
    pub points_b: Vec<DVec3>,
}

/// The graph handed to a [`GlobalSolver`]. At least one node is fixed.
#[derive(Debug, Clone)]
pub struct OptimizationProblem {
    nodes: Vec<ViewId>,
    edges: Vec<Edge>,
    fixed: Vec<bool>,
    model: TransformModel,
}

impl OptimizationProblem {
    pub fn new(nodes: Vec<ViewId>, edges: Vec<Edge>, fixed: Vec<bool>, model: TransformModel) -> Self {
        assert_eq!(nodes.len(), fixed.len(), "one fixed flag per node");
        assert!(fixed.iter().any(|&f| f), "at least one node must be fixed");
        assert!(
            edges.iter().all(|e| e.a < nodes.len() && e.b < nodes.len() && e.a != e.b),
            "edges must connect two distinct nodes"
        );
        Self {
            nodes,
            edges,
            fixed,
            model,
        }
    }

    /// Builds the graph of `subset` from the inliers of its pairs. Groups in
    /// `fixed_views` are fixed; without any, the first group is.
    pub fn from_subset(
        subset: &GlobalOptimizationSubset,
        fixed_views: &[ViewId],
        model: TransformModel,
    ) -> Result<Self, OptimizationError> {
        let nodes: Vec<ViewId> = subset.groups().iter().map(|g| g.representative()).collect();
        let index_of = |view_id: ViewId| nodes.binary_search(&view_id).ok();

        let mut edges = Vec::new();
        for pair in subset.pairs() {
            if pair.num_inliers() == 0 {
                continue;
            }
            let (Some(a), Some(b)) = (index_of(pair.view_a()), index_of(pair.view_b())) else {
                continue;
            };
            edges.push(Edge {
                a,
                b,
                points_a: pair.inliers().map(|m| m.a.world).collect(),
                points_b: pair.inliers().map(|m| m.b.world).collect(),
            });
        }

        if edges.is_empty() {
            return Err(OptimizationError::NoInlierPairs);
        }

        let mut fixed = vec![false; nodes.len()];
        for &view_id in fixed_views {
            if let Some(group) = subset.group_of(view_id)
                && let Some(index) = index_of(group.representative())
            {
                fixed[index] = true;
            }
        }
        if !fixed.iter().any(|&f| f) {
            fixed[0] = true;
        }

        Ok(Self::new(nodes, edges, fixed, model))
    }

    pub fn nodes(&self) -> &[ViewId] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_fixed(&self, node: usize) -> bool {
        self.fixed[node]
    }

    pub fn model(&self) -> TransformModel {
        self.model
    }

    /// Mean distance between corrected point pairs over all edges.
    pub fn mean_error(&self, corrections: &[Transform]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for edge in &self.edges {
            let ca = &corrections[edge.a];
            let cb = &corrections[edge.b];
            for (pa, pb) in edge.points_a.iter().zip(&edge.points_b) {
                sum += ca.apply(*pa).distance(cb.apply(*pb));
                count += 1;
            }
        }
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Number of point pairs linking `node` to nodes accepted by `include`.
    fn support(&self, node: usize, include: &[bool]) -> usize {
        self.edges
            .iter()
            .filter_map(|e| {
                if e.a == node && include[e.b] || e.b == node && include[e.a] {
                    Some(e.points_a.len())
                } else {
                    None
                }
            })
            .sum()
    }

    /// Least-squares correction of `node` against every neighbour in `include`.
    fn fit_node(&self, node: usize, corrections: &[Transform], include: &[bool]) -> Option<Transform> {
        let mut src = Vec::new();
        let mut dst = Vec::new();

        for edge in &self.edges {
            let (own, other, other_node) = if edge.a == node {
                (&edge.points_a, &edge.points_b, edge.b)
            } else if edge.b == node {
                (&edge.points_b, &edge.points_a, edge.a)
            } else {
                continue;
            };
            if !include[other_node] {
                continue;
            }

            let correction = &corrections[other_node];
            src.extend_from_slice(own);
            dst.extend(other.iter().map(|p| correction.apply(*p)));
        }

        estimate_transform(&src, &dst, self.model)
    }
}

/// Result of a solve: one correction per node, in node order.
#[derive(Debug, Clone)]
pub struct Solution {
    pub corrections: Vec<Transform>,
    pub error: f64,
    pub iterations: usize,
}

/// Computes corrections minimizing the disagreement along all edges.
pub trait GlobalSolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, problem: &OptimizationProblem) -> Result<Solution, OptimizationError>;
}

/// Places each node once, greedily picking the free node with the most
/// point pairs to already placed nodes and fitting it against all of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanningTreeSolver;

impl GlobalSolver for SpanningTreeSolver {
    fn name(&self) -> &'static str {
        "spanning tree"
    }

    fn solve(&self, problem: &OptimizationProblem) -> Result<Solution, OptimizationError> {
        let n = problem.nodes().len();
        let mut corrections = vec![Transform::identity(); n];
        let mut placed = problem.fixed.clone();

        loop {
            let next = (0..n)
                .filter(|&node| !placed[node])
                .map(|node| (node, problem.support(node, &placed)))
                .filter(|&(_, support)| support > 0)
                .max_by(|x, y| x.1.cmp(&y.1).then(y.0.cmp(&x.0)));

            let Some((node, _)) = next else {
                break;
            };

            corrections[node] = problem
                .fit_node(node, &corrections, &placed)
                .ok_or(OptimizationError::DegenerateFit(problem.nodes()[node]))?;
            placed[node] = true;
        }

        if let Some(node) = placed.iter().position(|&p| !p) {
            return Err(OptimizationError::Disconnected(problem.nodes()[node]));
        }

        let error = problem.mean_error(&corrections);
        Ok(Solution {
            corrections,
            error,
            iterations: 1,
        })
    }
}

/// Per-view outcome of a successful subset optimization.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Correction for every view of the subset, sorted by view.
    pub corrections: Vec<(ViewId, Transform)>,
    pub error: f64,
    pub iterations: usize,
}

/// Runs a solver on a subset and applies the anchoring rules.
pub struct GlobalOptimizer {
    config: OptimizerConfig,
    solver: Box<dyn GlobalSolver>,
}

impl GlobalOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        config.validate();
        let solver: Box<dyn GlobalSolver> = match config.solver {
            SolverKind::SpanningTree => Box::new(SpanningTreeSolver),
            SolverKind::Relaxation => Box::new(RelaxationSolver::new(&config)),
        };
        Self { config, solver }
    }

    pub fn with_solver(config: OptimizerConfig, solver: Box<dyn GlobalSolver>) -> Self {
        config.validate();
        Self { config, solver }
    }

    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    /// Solves `subset`. `reference_points` yields the current world interest
    /// points of a view and is only consulted for map-back.
    pub fn optimize(
        &self,
        subset: &GlobalOptimizationSubset,
        parameters: &FixMapBackParameters,
        reference_points: &dyn Fn(ViewId) -> Vec<DVec3>,
    ) -> Result<OptimizationResult, OptimizationError> {
        let fixed_views = parameters.resolve_fixed(subset);
        let map_back = if fixed_views.is_empty() {
            parameters.resolve_map_back(subset)
        } else {
            None
        };
        if fixed_views.is_empty() && map_back.is_none() {
            warn!("{subset}: no fixed views and no map-back, keeping the first group in place");
        }

        let problem = OptimizationProblem::from_subset(subset, &fixed_views, self.config.model)?;
        let mut solution = self.solver.solve(&problem)?;

        if let Some((reference, model)) = map_back {
            let node = subset
                .group_of(reference)
                .and_then(|g| problem.nodes().binary_search(&g.representative()).ok())
                .ok_or(OptimizationError::DegenerateFit(reference))?;
            let samples = map_back_samples(&reference_points(reference), model);
            let mapping = apply_map_back(&mut solution.corrections, node, &samples, model)
                .ok_or(OptimizationError::DegenerateFit(reference))?;
            debug!("Mapped {subset} back onto {reference} with {mapping}");
        }

        for (node, correction) in solution.corrections.iter().enumerate() {
            if !correction.is_valid() {
                return Err(OptimizationError::NonFinite(problem.nodes()[node]));
            }
        }

        let error = problem.mean_error(&solution.corrections);
        if !error.is_finite() || error > self.config.max_error {
            return Err(OptimizationError::ErrorTooLarge {
                error,
                max_error: self.config.max_error,
            });
        }

        let mut corrections: Vec<(ViewId, Transform)> = subset
            .groups()
            .iter()
            .zip(&solution.corrections)
            .flat_map(|(group, correction)| group.views().iter().map(|&v| (v, *correction)))
            .collect();
        corrections.sort_by_key(|(view_id, _)| *view_id);

        Ok(OptimizationResult {
            corrections,
            error,
            iterations: solution.iterations,
        })
    }
}
