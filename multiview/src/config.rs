//! Configuration types for interest point registration.
//!
//! All tunables of the pipeline live here. Every struct deserializes with
//! defaults for missing fields, so partial YAML/JSON files are fine.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::transform::TransformModel;

// =============================================================================
// RANSAC configuration
// =============================================================================

/// RANSAC configuration used to verify candidate correspondences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Maximum iterations.
    pub max_iterations: usize,
    /// Inlier distance threshold in world units.
    pub max_epsilon: f64,
    /// Minimum inlier ratio to accept a model.
    pub min_inlier_ratio: f64,
    /// Minimum absolute number of inliers. Never lower than the model's minimum sample.
    pub min_num_inliers: usize,
    /// Target confidence for early termination.
    pub confidence: f64,
    /// Random seed for reproducibility (None for random).
    pub seed: Option<u64>,
    /// Refine promising hypotheses on their inliers (LO-RANSAC).
    pub use_local_optimization: bool,
    pub lo_max_iterations: usize,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            max_epsilon: 5.0,
            min_inlier_ratio: 0.1,
            min_num_inliers: 3,
            confidence: 0.995,
            seed: None,
            use_local_optimization: true,
            lo_max_iterations: 10,
        }
    }
}

impl RansacConfig {
    pub fn validate(&self) {
        assert!(
            self.max_iterations > 0,
            "RANSAC max_iterations must be positive, got {}",
            self.max_iterations
        );
        assert!(
            self.max_epsilon > 0.0,
            "RANSAC max_epsilon must be positive, got {}",
            self.max_epsilon
        );
        assert!(
            self.min_inlier_ratio >= 0.0 && self.min_inlier_ratio <= 1.0,
            "RANSAC min_inlier_ratio must be in [0, 1], got {}",
            self.min_inlier_ratio
        );
        assert!(
            self.confidence > 0.0 && self.confidence < 1.0,
            "RANSAC confidence must be in (0, 1), got {}",
            self.confidence
        );
    }
}

// =============================================================================
// Pairwise matcher configuration
// =============================================================================

/// Geometric local descriptor matching on neighbour constellations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorMatcherConfig {
    /// Neighbours forming one descriptor.
    pub num_neighbors: usize,
    /// Extra neighbours considered; every subset of size `num_neighbors` is tried.
    pub redundancy: usize,
    /// Required ratio between second-best and best descriptor distance.
    pub significance: f64,
}

impl Default for DescriptorMatcherConfig {
    fn default() -> Self {
        Self {
            num_neighbors: 3,
            redundancy: 1,
            significance: 3.0,
        }
    }
}

impl DescriptorMatcherConfig {
    pub fn validate(&self) {
        assert!(
            self.num_neighbors >= 2,
            "num_neighbors must be at least 2, got {}",
            self.num_neighbors
        );
        assert!(
            self.redundancy <= 4,
            "redundancy must be at most 4, got {}",
            self.redundancy
        );
        assert!(
            self.significance >= 1.0,
            "significance must be >= 1, got {}",
            self.significance
        );
    }
}

/// Iterative closest point on world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpMatcherConfig {
    /// Maximum distance between two points to be paired.
    pub max_distance: f64,
    pub max_iterations: usize,
    /// Stop once the mean displacement changes less than this between iterations.
    pub convergence: f64,
}

impl Default for IcpMatcherConfig {
    fn default() -> Self {
        Self {
            max_distance: 5.0,
            max_iterations: 100,
            convergence: 1e-4,
        }
    }
}

impl IcpMatcherConfig {
    pub fn validate(&self) {
        assert!(
            self.max_distance > 0.0,
            "ICP max_distance must be positive, got {}",
            self.max_distance
        );
        assert!(
            self.max_iterations > 0,
            "ICP max_iterations must be positive, got {}",
            self.max_iterations
        );
        assert!(
            self.convergence >= 0.0,
            "ICP convergence must be non-negative, got {}",
            self.convergence
        );
    }
}

/// Which pairwise matcher to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatcherConfig {
    GeometricDescriptor(DescriptorMatcherConfig),
    Icp(IcpMatcherConfig),
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig::GeometricDescriptor(DescriptorMatcherConfig::default())
    }
}

impl MatcherConfig {
    pub fn validate(&self) {
        match self {
            MatcherConfig::GeometricDescriptor(config) => config.validate(),
            MatcherConfig::Icp(config) => config.validate(),
        }
    }
}

// =============================================================================
// Global optimization configuration
// =============================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SolverKind {
    /// Place every group once by walking a spanning tree from the anchors.
    SpanningTree,
    /// Spanning tree followed by iterative relaxation against all neighbours.
    #[default]
    Relaxation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub solver: SolverKind,
    /// Model of the per-group correction transforms.
    pub model: TransformModel,
    pub max_iterations: usize,
    /// Number of recent iterations inspected for the convergence test.
    pub max_plateau_width: usize,
    /// Converged once the mean error changes less than this over the plateau.
    pub convergence_epsilon: f64,
    /// Solutions with a larger mean error are rejected.
    pub max_error: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            solver: SolverKind::default(),
            model: TransformModel::Rigid,
            max_iterations: 10_000,
            max_plateau_width: 200,
            convergence_epsilon: 1e-6,
            max_error: 5.0,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) {
        assert!(
            self.max_iterations > 0,
            "optimizer max_iterations must be positive, got {}",
            self.max_iterations
        );
        assert!(
            self.max_plateau_width > 0,
            "optimizer max_plateau_width must be positive, got {}",
            self.max_plateau_width
        );
        assert!(
            self.convergence_epsilon >= 0.0,
            "optimizer convergence_epsilon must be non-negative, got {}",
            self.convergence_epsilon
        );
        assert!(
            self.max_error > 0.0,
            "optimizer max_error must be positive, got {}",
            self.max_error
        );
    }
}

// =============================================================================
// Top-level configuration
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Worker threads per subset. 0 uses every core.
    pub parallelism: usize,
    /// Model fitted to each pair.
    pub pairwise_model: TransformModel,
    pub matcher: MatcherConfig,
    pub ransac: RansacConfig,
    pub optimizer: OptimizerConfig,
}

impl RegistrationConfig {
    pub fn validate(&self) {
        self.matcher.validate();
        self.ransac.validate();
        self.optimizer.validate();
    }
}
