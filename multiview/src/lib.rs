//! Multiview - interest point based registration of multi-view microscopy acquisitions.
//!
//! Views are compared pairwise using their interest points, the verified
//! correspondences are stored per view, and one global optimization per
//! connected subset turns the pairwise models into a correction for every
//! view registration.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use multiview::{
//!     ChannelProcess, Dataset, FixMapBackParameters, GlobalOptimizationType,
//!     InterestPointRegistration, RegistrationConfig, RegistrationType,
//! };
//!
//! let mut dataset = Dataset::load("dataset.yaml".as_ref())?;
//! let views = dataset.sequence.view_ids();
//! let channels = ChannelProcess::all_channels(&dataset.sequence, "beads");
//!
//! let strategy = GlobalOptimizationType::new(
//!     RegistrationType::TimepointsIndividually,
//!     FixMapBackParameters::fix_first_view(),
//! );
//! let mut registration =
//!     InterestPointRegistration::new(&mut dataset, views, channels, RegistrationConfig::default());
//! if registration.register(&strategy, false, true) {
//!     dataset.save("dataset.yaml".as_ref())?;
//! }
//! ```

pub mod config;
pub mod correspondence;
pub mod dataset;
pub mod error;
pub mod interest_points;
pub mod optimizer;
pub mod pairwise;
pub mod progress;
pub mod registration;
pub(crate) mod spatial;
pub mod subset;
pub mod transform;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Views and data
// ============================================================================

pub use dataset::{Dataset, ViewRegistration, ViewRegistrations};
pub use interest_points::{GroupedPoint, InterestPoint, InterestPointGrouping, InterestPointStore, ViewGroup};
pub use view::{Entity, SequenceDescription, ViewDescription, ViewId, ViewRegistry, ViewSetup};

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{
    DescriptorMatcherConfig, IcpMatcherConfig, MatcherConfig, OptimizerConfig, RansacConfig,
    RegistrationConfig, SolverKind,
};
pub use error::{MatchError, OptimizationError, PersistError};

// ============================================================================
// Pairwise matching
// ============================================================================

pub use pairwise::{
    GeometricDescriptorMatcher, IcpMatcher, PairwiseMatch, PairwiseMatcher, PairwiseResult, PointMatch,
    RansacEstimator, compute_pairwise,
};
pub use transform::{Transform, TransformModel};

// ============================================================================
// Subsets and global optimization
// ============================================================================

pub use optimizer::{
    FixMapBackParameters, FixedViews, GlobalOptimizer, GlobalSolver, MapBack, MapBackModel, SubsetState,
};
pub use subset::{ExplicitPairs, GlobalOptimizationSubset, GlobalOptimizationType, PairingPolicy, RegistrationType};

// ============================================================================
// Correspondences and orchestration
// ============================================================================

pub use correspondence::{
    CorrespondencePersistence, CorrespondenceStore, CorrespondingInterestPoint, JsonCorrespondenceWriter,
};
pub use progress::{ProgressCallback, RegistrationProgress, RegistrationStage};
pub use registration::{ChannelProcess, InterestPointRegistration, Interrupt, SubsetOutcome};
