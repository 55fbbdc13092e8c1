//! Error types for pairwise matching, global optimization and persistence.

use std::path::PathBuf;

use thiserror::Error;

use crate::pairwise::ransac::RansacFailureReason;
use crate::view::ViewId;

/// Failure of one pairwise match. Recovered locally: the pair keeps no inliers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("too few interest points: found {found}, need {required}")]
    TooFewPoints { found: usize, required: usize },

    #[error("too few candidates: found {found}, need {required}")]
    TooFewCandidates { found: usize, required: usize },

    #[error("RANSAC failed: {reason} (best inlier count: {best_inlier_count})")]
    Ransac {
        reason: RansacFailureReason,
        best_inlier_count: usize,
    },

    #[error("ICP did not find overlapping points within {max_distance}")]
    NoOverlap { max_distance: f64 },

    #[error("matcher panicked: {0}")]
    Panicked(String),

    #[error("skipped after interruption")]
    Interrupted,
}

/// Failure of a global optimization of one subset. Nothing is written.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizationError {
    #[error("subset has no pairs with inliers")]
    NoInlierPairs,

    #[error("view {0} is not connected to the rest of the subset by inlier pairs")]
    Disconnected(ViewId),

    #[error("could not fit a transform for view {0}")]
    DegenerateFit(ViewId),

    #[error("solution for view {0} is not finite")]
    NonFinite(ViewId),

    #[error("mean error {error:.3} exceeds the allowed {max_error:.3}")]
    ErrorTooLarge { error: f64, max_error: f64 },

    #[error("interrupted while computing pairwise matches")]
    Interrupted,
}

/// A correspondence file could not be written.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize correspondences of {view_id}")]
    Serialize {
        view_id: ViewId,
        #[source]
        source: serde_json::Error,
    },
}
