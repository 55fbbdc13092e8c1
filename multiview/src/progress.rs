//! Progress reporting for registration runs.

use std::sync::Arc;

use strum_macros::Display;

/// Progress information for a registration run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrationProgress {
    /// Completed steps of the current stage.
    pub current: usize,
    /// Total number of steps of the current stage.
    pub total: usize,
    pub stage: RegistrationStage,
}

impl RegistrationProgress {
    /// Completion in `[0, 1]`. An empty stage counts as complete.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.current as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RegistrationStage {
    /// Pairwise matching inside one subset; steps are pairs.
    Matching,
    /// Subsets processed so far; steps are subsets.
    Subsets,
}

/// Callback type for progress reporting.
pub type ProgressCallback = Arc<dyn Fn(RegistrationProgress) + Send + Sync>;

/// Report progress using the callback if set.
pub fn report_progress(
    callback: Option<&ProgressCallback>,
    current: usize,
    total: usize,
    stage: RegistrationStage,
) {
    if let Some(f) = callback {
        f(RegistrationProgress {
            current,
            total,
            stage,
        });
    }
}
