//! Drives interest point registration: subsets, pairwise matching, correspondence
//! bookkeeping and the global solve.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use common::parallel::{bounded_pool, effective_parallelism, for_each_mut_in};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RegistrationConfig;
use crate::correspondence::CorrespondencePersistence;
use crate::dataset::Dataset;
use crate::error::{MatchError, OptimizationError};
use crate::interest_points::{GroupedPoint, snapshot_group};
use crate::optimizer::{GlobalOptimizer, GlobalSolver, SubsetState};
use crate::pairwise::{PairwiseMatcher, PairwiseResult, build_matcher, compute_pairwise};
use crate::progress::{ProgressCallback, RegistrationStage, report_progress};
use crate::subset::{GlobalOptimizationSubset, GlobalOptimizationType};
use crate::view::{SequenceDescription, ViewId, ViewRegistry};

/// Shared cancellation flag. Setting it aborts the subset currently being
/// matched; it is cleared once that subset has been given up.
pub type Interrupt = Arc<AtomicBool>;

/// Which interest point label is used for the views of one channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelProcess {
    pub channel: i32,
    pub label: String,
}

impl ChannelProcess {
    pub fn new(channel: i32, label: impl Into<String>) -> Self {
        Self {
            channel,
            label: label.into(),
        }
    }

    /// Every channel of `sequence` with the same label.
    pub fn all_channels(sequence: &SequenceDescription, label: &str) -> Vec<Self> {
        let mut channels: Vec<i32> = sequence.setups.iter().map(|s| s.channel.id).collect();
        channels.sort_unstable();
        channels.dedup();
        channels.into_iter().map(|c| Self::new(c, label)).collect()
    }
}

/// What happened to one subset during the last `register` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubsetOutcome {
    pub description: String,
    pub views: Vec<ViewId>,
    pub state: SubsetState,
    pub failure: Option<String>,
    pub num_candidates: usize,
    pub num_inliers: usize,
}

impl SubsetOutcome {
    fn failed(mut self, failure: impl ToString) -> Self {
        self.state = SubsetState::Failed;
        self.failure = Some(failure.to_string());
        self
    }
}

fn label_for(sequence: &SequenceDescription, channels: &[ChannelProcess], view_id: ViewId) -> Option<String> {
    let description = sequence.view_description(view_id)?;
    channels
        .iter()
        .find(|c| c.channel == description.channel().id)
        .map(|c| c.label.clone())
}

/// Registers a set of views of a [`Dataset`] using their interest points.
pub struct InterestPointRegistration<'a> {
    dataset: &'a mut Dataset,
    view_ids: Vec<ViewId>,
    channels: Vec<ChannelProcess>,
    config: RegistrationConfig,
    matcher: Box<dyn PairwiseMatcher>,
    optimizer: GlobalOptimizer,
    persistence: Option<Box<dyn CorrespondencePersistence>>,
    interrupt: Interrupt,
    progress: Option<ProgressCallback>,
    statistics: Vec<PairwiseResult>,
    outcomes: Vec<SubsetOutcome>,
}

impl<'a> InterestPointRegistration<'a> {
    pub fn new(
        dataset: &'a mut Dataset,
        view_ids: Vec<ViewId>,
        channels: Vec<ChannelProcess>,
        config: RegistrationConfig,
    ) -> Self {
        config.validate();
        let matcher = build_matcher(&config);
        let optimizer = GlobalOptimizer::new(config.optimizer.clone());

        Self {
            dataset,
            view_ids,
            channels,
            config,
            matcher,
            optimizer,
            persistence: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            progress: None,
            statistics: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn PairwiseMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_solver(mut self, solver: Box<dyn GlobalSolver>) -> Self {
        self.optimizer = GlobalOptimizer::with_solver(self.config.optimizer.clone(), solver);
        self
    }

    pub fn with_persistence(mut self, persistence: Box<dyn CorrespondencePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Handle for cancelling the subset in flight from another thread.
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn view_ids_to_process(&self) -> &[ViewId] {
        &self.view_ids
    }

    pub fn channels_to_process(&self) -> &[ChannelProcess] {
        &self.channels
    }

    /// Per-pair results of the last `register` call, if statistics were requested.
    pub fn statistics(&self) -> &[PairwiseResult] {
        &self.statistics
    }

    pub fn outcomes(&self) -> &[SubsetOutcome] {
        &self.outcomes
    }

    pub fn dataset(&self) -> &Dataset {
        self.dataset
    }

    /// Runs one registration. Returns true if at least one subset was solved.
    pub fn register(
        &mut self,
        strategy: &GlobalOptimizationType,
        save: bool,
        collect_statistics: bool,
    ) -> bool {
        self.statistics.clear();
        self.outcomes.clear();

        let subsets = strategy.subsets(&self.view_ids, &self.dataset.sequence);
        info!(
            "Registering {} views in {} subsets ({}, matcher: {}, solver: {})",
            self.view_ids.len(),
            subsets.len(),
            strategy.describe(),
            self.matcher.name(),
            self.optimizer.solver_name()
        );

        if subsets.is_empty() {
            warn!("Nothing to register");
            return false;
        }

        let threads = effective_parallelism(self.config.parallelism);
        let total = subsets.len();
        let mut successful = 0;

        for (index, mut subset) in subsets.into_iter().enumerate() {
            let outcome = self.process_subset(&mut subset, strategy, save, collect_statistics, threads);
            if outcome.state == SubsetState::Solved {
                successful += 1;
            }
            self.outcomes.push(outcome);
            report_progress(self.progress.as_ref(), index + 1, total, RegistrationStage::Subsets);
        }

        info!("Registration finished: {successful} of {total} subsets solved");
        successful > 0
    }

    fn process_subset(
        &mut self,
        subset: &mut GlobalOptimizationSubset,
        strategy: &GlobalOptimizationType,
        save: bool,
        collect_statistics: bool,
        threads: usize,
    ) -> SubsetOutcome {
        let description = subset.to_string();
        info!("Processing {description}");

        let outcome = SubsetOutcome {
            description,
            views: subset.views().to_vec(),
            state: SubsetState::Pending,
            failure: None,
            num_candidates: 0,
            num_inliers: 0,
        };

        if subset.pairs().is_empty() {
            warn!("{}: no pairs to compare", outcome.description);
            return outcome.failed(OptimizationError::NoInlierPairs);
        }

        let pairs_completed = match self.match_pairs(subset, threads) {
            Ok(completed) => completed,
            Err(err) => {
                warn!("{}: could not start workers: {err}", outcome.description);
                return outcome.failed(err);
            }
        };
        let interrupted = self.interrupt.swap(false, Ordering::SeqCst);

        let num_candidates: usize = subset.pairs().iter().map(|p| p.num_candidates()).sum();
        let num_inliers: usize = subset.pairs().iter().map(|p| p.num_inliers()).sum();
        info!(
            "{}: {num_candidates} candidates, {num_inliers} inliers in {} pairs",
            outcome.description,
            subset.pairs().len()
        );
        if collect_statistics {
            self.statistics
                .extend(subset.pairs().iter().map(|p| p.result()));
        }
        let mut outcome = SubsetOutcome {
            num_candidates,
            num_inliers,
            ..outcome
        };

        if !interrupted || pairs_completed > 0 {
            self.commit_correspondences(subset, save);
        }

        if interrupted {
            warn!(
                "{}: interrupted after {pairs_completed} of {} pairs, skipping optimization",
                outcome.description,
                subset.pairs().len()
            );
            return outcome.failed(OptimizationError::Interrupted);
        }

        outcome.state = SubsetState::Solving;
        let Dataset {
            sequence,
            registrations,
            interest_points,
            ..
        } = &mut *self.dataset;
        let channels = &self.channels;

        let reference_points = |view_id: ViewId| {
            let transform = registrations.get(view_id);
            label_for(sequence, channels, view_id)
                .and_then(|label| interest_points.points(view_id, &label))
                .unwrap_or_default()
                .iter()
                .map(|p| transform.apply(p.pos))
                .collect()
        };

        match self
            .optimizer
            .optimize(subset, strategy.parameters(), &reference_points)
        {
            Ok(result) => {
                for (view_id, correction) in &result.corrections {
                    registrations.pre_concatenate(*view_id, correction);
                }
                info!(
                    "{}: solved with mean error {:.4} after {} iterations",
                    outcome.description, result.error, result.iterations
                );
                outcome.state = SubsetState::Solved;
                outcome
            }
            Err(err) => {
                warn!("{}: optimization failed: {err}", outcome.description);
                outcome.failed(err)
            }
        }
    }

    /// Runs the matcher on every pair of `subset` in a bounded pool and waits
    /// for all of them. Returns the number of pairs actually matched.
    fn match_pairs(
        &self,
        subset: &mut GlobalOptimizationSubset,
        threads: usize,
    ) -> Result<usize, rayon::ThreadPoolBuildError> {
        let dataset = &*self.dataset;
        let channels = &self.channels;

        for pair in subset.pairs_mut() {
            let describe = |view_id: ViewId| {
                dataset
                    .sequence
                    .view_description(view_id)
                    .map_or_else(|| view_id.to_string(), |d| d.label())
            };
            let description = format!("{} <-> {}", describe(pair.view_a()), describe(pair.view_b()));
            pair.set_description(description);
        }

        let snapshots: HashMap<ViewId, Vec<GroupedPoint>> = subset
            .groups()
            .iter()
            .map(|group| {
                let points = snapshot_group(
                    group,
                    &dataset.interest_points,
                    |view_id| label_for(&dataset.sequence, channels, view_id),
                    |view_id| dataset.registrations.get(view_id),
                );
                (group.representative(), points)
            })
            .collect();

        let pool = bounded_pool(threads, "pairwise")?;
        let matcher = self.matcher.as_ref();
        let interrupt = &self.interrupt;
        let progress = self.progress.as_ref();
        let total = subset.pairs().len();
        let completed = AtomicUsize::new(0);

        for_each_mut_in(&pool, subset.pairs_mut(), |_, pair| {
            if interrupt.load(Ordering::SeqCst) {
                pair.set_failure(MatchError::Interrupted);
                return;
            }

            let points_a = snapshots.get(&pair.view_a()).map_or(&[][..], Vec::as_slice);
            let points_b = snapshots.get(&pair.view_b()).map_or(&[][..], Vec::as_slice);
            compute_pairwise(matcher, pair, points_a, points_b);

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            report_progress(progress, done, total, RegistrationStage::Matching);
        });

        Ok(completed.into_inner())
    }

    fn commit_correspondences(&mut self, subset: &GlobalOptimizationSubset, save: bool) {
        let Dataset {
            sequence,
            correspondences,
            ..
        } = &mut *self.dataset;
        let channels = &self.channels;
        let label_of = |view_id: ViewId| label_for(sequence, channels, view_id);

        correspondences.clear_existing_correspondences(subset.views(), &label_of);
        let added = correspondences.add_correspondences(subset.pairs(), &label_of);

        if !save {
            return;
        }
        match &self.persistence {
            Some(persistence) => {
                let failures =
                    correspondences.save_correspondences(subset.views(), &label_of, persistence.as_ref());
                info!(
                    "Saved {added} correspondences of {} views ({failures} failed)",
                    subset.views().len()
                );
            }
            None => warn!("Saving requested but no correspondence writer is configured"),
        }
    }
}
