//! RANSAC (Random Sample Consensus) for robust transformation estimation.
//!
//! Works on paired 3D positions:
//! 1. Randomly sample minimal point sets
//! 2. Fit a candidate model
//! 3. Count inliers within `max_epsilon`
//! 4. Keep the best model, optionally refining it on its inliers
//! 5. Refit with least squares on the final inliers

use std::fmt;

use glam::DVec3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::config::RansacConfig;
use crate::transform::{Transform, TransformModel, estimate_transform, mean_residual};

/// Reason for RANSAC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RansacFailureReason {
    /// Fewer candidates than the minimal sample or the inlier floor.
    TooFewCandidates,
    /// No sample produced a model with any inlier.
    NoInliersFound,
    /// Every sample was degenerate (collinear, coincident, etc.).
    DegeneratePointSet,
    /// Found some inliers but not enough to meet the thresholds.
    InsufficientInliers,
}

impl fmt::Display for RansacFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RansacFailureReason::TooFewCandidates => write!(f, "too few candidates"),
            RansacFailureReason::NoInliersFound => write!(f, "no inliers found"),
            RansacFailureReason::DegeneratePointSet => write!(f, "degenerate point set"),
            RansacFailureReason::InsufficientInliers => write!(f, "insufficient inliers"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult {
    pub transform: Transform,
    /// Indices of inlier pairs.
    pub inliers: Vec<usize>,
    pub iterations: usize,
    pub inlier_ratio: f64,
    /// Mean residual of the inliers under `transform`.
    pub error: f64,
}

#[derive(Debug, Clone)]
pub struct RansacFailure {
    pub reason: RansacFailureReason,
    pub iterations: usize,
    pub best_inlier_count: usize,
}

pub struct RansacEstimator {
    config: RansacConfig,
}

impl RansacEstimator {
    pub fn new(config: RansacConfig) -> Self {
        config.validate();
        Self { config }
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    /// Smallest inlier count accepted for `model`.
    pub fn min_inliers(&self, model: TransformModel) -> usize {
        self.config.min_num_inliers.max(model.min_points())
    }

    /// Estimate the transform mapping `src` onto `dst` in the presence of outliers.
    pub fn estimate(
        &self,
        src: &[DVec3],
        dst: &[DVec3],
        model: TransformModel,
    ) -> Result<RansacResult, RansacFailure> {
        assert_eq!(src.len(), dst.len(), "point lists must have equal length");

        let n = src.len();
        let min_samples = model.min_points();
        let min_inliers = self.min_inliers(model);

        if n < min_inliers {
            return Err(RansacFailure {
                reason: RansacFailureReason::TooFewCandidates,
                iterations: 0,
                best_inlier_count: 0,
            });
        }

        let mut rng: ChaCha8Rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };

        let mut best: Option<(Transform, Vec<usize>)> = None;
        let mut any_model = false;

        let mut sample_indices: Vec<usize> = Vec::with_capacity(min_samples);
        let mut sample_src: Vec<DVec3> = Vec::with_capacity(min_samples);
        let mut sample_dst: Vec<DVec3> = Vec::with_capacity(min_samples);

        let mut iterations = 0;
        let mut max_iter = self.config.max_iterations;

        while iterations < max_iter {
            iterations += 1;

            random_sample_into(&mut rng, n, min_samples, &mut sample_indices);
            sample_src.clear();
            sample_dst.clear();
            for &i in &sample_indices {
                sample_src.push(src[i]);
                sample_dst.push(dst[i]);
            }

            let Some(transform) = estimate_transform(&sample_src, &sample_dst, model) else {
                continue;
            };
            any_model = true;

            let mut current = transform;
            let mut inliers = count_inliers(src, dst, &current, self.config.max_epsilon);

            if self.config.use_local_optimization && inliers.len() >= min_samples {
                (current, inliers) = self.local_optimization(src, dst, current, inliers, model);
            }

            let best_count = best.as_ref().map_or(0, |(_, b)| b.len());
            if inliers.len() > best_count {
                let inlier_ratio = inliers.len() as f64 / n as f64;
                best = Some((current, inliers));

                if inlier_ratio >= self.config.min_inlier_ratio {
                    max_iter = max_iter.min(adaptive_iterations(
                        inlier_ratio,
                        min_samples,
                        self.config.confidence,
                    ));
                }
            }
        }

        let Some((transform, inliers)) = best else {
            let reason = if any_model {
                RansacFailureReason::NoInliersFound
            } else {
                RansacFailureReason::DegeneratePointSet
            };
            return Err(RansacFailure {
                reason,
                iterations,
                best_inlier_count: 0,
            });
        };

        // Least-squares refit on every inlier, then recount.
        let (transform, inliers) = refine(src, dst, transform, inliers, model, self.config.max_epsilon);

        let inlier_ratio = inliers.len() as f64 / n as f64;
        if inliers.len() < min_inliers || inlier_ratio < self.config.min_inlier_ratio {
            return Err(RansacFailure {
                reason: RansacFailureReason::InsufficientInliers,
                iterations,
                best_inlier_count: inliers.len(),
            });
        }

        let inlier_src: Vec<DVec3> = inliers.iter().map(|&i| src[i]).collect();
        let inlier_dst: Vec<DVec3> = inliers.iter().map(|&i| dst[i]).collect();
        let error = mean_residual(&transform, &inlier_src, &inlier_dst);

        Ok(RansacResult {
            transform,
            inliers,
            iterations,
            inlier_ratio,
            error,
        })
    }

    /// Re-estimate on the current inliers until the inlier set stops growing.
    fn local_optimization(
        &self,
        src: &[DVec3],
        dst: &[DVec3],
        mut transform: Transform,
        mut inliers: Vec<usize>,
        model: TransformModel,
    ) -> (Transform, Vec<usize>) {
        for _ in 0..self.config.lo_max_iterations {
            let inlier_src: Vec<DVec3> = inliers.iter().map(|&i| src[i]).collect();
            let inlier_dst: Vec<DVec3> = inliers.iter().map(|&i| dst[i]).collect();

            let Some(refined) = estimate_transform(&inlier_src, &inlier_dst, model) else {
                break;
            };

            let new_inliers = count_inliers(src, dst, &refined, self.config.max_epsilon);
            if new_inliers.len() <= inliers.len() {
                break;
            }

            transform = refined;
            inliers = new_inliers;
        }

        (transform, inliers)
    }
}

fn refine(
    src: &[DVec3],
    dst: &[DVec3],
    transform: Transform,
    inliers: Vec<usize>,
    model: TransformModel,
    max_epsilon: f64,
) -> (Transform, Vec<usize>) {
    let inlier_src: Vec<DVec3> = inliers.iter().map(|&i| src[i]).collect();
    let inlier_dst: Vec<DVec3> = inliers.iter().map(|&i| dst[i]).collect();

    match estimate_transform(&inlier_src, &inlier_dst, model) {
        Some(refined) => {
            let refined_inliers = count_inliers(src, dst, &refined, max_epsilon);
            if refined_inliers.len() >= inliers.len() {
                (refined, refined_inliers)
            } else {
                (transform, inliers)
            }
        }
        None => (transform, inliers),
    }
}

fn count_inliers(src: &[DVec3], dst: &[DVec3], transform: &Transform, max_epsilon: f64) -> Vec<usize> {
    let threshold_sq = max_epsilon * max_epsilon;
    src.iter()
        .zip(dst)
        .enumerate()
        .filter(|(_, (s, d))| transform.apply(**s).distance_squared(**d) <= threshold_sq)
        .map(|(i, _)| i)
        .collect()
}

/// Iterations needed to draw one all-inlier sample with probability `confidence`.
pub(crate) fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    if inlier_ratio <= 0.0 || inlier_ratio >= 1.0 {
        return 1;
    }

    // N = log(1 - confidence) / log(1 - w^n)
    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_conf = (1.0 - confidence).ln();
    let log_outlier = (1.0 - w_n).ln();

    if log_outlier >= 0.0 {
        return usize::MAX;
    }

    (log_conf / log_outlier).ceil().max(1.0) as usize
}

/// Floyd's algorithm for sampling `k` distinct indices from `0..n`.
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n, "Cannot sample {} indices from {}", k, n);
    buffer.clear();

    if k <= n / 2 {
        for j in (n - k)..n {
            let t = rng.random_range(0..=j);
            if buffer.contains(&t) {
                buffer.push(j);
            } else {
                buffer.push(t);
            }
        }
    } else {
        buffer.extend(0..n);
        buffer.shuffle(rng);
        buffer.truncate(k);
    }
}
