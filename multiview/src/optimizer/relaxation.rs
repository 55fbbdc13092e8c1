//! Iterative relaxation solver.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::OptimizerConfig;
use crate::error::OptimizationError;
use crate::optimizer::{GlobalSolver, OptimizationProblem, Solution, SpanningTreeSolver};

/// Spanning-tree initialisation followed by Gauss-Seidel sweeps: every free
/// node is re-fitted against all of its neighbours using their latest
/// corrections.
#[derive(Debug, Clone)]
pub struct RelaxationSolver {
    max_iterations: usize,
    max_plateau_width: usize,
    convergence_epsilon: f64,
}

impl RelaxationSolver {
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_plateau_width: config.max_plateau_width,
            convergence_epsilon: config.convergence_epsilon,
        }
    }
}

impl GlobalSolver for RelaxationSolver {
    fn name(&self) -> &'static str {
        "relaxation"
    }

    fn solve(&self, problem: &OptimizationProblem) -> Result<Solution, OptimizationError> {
        let initial = SpanningTreeSolver.solve(problem)?;
        let mut corrections = initial.corrections;
        let everyone = vec![true; problem.nodes().len()];

        // Errors of the last `max_plateau_width + 1` sweeps.
        let mut history: VecDeque<f64> = VecDeque::with_capacity(self.max_plateau_width + 1);
        history.push_back(initial.error);

        let mut iterations = 0;
        while iterations < self.max_iterations {
            iterations += 1;

            for node in 0..problem.nodes().len() {
                if problem.is_fixed(node) {
                    continue;
                }
                if let Some(fitted) = problem.fit_node(node, &corrections, &everyone) {
                    corrections[node] = fitted;
                }
            }

            let error = problem.mean_error(&corrections);
            if !error.is_finite() {
                return Err(OptimizationError::NonFinite(problem.nodes()[0]));
            }

            if history.len() > self.max_plateau_width {
                history.pop_front();
            }
            history.push_back(error);

            if history.len() > self.max_plateau_width
                && let (Some(&oldest), Some(&newest)) = (history.front(), history.back())
                && (oldest - newest).abs() < self.convergence_epsilon
            {
                break;
            }
        }

        let error = problem.mean_error(&corrections);
        debug!("Relaxation finished after {iterations} iterations, mean error {error:.4}");

        Ok(Solution {
            corrections,
            error,
            iterations,
        })
    }
}
