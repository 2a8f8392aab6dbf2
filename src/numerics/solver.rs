use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::trace;

use crate::numerics::timing::Timings;
use crate::numerics::Convergence;

/// Undamped Newton iteration with a dense LU solve per step.
#[derive(Clone, Debug)]
pub struct NewtonSolver {
    pub convergence: Convergence,
    pub max_iterations: u32,
}

impl Default for NewtonSolver {
    fn default() -> Self {
        Self {
            convergence: Convergence::default(),
            max_iterations: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum NewtonError {
    #[error("linear solve failed")]
    LinearSolveFailed,
    #[error("Newton's method failed to converge after {iterations} iterations (residual {residual:.3e})")]
    NonConvergence { iterations: u32, residual: f64 },
    #[error("residual contains NaN or Inf")]
    NonFinite,
    #[error(transparent)]
    Evaluation(#[from] crate::Error),
}

#[derive(Clone, Debug)]
pub struct NewtonResult {
    pub solution: DVector<f64>,
    pub iterations: u32,
    pub final_residual: f64,
}

impl NewtonSolver {
    pub fn new(convergence: Convergence, max_iterations: u32) -> Self {
        Self {
            convergence,
            max_iterations,
        }
    }

    /// Solves `G(z) = 0` from `initial`, where `evaluate` returns the residual
    /// and its Jacobian at `z`.
    pub fn solve<F>(
        &self,
        initial: DVector<f64>,
        evaluate: F,
        timings: &mut Timings,
    ) -> Result<NewtonResult, NewtonError>
    where
        F: FnMut(&DVector<f64>) -> crate::Result<(DVector<f64>, DMatrix<f64>)>,
    {
        self.iterate(initial, None, evaluate, timings)
    }

    /// As [`NewtonSolver::solve`], but the update is divided componentwise by
    /// `weights` before the convergence test, so the tolerance is measured in
    /// units of each component's own scale.
    pub fn solve_weighted<F>(
        &self,
        initial: DVector<f64>,
        weights: &DVector<f64>,
        evaluate: F,
        timings: &mut Timings,
    ) -> Result<NewtonResult, NewtonError>
    where
        F: FnMut(&DVector<f64>) -> crate::Result<(DVector<f64>, DMatrix<f64>)>,
    {
        self.iterate(initial, Some(weights), evaluate, timings)
    }

    fn iterate<F>(
        &self,
        initial: DVector<f64>,
        weights: Option<&DVector<f64>>,
        mut evaluate: F,
        timings: &mut Timings,
    ) -> Result<NewtonResult, NewtonError>
    where
        F: FnMut(&DVector<f64>) -> crate::Result<(DVector<f64>, DMatrix<f64>)>,
    {
        let mut z = initial;
        let mut initial_residual = None;
        let mut initial_update = None;
        let mut res_norm = f64::INFINITY;

        for i in 0..self.max_iterations {
            let (residual, jacobian) = timings.record_jacobian(|| evaluate(&z))?;
            if !residual.iter().all(|x| x.is_finite()) {
                return Err(NewtonError::NonFinite);
            }
            res_norm = self.convergence.norm(&residual);
            let init = *initial_residual.get_or_insert(res_norm);
            trace!(iteration = i, residual = res_norm, initial = init, "newton");

            // an exact root needs no update
            if res_norm == 0.0 {
                return Ok(NewtonResult {
                    solution: z,
                    iterations: i,
                    final_residual: res_norm,
                });
            }

            let delta = timings.record_linear_solve(|| {
                jacobian
                    .lu()
                    .solve(&-&residual)
                    .ok_or(NewtonError::LinearSolveFailed)
            })?;
            if !delta.iter().all(|x| x.is_finite()) {
                return Err(NewtonError::NonFinite);
            }
            z += &delta;

            let scaled = match weights {
                Some(w) => delta.component_div(w),
                None => delta,
            };
            let update_norm = self.convergence.norm(&scaled);
            let init_update = *initial_update.get_or_insert(update_norm);
            if self
                .convergence
                .check_convergence(&residual, &scaled, init, init_update)
            {
                return Ok(NewtonResult {
                    solution: z,
                    iterations: i + 1,
                    final_residual: res_norm,
                });
            }
        }

        Err(NewtonError::NonConvergence {
            iterations: self.max_iterations,
            residual: res_norm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::{ConvergenceCriteria, ConvergenceMetric, Tolerance};
    use approx::assert_relative_eq;

    #[test]
    fn finds_the_root_of_a_small_system() {
        // x^2 + y^2 = 4, x = y
        let solver = NewtonSolver::default();
        let mut timings = Timings::new();
        let result = solver
            .solve(
                DVector::from_vec(vec![1.0, 0.5]),
                |z| {
                    let (x, y) = (z[0], z[1]);
                    let r = DVector::from_vec(vec![x * x + y * y - 4.0, x - y]);
                    let j = DMatrix::from_row_slice(2, 2, &[2.0 * x, 2.0 * y, 1.0, -1.0]);
                    Ok((r, j))
                },
                &mut timings,
            )
            .unwrap();
        assert_relative_eq!(result.solution[0], 2f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(result.solution[1], 2f64.sqrt(), epsilon = 1e-9);
        assert_eq!(timings.linear_solves as u32, result.iterations);
    }

    #[test]
    fn singular_jacobian_fails_the_linear_solve() {
        let solver = NewtonSolver::default();
        let err = solver
            .solve(
                DVector::from_vec(vec![1.0]),
                |_| Ok((DVector::from_vec(vec![1.0]), DMatrix::zeros(1, 1))),
                &mut Timings::new(),
            )
            .unwrap_err();
        assert!(matches!(err, NewtonError::LinearSolveFailed));
    }

    #[test]
    fn weighted_updates_converge_on_large_states() {
        // root at 1e9, tolerance measured in units of the root
        let convergence = Convergence {
            criteria: ConvergenceCriteria::Update,
            tolerance: Tolerance::Absolute(1e-6),
            metric: ConvergenceMetric::MaxNorm,
        };
        let solver = NewtonSolver::new(convergence, 20);
        let evaluate = |z: &DVector<f64>| {
            Ok((
                DVector::from_vec(vec![z[0] * z[0] - 1e18]),
                DMatrix::from_element(1, 1, 2.0 * z[0]),
            ))
        };
        let weights = DVector::from_vec(vec![1e9]);
        let result = solver
            .solve_weighted(DVector::from_vec(vec![2e9]), &weights, evaluate, &mut Timings::new())
            .unwrap();
        assert_relative_eq!(result.solution[0], 1e9, max_relative = 1e-9);
    }

    #[test]
    fn gives_up_after_max_iterations() {
        let solver = NewtonSolver::new(
            Convergence {
                criteria: ConvergenceCriteria::Residual,
                tolerance: Tolerance::Absolute(1e-14),
                metric: ConvergenceMetric::L2Norm,
            },
            3,
        );
        // x^2 + 1 has no real root
        let err = solver
            .solve(
                DVector::from_vec(vec![0.5]),
                |z| {
                    Ok((
                        DVector::from_vec(vec![z[0] * z[0] + 1.0]),
                        DMatrix::from_element(1, 1, 2.0 * z[0]),
                    ))
                },
                &mut Timings::new(),
            )
            .unwrap_err();
        assert!(matches!(err, NewtonError::NonConvergence { iterations: 3, .. }));
    }
}
