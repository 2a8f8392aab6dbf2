pub mod solver;
pub mod system;
pub mod timing;
pub mod transient;

#[derive(Clone, Copy, Debug)]
pub enum Tolerance {
    Absolute(f64),
    Relative(f64),
    Combined(f64, f64),
}

#[derive(Clone, Copy, Debug)]
pub enum ConvergenceMetric {
    L2Norm,
    MaxNorm,
}

/// Convergence criteria for iterative solvers
#[derive(Clone, Copy, Debug)]
pub enum ConvergenceCriteria {
    Residual,
    Update,
    Both,
}

#[derive(Clone, Debug)]
pub struct Convergence {
    pub criteria: ConvergenceCriteria,
    pub tolerance: Tolerance,
    pub metric: ConvergenceMetric,
}

impl Default for Convergence {
    fn default() -> Self {
        Self {
            criteria: ConvergenceCriteria::Both,
            tolerance: Tolerance::Absolute(1e-10),
            metric: ConvergenceMetric::MaxNorm,
        }
    }
}

impl Convergence {
    pub fn norm(&self, vector: &nalgebra::DVector<f64>) -> f64 {
        match self.metric {
            ConvergenceMetric::L2Norm => vector.norm(),
            ConvergenceMetric::MaxNorm => vector.amax(),
        }
    }

    pub fn check_tolerance(&self, norm: f64, initial_norm: f64) -> bool {
        match self.tolerance {
            Tolerance::Absolute(tol) => norm < tol,
            Tolerance::Relative(tol) => norm <= tol * initial_norm,
            Tolerance::Combined(abs_tol, rel_tol) => norm < abs_tol || norm <= rel_tol * initial_norm,
        }
    }

    pub fn check_convergence(
        &self,
        residual: &nalgebra::DVector<f64>,
        update: &nalgebra::DVector<f64>,
        initial_residual_norm: f64,
        initial_update_norm: f64,
    ) -> bool {
        let residual_ok = || self.check_tolerance(self.norm(residual), initial_residual_norm);
        let update_ok = || self.check_tolerance(self.norm(update), initial_update_norm);
        match self.criteria {
            ConvergenceCriteria::Residual => residual_ok(),
            ConvergenceCriteria::Update => update_ok(),
            ConvergenceCriteria::Both => residual_ok() && update_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn combined_tolerance_accepts_either_bound() {
        let convergence = Convergence {
            criteria: ConvergenceCriteria::Residual,
            tolerance: Tolerance::Combined(1e-8, 1e-3),
            metric: ConvergenceMetric::L2Norm,
        };
        let residual = DVector::from_vec(vec![3e-4, 4e-4]);
        assert!(convergence.check_tolerance(convergence.norm(&residual), 1.0));
        assert!(!convergence.check_tolerance(convergence.norm(&residual), 0.1));
    }
}
