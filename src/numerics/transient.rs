use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::numerics::solver::{NewtonError, NewtonSolver};
use crate::numerics::system::DaeSystem;
use crate::numerics::timing::Timings;
use crate::numerics::{Convergence, ConvergenceCriteria, ConvergenceMetric, Tolerance};
use crate::processing::solution::{EventRecord, Solution, Termination};

/// Adaptive implicit Euler for `M dy/dt = F(t, y)`. Each step is solved by
/// Newton's method; the local error is estimated by comparing one full step
/// with two half steps.
#[derive(Clone, Debug)]
pub struct TransientSolver {
    pub rtol: f64,
    pub atol: f64,
    /// First step size; a thousandth of the time span if unset.
    pub initial_step: Option<f64>,
    pub min_step: f64,
    pub max_step: f64,
    pub max_steps: usize,
    /// Width of the time bracket to which event crossings are located.
    pub event_tolerance: f64,
    pub newton: NewtonSolver,
}

impl Default for TransientSolver {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-8,
            initial_step: None,
            min_step: 1e-12,
            max_step: f64::INFINITY,
            max_steps: 50_000,
            event_tolerance: 1e-12,
            // update measured in units of atol + rtol * |y|
            newton: NewtonSolver::new(
                Convergence {
                    criteria: ConvergenceCriteria::Update,
                    tolerance: Tolerance::Absolute(1e-3),
                    metric: ConvergenceMetric::MaxNorm,
                },
                10,
            ),
        }
    }
}

/// Outcome of one attempted implicit Euler step.
enum StepOutcome {
    Converged(DVector<f64>),
    Failed(NewtonError),
}

struct Crossing {
    index: usize,
    time: f64,
    state: DVector<f64>,
}

impl TransientSolver {
    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self
    }

    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = max_step;
        self
    }

    /// Integrates from `t_eval[0]` and returns the state at every time in
    /// `t_eval`, or up to and including a terminal event.
    pub fn solve<S: DaeSystem>(&self, system: &S, t_eval: &[f64]) -> Result<Solution> {
        validate_times(t_eval)?;
        let wall = Instant::now();
        let t0 = t_eval[0];
        if t0 != system.initial_time() {
            return Err(Error::InvalidTimeSpan(format!(
                "output times start at {t0} but the initial state holds at {}",
                system.initial_time()
            )));
        }
        let t_end = t_eval[t_eval.len() - 1];
        info!(states = system.dimension(), t0, t_end, "starting transient run");

        let mass = DMatrix::from(system.mass_matrix());
        let mut timings = Timings::new();
        let mut solution = Solution::new();
        let mut y = system.initial_state();
        let mut t = t0;
        solution.push(t, y.clone());

        let mut g_prev = self.event_values(system, t, &y)?;
        let mut h = self
            .initial_step
            .unwrap_or((t_end - t0) * 1e-3)
            .min(self.max_step);
        let mut next = 1;

        while next < t_eval.len() {
            if solution.stats.steps + solution.stats.rejected_steps >= self.max_steps {
                return Err(self.failure(
                    solution,
                    timings,
                    wall,
                    t,
                    y,
                    format!("maximum number of steps ({}) reached", self.max_steps),
                ));
            }

            let target = t_eval[next];
            let mut step = h.min(self.max_step);
            let landing = t + step >= target - 1e-12 * target.abs().max(1.0);
            if landing {
                step = target - t;
            }

            let attempt = self.attempt(system, &mass, t, &y, step, &mut timings, &mut solution)?;
            let (y_new, error) = match attempt {
                Ok(result) => result,
                Err(newton) => {
                    solution.stats.rejected_steps += 1;
                    h = step * 0.25;
                    debug!(t, step, %newton, "newton failed, shrinking step");
                    if h < self.min_step {
                        return Err(self.failure(
                            solution,
                            timings,
                            wall,
                            t,
                            y,
                            format!("step size {h:.3e} fell below the minimum after: {newton}"),
                        ));
                    }
                    continue;
                }
            };

            let factor = if error > 0.0 {
                (0.9 / error.sqrt()).clamp(0.2, 5.0)
            } else {
                5.0
            };
            if error > 1.0 {
                solution.stats.rejected_steps += 1;
                h = step * factor;
                debug!(t, step, error, "step rejected");
                if h < self.min_step {
                    return Err(self.failure(
                        solution,
                        timings,
                        wall,
                        t,
                        y,
                        format!("error test failed with step size {h:.3e}"),
                    ));
                }
                continue;
            }

            let t_new = if landing { target } else { t + step };
            let g_new = self.event_values(system, t_new, &y_new)?;
            let crossings = self.locate_events(system, t, &y, t_new, &y_new, &g_prev, &g_new)?;
            let terminal = crossings
                .iter()
                .filter(|c| system.events()[c.index].terminal)
                .min_by(|a, b| a.time.total_cmp(&b.time));
            let stop_at = terminal.map(|c| c.time);
            for c in &crossings {
                if stop_at.map_or(true, |s| c.time <= s) {
                    let event = &system.events()[c.index];
                    solution.events.push(EventRecord {
                        name: event.name.clone(),
                        time: c.time,
                        state: c.state.clone(),
                        terminal: event.terminal,
                    });
                }
            }
            solution.stats.steps += 1;

            if let Some(c) = terminal {
                let name = system.events()[c.index].name.clone();
                info!(event = %name, t = c.time, "terminal event");
                solution.push(c.time, c.state.clone());
                solution.termination = Termination::Event(name);
                break;
            }

            t = t_new;
            y = y_new;
            g_prev = g_new;
            h = step * factor;
            if landing {
                solution.push(t, y.clone());
                next += 1;
            }
        }

        solution.stats.timings = timings;
        solution.stats.wall_time = wall.elapsed();
        info!(
            steps = solution.stats.steps,
            rejected = solution.stats.rejected_steps,
            wall_ms = solution.stats.wall_time.as_secs_f64() * 1000.0,
            termination = ?solution.termination,
            "transient run finished"
        );
        Ok(solution)
    }

    /// One full step and two half steps from `(t, y)`. Returns the more
    /// accurate state with its weighted error, or the Newton failure.
    #[allow(clippy::too_many_arguments)]
    fn attempt<S: DaeSystem>(
        &self,
        system: &S,
        mass: &DMatrix<f64>,
        t: f64,
        y: &DVector<f64>,
        h: f64,
        timings: &mut Timings,
        solution: &mut Solution,
    ) -> Result<std::result::Result<(DVector<f64>, f64), NewtonError>> {
        let full = match self.implicit_euler(system, mass, t, y, h, timings, solution)? {
            StepOutcome::Converged(z) => z,
            StepOutcome::Failed(e) => return Ok(Err(e)),
        };
        let half = match self.implicit_euler(system, mass, t, y, 0.5 * h, timings, solution)? {
            StepOutcome::Converged(z) => z,
            StepOutcome::Failed(e) => return Ok(Err(e)),
        };
        let fine =
            match self.implicit_euler(system, mass, t + 0.5 * h, &half, 0.5 * h, timings, solution)? {
                StepOutcome::Converged(z) => z,
                StepOutcome::Failed(e) => return Ok(Err(e)),
            };
        let error = self.error_norm(y, &fine, &(&fine - &full));
        Ok(Ok((fine, error)))
    }

    /// Solves `M (z - y) / h = F(t + h, z)` for `z`.
    #[allow(clippy::too_many_arguments)]
    fn implicit_euler<S: DaeSystem>(
        &self,
        system: &S,
        mass: &DMatrix<f64>,
        t: f64,
        y: &DVector<f64>,
        h: f64,
        timings: &mut Timings,
        solution: &mut Solution,
    ) -> Result<StepOutcome> {
        let t_new = t + h;
        let weights = y.map(|v| self.atol + self.rtol * v.abs());
        let result = self.newton.solve_weighted(
            y.clone(),
            &weights,
            |z| {
                let (f, jf) = system.rhs_jacobian(t_new, z)?;
                let residual = mass * (z - y) / h - f;
                let jacobian = mass / h - jf;
                Ok((residual, jacobian))
            },
            timings,
        );
        match result {
            Ok(r) => {
                solution.stats.newton_iterations += r.iterations as usize;
                Ok(StepOutcome::Converged(r.solution))
            }
            Err(NewtonError::Evaluation(e)) => Err(e),
            Err(e) => Ok(StepOutcome::Failed(e)),
        }
    }

    /// Weighted RMS norm with weights `atol + rtol * max(|y|, |y_new|)`.
    fn error_norm(&self, y: &DVector<f64>, y_new: &DVector<f64>, estimate: &DVector<f64>) -> f64 {
        if estimate.is_empty() {
            return 0.0;
        }
        let sum: f64 = estimate
            .iter()
            .zip(y.iter().zip(y_new.iter()))
            .map(|(e, (a, b))| {
                let w = self.atol + self.rtol * a.abs().max(b.abs());
                (e / w).powi(2)
            })
            .sum();
        (sum / estimate.len() as f64).sqrt()
    }

    fn event_values<S: DaeSystem>(&self, system: &S, t: f64, y: &DVector<f64>) -> Result<Vec<f64>> {
        (0..system.events().len())
            .map(|i| system.event_value(i, t, y))
            .collect()
    }

    /// Sign changes across the step, located by bisection on the linear
    /// interpolant between the two states.
    #[allow(clippy::too_many_arguments)]
    fn locate_events<S: DaeSystem>(
        &self,
        system: &S,
        t0: f64,
        y0: &DVector<f64>,
        t1: f64,
        y1: &DVector<f64>,
        g0: &[f64],
        g1: &[f64],
    ) -> Result<Vec<Crossing>> {
        let interpolate = |s: f64| y0 + (y1 - y0) * ((s - t0) / (t1 - t0));
        let mut crossings = Vec::new();
        for (index, event) in system.events().iter().enumerate() {
            if !event.direction.crosses(g0[index], g1[index]) {
                continue;
            }
            let (mut lo, mut hi) = (t0, t1);
            let mut g_lo = g0[index];
            for _ in 0..200 {
                if hi - lo <= self.event_tolerance * hi.abs().max(1.0) {
                    break;
                }
                let mid = 0.5 * (lo + hi);
                let g_mid = system.event_value(index, mid, &interpolate(mid))?;
                if event.direction.crosses(g_lo, g_mid) {
                    hi = mid;
                } else {
                    lo = mid;
                    g_lo = g_mid;
                }
            }
            crossings.push(Crossing {
                index,
                time: hi,
                state: interpolate(hi),
            });
        }
        Ok(crossings)
    }

    fn failure(
        &self,
        mut partial: Solution,
        timings: Timings,
        wall: Instant,
        time: f64,
        state: DVector<f64>,
        reason: String,
    ) -> Error {
        warn!(t = time, %reason, "transient run failed");
        partial.stats.timings = timings;
        partial.stats.wall_time = wall.elapsed();
        Error::SolverFailure {
            time,
            state,
            reason,
            partial: Box::new(partial),
        }
    }
}

fn validate_times(t_eval: &[f64]) -> Result<()> {
    if t_eval.is_empty() {
        return Err(Error::InvalidTimeSpan("no output times given".into()));
    }
    if t_eval.iter().any(|t| !t.is_finite()) {
        return Err(Error::InvalidTimeSpan("output times must be finite".into()));
    }
    if let Some(w) = t_eval.windows(2).find(|w| w[1] <= w[0]) {
        return Err(Error::InvalidTimeSpan(format!(
            "output times must increase strictly ({} then {})",
            w[0], w[1]
        )));
    }
    Ok(())
}

/// `n + 1` evenly spaced times from `t0` to `t1`.
pub fn linspace(t0: f64, t1: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return vec![t0];
    }
    (0..=n)
        .map(|i| {
            if i == n {
                t1
            } else {
                t0 + (t1 - t0) * i as f64 / n as f64
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::system::DiscreteEvent;
    use crate::physics::EventDirection;
    use approx::assert_relative_eq;
    use nalgebra_sparse::CsrMatrix;

    /// `y' = -k y` from `y0`, with an optional event on `y - threshold`.
    struct Decay {
        k: f64,
        y0: f64,
        mass: CsrMatrix<f64>,
        events: Vec<DiscreteEvent>,
        threshold: f64,
    }

    impl Decay {
        fn new(k: f64) -> Self {
            Self {
                k,
                y0: 1.0,
                mass: CsrMatrix::identity(1),
                events: Vec::new(),
                threshold: 0.0,
            }
        }
    }

    impl DaeSystem for Decay {
        fn dimension(&self) -> usize {
            1
        }
        fn mass_matrix(&self) -> &CsrMatrix<f64> {
            &self.mass
        }
        fn initial_state(&self) -> DVector<f64> {
            DVector::from_element(1, self.y0)
        }
        fn rhs(&self, _t: f64, y: &DVector<f64>) -> Result<DVector<f64>> {
            Ok(y * -self.k)
        }
        fn rhs_jacobian(&self, t: f64, y: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
            Ok((self.rhs(t, y)?, DMatrix::from_element(1, 1, -self.k)))
        }
        fn events(&self) -> &[DiscreteEvent] {
            &self.events
        }
        fn event_value(&self, _index: usize, _t: f64, y: &DVector<f64>) -> Result<f64> {
            Ok(y[0] - self.threshold)
        }
    }

    #[test]
    fn hits_every_requested_time() {
        let solver = TransientSolver::default();
        let times = linspace(0.0, 1.0, 10);
        let solution = solver.solve(&Decay::new(2.0), &times).unwrap();
        assert_eq!(solution.times, times);
        let last = solution.last_state().unwrap()[0];
        println!("y(1) = {last:.6e}, exact {:.6e}", (-2.0f64).exp());
        assert_relative_eq!(last, (-2.0f64).exp(), max_relative = 1e-3);
        assert_eq!(solution.termination, Termination::FinalTime);
    }

    #[test]
    fn large_states_converge_under_relative_tolerance() {
        let mut system = Decay::new(1.0);
        system.y0 = 1e8;
        let solution = TransientSolver::default()
            .solve(&system, &linspace(0.0, 1.0, 4))
            .unwrap();
        let last = solution.last_state().unwrap()[0];
        assert_relative_eq!(last / 1e8, (-1.0f64).exp(), max_relative = 1e-3);
        assert_eq!(solution.termination, Termination::FinalTime);
    }

    #[test]
    fn newton_failure_is_reported_in_the_reason() {
        let solver = TransientSolver::default();
        match solver.solve(&Decay::new(f64::NAN), &[0.0, 1.0]) {
            Err(Error::SolverFailure { reason, partial, .. }) => {
                assert!(reason.contains("NaN"), "{reason}");
                assert!(partial.stats.rejected_steps > 0);
            }
            other => panic!("expected SolverFailure, got {other:?}"),
        }
    }

    #[test]
    fn terminal_event_truncates_the_run() {
        let mut system = Decay::new(1.0);
        system.threshold = 0.5;
        system.events.push(DiscreteEvent {
            name: "half".into(),
            expression: crate::expression::Symbol::scalar(0.0),
            direction: EventDirection::Falling,
            terminal: true,
        });
        let solver = TransientSolver::default();
        let solution = solver.solve(&system, &linspace(0.0, 5.0, 5)).unwrap();
        let t_event = solution.last_time().unwrap();
        assert_relative_eq!(t_event, 2f64.ln(), max_relative = 1e-3);
        assert!(solution.times.iter().all(|&t| t <= t_event));
        assert_eq!(solution.terminated_by_event(), Some("half"));
        assert_eq!(solution.events.len(), 1);
    }

    #[test]
    fn rejects_bad_output_times() {
        let solver = TransientSolver::default();
        assert!(matches!(
            solver.solve(&Decay::new(1.0), &[]),
            Err(Error::InvalidTimeSpan(_))
        ));
        assert!(matches!(
            solver.solve(&Decay::new(1.0), &[0.0, 1.0, 1.0]),
            Err(Error::InvalidTimeSpan(_))
        ));
    }

    #[test]
    fn step_limit_surfaces_partial_results() {
        let solver = TransientSolver {
            max_steps: 3,
            initial_step: Some(1e-3),
            max_step: 1e-3,
            ..TransientSolver::default()
        };
        match solver.solve(&Decay::new(1.0), &[0.0, 0.5, 1.0]) {
            Err(Error::SolverFailure { time, partial, .. }) => {
                assert!(time > 0.0 && time < 0.5);
                assert_eq!(partial.times, vec![0.0]);
            }
            other => panic!("expected SolverFailure, got {other:?}"),
        }
    }
}
