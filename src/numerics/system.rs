//! The discretised form of a model: one flat state vector, a mass matrix and
//! a right-hand side `F(t, y)` such that `M dy/dt = F(t, y)`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use num_dual::{jacobian, DualDVec64, DualNum};

use crate::error::{Error, Result};
use crate::expression::{
    Bindings, Domain, Evaluator, ParameterSet, ParameterValues, Real, Symbol, SymbolKind, Value,
};
use crate::numerics::solver::{NewtonError, NewtonSolver};
use crate::numerics::timing::Timings;
use crate::physics::EventDirection;

/// Where one state variable lives in the flat state vector.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableSlice {
    pub name: String,
    pub domain: Domain,
    pub range: Range<usize>,
    /// Cell centres, empty for domain-less variables.
    pub nodes: DVector<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EquationKind {
    Differential,
    Algebraic,
}

/// Rows `range` of `F`: the right-hand side of a differential equation or the
/// residual of an algebraic one.
#[derive(Clone, Debug)]
pub struct DiscreteEquation {
    pub variable: String,
    pub range: Range<usize>,
    pub kind: EquationKind,
    pub expression: Symbol,
}

#[derive(Clone, Debug)]
pub struct DiscreteEvent {
    pub name: String,
    pub expression: Symbol,
    pub direction: EventDirection,
    pub terminal: bool,
}

/// A named derived quantity evaluated against the state vector.
#[derive(Clone, Debug)]
pub struct OutputVariable {
    pub name: String,
    pub expression: Symbol,
    pub nodes: DVector<f64>,
}

/// What a time integrator needs from a semi-discrete problem.
pub trait DaeSystem {
    fn dimension(&self) -> usize;

    fn mass_matrix(&self) -> &CsrMatrix<f64>;

    fn initial_state(&self) -> DVector<f64>;

    /// Time at which [`DaeSystem::initial_state`] holds.
    fn initial_time(&self) -> f64 {
        0.0
    }

    fn rhs(&self, t: f64, y: &DVector<f64>) -> Result<DVector<f64>>;

    /// `F(t, y)` together with `dF/dy`.
    fn rhs_jacobian(&self, t: f64, y: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)>;

    fn events(&self) -> &[DiscreteEvent] {
        &[]
    }

    fn event_value(&self, index: usize, t: f64, y: &DVector<f64>) -> Result<f64>;
}

#[derive(Clone, Debug)]
pub struct DiscretisedSystem {
    pub(crate) name: String,
    pub(crate) slices: Vec<VariableSlice>,
    pub(crate) equations: Vec<DiscreteEquation>,
    pub(crate) initial_conditions: Vec<Symbol>,
    pub(crate) mass_matrix: CsrMatrix<f64>,
    pub(crate) y0: DVector<f64>,
    pub(crate) start_time: f64,
    pub(crate) events: Vec<DiscreteEvent>,
    pub(crate) outputs: Vec<OutputVariable>,
    pub(crate) parameter_values: ParameterValues,
    pub(crate) parameters: ParameterSet,
}

impl DiscretisedSystem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.y0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y0.is_empty()
    }

    pub fn slices(&self) -> &[VariableSlice] {
        &self.slices
    }

    pub fn slice(&self, name: &str) -> Option<&VariableSlice> {
        self.slices.iter().find(|s| s.name == name)
    }

    pub fn equations(&self) -> &[DiscreteEquation] {
        &self.equations
    }

    pub fn outputs(&self) -> &[OutputVariable] {
        &self.outputs
    }

    pub fn y0(&self) -> &DVector<f64> {
        &self.y0
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Indices of the state entries constrained algebraically.
    pub fn algebraic_indices(&self) -> Vec<usize> {
        self.equations
            .iter()
            .filter(|eq| eq.kind == EquationKind::Algebraic)
            .flat_map(|eq| eq.range.clone())
            .collect()
    }

    /// `F(t, y)` in any scalar type; one evaluator is shared by all
    /// equations so common sub-trees are computed once.
    pub fn evaluate_rhs<T: Real>(&self, t: f64, y: &DVector<T>) -> Result<DVector<T>> {
        if y.len() != self.len() {
            return Err(Error::shape(
                "rhs",
                format!("state has {} entries, expected {}", y.len(), self.len()),
            ));
        }
        let bindings = Bindings::new()
            .at_time(t)
            .with_state(y)
            .with_parameters(&self.parameters);
        let mut evaluator = Evaluator::new(&bindings);
        let mut out = DVector::from_element(self.len(), T::from(0.0));
        for eq in &self.equations {
            let value = evaluator.evaluate(&eq.expression)?;
            place(&mut out, &eq.range, value, &eq.variable)?;
        }
        Ok(out)
    }

    /// `F(t, y)` and its exact Jacobian by forward-mode dual numbers.
    pub fn jacobian(&self, t: f64, y: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
        let n = self.len();
        let failure = RefCell::new(None);
        let (f, jac) = jacobian(
            |arg: DVector<DualDVec64>| match self.evaluate_rhs(t, &arg) {
                Ok(value) => value,
                Err(e) => {
                    failure.borrow_mut().get_or_insert(e);
                    DVector::from_element(n, DualDVec64::from_re(0.0))
                }
            },
            y.clone(),
        );
        match failure.into_inner() {
            Some(e) => Err(e),
            None => Ok((f, jac)),
        }
    }

    /// Evaluates any discretised expression against a state.
    pub fn evaluate(&self, expression: &Symbol, t: f64, y: &DVector<f64>) -> Result<Value<f64>> {
        let bindings = Bindings::new()
            .at_time(t)
            .with_state(y)
            .with_parameters(&self.parameters);
        expression.evaluate(&bindings)
    }

    /// The expression and cell centres of a state variable or named output.
    pub fn lookup(&self, name: &str) -> Option<(Symbol, DVector<f64>)> {
        if let Some(slice) = self.slice(name) {
            let symbol = Symbol::state_vector(slice.range.clone(), slice.domain.clone());
            return Some((symbol, slice.nodes.clone()));
        }
        self.outputs
            .iter()
            .find(|o| o.name == name)
            .map(|o| (o.expression.clone(), o.nodes.clone()))
    }

    /// The same system bound to another parameter set. Overrides are merged
    /// over the values this system was built with and the initial state is
    /// recomputed; the discretised equations are shared as they are.
    pub fn with_parameters(&self, overrides: &ParameterValues) -> Result<Self> {
        let mut values = self.parameter_values.clone();
        values.update(overrides);
        let parameters = values.resolve()?;
        let mut system = Self {
            parameter_values: values,
            parameters,
            ..self.clone()
        };
        system.check_parameters_bound()?;
        system.y0 = system.compute_initial_state()?;
        Ok(system)
    }

    pub(crate) fn check_parameters_bound(&self) -> Result<()> {
        let symbols = self
            .equations
            .iter()
            .map(|eq| &eq.expression)
            .chain(&self.initial_conditions)
            .chain(self.events.iter().map(|e| &e.expression))
            .chain(self.outputs.iter().map(|o| &o.expression));
        for symbol in symbols {
            for name in symbol.parameter_names() {
                if !self.parameters.contains_key(&name) {
                    return Err(Error::ParameterResolution {
                        name,
                        reason: "used by the model but never defined".into(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Evaluates the initial conditions at the start time. An initial
    /// condition may refer to other state variables, which are then
    /// evaluated first.
    pub(crate) fn compute_initial_state(&self) -> Result<DVector<f64>> {
        let mut y = DVector::zeros(self.len());
        let mut done = vec![false; self.slices.len()];
        let mut remaining = self.slices.len();
        while remaining > 0 {
            let mut progressed = false;
            for (i, (slice, ic)) in self.slices.iter().zip(&self.initial_conditions).enumerate() {
                if done[i] || !self.depends_only_on(ic, &done) {
                    continue;
                }
                let value = self.evaluate(ic, self.start_time, &y)?;
                place(&mut y, &slice.range, value, &slice.name)?;
                done[i] = true;
                remaining -= 1;
                progressed = true;
            }
            if !progressed {
                let stuck = self
                    .slices
                    .iter()
                    .zip(&done)
                    .find(|&(_, &d)| !d)
                    .map(|(s, _)| s.name.clone());
                return Err(Error::UnsupportedOperator {
                    operator: "cyclic initial conditions".into(),
                    equation: stuck,
                });
            }
        }
        Ok(y)
    }

    fn depends_only_on(&self, symbol: &Symbol, done: &[bool]) -> bool {
        let ready: HashSet<usize> = done
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d)
            .flat_map(|(i, _)| self.slices[i].range.clone())
            .collect();
        symbol.pre_order().iter().all(|node| match node.kind() {
            SymbolKind::StateVector(range) => range.clone().all(|j| ready.contains(&j)),
            _ => true,
        })
    }

    /// Largest algebraic residual at `y`, with the variable it belongs to.
    pub fn algebraic_residual(&self, t: f64, y: &DVector<f64>) -> Result<Option<(String, f64)>> {
        let f = self.evaluate_rhs(t, y)?;
        let mut worst: Option<(String, f64)> = None;
        for eq in self.equations.iter().filter(|eq| eq.kind == EquationKind::Algebraic) {
            let r = f.rows(eq.range.start, eq.range.len()).amax();
            if worst.as_ref().map_or(true, |(_, w)| r > *w || r.is_nan()) {
                worst = Some((eq.variable.clone(), r));
            }
        }
        Ok(worst)
    }

    pub(crate) fn check_initial_conditions(&self, tolerance: f64) -> Result<()> {
        if let Some((variable, residual)) = self.algebraic_residual(self.start_time, &self.y0)? {
            if residual.is_nan() || residual > tolerance {
                return Err(Error::InconsistentInitialConditions {
                    variable,
                    residual,
                    tolerance,
                });
            }
        }
        Ok(())
    }

    /// Solves the algebraic equations for the algebraic part of `y`, holding
    /// the differential part fixed.
    pub fn consistent_initial_state(
        &self,
        t: f64,
        y: &DVector<f64>,
        newton: &NewtonSolver,
    ) -> std::result::Result<DVector<f64>, NewtonError> {
        let algebraic = self.algebraic_indices();
        if algebraic.is_empty() {
            return Ok(y.clone());
        }
        let assemble = |z: &DVector<f64>| {
            let mut full = y.clone();
            for (k, &i) in algebraic.iter().enumerate() {
                full[i] = z[k];
            }
            full
        };
        let z0 = DVector::from_iterator(algebraic.len(), algebraic.iter().map(|&i| y[i]));
        let mut timings = Timings::new();
        let solved = newton.solve(
            z0,
            |z| {
                let (f, jac) = self.jacobian(t, &assemble(z))?;
                let residual =
                    DVector::from_iterator(algebraic.len(), algebraic.iter().map(|&i| f[i]));
                let block = DMatrix::from_fn(algebraic.len(), algebraic.len(), |a, b| {
                    jac[(algebraic[a], algebraic[b])]
                });
                Ok((residual, block))
            },
            &mut timings,
        )?;
        Ok(assemble(&solved.solution))
    }
}

fn place<T: Real>(out: &mut DVector<T>, range: &Range<usize>, value: Value<T>, name: &str) -> Result<()> {
    match value {
        Value::Vector(v) if v.len() == range.len() => {
            out.rows_mut(range.start, range.len()).copy_from(&v);
        }
        other => match other.scalar() {
            Some(x) => out.rows_mut(range.start, range.len()).fill(x),
            None => {
                return Err(Error::shape(
                    name.to_string(),
                    format!("{} values for {} state entries", other.len(), range.len()),
                ))
            }
        },
    }
    Ok(())
}

impl DaeSystem for DiscretisedSystem {
    fn dimension(&self) -> usize {
        self.len()
    }

    fn mass_matrix(&self) -> &CsrMatrix<f64> {
        &self.mass_matrix
    }

    fn initial_state(&self) -> DVector<f64> {
        self.y0.clone()
    }

    fn initial_time(&self) -> f64 {
        self.start_time
    }

    fn rhs(&self, t: f64, y: &DVector<f64>) -> Result<DVector<f64>> {
        self.evaluate_rhs(t, y)
    }

    fn rhs_jacobian(&self, t: f64, y: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
        self.jacobian(t, y)
    }

    fn events(&self) -> &[DiscreteEvent] {
        &self.events
    }

    fn event_value(&self, index: usize, t: f64, y: &DVector<f64>) -> Result<f64> {
        let event = self.events.get(index).ok_or_else(|| {
            Error::shape("event", format!("no event with index {index}"))
        })?;
        self.evaluate(&event.expression, t, y)?
            .scalar()
            .ok_or_else(|| Error::shape(event.name.clone(), "event does not evaluate to one number"))
    }
}
