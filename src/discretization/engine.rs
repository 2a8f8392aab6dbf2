//! Turns a [`Model`] into a [`DiscretisedSystem`]: state variables are laid
//! out in declaration order, every continuous operator is replaced by the
//! spatial method's matrices and every variable by its slice of the state.

use std::collections::HashMap;
use std::time::Instant;

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use tracing::{debug, info, warn};

use crate::discretization::mesh::Mesh;
use crate::error::{Error, Result};
use crate::expression::{Location, ParameterValues, Simplifier, Symbol, SymbolKind};
use crate::numerics::solver::NewtonSolver;
use crate::numerics::system::{
    DiscreteEquation, DiscreteEvent, DiscretisedSystem, EquationKind, OutputVariable,
    VariableSlice,
};
use crate::physics::bc::BoundaryConditions;
use crate::physics::{EquationForm, Model};
use crate::spatial::{FiniteVolume, SpatialMethod};

#[derive(Clone, Debug)]
pub struct DiscretisationOptions {
    /// Simplify the discretised expressions.
    pub simplify: bool,
    /// Largest algebraic residual accepted at the initial state.
    pub initial_condition_tolerance: f64,
    /// Solve the algebraic equations for the algebraic part of the initial
    /// state before checking it.
    pub consistent_initial_conditions: bool,
    pub newton: NewtonSolver,
    /// Time at which initial conditions are evaluated and checked; a run
    /// must start here.
    pub start_time: f64,
}

impl Default for DiscretisationOptions {
    fn default() -> Self {
        Self {
            simplify: true,
            initial_condition_tolerance: 1e-8,
            consistent_initial_conditions: false,
            newton: NewtonSolver::default(),
            start_time: 0.0,
        }
    }
}

/// Discretisation engine bound to one spatial method. Operators assembled by
/// the method are cached on it and reused by every model processed here.
pub struct Discretisation<S: SpatialMethod = FiniteVolume> {
    method: S,
    pub options: DiscretisationOptions,
}

impl Discretisation<FiniteVolume> {
    pub fn new(mesh: Mesh) -> Self {
        Self::with_method(FiniteVolume::new(mesh))
    }
}

impl<S: SpatialMethod> Discretisation<S> {
    pub fn with_method(method: S) -> Self {
        Self {
            method,
            options: DiscretisationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DiscretisationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn method(&self) -> &S {
        &self.method
    }

    pub fn mesh(&self) -> &Mesh {
        self.method.mesh()
    }

    pub fn process_model(
        &self,
        model: &Model,
        parameters: &ParameterValues,
    ) -> Result<DiscretisedSystem> {
        let start = Instant::now();
        info!(model = model.name(), equations = model.equations().len(), "discretising");
        model.check_well_posedness()?;

        let mut parameter_values = model.parameters().clone();
        parameter_values.update(parameters);
        let resolved = parameter_values.resolve()?;

        let slices = self.assign_slices(model)?;
        let mut processor = Processor {
            method: &self.method,
            slices: &slices,
            bcs: BoundaryConditions::new(),
            memo: HashMap::new(),
        };
        let bcs = model
            .boundary_conditions()
            .try_map_values(|value| processor.process(value))?;
        processor.bcs = bcs;

        let mut equations = Vec::with_capacity(slices.len());
        for (eq, slice) in model.equations().iter().zip(&slices) {
            let name = eq.variable_name();
            let (kind, expression) = match eq.form().map_err(|e| e.in_equation(name))? {
                EquationForm::Differential { rhs } => (EquationKind::Differential, rhs),
                EquationForm::Algebraic { residual } => (EquationKind::Algebraic, residual),
            };
            let discretised = processor
                .process(&expression)
                .and_then(|d| processor.fit_to(d, slice))
                .map_err(|e| e.in_equation(name))?;
            equations.push(DiscreteEquation {
                variable: name.to_string(),
                range: slice.range.clone(),
                kind,
                expression: discretised,
            });
        }

        let mut initial_conditions = Vec::with_capacity(slices.len());
        for (eq, slice) in model.equations().iter().zip(&slices) {
            let ic = model
                .initial_condition(&eq.variable)
                .ok_or_else(|| Error::MissingInitialCondition(slice.name.clone()))?;
            let discretised = processor
                .process(ic)
                .and_then(|d| processor.fit_to(d, slice))
                .map_err(|e| e.in_equation(&slice.name))?;
            initial_conditions.push(discretised);
        }

        let mut events = Vec::with_capacity(model.events().len());
        for event in model.events() {
            let expression = processor.process(&event.expression)?;
            if expression.has_domain() {
                return Err(Error::shape(
                    format!("event `{}`", event.name),
                    format!("`{}` is not a single number", event.expression),
                ));
            }
            events.push(DiscreteEvent {
                name: event.name.clone(),
                expression,
                direction: event.direction,
                terminal: event.terminal,
            });
        }

        let mut outputs = Vec::with_capacity(model.variables().len());
        for (name, symbol) in model.variables() {
            let expression = processor.process(symbol)?;
            let nodes = self.coordinates(symbol)?;
            outputs.push(OutputVariable {
                name: name.clone(),
                expression,
                nodes,
            });
        }

        if self.options.simplify {
            let mut simplifier = Simplifier::new();
            for eq in &mut equations {
                eq.expression = simplifier.simplify(&eq.expression);
            }
            for ic in &mut initial_conditions {
                *ic = simplifier.simplify(ic);
            }
            for event in &mut events {
                event.expression = simplifier.simplify(&event.expression);
            }
            for output in &mut outputs {
                output.expression = simplifier.simplify(&output.expression);
            }
        }

        let mass_matrix = self.mass_matrix(&slices, &equations)?;
        let size = slices.last().map_or(0, |s| s.range.end);
        let mut system = DiscretisedSystem {
            name: model.name().to_string(),
            slices,
            equations,
            initial_conditions,
            mass_matrix,
            y0: DVector::zeros(size),
            start_time: self.options.start_time,
            events,
            outputs,
            parameter_values,
            parameters: resolved,
        };
        system.check_parameters_bound()?;
        system.y0 = system.compute_initial_state()?;

        if self.options.consistent_initial_conditions {
            let t0 = system.start_time;
            match system.consistent_initial_state(t0, &system.y0, &self.options.newton) {
                Ok(y0) => system.y0 = y0,
                Err(e) => warn!(error = %e, "consistent initialisation failed"),
            }
        }
        system.check_initial_conditions(self.options.initial_condition_tolerance)?;

        info!(
            model = model.name(),
            states = system.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "discretised"
        );
        Ok(system)
    }

    fn assign_slices(&self, model: &Model) -> Result<Vec<VariableSlice>> {
        let mut offset = 0;
        let mut slices = Vec::with_capacity(model.equations().len());
        for eq in model.equations() {
            let domain = eq.variable.domain().clone();
            let (npts, nodes) = if domain.is_empty() {
                (1, DVector::zeros(0))
            } else {
                (self.method.points(&domain)?, self.method.nodes(&domain)?)
            };
            debug!(variable = eq.variable_name(), offset, npts, "assigned slice");
            slices.push(VariableSlice {
                name: eq.variable_name().to_string(),
                domain,
                range: offset..offset + npts,
                nodes,
            });
            offset += npts;
        }
        Ok(slices)
    }

    /// Positions at which an output is reported: cell centres or edges.
    fn coordinates(&self, symbol: &Symbol) -> Result<DVector<f64>> {
        if !symbol.has_domain() {
            return Ok(DVector::zeros(0));
        }
        match symbol.location() {
            Location::Nodes => self.method.nodes(symbol.domain()),
            Location::Edges => Ok(DVector::from_vec(
                self.method.mesh().combine(symbol.domain())?.edges,
            )),
        }
    }

    /// Block diagonal: the spatial method's mass block for differential
    /// variables, zero rows for algebraic ones.
    fn mass_matrix(
        &self,
        slices: &[VariableSlice],
        equations: &[DiscreteEquation],
    ) -> Result<CsrMatrix<f64>> {
        let n = slices.last().map_or(0, |s| s.range.end);
        let mut coo = CooMatrix::new(n, n);
        for (slice, eq) in slices.iter().zip(equations) {
            if eq.kind == EquationKind::Algebraic {
                continue;
            }
            let block = if slice.domain.is_empty() {
                CsrMatrix::identity(1)
            } else {
                self.method.mass_matrix(&slice.domain)?
            };
            let offset = slice.range.start;
            for (i, j, v) in block.triplet_iter() {
                coo.push(offset + i, offset + j, *v);
            }
        }
        Ok(CsrMatrix::from(&coo))
    }
}

/// Rewrites continuous expressions into discrete ones. The memo is keyed by
/// structure, so a sub-tree shared between equations is discretised once.
struct Processor<'a, S: SpatialMethod> {
    method: &'a S,
    slices: &'a [VariableSlice],
    bcs: BoundaryConditions,
    memo: HashMap<Symbol, Symbol>,
}

impl<S: SpatialMethod> Processor<'_, S> {
    fn process(&mut self, symbol: &Symbol) -> Result<Symbol> {
        if let Some(done) = self.memo.get(symbol) {
            return Ok(done.clone());
        }
        let discretised = self.discretise(symbol)?;
        self.memo.insert(symbol.clone(), discretised.clone());
        Ok(discretised)
    }

    fn discretise(&mut self, symbol: &Symbol) -> Result<Symbol> {
        match symbol.kind() {
            SymbolKind::Scalar(_)
            | SymbolKind::Parameter(_)
            | SymbolKind::Time
            | SymbolKind::StateVector(_)
            | SymbolKind::Vector(_)
            | SymbolKind::Matrix(_) => Ok(symbol.clone()),
            SymbolKind::Variable(name) => {
                let slice = self
                    .slices
                    .iter()
                    .find(|s| &s.name == name)
                    .ok_or_else(|| Error::UnassignedVariable(name.clone()))?;
                if &slice.domain != symbol.domain() {
                    return Err(Error::DomainMismatch {
                        operator: format!("variable `{name}`"),
                        left: slice.domain.clone(),
                        right: symbol.domain().clone(),
                    });
                }
                Ok(Symbol::state_vector(slice.range.clone(), slice.domain.clone()))
            }
            SymbolKind::SpatialVariable(_) => self.method.spatial_variable(symbol),
            SymbolKind::Negate(child) => Ok(self.process(child)?.neg()),
            SymbolKind::Function(f, child) => Ok(self.process(child)?.apply(*f)),
            SymbolKind::Gradient(child) => {
                let disc = self.process(child)?;
                self.method.gradient(child, &disc, self.bcs.find_for(child))
            }
            SymbolKind::Divergence(child) => {
                let disc = self.process(child)?;
                self.method.divergence(child, &disc)
            }
            SymbolKind::NodeToEdge(child) => {
                let disc = self.process(child)?;
                self.method.node_to_edge(child, &disc)
            }
            SymbolKind::Integral(child) => {
                let disc = self.process(child)?;
                self.method.integral(child, &disc)
            }
            SymbolKind::BoundaryValue(child, side) => {
                let disc = self.process(child)?;
                self.method
                    .boundary_value(child, &disc, *side, self.bcs.find_for(child))
            }
            SymbolKind::Broadcast(child) => {
                let disc = self.process(child)?;
                self.method.broadcast(&disc, symbol.domain())
            }
            SymbolKind::Reduce(_, child) => {
                let disc = self.process(child)?;
                Ok(symbol.with_children(vec![disc]))
            }
            SymbolKind::Binary(op, left, right) => {
                let l = self.process(left)?;
                let r = self.process(right)?;
                l.binary(*op, &r)
            }
            SymbolKind::Concatenation(children) => {
                let parts = children
                    .iter()
                    .map(|child| self.process(child))
                    .collect::<Result<Vec<_>>>()?;
                self.method.concatenation(parts)
            }
            SymbolKind::TimeDerivative(_) => Err(Error::unsupported(format!(
                "{symbol} below the top of an equation"
            ))),
        }
    }

    /// Makes a discretised right-hand side, residual or initial condition
    /// fill exactly the variable's slice.
    fn fit_to(&self, discretised: Symbol, slice: &VariableSlice) -> Result<Symbol> {
        if !discretised.has_domain() {
            if slice.domain.is_empty() {
                return Ok(discretised);
            }
            return self.method.broadcast(&discretised, &slice.domain);
        }
        if discretised.domain() != &slice.domain {
            return Err(Error::DomainMismatch {
                operator: format!("equation for `{}`", slice.name),
                left: slice.domain.clone(),
                right: discretised.domain().clone(),
            });
        }
        if discretised.location() != Location::Nodes {
            return Err(Error::shape(
                format!("equation for `{}`", slice.name),
                "right-hand side lives on cell edges",
            ));
        }
        Ok(discretised)
    }
}
