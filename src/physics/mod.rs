//! Model authoring surface: state variables, their governing equations,
//! initial and boundary conditions, events and default parameters.

pub mod bc;

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::expression::{BinaryOp, ParameterValue, ParameterValues, Symbol, SymbolKind};
use bc::{BoundaryConditions, BoundaryPair};

/// The governing equation of one state variable. Differential equations
/// have the form `d(var)/dt - rhs` at the top of the tree; anything else is
/// an algebraic residual that must vanish.
#[derive(Clone, Debug)]
pub struct Equation {
    pub variable: Symbol,
    pub expression: Symbol,
}

#[derive(Clone, Debug)]
pub enum EquationForm {
    Differential { rhs: Symbol },
    Algebraic { residual: Symbol },
}

impl Equation {
    pub fn variable_name(&self) -> &str {
        match self.variable.kind() {
            SymbolKind::Variable(name) => name,
            _ => "",
        }
    }

    pub fn form(&self) -> Result<EquationForm> {
        match self.expression.kind() {
            SymbolKind::TimeDerivative(var) => {
                self.check_rate_of(var)?;
                Ok(EquationForm::Differential {
                    rhs: Symbol::scalar(0.0),
                })
            }
            SymbolKind::Binary(BinaryOp::Subtract, left, right) => match left.kind() {
                SymbolKind::TimeDerivative(var) => {
                    self.check_rate_of(var)?;
                    Ok(EquationForm::Differential { rhs: right.clone() })
                }
                _ => Ok(EquationForm::Algebraic {
                    residual: self.expression.clone(),
                }),
            },
            _ => Ok(EquationForm::Algebraic {
                residual: self.expression.clone(),
            }),
        }
    }

    fn check_rate_of(&self, var: &Symbol) -> Result<()> {
        if var != &self.variable {
            return Err(Error::UnsupportedOperator {
                operator: format!("d{var}/dt"),
                equation: Some(self.variable_name().to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventDirection {
    /// Negative to positive.
    Rising,
    /// Positive to negative.
    Falling,
    #[default]
    Either,
}

impl EventDirection {
    pub fn crosses(self, before: f64, after: f64) -> bool {
        let rising = before < 0.0 && after >= 0.0;
        let falling = before > 0.0 && after <= 0.0;
        match self {
            EventDirection::Rising => rising,
            EventDirection::Falling => falling,
            EventDirection::Either => rising || falling,
        }
    }
}

/// A scalar function of the state whose zero crossing either stops the
/// integration (terminal) or is only recorded.
#[derive(Clone, Debug)]
pub struct Event {
    pub name: String,
    pub expression: Symbol,
    pub direction: EventDirection,
    pub terminal: bool,
}

impl Event {
    pub fn terminal(name: impl Into<String>, expression: Symbol) -> Self {
        Self {
            name: name.into(),
            expression,
            direction: EventDirection::Either,
            terminal: true,
        }
    }

    pub fn marker(name: impl Into<String>, expression: Symbol) -> Self {
        Self {
            terminal: false,
            ..Self::terminal(name, expression)
        }
    }

    pub fn with_direction(mut self, direction: EventDirection) -> Self {
        self.direction = direction;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    name: String,
    equations: Vec<Equation>,
    initial_conditions: Vec<(Symbol, Symbol)>,
    boundary_conditions: BoundaryConditions,
    events: Vec<Event>,
    variables: Vec<(String, Symbol)>,
    parameters: ParameterValues,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `d(variable)/dt = rhs`.
    pub fn add_rhs(&mut self, variable: &Symbol, rhs: Symbol) -> Result<()> {
        let expression = variable.time_derivative()?.sub(&rhs)?;
        self.add_equation(variable, expression)
    }

    /// `residual = 0`.
    pub fn add_algebraic(&mut self, variable: &Symbol, residual: Symbol) -> Result<()> {
        self.add_equation(variable, residual)
    }

    pub fn add_equation(&mut self, variable: &Symbol, expression: Symbol) -> Result<()> {
        let SymbolKind::Variable(name) = variable.kind() else {
            return Err(Error::shape(
                "equation",
                format!("`{variable}` is not a state variable"),
            ));
        };
        if self.equation_for(name).is_some() {
            return Err(Error::DuplicateEquation(name.clone()));
        }
        if expression.has_domain() && expression.domain() != variable.domain() {
            return Err(Error::DomainMismatch {
                operator: format!("equation for `{name}`"),
                left: variable.domain().clone(),
                right: expression.domain().clone(),
            });
        }
        self.equations.push(Equation {
            variable: variable.clone(),
            expression,
        });
        Ok(())
    }

    pub fn set_initial_condition(&mut self, variable: &Symbol, value: impl Into<Symbol>) {
        let value = value.into();
        self.initial_conditions.retain(|(v, _)| v != variable);
        self.initial_conditions.push((variable.clone(), value));
    }

    pub fn set_boundary_conditions(&mut self, symbol: &Symbol, pair: BoundaryPair) -> Result<()> {
        self.boundary_conditions.add(symbol, pair)
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Registers a derived quantity to be reported alongside the state.
    pub fn add_variable(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.variables.push((name.into(), symbol));
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.parameters.insert(name, value);
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn equation_for(&self, name: &str) -> Option<&Equation> {
        self.equations.iter().find(|eq| eq.variable_name() == name)
    }

    pub fn initial_condition(&self, variable: &Symbol) -> Option<&Symbol> {
        self.initial_conditions
            .iter()
            .find(|(v, _)| v == variable)
            .map(|(_, value)| value)
    }

    pub fn boundary_conditions(&self) -> &BoundaryConditions {
        &self.boundary_conditions
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn variables(&self) -> &[(String, Symbol)] {
        &self.variables
    }

    pub fn parameters(&self) -> &ParameterValues {
        &self.parameters
    }

    /// Every variable has one equation and an initial condition, every
    /// variable mentioned anywhere in the model is one of them, and every
    /// algebraic variable appears in some equation.
    pub fn check_well_posedness(&self) -> Result<()> {
        let declared: HashSet<&str> = self.equations.iter().map(Equation::variable_name).collect();
        if declared.len() != self.equations.len() {
            let mut seen = HashSet::new();
            for eq in &self.equations {
                if !seen.insert(eq.variable_name()) {
                    return Err(Error::DuplicateEquation(eq.variable_name().to_string()));
                }
            }
        }

        let mut referenced: Vec<&Symbol> = Vec::new();
        for eq in &self.equations {
            referenced.push(&eq.expression);
        }
        for (var, value) in &self.initial_conditions {
            referenced.push(var);
            referenced.push(value);
        }
        for (key, pair) in self.boundary_conditions.iter() {
            referenced.extend([key, &pair.left.value, &pair.right.value]);
        }
        referenced.extend(self.events.iter().map(|e| &e.expression));
        referenced.extend(self.variables.iter().map(|(_, s)| s));
        for symbol in referenced {
            for name in symbol.variable_names() {
                if !declared.contains(name.as_str()) {
                    return Err(Error::UnassignedVariable(name));
                }
            }
        }

        // an algebraic variable absent from every equation is never determined
        let mut in_equations: HashSet<String> = HashSet::new();
        for eq in &self.equations {
            let body = match eq.form()? {
                EquationForm::Differential { rhs } => rhs,
                EquationForm::Algebraic { residual } => residual,
            };
            in_equations.extend(body.variable_names());
        }
        for eq in &self.equations {
            let algebraic = matches!(eq.form()?, EquationForm::Algebraic { .. });
            if algebraic && !in_equations.contains(eq.variable_name()) {
                return Err(Error::Overdetermined(eq.variable_name().to_string()));
            }
        }

        for eq in &self.equations {
            if self.initial_condition(&eq.variable).is_none() {
                return Err(Error::MissingInitialCondition(eq.variable_name().to_string()));
            }
        }
        Ok(())
    }
}
