use nalgebra::DVector;
use thiserror::Error;

use crate::expression::{Domain, Side};
use crate::processing::solution::Solution;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("shape mismatch in `{operator}`: {details}")]
    ShapeMismatch { operator: String, details: String },

    #[error("domain mismatch in `{operator}`: {left:?} vs {right:?}")]
    DomainMismatch {
        operator: String,
        left: Domain,
        right: Domain,
    },

    #[error("no value bound for `{0}`")]
    UnboundSymbol(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported operator `{operator}`{}", equation_suffix(.equation))]
    UnsupportedOperator {
        operator: String,
        equation: Option<String>,
    },

    #[error("missing {side} boundary condition for `{symbol}`{}", equation_suffix(.equation))]
    BoundaryConditionMissing {
        symbol: String,
        side: Side,
        equation: Option<String>,
    },

    #[error("initial conditions are inconsistent: algebraic residual of `{variable}` is {residual:.3e} (tolerance {tolerance:.1e})")]
    InconsistentInitialConditions {
        variable: String,
        residual: f64,
        tolerance: f64,
    },

    #[error("variable `{0}` has no governing equation")]
    UnassignedVariable(String),

    #[error("algebraic variable `{0}` appears in no equation, so nothing determines it")]
    Overdetermined(String),

    #[error("variable `{0}` has more than one governing equation")]
    DuplicateEquation(String),

    #[error("variable `{0}` has no initial condition")]
    MissingInitialCondition(String),

    #[error("parameter `{name}` could not be resolved: {reason}")]
    ParameterResolution { name: String, reason: String },

    #[error("invalid output times: {0}")]
    InvalidTimeSpan(String),

    #[error("solver failed at t = {time:.6e}: {reason}")]
    SolverFailure {
        time: f64,
        state: DVector<f64>,
        reason: String,
        partial: Box<Solution>,
    },
}

fn equation_suffix(equation: &Option<String>) -> String {
    match equation {
        Some(name) => format!(" in equation for `{name}`"),
        None => String::new(),
    }
}

impl Error {
    /// Attaches the governing equation being processed, if the error can name one
    /// and does not already.
    pub fn in_equation(self, name: &str) -> Self {
        match self {
            Error::UnsupportedOperator {
                operator,
                equation: None,
            } => Error::UnsupportedOperator {
                operator,
                equation: Some(name.to_string()),
            },
            Error::BoundaryConditionMissing {
                symbol,
                side,
                equation: None,
            } => Error::BoundaryConditionMissing {
                symbol,
                side,
                equation: Some(name.to_string()),
            },
            other => other,
        }
    }

    pub(crate) fn unsupported(operator: impl Into<String>) -> Self {
        Error::UnsupportedOperator {
            operator: operator.into(),
            equation: None,
        }
    }

    pub(crate) fn shape(operator: impl Into<String>, details: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            operator: operator.into(),
            details: details.into(),
        }
    }
}
