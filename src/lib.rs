//! Symbolic continuum models discretised with finite volumes.
//!
//! A [`Model`] is written with [`Symbol`] expressions over named regions.
//! A [`Discretisation`] turns it, on a [`Mesh`], into a [`DiscretisedSystem`]
//! of the form `M dy/dt = F(t, y)`, which the [`TransientSolver`] integrates
//! into a [`Solution`].

pub mod discretization;
pub mod error;
pub mod expression;
pub mod models;
pub mod numerics;
pub mod physics;
pub mod processing;
pub mod spatial;

pub use discretization::{Discretisation, DiscretisationOptions, Geometry, Mesh};
pub use error::{Error, Result};
pub use expression::{ParameterValue, ParameterValues, Side, Symbol};
pub use numerics::system::{DaeSystem, DiscretisedSystem};
pub use numerics::transient::TransientSolver;
pub use physics::bc::{BoundaryCondition, BoundaryPair};
pub use physics::{Event, EventDirection, Model};
pub use processing::{ProcessedVariable, Solution, Termination};
pub use spatial::{FiniteVolume, SpatialMethod};
