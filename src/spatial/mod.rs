//! Spatial methods turn the continuous operators of an expression tree into
//! matrices acting on slices of the state vector.

pub mod finite_volume;

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use parking_lot::RwLock;

use crate::discretization::mesh::Mesh;
use crate::error::{Error, Result};
use crate::expression::{Domain, Side, Symbol};
use crate::physics::bc::{BoundaryKind, BoundaryPair};

pub use finite_volume::FiniteVolume;

/// Discrete counterparts of the continuous operators. Every method receives
/// the original symbol (for error messages and boundary lookups) together
/// with its already discretised operand.
pub trait SpatialMethod {
    fn mesh(&self) -> &Mesh;

    fn points(&self, domain: &Domain) -> Result<usize> {
        self.mesh().npts(domain)
    }

    /// Cell centres of `domain`, in state order.
    fn nodes(&self, domain: &Domain) -> Result<DVector<f64>>;

    fn spatial_variable(&self, symbol: &Symbol) -> Result<Symbol>;

    /// Repeats a domain-less quantity over every cell of `domain`.
    fn broadcast(&self, discretised: &Symbol, domain: &Domain) -> Result<Symbol>;

    fn gradient(
        &self,
        symbol: &Symbol,
        discretised: &Symbol,
        bcs: Option<&BoundaryPair>,
    ) -> Result<Symbol>;

    fn divergence(&self, symbol: &Symbol, discretised: &Symbol) -> Result<Symbol>;

    fn node_to_edge(&self, symbol: &Symbol, _discretised: &Symbol) -> Result<Symbol> {
        Err(Error::unsupported(format!("node_to_edge({symbol})")))
    }

    fn integral(&self, symbol: &Symbol, discretised: &Symbol) -> Result<Symbol>;

    fn boundary_value(
        &self,
        symbol: &Symbol,
        discretised: &Symbol,
        side: Side,
        bcs: Option<&BoundaryPair>,
    ) -> Result<Symbol>;

    /// Mass matrix block of a differential variable on `domain`.
    fn mass_matrix(&self, domain: &Domain) -> Result<CsrMatrix<f64>>;

    fn concatenation(&self, children: Vec<Symbol>) -> Result<Symbol> {
        Symbol::concatenation(children)
    }
}

/// Identifies an assembled operator. Two requests with equal keys get the
/// same matrix.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperatorKey {
    Gradient {
        domain: Domain,
        left: BoundaryKind,
        right: BoundaryKind,
    },
    Divergence(Domain),
    NodeToEdge(Domain),
    Integral(Domain),
    BoundaryValue {
        domain: Domain,
        side: Side,
        kind: Option<BoundaryKind>,
    },
}

/// A sparse matrix plus the weights with which the left and right boundary
/// values enter the result.
#[derive(Clone, Debug)]
pub struct LinearOperator {
    pub matrix: Arc<CsrMatrix<f64>>,
    pub boundary_weights: [f64; 2],
}

impl LinearOperator {
    pub fn new(matrix: CsrMatrix<f64>) -> Self {
        Self {
            matrix: Arc::new(matrix),
            boundary_weights: [0.0; 2],
        }
    }

    pub fn with_weights(mut self, left: f64, right: f64) -> Self {
        self.boundary_weights = [left, right];
        self
    }

    pub fn weight(&self, side: Side) -> f64 {
        match side {
            Side::Left => self.boundary_weights[0],
            Side::Right => self.boundary_weights[1],
        }
    }
}

/// Assembled operators shared between equations, models and threads.
#[derive(Default)]
pub struct OperatorCache {
    operators: RwLock<HashMap<OperatorKey, Arc<LinearOperator>>>,
}

impl OperatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        key: OperatorKey,
        build: impl FnOnce() -> Result<LinearOperator>,
    ) -> Result<Arc<LinearOperator>> {
        if let Some(op) = self.operators.read().get(&key) {
            return Ok(op.clone());
        }
        let built = Arc::new(build()?);
        let mut operators = self.operators.write();
        Ok(operators.entry(key).or_insert(built).clone())
    }

    pub fn len(&self) -> usize {
        self.operators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
