//! Symbolic expression trees for model equations.
//!
//! A [`Symbol`] is an immutable, reference-counted node. Building the same
//! sub-expression twice yields two nodes with the same structural id, and
//! cloning a [`Symbol`] shares the node, so equations that reuse a variable
//! form a DAG rather than duplicated trees.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::error::{Error, Result};

pub mod evaluate;
pub mod parameters;
pub mod simplify;

pub use evaluate::{Bindings, Evaluator, Real, Value};
pub use parameters::{ParameterSet, ParameterValue, ParameterValues};
pub use simplify::Simplifier;

/// Ordered list of region names a symbol lives on. Empty means the symbol has
/// no spatial extent and evaluates to a single number.
pub type Domain = Vec<String>;

pub fn domain(names: &[&str]) -> Domain {
    names.iter().map(|name| name.to_string()).collect()
}

/// Where the values of a spatially distributed symbol sit on the mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    Nodes,
    Edges,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Nodes => write!(f, "cell centres"),
            Location::Edges => write!(f, "cell edges"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    MatMul,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Power => "**",
            BinaryOp::MatMul => "@",
        }
    }

    pub(crate) fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply | BinaryOp::MatMul => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::Power => a.powf(b),
        }
    }
}

/// Elementwise elementary functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Function {
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    Abs,
}

impl Function {
    fn name(self) -> &'static str {
        match self {
            Function::Exp => "exp",
            Function::Log => "log",
            Function::Sqrt => "sqrt",
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tanh => "tanh",
            Function::Abs => "abs",
        }
    }

    pub(crate) fn apply<T: Real>(self, x: T) -> T {
        match self {
            Function::Exp => x.exp(),
            Function::Log => x.ln(),
            Function::Sqrt => x.sqrt(),
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tanh => x.tanh(),
            Function::Abs => {
                if x.re() < 0.0 {
                    -x
                } else {
                    x
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reduction {
    Max,
    Min,
}

#[derive(Clone, Debug)]
pub enum SymbolKind {
    Scalar(f64),
    Parameter(String),
    Variable(String),
    SpatialVariable(String),
    Time,
    Negate(Symbol),
    Function(Function, Symbol),
    Gradient(Symbol),
    Divergence(Symbol),
    NodeToEdge(Symbol),
    TimeDerivative(Symbol),
    Integral(Symbol),
    Reduce(Reduction, Symbol),
    BoundaryValue(Symbol, Side),
    Broadcast(Symbol),
    Binary(BinaryOp, Symbol, Symbol),
    Concatenation(Vec<Symbol>),
    StateVector(Range<usize>),
    Vector(Arc<DVector<f64>>),
    Matrix(Arc<CsrMatrix<f64>>),
}

struct Node {
    kind: SymbolKind,
    domain: Domain,
    location: Location,
    id: u64,
}

/// Shared handle to an immutable expression node.
#[derive(Clone)]
pub struct Symbol(Arc<Node>);

impl Symbol {
    fn from_parts(kind: SymbolKind, domain: Domain, location: Location) -> Self {
        let id = structural_id(&kind, &domain, location);
        Symbol(Arc::new(Node {
            kind,
            domain,
            location,
            id,
        }))
    }

    pub fn kind(&self) -> &SymbolKind {
        &self.0.kind
    }

    pub fn domain(&self) -> &Domain {
        &self.0.domain
    }

    pub fn location(&self) -> Location {
        self.0.location
    }

    /// Structural hash; equal ids mean structurally equal trees.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn has_domain(&self) -> bool {
        !self.0.domain.is_empty()
    }

    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // ---- leaves ----

    pub fn scalar(value: f64) -> Self {
        Self::from_parts(SymbolKind::Scalar(value), Vec::new(), Location::Nodes)
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Self::from_parts(
            SymbolKind::Parameter(name.into()),
            Vec::new(),
            Location::Nodes,
        )
    }

    pub fn variable(name: impl Into<String>, on: &[&str]) -> Self {
        Self::from_parts(SymbolKind::Variable(name.into()), domain(on), Location::Nodes)
    }

    pub fn spatial_variable(name: impl Into<String>, on: &[&str]) -> Result<Self> {
        let name = name.into();
        if on.is_empty() {
            return Err(Error::shape(
                name,
                "a spatial variable needs at least one region",
            ));
        }
        Ok(Self::from_parts(
            SymbolKind::SpatialVariable(name),
            domain(on),
            Location::Nodes,
        ))
    }

    pub fn time() -> Self {
        Self::from_parts(SymbolKind::Time, Vec::new(), Location::Nodes)
    }

    pub(crate) fn state_vector(range: Range<usize>, domain: Domain) -> Self {
        Self::from_parts(SymbolKind::StateVector(range), domain, Location::Nodes)
    }

    pub(crate) fn vector(values: DVector<f64>, domain: Domain, location: Location) -> Self {
        Self::from_parts(SymbolKind::Vector(Arc::new(values)), domain, location)
    }

    pub(crate) fn matrix(values: Arc<CsrMatrix<f64>>, domain: Domain, location: Location) -> Self {
        Self::from_parts(SymbolKind::Matrix(values), domain, location)
    }

    // ---- algebra ----

    pub fn add(&self, other: &Symbol) -> Result<Symbol> {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(&self, other: &Symbol) -> Result<Symbol> {
        self.binary(BinaryOp::Subtract, other)
    }

    pub fn mul(&self, other: &Symbol) -> Result<Symbol> {
        self.binary(BinaryOp::Multiply, other)
    }

    pub fn div(&self, other: &Symbol) -> Result<Symbol> {
        self.binary(BinaryOp::Divide, other)
    }

    pub fn pow(&self, other: &Symbol) -> Result<Symbol> {
        self.binary(BinaryOp::Power, other)
    }

    pub fn neg(&self) -> Symbol {
        Self::from_parts(
            SymbolKind::Negate(self.clone()),
            self.domain().clone(),
            self.location(),
        )
    }

    pub fn apply(&self, function: Function) -> Symbol {
        Self::from_parts(
            SymbolKind::Function(function, self.clone()),
            self.domain().clone(),
            self.location(),
        )
    }

    pub fn exp(&self) -> Symbol {
        self.apply(Function::Exp)
    }

    pub fn ln(&self) -> Symbol {
        self.apply(Function::Log)
    }

    pub fn sqrt(&self) -> Symbol {
        self.apply(Function::Sqrt)
    }

    pub fn binary(&self, op: BinaryOp, other: &Symbol) -> Result<Symbol> {
        if op == BinaryOp::MatMul {
            return self.matmul(other);
        }
        let (domain, location) = combine_shapes(op.symbol(), self, other)?;
        Ok(Self::from_parts(
            SymbolKind::Binary(op, self.clone(), other.clone()),
            domain,
            location,
        ))
    }

    pub(crate) fn matmul(&self, other: &Symbol) -> Result<Symbol> {
        let SymbolKind::Matrix(matrix) = self.kind() else {
            return Err(Error::shape(
                "@",
                format!("left operand `{self}` is not a matrix"),
            ));
        };
        if let SymbolKind::Vector(v) = other.kind() {
            if v.len() != matrix.ncols() {
                return Err(Error::shape(
                    "@",
                    format!("{} columns against {} entries", matrix.ncols(), v.len()),
                ));
            }
        }
        Ok(Self::from_parts(
            SymbolKind::Binary(BinaryOp::MatMul, self.clone(), other.clone()),
            self.domain().clone(),
            self.location(),
        ))
    }

    // ---- spatial operators ----

    pub fn gradient(&self) -> Result<Symbol> {
        self.require_field("grad", Location::Nodes)?;
        Ok(Self::from_parts(
            SymbolKind::Gradient(self.clone()),
            self.domain().clone(),
            Location::Edges,
        ))
    }

    pub fn divergence(&self) -> Result<Symbol> {
        self.require_field("div", Location::Edges)?;
        Ok(Self::from_parts(
            SymbolKind::Divergence(self.clone()),
            self.domain().clone(),
            Location::Nodes,
        ))
    }

    /// Shorthand for `div(grad(self))`.
    pub fn laplacian(&self) -> Result<Symbol> {
        self.gradient()?.divergence()
    }

    pub fn node_to_edge(&self) -> Result<Symbol> {
        self.require_field("node_to_edge", Location::Nodes)?;
        Ok(Self::from_parts(
            SymbolKind::NodeToEdge(self.clone()),
            self.domain().clone(),
            Location::Edges,
        ))
    }

    pub fn boundary_value(&self, side: Side) -> Result<Symbol> {
        self.require_field("boundary_value", Location::Nodes)?;
        Ok(Self::from_parts(
            SymbolKind::BoundaryValue(self.clone(), side),
            Vec::new(),
            Location::Nodes,
        ))
    }

    pub fn integral(&self) -> Result<Symbol> {
        self.require_field("integral", Location::Nodes)?;
        Ok(Self::from_parts(
            SymbolKind::Integral(self.clone()),
            Vec::new(),
            Location::Nodes,
        ))
    }

    pub fn max(&self) -> Symbol {
        Self::from_parts(
            SymbolKind::Reduce(Reduction::Max, self.clone()),
            Vec::new(),
            Location::Nodes,
        )
    }

    pub fn min(&self) -> Symbol {
        Self::from_parts(
            SymbolKind::Reduce(Reduction::Min, self.clone()),
            Vec::new(),
            Location::Nodes,
        )
    }

    /// Rate of change of a state variable; only valid at the top of a
    /// governing equation.
    pub fn time_derivative(&self) -> Result<Symbol> {
        if !matches!(self.kind(), SymbolKind::Variable(_)) {
            return Err(Error::shape(
                "d/dt",
                format!("`{self}` is not a state variable"),
            ));
        }
        Ok(Self::from_parts(
            SymbolKind::TimeDerivative(self.clone()),
            self.domain().clone(),
            Location::Nodes,
        ))
    }

    /// Spreads a domain-less quantity over every cell of `on`.
    pub fn broadcast(&self, on: &[&str]) -> Result<Symbol> {
        self.broadcast_to(domain(on))
    }

    pub(crate) fn broadcast_to(&self, target: Domain) -> Result<Symbol> {
        if self.has_domain() {
            return Err(Error::DomainMismatch {
                operator: "broadcast".into(),
                left: self.domain().clone(),
                right: target,
            });
        }
        if target.is_empty() {
            return Err(Error::shape("broadcast", "target domain is empty"));
        }
        Ok(Self::from_parts(
            SymbolKind::Broadcast(self.clone()),
            target,
            Location::Nodes,
        ))
    }

    /// Joins cell-centred fields on disjoint regions into one field over the
    /// union of their domains, in the given order.
    pub fn concatenation(children: Vec<Symbol>) -> Result<Symbol> {
        if children.is_empty() {
            return Err(Error::shape("concatenation", "no children"));
        }
        let mut joined: Domain = Vec::new();
        for child in &children {
            if !child.has_domain() || child.location() != Location::Nodes {
                return Err(Error::shape(
                    "concatenation",
                    format!("`{child}` is not a cell-centred field"),
                ));
            }
            if child.domain().iter().any(|region| joined.contains(region)) {
                return Err(Error::DomainMismatch {
                    operator: "concatenation".into(),
                    left: joined,
                    right: child.domain().clone(),
                });
            }
            joined.extend(child.domain().iter().cloned());
        }
        Ok(Self::from_parts(
            SymbolKind::Concatenation(children),
            joined,
            Location::Nodes,
        ))
    }

    fn require_field(&self, operator: &str, location: Location) -> Result<()> {
        if !self.has_domain() {
            return Err(Error::DomainMismatch {
                operator: operator.into(),
                left: Vec::new(),
                right: Vec::new(),
            });
        }
        if self.location() != location {
            return Err(Error::shape(
                operator,
                format!(
                    "`{self}` lives on {} but {} is required",
                    self.location(),
                    location
                ),
            ));
        }
        Ok(())
    }

    /// Rebuilds this node around new children, keeping its domain and location.
    pub(crate) fn with_children(&self, children: Vec<Symbol>) -> Symbol {
        let mut it = children.into_iter();
        let mut next = || it.next().unwrap_or_else(|| self.clone());
        let kind = match self.kind() {
            SymbolKind::Negate(_) => SymbolKind::Negate(next()),
            SymbolKind::Function(f, _) => SymbolKind::Function(*f, next()),
            SymbolKind::Gradient(_) => SymbolKind::Gradient(next()),
            SymbolKind::Divergence(_) => SymbolKind::Divergence(next()),
            SymbolKind::NodeToEdge(_) => SymbolKind::NodeToEdge(next()),
            SymbolKind::TimeDerivative(_) => SymbolKind::TimeDerivative(next()),
            SymbolKind::Integral(_) => SymbolKind::Integral(next()),
            SymbolKind::Reduce(r, _) => SymbolKind::Reduce(*r, next()),
            SymbolKind::BoundaryValue(_, side) => SymbolKind::BoundaryValue(next(), *side),
            SymbolKind::Broadcast(_) => SymbolKind::Broadcast(next()),
            SymbolKind::Binary(op, _, _) => {
                let left = next();
                let right = next();
                SymbolKind::Binary(*op, left, right)
            }
            SymbolKind::Concatenation(old) => {
                SymbolKind::Concatenation((0..old.len()).map(|_| next()).collect())
            }
            leaf => leaf.clone(),
        };
        Self::from_parts(kind, self.domain().clone(), self.location())
    }

    pub fn children(&self) -> Vec<&Symbol> {
        match self.kind() {
            SymbolKind::Negate(c)
            | SymbolKind::Function(_, c)
            | SymbolKind::Gradient(c)
            | SymbolKind::Divergence(c)
            | SymbolKind::NodeToEdge(c)
            | SymbolKind::TimeDerivative(c)
            | SymbolKind::Integral(c)
            | SymbolKind::Reduce(_, c)
            | SymbolKind::BoundaryValue(c, _)
            | SymbolKind::Broadcast(c) => vec![c],
            SymbolKind::Binary(_, l, r) => vec![l, r],
            SymbolKind::Concatenation(cs) => cs.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Unique nodes of the tree in pre-order; shared sub-trees appear once.
    pub fn pre_order(&self) -> Vec<Symbol> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.id()) {
                continue;
            }
            for child in node.children().into_iter().rev() {
                stack.push(child.clone());
            }
            out.push(node);
        }
        out
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.names_of(|kind| match kind {
            SymbolKind::Parameter(name) => Some(name),
            _ => None,
        })
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.names_of(|kind| match kind {
            SymbolKind::Variable(name) => Some(name),
            _ => None,
        })
    }

    fn names_of(&self, pick: impl Fn(&SymbolKind) -> Option<&String>) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for node in self.pre_order() {
            if let Some(name) = pick(node.kind()) {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    pub fn evaluate<T: Real>(&self, bindings: &Bindings<'_, T>) -> Result<Value<T>> {
        Evaluator::new(bindings).evaluate(self)
    }

    pub fn simplify(&self) -> Symbol {
        Simplifier::new().simplify(self)
    }
}

impl From<f64> for Symbol {
    fn from(value: f64) -> Self {
        Symbol::scalar(value)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.id() == other.id()
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

fn combine_shapes(operator: &str, left: &Symbol, right: &Symbol) -> Result<(Domain, Location)> {
    match (left.has_domain(), right.has_domain()) {
        (false, false) => Ok((Vec::new(), Location::Nodes)),
        (true, false) => Ok((left.domain().clone(), left.location())),
        (false, true) => Ok((right.domain().clone(), right.location())),
        (true, true) => {
            if left.domain() != right.domain() {
                return Err(Error::DomainMismatch {
                    operator: operator.into(),
                    left: left.domain().clone(),
                    right: right.domain().clone(),
                });
            }
            if left.location() != right.location() {
                return Err(Error::shape(
                    operator,
                    format!(
                        "`{left}` lives on {} but `{right}` on {}",
                        left.location(),
                        right.location()
                    ),
                ));
            }
            Ok((left.domain().clone(), left.location()))
        }
    }
}

fn structural_id(kind: &SymbolKind, domain: &Domain, location: Location) -> u64 {
    let mut h = DefaultHasher::new();
    domain.hash(&mut h);
    location.hash(&mut h);
    std::mem::discriminant(kind).hash(&mut h);
    match kind {
        SymbolKind::Scalar(v) => v.to_bits().hash(&mut h),
        SymbolKind::Parameter(name)
        | SymbolKind::Variable(name)
        | SymbolKind::SpatialVariable(name) => name.hash(&mut h),
        SymbolKind::Time => {}
        SymbolKind::Negate(c)
        | SymbolKind::Gradient(c)
        | SymbolKind::Divergence(c)
        | SymbolKind::NodeToEdge(c)
        | SymbolKind::TimeDerivative(c)
        | SymbolKind::Integral(c)
        | SymbolKind::Broadcast(c) => c.id().hash(&mut h),
        SymbolKind::Function(f, c) => {
            f.hash(&mut h);
            c.id().hash(&mut h);
        }
        SymbolKind::Reduce(r, c) => {
            r.hash(&mut h);
            c.id().hash(&mut h);
        }
        SymbolKind::BoundaryValue(c, side) => {
            side.hash(&mut h);
            c.id().hash(&mut h);
        }
        SymbolKind::Binary(op, l, r) => {
            op.hash(&mut h);
            l.id().hash(&mut h);
            r.id().hash(&mut h);
        }
        SymbolKind::Concatenation(cs) => {
            cs.len().hash(&mut h);
            for c in cs {
                c.id().hash(&mut h);
            }
        }
        SymbolKind::StateVector(range) => {
            range.start.hash(&mut h);
            range.end.hash(&mut h);
        }
        SymbolKind::Vector(v) => {
            v.len().hash(&mut h);
            for x in v.iter() {
                x.to_bits().hash(&mut h);
            }
        }
        SymbolKind::Matrix(m) => {
            m.nrows().hash(&mut h);
            m.ncols().hash(&mut h);
            m.row_offsets().hash(&mut h);
            m.col_indices().hash(&mut h);
            for x in m.values() {
                x.to_bits().hash(&mut h);
            }
        }
    }
    h.finish()
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            SymbolKind::Scalar(v) => write!(f, "{v}"),
            SymbolKind::Parameter(name)
            | SymbolKind::Variable(name)
            | SymbolKind::SpatialVariable(name) => write!(f, "{name}"),
            SymbolKind::Time => write!(f, "t"),
            SymbolKind::Negate(c) => write!(f, "-{c}"),
            SymbolKind::Function(func, c) => write!(f, "{}({c})", func.name()),
            SymbolKind::Gradient(c) => write!(f, "grad({c})"),
            SymbolKind::Divergence(c) => write!(f, "div({c})"),
            SymbolKind::NodeToEdge(c) => write!(f, "node_to_edge({c})"),
            SymbolKind::TimeDerivative(c) => write!(f, "d{c}/dt"),
            SymbolKind::Integral(c) => write!(f, "integral({c})"),
            SymbolKind::Reduce(Reduction::Max, c) => write!(f, "max({c})"),
            SymbolKind::Reduce(Reduction::Min, c) => write!(f, "min({c})"),
            SymbolKind::BoundaryValue(c, side) => write!(f, "boundary_value({c}, {side})"),
            SymbolKind::Broadcast(c) => write!(f, "broadcast({c})"),
            SymbolKind::Binary(op, l, r) => write!(f, "({l} {} {r})", op.symbol()),
            SymbolKind::Concatenation(cs) => {
                write!(f, "concat(")?;
                for (i, c) in cs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            SymbolKind::StateVector(range) => write!(f, "y[{}:{}]", range.start, range.end),
            SymbolKind::Vector(v) => write!(f, "vector({})", v.len()),
            SymbolKind::Matrix(m) => write!(f, "matrix({}x{})", m.nrows(), m.ncols()),
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({self}; domain={:?})", self.domain())
    }
}
