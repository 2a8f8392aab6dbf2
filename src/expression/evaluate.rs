use std::collections::HashMap;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use num_dual::DualNum;
use num_traits::Zero;

use super::{BinaryOp, ParameterSet, Reduction, Symbol, SymbolKind};
use crate::error::{Error, Result};

/// Scalar types an expression can be evaluated in: plain `f64` or any dual
/// number, so the same tree yields values and exact Jacobians.
pub trait Real: DualNum<f64> + nalgebra::Scalar {}

impl<T> Real for T where T: DualNum<f64> + nalgebra::Scalar {}

#[derive(Clone, Debug, PartialEq)]
pub enum Value<T: Real> {
    Scalar(T),
    Vector(DVector<T>),
}

impl<T: Real> Value<T> {
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vector(self) -> DVector<T> {
        match self {
            Value::Scalar(x) => DVector::from_element(1, x),
            Value::Vector(v) => v,
        }
    }

    /// The single number held by a scalar or a one-entry vector.
    pub fn scalar(&self) -> Option<T> {
        match self {
            Value::Scalar(x) => Some(x.clone()),
            Value::Vector(v) if v.len() == 1 => Some(v[0].clone()),
            Value::Vector(_) => None,
        }
    }

    fn map(self, f: impl Fn(T) -> T) -> Self {
        match self {
            Value::Scalar(x) => Value::Scalar(f(x)),
            Value::Vector(v) => Value::Vector(v.map(f)),
        }
    }
}

impl From<f64> for Value<f64> {
    fn from(x: f64) -> Self {
        Value::Scalar(x)
    }
}

impl<T: Real> From<DVector<T>> for Value<T> {
    fn from(v: DVector<T>) -> Self {
        Value::Vector(v)
    }
}

/// Concrete values for the free symbols of a tree.
pub struct Bindings<'a, T: Real> {
    pub time: f64,
    pub state: Option<&'a DVector<T>>,
    pub parameters: Option<&'a ParameterSet>,
    pub variables: HashMap<String, Value<T>>,
}

impl<'a, T: Real> Default for Bindings<'a, T> {
    fn default() -> Self {
        Self {
            time: 0.0,
            state: None,
            parameters: None,
            variables: HashMap::new(),
        }
    }
}

impl<'a, T: Real> Bindings<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_time(mut self, t: f64) -> Self {
        self.time = t;
        self
    }

    pub fn with_state(mut self, y: &'a DVector<T>) -> Self {
        self.state = Some(y);
        self
    }

    pub fn with_parameters(mut self, parameters: &'a ParameterSet) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value<T>>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

/// Bottom-up evaluator. Results are memoised by structural id for the
/// lifetime of the evaluator, so shared sub-trees are computed once.
pub struct Evaluator<'a, 'b, T: Real> {
    bindings: &'b Bindings<'a, T>,
    memo: HashMap<u64, Value<T>>,
}

impl<'a, 'b, T: Real> Evaluator<'a, 'b, T> {
    pub fn new(bindings: &'b Bindings<'a, T>) -> Self {
        Self {
            bindings,
            memo: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, symbol: &Symbol) -> Result<Value<T>> {
        if let Some(value) = self.memo.get(&symbol.id()) {
            return Ok(value.clone());
        }
        let value = self.compute(symbol)?;
        self.memo.insert(symbol.id(), value.clone());
        Ok(value)
    }

    fn compute(&mut self, symbol: &Symbol) -> Result<Value<T>> {
        match symbol.kind() {
            SymbolKind::Scalar(c) => Ok(Value::Scalar(T::from(*c))),
            SymbolKind::Parameter(name) => self
                .bindings
                .parameters
                .and_then(|p| p.get(name))
                .map(|&v| Value::Scalar(T::from(v)))
                .ok_or_else(|| Error::UnboundSymbol(name.clone())),
            SymbolKind::Variable(name) | SymbolKind::SpatialVariable(name) => self
                .bindings
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UnboundSymbol(name.clone())),
            SymbolKind::Time => Ok(Value::Scalar(T::from(self.bindings.time))),
            SymbolKind::StateVector(range) => {
                let y = self
                    .bindings
                    .state
                    .ok_or_else(|| Error::UnboundSymbol(symbol.to_string()))?;
                if range.end > y.len() {
                    return Err(Error::shape(
                        symbol.to_string(),
                        format!("state vector has only {} entries", y.len()),
                    ));
                }
                Ok(Value::Vector(y.rows(range.start, range.len()).into_owned()))
            }
            SymbolKind::Vector(v) => Ok(Value::Vector(v.map(|x| T::from(x)))),
            SymbolKind::Matrix(_) => Err(Error::unsupported(format!(
                "{symbol} outside a matrix product"
            ))),
            SymbolKind::Negate(c) => Ok(self.evaluate(c)?.map(|x| -x)),
            SymbolKind::Function(f, c) => Ok(self.evaluate(c)?.map(|x| f.apply(x))),
            SymbolKind::Reduce(reduction, c) => {
                let value = self.evaluate(c)?.into_vector();
                reduce(*reduction, &value)
                    .map(Value::Scalar)
                    .ok_or_else(|| Error::shape(symbol.to_string(), "reduction of an empty vector"))
            }
            SymbolKind::Concatenation(children) => {
                let mut parts = Vec::new();
                for child in children {
                    parts.extend(self.evaluate(child)?.into_vector().iter().cloned());
                }
                Ok(Value::Vector(DVector::from_vec(parts)))
            }
            SymbolKind::Binary(BinaryOp::MatMul, left, right) => {
                let SymbolKind::Matrix(matrix) = left.kind() else {
                    return Err(Error::shape("@", format!("`{left}` is not a matrix")));
                };
                let x = self.evaluate(right)?.into_vector();
                if x.len() != matrix.ncols() {
                    return Err(Error::shape(
                        symbol.to_string(),
                        format!("{} columns against {} entries", matrix.ncols(), x.len()),
                    ));
                }
                Ok(Value::Vector(sparse_mul(matrix, &x)))
            }
            SymbolKind::Binary(op, left, right) => {
                let a = self.evaluate(left)?;
                let b = self.evaluate(right)?;
                let op = *op;
                zip_values(symbol, a, b, move |x, y| binary(op, x, y))
            }
            SymbolKind::Gradient(_)
            | SymbolKind::Divergence(_)
            | SymbolKind::NodeToEdge(_)
            | SymbolKind::Integral(_)
            | SymbolKind::BoundaryValue(..)
            | SymbolKind::Broadcast(_)
            | SymbolKind::TimeDerivative(_) => Err(Error::unsupported(format!(
                "{symbol} (discretise the model first)"
            ))),
        }
    }
}

fn binary<T: Real>(op: BinaryOp, x: T, y: T) -> T {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply | BinaryOp::MatMul => x * y,
        BinaryOp::Divide => x / y,
        BinaryOp::Power => power(x, y),
    }
}

/// `x^y`, differentiable in both arguments for positive bases.
fn power<T: Real>(x: T, y: T) -> T {
    if x.re() > 0.0 {
        (x.ln() * y).exp()
    } else {
        x.powf(y.re())
    }
}

fn reduce<T: Real>(reduction: Reduction, v: &DVector<T>) -> Option<T> {
    v.iter().cloned().reduce(|a, b| {
        let keep_a = match reduction {
            Reduction::Max => a.re() >= b.re(),
            Reduction::Min => a.re() <= b.re(),
        };
        if keep_a {
            a
        } else {
            b
        }
    })
}

/// Elementwise combination with broadcasting of scalars and one-entry vectors.
fn zip_values<T: Real>(
    symbol: &Symbol,
    a: Value<T>,
    b: Value<T>,
    f: impl Fn(T, T) -> T,
) -> Result<Value<T>> {
    match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => Ok(Value::Scalar(f(x, y))),
        (Value::Scalar(x), Value::Vector(v)) => Ok(Value::Vector(v.map(|y| f(x.clone(), y)))),
        (Value::Vector(u), Value::Scalar(y)) => Ok(Value::Vector(u.map(|x| f(x, y.clone())))),
        (Value::Vector(u), Value::Vector(v)) => {
            if u.len() == v.len() {
                Ok(Value::Vector(u.zip_map(&v, f)))
            } else if u.len() == 1 {
                let x = u[0].clone();
                Ok(Value::Vector(v.map(|y| f(x.clone(), y))))
            } else if v.len() == 1 {
                let y = v[0].clone();
                Ok(Value::Vector(u.map(|x| f(x, y.clone()))))
            } else {
                Err(Error::shape(
                    symbol.to_string(),
                    format!("operands have {} and {} entries", u.len(), v.len()),
                ))
            }
        }
    }
}

pub(crate) fn sparse_mul<T: Real>(matrix: &CsrMatrix<f64>, x: &DVector<T>) -> DVector<T> {
    DVector::from_iterator(
        matrix.nrows(),
        matrix.row_iter().map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .fold(T::zero(), |acc, (&j, &a)| acc + x[j].clone() * a)
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Dyn, U1};
    use num_dual::{Derivative, DualDVec64};

    #[test]
    fn evaluates_with_bindings() {
        let u = Symbol::variable("u", &[]);
        let k = Symbol::parameter("k");
        let e = k.mul(&u).unwrap().add(&Symbol::time()).unwrap();
        let params = ParameterSet::from([("k".to_string(), 3.0)]);
        let bindings = Bindings::<f64>::new()
            .at_time(0.5)
            .with_parameters(&params)
            .bind("u", 2.0);
        let value = e.evaluate(&bindings).unwrap();
        assert_relative_eq!(value.scalar().unwrap(), 6.5);
    }

    #[test]
    fn missing_binding_is_reported_by_name() {
        let e = Symbol::parameter("D").mul(&Symbol::variable("c", &[])).unwrap();
        let params = ParameterSet::new();
        let bindings = Bindings::<f64>::new().with_parameters(&params).bind("c", 1.0);
        match e.evaluate(&bindings) {
            Err(Error::UnboundSymbol(name)) => assert_eq!(name, "D"),
            other => panic!("expected UnboundSymbol, got {other:?}"),
        }
    }

    #[test]
    fn spatial_operators_need_discretisation() {
        let u = Symbol::variable("u", &["rod"]);
        let e = u.gradient().unwrap();
        let bindings = Bindings::<f64>::new().bind("u", DVector::from_element(3, 1.0));
        assert!(matches!(
            e.evaluate(&bindings),
            Err(Error::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn vectors_broadcast_against_scalars() {
        let u = Symbol::variable("u", &["rod"]);
        let e = u.mul(&Symbol::scalar(2.0)).unwrap().max();
        let bindings = Bindings::<f64>::new().bind("u", DVector::from_vec(vec![1.0, 4.0, 2.0]));
        assert_relative_eq!(e.evaluate(&bindings).unwrap().scalar().unwrap(), 8.0);
    }

    #[test]
    fn dual_numbers_carry_derivatives_through_power() {
        let x = Symbol::variable("x", &[]);
        let e = x.pow(&Symbol::scalar(3.0)).unwrap();
        let seed = DualDVec64::new(2.0, Derivative::derivative_generic(Dyn(1), U1, 0));
        let bindings = Bindings::<DualDVec64>::new().bind("x", DVector::from_element(1, seed));
        let value = e.evaluate(&bindings).unwrap().scalar().unwrap();
        assert_relative_eq!(value.re, 8.0, epsilon = 1e-12);
        let grad = value.eps.unwrap_generic(Dyn(1), U1);
        assert_relative_eq!(grad[0], 12.0, epsilon = 1e-12);
    }
}
