use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::DVector;

use super::{BinaryOp, Symbol, SymbolKind};

/// Algebraic simplification: constant folding, additive and multiplicative
/// identities, double negation and merging of chained matrix products.
///
/// Rules only ever return an already simplified child or a node that is fed
/// back through the rules, so the output is a fixed point and simplifying it
/// again changes nothing. A single `Simplifier` may be reused across
/// equations to keep shared sub-trees shared.
#[derive(Default)]
pub struct Simplifier {
    memo: HashMap<u64, Symbol>,
}

impl Simplifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simplify(&mut self, symbol: &Symbol) -> Symbol {
        if let Some(done) = self.memo.get(&symbol.id()) {
            return done.clone();
        }
        let children: Vec<Symbol> = symbol
            .children()
            .into_iter()
            .map(|child| self.simplify(child))
            .collect();
        let rebuilt = if children.is_empty() {
            symbol.clone()
        } else {
            symbol.with_children(children)
        };
        let result = self.rewrite(rebuilt);
        self.memo.insert(symbol.id(), result.clone());
        result
    }

    fn rewrite(&mut self, node: Symbol) -> Symbol {
        match node.kind().clone() {
            SymbolKind::Negate(child) => match child.kind() {
                SymbolKind::Scalar(v) => Symbol::scalar(-v),
                SymbolKind::Negate(inner) => inner.clone(),
                _ => node,
            },
            SymbolKind::Function(f, child) => match child.kind() {
                SymbolKind::Scalar(v) => Symbol::scalar(f.apply(*v)),
                _ => node,
            },
            SymbolKind::Binary(BinaryOp::MatMul, left, right) => {
                match (left.kind(), right.kind()) {
                    (SymbolKind::Matrix(a), SymbolKind::Binary(BinaryOp::MatMul, inner, x)) => {
                        match inner.kind() {
                            SymbolKind::Matrix(b) => {
                                let product = a.as_ref() * b.as_ref();
                                let merged = Symbol::matrix(
                                    Arc::new(product),
                                    left.domain().clone(),
                                    left.location(),
                                );
                                Symbol::from_parts(
                                    SymbolKind::Binary(BinaryOp::MatMul, merged, x.clone()),
                                    node.domain().clone(),
                                    node.location(),
                                )
                            }
                            _ => node,
                        }
                    }
                    _ => node,
                }
            }
            SymbolKind::Binary(op, left, right) => {
                if let (SymbolKind::Scalar(a), SymbolKind::Scalar(b)) = (left.kind(), right.kind()) {
                    return Symbol::scalar(op.apply(*a, *b));
                }
                if let Some(folded) = fold_vectors(&node, op, &left, &right) {
                    return folded;
                }
                match op {
                    BinaryOp::Add if is_value(&left, 0.0) => right,
                    BinaryOp::Add | BinaryOp::Subtract if is_value(&right, 0.0) => left,
                    BinaryOp::Subtract if is_value(&left, 0.0) => {
                        let negated = right.neg();
                        self.rewrite(negated)
                    }
                    BinaryOp::Multiply if is_value(&left, 1.0) => right,
                    BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Power
                        if is_value(&right, 1.0) =>
                    {
                        left
                    }
                    BinaryOp::Multiply
                        if (is_value(&left, 0.0) && !right.has_domain())
                            || (is_value(&right, 0.0) && !left.has_domain()) =>
                    {
                        Symbol::scalar(0.0)
                    }
                    BinaryOp::Power if is_value(&right, 0.0) && !left.has_domain() => {
                        Symbol::scalar(1.0)
                    }
                    _ => node,
                }
            }
            _ => node,
        }
    }
}

fn is_value(symbol: &Symbol, value: f64) -> bool {
    matches!(symbol.kind(), SymbolKind::Scalar(v) if *v == value)
}

fn is_zero_vector(symbol: &Symbol) -> bool {
    matches!(symbol.kind(), SymbolKind::Vector(v) if v.iter().all(|x| *x == 0.0))
}

/// Constant vectors scaled by constants, added together, or added as zero.
fn fold_vectors(node: &Symbol, op: BinaryOp, left: &Symbol, right: &Symbol) -> Option<Symbol> {
    let constant = |v: DVector<f64>| {
        Symbol::vector(v, node.domain().clone(), node.location())
    };
    match (op, left.kind(), right.kind()) {
        (BinaryOp::Multiply, SymbolKind::Vector(v), SymbolKind::Scalar(s))
        | (BinaryOp::Multiply, SymbolKind::Scalar(s), SymbolKind::Vector(v)) => {
            Some(constant(v.as_ref() * *s))
        }
        (BinaryOp::Add, SymbolKind::Vector(a), SymbolKind::Vector(b)) if a.len() == b.len() => {
            Some(constant(a.as_ref() + b.as_ref()))
        }
        (BinaryOp::Subtract, SymbolKind::Vector(a), SymbolKind::Vector(b))
            if a.len() == b.len() =>
        {
            Some(constant(a.as_ref() - b.as_ref()))
        }
        (BinaryOp::Add | BinaryOp::Subtract, _, _)
            if is_zero_vector(right) && left.domain() == node.domain() =>
        {
            Some(left.clone())
        }
        (BinaryOp::Add, _, _) if is_zero_vector(left) && right.domain() == node.domain() => {
            Some(right.clone())
        }
        _ => None,
    }
}
