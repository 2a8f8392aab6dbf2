use crate::error::{Error, Result};
use crate::expression::{Location, Side, Symbol};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundaryKind {
    /// Prescribed value of the field.
    Dirichlet,
    /// Prescribed value of the field's gradient (outward sign not applied).
    Neumann,
}

/// A condition at one end of a domain. The value is a domain-less symbol and
/// may depend on time, parameters or other variables.
#[derive(Clone, Debug)]
pub struct BoundaryCondition {
    pub kind: BoundaryKind,
    pub value: Symbol,
}

impl BoundaryCondition {
    pub fn dirichlet(value: impl Into<Symbol>) -> Self {
        Self {
            kind: BoundaryKind::Dirichlet,
            value: value.into(),
        }
    }

    pub fn neumann(value: impl Into<Symbol>) -> Self {
        Self {
            kind: BoundaryKind::Neumann,
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BoundaryPair {
    pub left: BoundaryCondition,
    pub right: BoundaryCondition,
}

impl BoundaryPair {
    pub fn new(left: BoundaryCondition, right: BoundaryCondition) -> Self {
        Self { left, right }
    }

    pub fn get(&self, side: Side) -> &BoundaryCondition {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

/// Boundary conditions keyed by the symbol they constrain, usually a state
/// variable. Later rules for the same symbol replace earlier ones.
#[derive(Clone, Debug, Default)]
pub struct BoundaryConditions {
    rules: Vec<(Symbol, BoundaryPair)>,
}

impl BoundaryConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symbol: &Symbol, pair: BoundaryPair) -> Result<()> {
        if !symbol.has_domain() || symbol.location() != Location::Nodes {
            return Err(Error::shape(
                "boundary condition",
                format!("`{symbol}` is not a cell-centred field"),
            ));
        }
        for bc in [&pair.left, &pair.right] {
            if bc.value.has_domain() {
                return Err(Error::shape(
                    "boundary condition",
                    format!("value `{}` for `{symbol}` is not a single number", bc.value),
                ));
            }
        }
        self.rules.push((symbol.clone(), pair));
        Ok(())
    }

    pub fn find_for(&self, symbol: &Symbol) -> Option<&BoundaryPair> {
        self.rules
            .iter()
            .rev()
            .find(|(key, _)| key == symbol)
            .map(|(_, pair)| pair)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &BoundaryPair)> {
        self.rules.iter().map(|(key, pair)| (key, pair))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Applies `f` to every condition value, keeping keys and kinds.
    pub(crate) fn try_map_values(
        &self,
        mut f: impl FnMut(&Symbol) -> Result<Symbol>,
    ) -> Result<Self> {
        let mut rules = Vec::with_capacity(self.rules.len());
        for (key, pair) in &self.rules {
            let left = BoundaryCondition {
                kind: pair.left.kind,
                value: f(&pair.left.value)?,
            };
            let right = BoundaryCondition {
                kind: pair.right.kind,
                value: f(&pair.right.value)?,
            };
            rules.push((key.clone(), BoundaryPair { left, right }));
        }
        Ok(Self { rules })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_bc_by_symbol() {
        let u = Symbol::variable("u", &["rod"]);
        let mut bcs = BoundaryConditions::new();
        bcs.add(
            &u,
            BoundaryPair::new(BoundaryCondition::dirichlet(0.0), BoundaryCondition::neumann(1.0)),
        )
        .unwrap();
        bcs.add(
            &u,
            BoundaryPair::new(BoundaryCondition::dirichlet(2.0), BoundaryCondition::neumann(1.0)),
        )
        .unwrap();

        // a structurally equal symbol built elsewhere finds the same rule
        let pair = bcs.find_for(&Symbol::variable("u", &["rod"])).expect("rule not found");
        assert_eq!(pair.get(Side::Left).value, Symbol::scalar(2.0));
        assert_eq!(pair.get(Side::Right).kind, BoundaryKind::Neumann);
        assert!(bcs.find_for(&Symbol::variable("v", &["rod"])).is_none());
    }

    #[test]
    fn values_must_be_single_numbers() {
        let u = Symbol::variable("u", &["rod"]);
        let mut bcs = BoundaryConditions::new();
        let err = bcs.add(
            &u,
            BoundaryPair::new(
                BoundaryCondition::dirichlet(u.clone()),
                BoundaryCondition::neumann(0.0),
            ),
        );
        assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    }
}
