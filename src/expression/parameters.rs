use std::collections::{BTreeMap, HashMap};

use super::{Bindings, Symbol};
use crate::error::{Error, Result};

/// Concrete parameter values, ready to bind.
pub type ParameterSet = HashMap<String, f64>;

#[derive(Clone, Debug)]
pub enum ParameterValue {
    Value(f64),
    /// Derived from other parameters, e.g. `D_eff = D * eps^1.5`.
    Expression(Symbol),
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Value(value)
    }
}

impl From<Symbol> for ParameterValue {
    fn from(symbol: Symbol) -> Self {
        ParameterValue::Expression(symbol)
    }
}

/// Named parameter values, literal or derived.
#[derive(Clone, Debug, Default)]
pub struct ParameterValues {
    values: BTreeMap<String, ParameterValue>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
    ) -> Option<ParameterValue> {
        self.values.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    /// Overrides entries with those of `other`.
    pub fn update(&mut self, other: &ParameterValues) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolves every parameter to a number, following derived parameters
    /// depth first. Undefined references and dependency cycles are errors.
    pub fn resolve(&self) -> Result<ParameterSet> {
        let mut resolved = ParameterSet::new();
        let mut path = Vec::new();
        for name in self.values.keys() {
            self.resolve_one(name, &mut resolved, &mut path)?;
        }
        Ok(resolved)
    }

    fn resolve_one(
        &self,
        name: &str,
        resolved: &mut ParameterSet,
        path: &mut Vec<String>,
    ) -> Result<f64> {
        if let Some(&value) = resolved.get(name) {
            return Ok(value);
        }
        if path.iter().any(|visiting| visiting == name) {
            let mut cycle = path.clone();
            cycle.push(name.to_string());
            return Err(Error::ParameterResolution {
                name: name.to_string(),
                reason: format!("cyclic dependency {}", cycle.join(" -> ")),
            });
        }
        let Some(entry) = self.values.get(name) else {
            let reason = match path.last() {
                Some(parent) => format!("referenced by `{parent}` but never defined"),
                None => "never defined".to_string(),
            };
            return Err(Error::ParameterResolution {
                name: name.to_string(),
                reason,
            });
        };

        let value = match entry {
            ParameterValue::Value(value) => *value,
            ParameterValue::Expression(expression) => {
                path.push(name.to_string());
                for dependency in expression.parameter_names() {
                    self.resolve_one(&dependency, resolved, path)?;
                }
                path.pop();
                let bindings = Bindings::<f64>::new().with_parameters(resolved);
                let evaluated = expression
                    .evaluate(&bindings)
                    .map_err(|e| Error::ParameterResolution {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?;
                evaluated.scalar().ok_or_else(|| Error::ParameterResolution {
                    name: name.to_string(),
                    reason: "does not evaluate to a single number".to_string(),
                })?
            }
        };
        resolved.insert(name.to_string(), value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn derived_parameters_resolve_in_dependency_order() {
        let d = Symbol::parameter("D");
        let eps = Symbol::parameter("eps");
        let d_eff = d.mul(&eps.pow(&Symbol::scalar(1.5)).unwrap()).unwrap();
        let params = ParameterValues::new()
            .with("a_effective", d_eff)
            .with("D", 2.0)
            .with("eps", 0.25);
        let resolved = params.resolve().unwrap();
        assert_relative_eq!(resolved["a_effective"], 2.0 * 0.25f64.powf(1.5), epsilon = 1e-14);
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let params = ParameterValues::new()
            .with("a", Symbol::parameter("b"))
            .with("b", Symbol::parameter("a").mul(&Symbol::scalar(2.0)).unwrap());
        match params.resolve() {
            Err(Error::ParameterResolution { name, reason }) => {
                assert_eq!(name, "a");
                assert!(reason.contains("a -> b -> a"), "{reason}");
            }
            other => panic!("expected a resolution error, got {other:?}"),
        }
    }

    #[test]
    fn undefined_references_name_the_parent() {
        let params = ParameterValues::new().with("k", Symbol::parameter("missing"));
        match params.resolve() {
            Err(Error::ParameterResolution { name, reason }) => {
                assert_eq!(name, "missing");
                assert!(reason.contains("`k`"));
            }
            other => panic!("expected a resolution error, got {other:?}"),
        }
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut defaults = ParameterValues::new().with("D", 1.0).with("L", 2.0);
        defaults.update(&ParameterValues::new().with("D", 5.0));
        let resolved = defaults.resolve().unwrap();
        assert_eq!(resolved["D"], 5.0);
        assert_eq!(resolved["L"], 2.0);
    }
}
