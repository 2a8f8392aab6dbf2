use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use tracing::trace;

use super::{LinearOperator, OperatorCache, OperatorKey, SpatialMethod};
use crate::discretization::mesh::{CoordinateSystem, Mesh, SubMesh};
use crate::error::{Error, Result};
use crate::expression::{Domain, Location, Side, Symbol};
use crate::physics::bc::{BoundaryKind, BoundaryPair};

/// Cell-centred finite volumes on 1D meshes. Unknowns sit at cell centres,
/// fluxes on cell edges. A composite domain is treated as one mesh, so the
/// field and its flux are continuous across internal region boundaries.
pub struct FiniteVolume {
    mesh: Mesh,
    cache: OperatorCache,
}

impl FiniteVolume {
    pub fn new(mesh: Mesh) -> Self {
        Self {
            mesh,
            cache: OperatorCache::new(),
        }
    }

    pub fn cache(&self) -> &OperatorCache {
        &self.cache
    }

    fn submesh(&self, domain: &Domain) -> Result<SubMesh> {
        self.mesh.combine(domain)
    }
}

impl SpatialMethod for FiniteVolume {
    fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    fn nodes(&self, domain: &Domain) -> Result<DVector<f64>> {
        Ok(DVector::from_vec(self.submesh(domain)?.nodes))
    }

    fn spatial_variable(&self, symbol: &Symbol) -> Result<Symbol> {
        let nodes = self.nodes(symbol.domain())?;
        Ok(Symbol::vector(nodes, symbol.domain().clone(), Location::Nodes))
    }

    fn broadcast(&self, discretised: &Symbol, domain: &Domain) -> Result<Symbol> {
        if discretised.has_domain() {
            return Err(Error::DomainMismatch {
                operator: "broadcast".into(),
                left: discretised.domain().clone(),
                right: domain.clone(),
            });
        }
        let n = self.points(domain)?;
        Symbol::vector(DVector::from_element(n, 1.0), domain.clone(), Location::Nodes)
            .mul(discretised)
    }

    /// `grad(u)` on the `npts + 1` edges. Internal edges take the centred
    /// difference of the neighbouring cells. At a Dirichlet boundary the
    /// difference is taken against the boundary value over half a cell; at a
    /// Neumann boundary the flux is the prescribed gradient itself.
    fn gradient(
        &self,
        symbol: &Symbol,
        discretised: &Symbol,
        bcs: Option<&BoundaryPair>,
    ) -> Result<Symbol> {
        let Some(pair) = bcs else {
            return Err(Error::BoundaryConditionMissing {
                symbol: symbol.to_string(),
                side: Side::Left,
                equation: None,
            });
        };
        let domain = symbol.domain().clone();
        let key = OperatorKey::Gradient {
            domain: domain.clone(),
            left: pair.left.kind,
            right: pair.right.kind,
        };
        let op = self.cache.get_or_build(key, || {
            let sub = self.submesh(&domain)?;
            trace!(?domain, npts = sub.npts(), "assembling gradient");
            Ok(gradient_operator(&sub, pair.left.kind, pair.right.kind))
        })?;

        let edges = op.matrix.nrows();
        let mut result =
            Symbol::matrix(op.matrix.clone(), domain.clone(), Location::Edges).matmul(discretised)?;
        for (side, row) in [(Side::Left, 0), (Side::Right, edges - 1)] {
            let mut selector = DVector::zeros(edges);
            selector[row] = op.weight(side);
            let boundary = Symbol::vector(selector, domain.clone(), Location::Edges)
                .mul(&pair.get(side).value)?;
            result = result.add(&boundary)?;
        }
        Ok(result)
    }

    fn divergence(&self, symbol: &Symbol, discretised: &Symbol) -> Result<Symbol> {
        let domain = symbol.domain().clone();
        let op = self
            .cache
            .get_or_build(OperatorKey::Divergence(domain.clone()), || {
                Ok(divergence_operator(&self.submesh(&domain)?))
            })?;
        Symbol::matrix(op.matrix.clone(), domain, Location::Nodes).matmul(discretised)
    }

    fn node_to_edge(&self, symbol: &Symbol, discretised: &Symbol) -> Result<Symbol> {
        let domain = symbol.domain().clone();
        let op = self
            .cache
            .get_or_build(OperatorKey::NodeToEdge(domain.clone()), || {
                Ok(node_to_edge_operator(&self.submesh(&domain)?))
            })?;
        Symbol::matrix(op.matrix.clone(), domain, Location::Edges).matmul(discretised)
    }

    fn integral(&self, symbol: &Symbol, discretised: &Symbol) -> Result<Symbol> {
        let domain = symbol.domain().clone();
        let op = self
            .cache
            .get_or_build(OperatorKey::Integral(domain.clone()), || {
                let volumes = self.submesh(&domain)?.volumes();
                let mut coo = CooMatrix::new(1, volumes.len());
                for (j, v) in volumes.into_iter().enumerate() {
                    coo.push(0, j, v);
                }
                Ok(LinearOperator::new(CsrMatrix::from(&coo)))
            })?;
        Symbol::matrix(op.matrix.clone(), Vec::new(), Location::Nodes).matmul(discretised)
    }

    fn boundary_value(
        &self,
        symbol: &Symbol,
        discretised: &Symbol,
        side: Side,
        bcs: Option<&BoundaryPair>,
    ) -> Result<Symbol> {
        let bc = bcs.map(|pair| pair.get(side));
        if let Some(bc) = bc {
            if bc.kind == BoundaryKind::Dirichlet {
                return Ok(bc.value.clone());
            }
        }
        let domain = symbol.domain().clone();
        let kind = bc.map(|bc| bc.kind);
        let key = OperatorKey::BoundaryValue {
            domain: domain.clone(),
            side,
            kind,
        };
        let op = self.cache.get_or_build(key, || {
            Ok(boundary_value_operator(&self.submesh(&domain)?, side, kind))
        })?;
        let value = Symbol::matrix(op.matrix.clone(), Vec::new(), Location::Nodes).matmul(discretised)?;
        match bc {
            Some(bc) => value.add(&Symbol::scalar(op.weight(side)).mul(&bc.value)?),
            None => Ok(value),
        }
    }

    fn mass_matrix(&self, domain: &Domain) -> Result<CsrMatrix<f64>> {
        Ok(CsrMatrix::identity(self.points(domain)?))
    }
}

fn gradient_operator(sub: &SubMesh, left: BoundaryKind, right: BoundaryKind) -> LinearOperator {
    let n = sub.npts();
    let mut coo = CooMatrix::new(n + 1, n);
    for i in 1..n {
        let h = sub.d_nodes[i - 1];
        coo.push(i, i - 1, -1.0 / h);
        coo.push(i, i, 1.0 / h);
    }
    let left_weight = match left {
        BoundaryKind::Dirichlet => {
            let h = 0.5 * sub.d_edges[0];
            coo.push(0, 0, 1.0 / h);
            -1.0 / h
        }
        BoundaryKind::Neumann => 1.0,
    };
    let right_weight = match right {
        BoundaryKind::Dirichlet => {
            let h = 0.5 * sub.d_edges[n - 1];
            coo.push(n, n - 1, -1.0 / h);
            1.0 / h
        }
        BoundaryKind::Neumann => 1.0,
    };
    LinearOperator::new(CsrMatrix::from(&coo)).with_weights(left_weight, right_weight)
}

/// Net outflow per unit volume. In spherical coordinates each face flux is
/// weighted by its area, which keeps the scheme conservative down to r = 0.
fn divergence_operator(sub: &SubMesh) -> LinearOperator {
    let n = sub.npts();
    let mut coo = CooMatrix::new(n, n + 1);
    for i in 0..n {
        let (a, b) = (sub.edges[i], sub.edges[i + 1]);
        let (inner, outer) = match sub.coordinates {
            CoordinateSystem::Cartesian => {
                let w = b - a;
                (-1.0 / w, 1.0 / w)
            }
            CoordinateSystem::Spherical => {
                let v = (b.powi(3) - a.powi(3)) / 3.0;
                (-a * a / v, b * b / v)
            }
        };
        coo.push(i, i, inner);
        coo.push(i, i + 1, outer);
    }
    LinearOperator::new(CsrMatrix::from(&coo))
}

fn node_to_edge_operator(sub: &SubMesh) -> LinearOperator {
    let n = sub.npts();
    let mut coo = CooMatrix::new(n + 1, n);
    coo.push(0, 0, 1.0);
    for i in 1..n {
        let theta = (sub.edges[i] - sub.nodes[i - 1]) / sub.d_nodes[i - 1];
        coo.push(i, i - 1, 1.0 - theta);
        coo.push(i, i, theta);
    }
    coo.push(n, n - 1, 1.0);
    LinearOperator::new(CsrMatrix::from(&coo))
}

/// Row that recovers the boundary value from cell values. With a Neumann
/// condition the boundary cell is shifted by half a cell of the prescribed
/// gradient; without any condition the two outermost cells are extrapolated
/// linearly.
fn boundary_value_operator(sub: &SubMesh, side: Side, kind: Option<BoundaryKind>) -> LinearOperator {
    let n = sub.npts();
    let mut coo = CooMatrix::new(1, n);
    let (cell, inner) = match side {
        Side::Left => (0, 1),
        Side::Right => (n - 1, n.saturating_sub(2)),
    };
    let mut weights = [0.0; 2];
    match kind {
        Some(BoundaryKind::Neumann) => {
            coo.push(0, cell, 1.0);
            let half = 0.5 * sub.d_edges[cell];
            match side {
                Side::Left => weights[0] = -half,
                Side::Right => weights[1] = half,
            }
        }
        _ if n == 1 => coo.push(0, 0, 1.0),
        _ => {
            let (boundary, gap) = match side {
                Side::Left => (sub.edges[0], sub.d_nodes[0]),
                Side::Right => (sub.edges[n], sub.d_nodes[n - 2]),
            };
            let ratio = (sub.nodes[cell] - boundary).abs() / gap;
            coo.push(0, cell, 1.0 + ratio);
            coo.push(0, inner, -ratio);
        }
    }
    LinearOperator::new(CsrMatrix::from(&coo)).with_weights(weights[0], weights[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::Geometry;
    use crate::expression::Bindings;
    use crate::physics::bc::BoundaryCondition;
    use approx::assert_relative_eq;

    fn rod(npts: usize) -> FiniteVolume {
        let geometry = Geometry::new().region("rod", 0.0, 1.0);
        FiniteVolume::new(Mesh::build(&geometry, &[("rod", npts)]).unwrap())
    }

    fn evaluate(symbol: &Symbol, y: &DVector<f64>) -> DVector<f64> {
        let bindings = Bindings::<f64>::new().with_state(y);
        symbol.evaluate(&bindings).unwrap().into_vector()
    }

    #[test]
    fn gradient_of_a_linear_field_is_exact() {
        let fv = rod(7);
        let u = Symbol::variable("u", &["rod"]);
        let dom = u.domain().clone();
        let y = fv.nodes(&dom).unwrap().map(|x| 3.0 * x - 1.0);
        let disc = Symbol::state_vector(0..7, dom);
        let bcs = BoundaryPair::new(
            BoundaryCondition::dirichlet(-1.0),
            BoundaryCondition::neumann(3.0),
        );
        let grad = fv.gradient(&u, &disc, Some(&bcs)).unwrap();
        let flux = evaluate(&grad, &y);
        assert_eq!(flux.len(), 8);
        for g in flux.iter() {
            assert_relative_eq!(*g, 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn gradient_without_conditions_is_an_error() {
        let fv = rod(3);
        let u = Symbol::variable("u", &["rod"]);
        let disc = Symbol::state_vector(0..3, u.domain().clone());
        assert!(matches!(
            fv.gradient(&u, &disc, None),
            Err(Error::BoundaryConditionMissing { .. })
        ));
    }

    #[test]
    fn zero_flux_diffusion_conserves_the_integral() {
        let fv = rod(9);
        let u = Symbol::variable("u", &["rod"]);
        let dom = u.domain().clone();
        let disc = Symbol::state_vector(0..9, dom.clone());
        let bcs = BoundaryPair::new(
            BoundaryCondition::neumann(0.0),
            BoundaryCondition::neumann(0.0),
        );
        let grad = fv.gradient(&u, &disc, Some(&bcs)).unwrap();
        let flux = u.gradient().unwrap();
        let div = fv.divergence(&flux, &grad).unwrap();
        let total = fv.integral(&u, &div).unwrap();
        let y = fv.nodes(&dom).unwrap().map(|x| (5.0 * x).sin() + x * x);
        assert_relative_eq!(evaluate(&total, &y)[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn spherical_divergence_of_a_radial_field() {
        let geometry = Geometry::new().spherical_region("particle", 0.0, 1.0);
        let fv = FiniteVolume::new(Mesh::build(&geometry, &[("particle", 5)]).unwrap());
        let c = Symbol::variable("c", &["particle"]);
        let flux = c.gradient().unwrap();
        let sub = fv.mesh().submesh("particle").unwrap();
        // F = r on the edges, div F = 3
        let edges = DVector::from_vec(sub.edges.clone());
        let disc = Symbol::vector(edges, c.domain().clone(), Location::Edges);
        let div = evaluate(&fv.divergence(&flux, &disc).unwrap(), &DVector::zeros(0));
        for d in div.iter() {
            assert_relative_eq!(*d, 3.0, epsilon = 1e-12);
        }
        let ones = Symbol::vector(DVector::from_element(5, 1.0), c.domain().clone(), Location::Nodes);
        let volume = evaluate(&fv.integral(&c, &ones).unwrap(), &DVector::zeros(0));
        assert_relative_eq!(volume[0], 4.0 * std::f64::consts::PI / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn boundary_values_for_each_kind_of_condition() {
        let fv = rod(4);
        let u = Symbol::variable("u", &["rod"]);
        let dom = u.domain().clone();
        let disc = Symbol::state_vector(0..4, dom.clone());
        let y = fv.nodes(&dom).unwrap().map(|x| 2.0 * x + 1.0);

        let neumann = BoundaryPair::new(
            BoundaryCondition::neumann(2.0),
            BoundaryCondition::neumann(2.0),
        );
        let left = fv.boundary_value(&u, &disc, Side::Left, Some(&neumann)).unwrap();
        let right = fv.boundary_value(&u, &disc, Side::Right, Some(&neumann)).unwrap();
        assert_relative_eq!(evaluate(&left, &y)[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(evaluate(&right, &y)[0], 3.0, epsilon = 1e-12);

        let extrapolated = fv.boundary_value(&u, &disc, Side::Right, None).unwrap();
        assert_relative_eq!(evaluate(&extrapolated, &y)[0], 3.0, epsilon = 1e-12);

        let dirichlet = BoundaryPair::new(
            BoundaryCondition::dirichlet(Symbol::parameter("u_left")),
            BoundaryCondition::neumann(0.0),
        );
        let exact = fv.boundary_value(&u, &disc, Side::Left, Some(&dirichlet)).unwrap();
        assert_eq!(exact, Symbol::parameter("u_left"));
    }

    #[test]
    fn node_to_edge_interpolates_linearly() {
        let fv = rod(5);
        let u = Symbol::variable("u", &["rod"]);
        let dom = u.domain().clone();
        let disc = Symbol::state_vector(0..5, dom.clone());
        let y = fv.nodes(&dom).unwrap().map(|x| 4.0 * x);
        let edges = evaluate(&fv.node_to_edge(&u, &disc).unwrap(), &y);
        assert_relative_eq!(edges[2], 4.0 * 0.4, epsilon = 1e-12);
        // boundary edges copy the outer cells
        assert_relative_eq!(edges[0], y[0]);
        assert_relative_eq!(edges[5], y[4]);
    }

    #[test]
    fn operators_are_assembled_once() {
        let fv = rod(6);
        let u = Symbol::variable("u", &["rod"]);
        let disc = Symbol::state_vector(0..6, u.domain().clone());
        let bcs = BoundaryPair::new(
            BoundaryCondition::dirichlet(0.0),
            BoundaryCondition::dirichlet(1.0),
        );
        let a = fv.gradient(&u, &disc, Some(&bcs)).unwrap();
        let b = fv.gradient(&u, &disc, Some(&bcs)).unwrap();
        assert_eq!(a, b);
        assert_eq!(fv.cache().len(), 1);
        let other = BoundaryPair::new(
            BoundaryCondition::neumann(0.0),
            BoundaryCondition::dirichlet(1.0),
        );
        fv.gradient(&u, &disc, Some(&other)).unwrap();
        assert_eq!(fv.cache().len(), 2);
    }
}
