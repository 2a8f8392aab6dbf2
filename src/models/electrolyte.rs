use crate::discretization::generator::Geometry;
use crate::discretization::mesh::Mesh;
use crate::error::Result;
use crate::expression::Symbol;
use crate::physics::bc::{BoundaryCondition, BoundaryPair};
use crate::physics::Model;

pub const NEGATIVE: &str = "negative electrode";
pub const SEPARATOR: &str = "separator";
pub const POSITIVE: &str = "positive electrode";

pub const CELL: [&str; 3] = [NEGATIVE, SEPARATOR, POSITIVE];

/// Region lengths, left to right.
#[derive(Clone, Copy, Debug)]
pub struct CellLengths {
    pub negative: f64,
    pub separator: f64,
    pub positive: f64,
}

impl Default for CellLengths {
    fn default() -> Self {
        Self {
            negative: 0.4,
            separator: 0.2,
            positive: 0.4,
        }
    }
}

impl CellLengths {
    pub fn total(&self) -> f64 {
        self.negative + self.separator + self.positive
    }
}

pub fn geometry(lengths: &CellLengths) -> Geometry {
    let a = lengths.negative;
    let b = a + lengths.separator;
    Geometry::new()
        .region(NEGATIVE, 0.0, a)
        .region(SEPARATOR, a, b)
        .region(POSITIVE, b, lengths.total())
}

pub fn mesh(lengths: &CellLengths, npts: [usize; 3]) -> Result<Mesh> {
    Mesh::build(
        &geometry(lengths),
        &[
            (NEGATIVE, npts[0]),
            (SEPARATOR, npts[1]),
            (POSITIVE, npts[2]),
        ],
    )
}

/// Electrolyte concentration across the cell sandwich:
///
/// `dc/dt = div(D_e grad c) + s`, with `s = a_n j` in the negative
/// electrode, zero in the separator and `-a_p j` in the positive electrode.
/// The outer ends are sealed. With `a_n L_n = a_p L_p` the total amount of
/// electrolyte is conserved.
pub fn model(lengths: &CellLengths) -> Result<Model> {
    let c = Symbol::variable("c_e", &CELL);
    let j = Symbol::parameter("j");
    let source = Symbol::concatenation(vec![
        Symbol::parameter("a_n").mul(&j)?.broadcast(&[NEGATIVE])?,
        Symbol::scalar(0.0).broadcast(&[SEPARATOR])?,
        Symbol::parameter("a_p").mul(&j)?.neg().broadcast(&[POSITIVE])?,
    ])?;
    let flux = Symbol::parameter("D_e").mul(&c.gradient()?)?;

    let mut model = Model::new("electrolyte diffusion");
    model.add_rhs(&c, flux.divergence()?.add(&source)?)?;
    model.set_initial_condition(&c, Symbol::parameter("c_e0"));
    model.set_boundary_conditions(
        &c,
        BoundaryPair::new(BoundaryCondition::neumann(0.0), BoundaryCondition::neumann(0.0)),
    )?;

    model.set_parameter("D_e", 1.0);
    model.set_parameter("j", 1.0);
    model.set_parameter("c_e0", 1.0);
    model.set_parameter("a_n", 1.0 / lengths.negative);
    model.set_parameter("a_p", 1.0 / lengths.positive);

    model.add_variable(
        "c_e_avg",
        c.integral()?.div(&Symbol::scalar(lengths.total()))?,
    );
    model.add_variable("c_e_max", c.max());
    model.add_variable("c_e_min", c.min());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::engine::Discretisation;
    use crate::expression::ParameterValues;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sources_switch_sign_between_electrodes() {
        let lengths = CellLengths::default();
        let system = Discretisation::new(mesh(&lengths, [4, 2, 4]).unwrap())
            .process_model(&model(&lengths).unwrap(), &ParameterValues::new())
            .unwrap();
        assert_eq!(system.len(), 10);
        // a uniform profile feels only the sources
        let f = system.evaluate_rhs(0.0, system.y0()).unwrap();
        for i in 0..4 {
            assert_abs_diff_eq!(f[i], 2.5, epsilon = 1e-12);
            assert_abs_diff_eq!(f[9 - i], -2.5, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(f[4], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f[5], 0.0, epsilon = 1e-12);
    }
}
