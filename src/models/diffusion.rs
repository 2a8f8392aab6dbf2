use crate::discretization::generator::Geometry;
use crate::discretization::mesh::Mesh;
use crate::error::Result;
use crate::expression::{Side, Symbol};
use crate::physics::bc::{BoundaryCondition, BoundaryPair};
use crate::physics::Model;

pub const ROD: &str = "rod";

/// `du/dt = div(D grad u)` on `[0, length]`.
#[derive(Clone, Debug)]
pub struct DiffusionOptions {
    pub length: f64,
    pub diffusivity: f64,
    pub left: BoundaryCondition,
    pub right: BoundaryCondition,
    /// Initial profile; may use the spatial variable `x` on [`ROD`].
    pub initial: Symbol,
}

impl Default for DiffusionOptions {
    fn default() -> Self {
        Self {
            length: 1.0,
            diffusivity: 1.0,
            left: BoundaryCondition::neumann(0.0),
            right: BoundaryCondition::neumann(0.0),
            initial: Symbol::scalar(1.0),
        }
    }
}

pub fn geometry(length: f64) -> Geometry {
    Geometry::new().region(ROD, 0.0, length)
}

pub fn mesh(length: f64, npts: usize) -> Result<Mesh> {
    Mesh::build(&geometry(length), &[(ROD, npts)])
}

/// Builds the model. Reports `u`, its mean `u_avg` and the boundary values
/// `u_left` and `u_right`.
pub fn model(options: &DiffusionOptions) -> Result<Model> {
    let u = Symbol::variable("u", &[ROD]);
    let d = Symbol::parameter("D");
    let flux = d.mul(&u.gradient()?)?;

    let mut model = Model::new("diffusion");
    model.add_rhs(&u, flux.divergence()?)?;
    model.set_initial_condition(&u, options.initial.clone());
    model.set_boundary_conditions(
        &u,
        BoundaryPair::new(options.left.clone(), options.right.clone()),
    )?;
    model.set_parameter("D", options.diffusivity);

    model.add_variable("u_avg", u.integral()?.div(&Symbol::scalar(options.length))?);
    model.add_variable("u_left", u.boundary_value(Side::Left)?);
    model.add_variable("u_right", u.boundary_value(Side::Right)?);
    Ok(model)
}
