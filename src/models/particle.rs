use std::f64::consts::PI;

use crate::discretization::generator::Geometry;
use crate::discretization::mesh::Mesh;
use crate::error::Result;
use crate::expression::{ParameterValue, Side, Symbol};
use crate::physics::bc::{BoundaryCondition, BoundaryPair};
use crate::physics::{Event, EventDirection, Model};

pub const PARTICLE: &str = "particle";

pub fn geometry(radius: f64) -> Geometry {
    Geometry::new().spherical_region(PARTICLE, 0.0, radius)
}

pub fn mesh(radius: f64, npts: usize) -> Result<Mesh> {
    Mesh::build(&geometry(radius), &[(PARTICLE, npts)])
}

/// Open-circuit potential of the host material, `U0 + k ln(c / (1 - c))`.
fn open_circuit_potential(c: &Symbol) -> Result<Symbol> {
    let empty = Symbol::scalar(1.0).sub(c)?;
    Symbol::parameter("U0").add(&Symbol::parameter("k_T").mul(&c.div(&empty)?.ln())?)
}

/// Single spherical particle discharged at constant current `I`.
///
/// Concentration obeys `dc/dt = div(D grad c)` with a sealed centre and a
/// surface flux `D dc/dr = -j`, where `j = I R / 3` drains the mean
/// concentration at rate `I`. The terminal voltage `V` is an algebraic
/// state tied to the surface concentration. Discharge stops once the
/// surface concentration falls to `c_min`.
pub fn model(radius: f64) -> Result<Model> {
    let c = Symbol::variable("c", &[PARTICLE]);
    let v = Symbol::variable("V", &[]);
    let d = Symbol::parameter("D");
    let j = Symbol::parameter("j");

    let c_surf = c.boundary_value(Side::Right)?;
    let voltage = open_circuit_potential(&c_surf)?
        .sub(&Symbol::parameter("R_int").mul(&Symbol::parameter("I"))?)?;

    let mut model = Model::new("single particle");
    model.add_rhs(&c, d.mul(&c.gradient()?)?.divergence()?)?;
    model.add_algebraic(&v, v.sub(&voltage)?)?;
    model.set_boundary_conditions(
        &c,
        BoundaryPair::new(
            BoundaryCondition::neumann(0.0),
            BoundaryCondition::neumann(j.neg().div(&d)?),
        ),
    )?;
    model.set_initial_condition(&c, Symbol::parameter("c0"));
    // consistent by construction: the voltage starts from the initial surface state
    model.set_initial_condition(&v, voltage.clone());

    model.set_parameter("D", 1.0);
    model.set_parameter("I", 1.0);
    model.set_parameter("R", radius);
    model.set_parameter(
        "j",
        ParameterValue::Expression(
            Symbol::parameter("I")
                .mul(&Symbol::parameter("R"))?
                .div(&Symbol::scalar(3.0))?,
        ),
    );
    model.set_parameter("c0", 0.9);
    model.set_parameter("c_min", 0.1);
    model.set_parameter("U0", 3.7);
    model.set_parameter("k_T", 0.025);
    model.set_parameter("R_int", 0.01);

    model.add_variable("c_surf", c_surf.clone());
    let volume = Symbol::scalar(4.0 * PI / 3.0)
        .mul(&Symbol::parameter("R").pow(&Symbol::scalar(3.0))?)?;
    model.add_variable("c_avg", c.integral()?.div(&volume)?);
    model.add_event(
        Event::terminal(
            "minimum surface concentration",
            c_surf.sub(&Symbol::parameter("c_min"))?,
        )
        .with_direction(EventDirection::Falling),
    );
    Ok(model)
}
