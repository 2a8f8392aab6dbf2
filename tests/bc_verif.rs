use approx::{assert_abs_diff_eq, assert_relative_eq};

use symfv_rs::discretization::DiscretisationOptions;
use symfv_rs::models::diffusion::{self, DiffusionOptions, ROD};
use symfv_rs::models::particle;
use symfv_rs::numerics::transient::linspace;
use symfv_rs::{
    BoundaryCondition, BoundaryPair, Discretisation, Error, Model, ParameterValues, Side, Symbol,
    TransientSolver,
};

fn steady_model(left: BoundaryCondition, right: BoundaryCondition) -> Model {
    let u = Symbol::variable("u", &[ROD]);
    let mut model = Model::new("steady");
    model.add_algebraic(&u, u.laplacian().unwrap()).unwrap();
    model.set_initial_condition(&u, 5.0);
    model
        .set_boundary_conditions(&u, BoundaryPair::new(left, right))
        .unwrap();
    model.add_variable("u_left", u.boundary_value(Side::Left).unwrap());
    model.add_variable("u_right", u.boundary_value(Side::Right).unwrap());
    model
}

fn solve_steady(model: &Model, npts: usize) -> symfv_rs::DiscretisedSystem {
    Discretisation::new(diffusion::mesh(1.0, npts).unwrap())
        .with_options(DiscretisationOptions {
            consistent_initial_conditions: true,
            ..DiscretisationOptions::default()
        })
        .process_model(model, &ParameterValues::new())
        .unwrap()
}

fn scalar_output(system: &symfv_rs::DiscretisedSystem, name: &str) -> f64 {
    let (expression, _) = system.lookup(name).unwrap();
    system
        .evaluate(&expression, 0.0, system.y0())
        .unwrap()
        .scalar()
        .unwrap()
}

#[test]
fn verify_neumann() {
    // -u'' = 0, u(0) = 1, u'(1) = 2, exact u = 1 + 2x
    let model = steady_model(
        BoundaryCondition::dirichlet(1.0),
        BoundaryCondition::neumann(2.0),
    );
    let system = solve_steady(&model, 25);
    let slice = system.slice("u").unwrap();
    let mut max_err: f64 = 0.0;
    for (value, x) in system.y0().iter().zip(slice.nodes.iter()) {
        max_err = max_err.max((value - (1.0 + 2.0 * x)).abs());
    }
    println!("Max Absolute Error: {max_err:.2e}");
    assert!(max_err < 1e-8);

    assert_relative_eq!(scalar_output(&system, "u_left"), 1.0);
    assert_relative_eq!(scalar_output(&system, "u_right"), 3.0, max_relative = 1e-9);
}

#[test]
fn verify_left_neumann() {
    // -u'' = 0, u'(0) = -1, u(1) = 0, exact u = 1 - x
    let model = steady_model(
        BoundaryCondition::neumann(-1.0),
        BoundaryCondition::dirichlet(0.0),
    );
    let system = solve_steady(&model, 8);
    assert_relative_eq!(scalar_output(&system, "u_left"), 1.0, max_relative = 1e-9);
    assert_abs_diff_eq!(scalar_output(&system, "u_right"), 0.0);
}

#[test]
fn time_dependent_dirichlet_values_are_reported_exactly() {
    let options = DiffusionOptions {
        left: BoundaryCondition::dirichlet(Symbol::time()),
        right: BoundaryCondition::dirichlet(0.0),
        initial: Symbol::scalar(0.0),
        ..DiffusionOptions::default()
    };
    let model = diffusion::model(&options).unwrap();
    let system = Discretisation::new(diffusion::mesh(1.0, 10).unwrap())
        .process_model(&model, &ParameterValues::new())
        .unwrap();
    let times = linspace(0.0, 0.5, 5);
    let solution = TransientSolver::default().solve(&system, &times).unwrap();
    let left = solution.variable(&system, "u_left").unwrap();
    for (j, t) in times.iter().enumerate() {
        assert_relative_eq!(left.at(j)[0], *t);
    }
    // heat enters from the left
    let u = solution.variable(&system, "u").unwrap().last().unwrap();
    assert!(u[0] > u[9]);
}

#[test]
fn missing_boundary_conditions_are_reported() {
    let u = Symbol::variable("u", &[ROD]);
    let mut model = Model::new("open");
    model.add_rhs(&u, u.laplacian().unwrap()).unwrap();
    model.set_initial_condition(&u, 0.0);
    let err = Discretisation::new(diffusion::mesh(1.0, 4).unwrap())
        .process_model(&model, &ParameterValues::new())
        .unwrap_err();
    assert!(matches!(err, Error::BoundaryConditionMissing { .. }));
    assert!(err.to_string().contains('u'));
}

#[test]
fn spherical_surface_flux_drains_the_mean() {
    // mean concentration falls at exactly the applied current
    let system = Discretisation::new(particle::mesh(1.0, 20).unwrap())
        .process_model(&particle::model(1.0).unwrap(), &ParameterValues::new())
        .unwrap();
    let times = linspace(0.0, 0.2, 4);
    let solution = TransientSolver::default().solve(&system, &times).unwrap();
    let avg = solution.variable(&system, "c_avg").unwrap();
    for (j, t) in avg.times.iter().enumerate() {
        assert_abs_diff_eq!(avg.at(j)[0], 0.9 - t, epsilon = 1e-8);
    }
}
