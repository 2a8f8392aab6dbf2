use approx::{assert_abs_diff_eq, assert_relative_eq};

use symfv_rs::discretization::DiscretisationOptions;
use symfv_rs::models::diffusion::{self, DiffusionOptions, ROD};
use symfv_rs::numerics::transient::linspace;
use symfv_rs::{
    BoundaryCondition, BoundaryPair, Discretisation, Mesh, Model, ParameterValues, Symbol,
    TransientSolver,
};

fn rod(npts: usize) -> Mesh {
    diffusion::mesh(1.0, npts).unwrap()
}

/// Steady problems are posed as purely algebraic models and solved during
/// consistent initialisation.
fn steady(residual: impl FnOnce(&Symbol) -> Symbol, left: f64, right: f64, npts: usize) -> Vec<f64> {
    let u = Symbol::variable("u", &[ROD]);
    let mut model = Model::new("steady");
    model.add_algebraic(&u, residual(&u)).unwrap();
    model.set_initial_condition(&u, 0.0);
    model
        .set_boundary_conditions(
            &u,
            BoundaryPair::new(
                BoundaryCondition::dirichlet(left),
                BoundaryCondition::dirichlet(right),
            ),
        )
        .unwrap();
    let disc = Discretisation::new(rod(npts)).with_options(DiscretisationOptions {
        consistent_initial_conditions: true,
        ..DiscretisationOptions::default()
    });
    let system = disc.process_model(&model, &ParameterValues::new()).unwrap();
    system.y0().iter().copied().collect()
}

#[test]
fn steady_linear_diffusion() {
    // -k u'' = 0, u(0) = 0, u(1) = 100
    let npts = 20;
    let u = steady(|u| u.laplacian().unwrap(), 0.0, 100.0, npts);
    let mesh = rod(npts);
    let (_, sub) = mesh.regions().next().unwrap();
    for (value, x) in u.iter().zip(&sub.nodes) {
        assert_relative_eq!(*value, 100.0 * x, max_relative = 1e-9);
    }
}

#[test]
fn poisson_with_source() {
    // -u'' = 1, u(0) = u(1) = 0, exact u = x (1 - x) / 2
    let npts = 50;
    let u = steady(
        |u| u.laplacian().unwrap().add(&Symbol::scalar(1.0)).unwrap(),
        0.0,
        0.0,
        npts,
    );
    let mesh = rod(npts);
    let (_, sub) = mesh.regions().next().unwrap();
    let max_err = u
        .iter()
        .zip(&sub.nodes)
        .map(|(v, x)| (v - 0.5 * x * (1.0 - x)).abs())
        .fold(0.0, f64::max);
    println!("max error: {max_err:.3e}");
    assert!(max_err < 1e-3);
}

#[test]
fn sealed_rod_keeps_a_uniform_profile() {
    let model = diffusion::model(&DiffusionOptions::default()).unwrap();
    let system = Discretisation::new(rod(10))
        .process_model(&model, &ParameterValues::new())
        .unwrap();
    let solution = TransientSolver::default()
        .solve(&system, &linspace(0.0, 1.0, 10))
        .unwrap();
    let u = solution.variable(&system, "u").unwrap();
    for value in u.values.iter() {
        assert_abs_diff_eq!(*value, 1.0, epsilon = 1e-10);
    }
}

#[test]
fn dirichlet_rod_relaxes_to_a_line() {
    let options = DiffusionOptions {
        left: BoundaryCondition::dirichlet(0.0),
        right: BoundaryCondition::dirichlet(1.0),
        initial: Symbol::scalar(0.0),
        ..DiffusionOptions::default()
    };
    let model = diffusion::model(&options).unwrap();
    let system = Discretisation::new(rod(10))
        .process_model(&model, &ParameterValues::new())
        .unwrap();
    let solution = TransientSolver::default()
        .solve(&system, &linspace(0.0, 2.0, 4))
        .unwrap();
    let u = solution.variable(&system, "u").unwrap();
    let last = u.last().unwrap();
    for (value, x) in last.iter().zip(u.nodes.iter()) {
        assert_abs_diff_eq!(*value, *x, epsilon = 1e-4);
    }
    println!("{}", solution.stats);
}

#[test]
fn sealed_rod_conserves_its_contents() {
    let x = Symbol::spatial_variable("x", &[ROD]).unwrap();
    let options = DiffusionOptions {
        initial: x.mul(&x).unwrap(),
        ..DiffusionOptions::default()
    };
    let model = diffusion::model(&options).unwrap();
    let system = Discretisation::new(rod(16))
        .process_model(&model, &ParameterValues::new())
        .unwrap();
    let solution = TransientSolver::default()
        .solve(&system, &linspace(0.0, 0.5, 5))
        .unwrap();
    let avg = solution.variable(&system, "u_avg").unwrap();
    let initial = avg.at(0)[0];
    for j in 0..avg.times.len() {
        assert_relative_eq!(avg.at(j)[0], initial, max_relative = 1e-9);
    }
    // and flattens towards the mean
    let u = solution.variable(&system, "u").unwrap().last().unwrap();
    assert!(u.max() - u.min() < 1e-2);
}
