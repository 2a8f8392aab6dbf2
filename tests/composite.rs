use approx::{assert_abs_diff_eq, assert_relative_eq};

use symfv_rs::discretization::DiscretisationOptions;
use symfv_rs::models::electrolyte::{self, CellLengths, CELL, NEGATIVE, POSITIVE, SEPARATOR};
use symfv_rs::numerics::transient::linspace;
use symfv_rs::{
    BoundaryCondition, BoundaryPair, Discretisation, Error, Geometry, Mesh, Model,
    ParameterValues, Symbol, TransientSolver,
};

#[test]
fn steady_line_crosses_uneven_regions() {
    // cells of different widths in each region; a straight line is still exact
    let lengths = CellLengths::default();
    let mesh = electrolyte::mesh(&lengths, [3, 5, 2]).unwrap();
    let c = Symbol::variable("c", &CELL);
    let mut model = Model::new("line");
    model.add_algebraic(&c, c.laplacian().unwrap()).unwrap();
    model.set_initial_condition(&c, 0.0);
    model
        .set_boundary_conditions(
            &c,
            BoundaryPair::new(
                BoundaryCondition::dirichlet(0.0),
                BoundaryCondition::dirichlet(1.0),
            ),
        )
        .unwrap();
    let system = Discretisation::new(mesh)
        .with_options(DiscretisationOptions {
            consistent_initial_conditions: true,
            ..DiscretisationOptions::default()
        })
        .process_model(&model, &ParameterValues::new())
        .unwrap();
    let slice = system.slice("c").unwrap();
    assert_eq!(slice.range.len(), 10);
    for (value, x) in system.y0().iter().zip(slice.nodes.iter()) {
        assert_relative_eq!(*value, x / lengths.total(), max_relative = 1e-9);
    }
}

#[test]
fn electrolyte_conserves_and_mirrors() {
    let lengths = CellLengths::default();
    let system = Discretisation::new(electrolyte::mesh(&lengths, [4, 2, 4]).unwrap())
        .process_model(&electrolyte::model(&lengths).unwrap(), &ParameterValues::new())
        .unwrap();
    let solution = TransientSolver::default()
        .solve(&system, &linspace(0.0, 0.5, 5))
        .unwrap();

    let avg = solution.variable(&system, "c_e_avg").unwrap();
    for j in 0..avg.times.len() {
        assert_abs_diff_eq!(avg.at(j)[0], 1.0, epsilon = 1e-9);
    }

    let c = solution.variable(&system, "c_e").unwrap().last().unwrap();
    assert!(c[0] > 1.0 && c[9] < 1.0);
    // antisymmetric sources on a symmetric cell
    for i in 0..5 {
        assert_abs_diff_eq!(c[i] + c[9 - i], 2.0, epsilon = 1e-8);
    }
    // no jumps where the regions meet
    for w in c.as_slice().windows(2) {
        assert!(w[0] >= w[1]);
    }

    let max = solution.variable(&system, "c_e_max").unwrap().last().unwrap()[0];
    assert_relative_eq!(max, c[0]);
}

#[test]
fn regions_must_touch_to_be_combined() {
    let geometry = Geometry::new()
        .region(NEGATIVE, 0.0, 0.4)
        .region(POSITIVE, 0.6, 1.0);
    let mesh = Mesh::build(&geometry, &[(NEGATIVE, 3), (POSITIVE, 3)]).unwrap();
    let c = Symbol::variable("c", &[NEGATIVE, POSITIVE]);
    let mut model = Model::new("gap");
    model.add_rhs(&c, Symbol::scalar(0.0)).unwrap();
    model.set_initial_condition(&c, 1.0);
    let err = Discretisation::new(mesh)
        .process_model(&model, &ParameterValues::new())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidGeometry(_)));
}

#[test]
fn separator_only_variable_sits_on_its_own_cells() {
    let lengths = CellLengths::default();
    let mesh = electrolyte::mesh(&lengths, [2, 3, 2]).unwrap();
    let phi = Symbol::variable("phi", &[SEPARATOR]);
    let mut model = Model::new("separator");
    model.add_rhs(&phi, Symbol::scalar(-1.0)).unwrap();
    let x = Symbol::spatial_variable("x", &[SEPARATOR]).unwrap();
    model.set_initial_condition(&phi, x);
    let system = Discretisation::new(mesh)
        .process_model(&model, &ParameterValues::new())
        .unwrap();
    let slice = system.slice("phi").unwrap();
    assert_eq!(slice.range, 0..3);
    assert!(slice.nodes.iter().all(|&x| x > 0.4 && x < 0.6));
    assert_eq!(system.y0(), &slice.nodes);
}
