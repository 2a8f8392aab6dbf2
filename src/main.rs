use std::error::Error;
use std::fs;

use symfv_rs::expression::ParameterValues;
use symfv_rs::models::particle;
use symfv_rs::numerics::transient::linspace;
use symfv_rs::processing::csv_writer;
use symfv_rs::processing::SimulationSummary;
use symfv_rs::{Discretisation, DiscretisedSystem, Solution, TransientSolver};

const OUTPUT: &str = "output/main";

fn main() -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(OUTPUT)?;

    let radius = 1.0;
    let mesh = particle::mesh(radius, 40)?;
    let model = particle::model(radius)?;
    let currents = [0.5, 1.0, 2.0];

    let discretisation = Discretisation::new(mesh.clone());
    let system = discretisation.process_model(&model, &ParameterValues::new())?;
    let mut summary = SimulationSummary::from_system(&mesh, &system);

    let solver = TransientSolver::default();
    let mut capacities: Vec<(f64, f64)> = Vec::new();
    for current in currents {
        let run = system.with_parameters(&ParameterValues::new().with("I", current))?;
        println!("Discharging at I = {current}...");
        let solution = match solver.solve(&run, &linspace(0.0, 2.0 / current, 200)) {
            Ok(solution) => solution,
            Err(e) => {
                eprintln!("Solver failed: {e}");
                continue;
            }
        };
        println!("{}", solution.stats);
        capacities.push((current, solution.last_time().unwrap_or(0.0) * current));
        save_discharge(&run, &solution, current)?;
        summary.add_run(&solution);
    }

    csv_writer::write_csv(
        format!("{OUTPUT}/capacity.csv"),
        &["current", "capacity"],
        &capacity_columns(&capacities),
    )?;

    summary.write_to_file(format!("{OUTPUT}/simulation_summary.txt"))?;
    summary.print_to_console();
    println!("Summary saved to {OUTPUT}/simulation_summary.txt");
    Ok(())
}

/// Splits `(current, capacity)` pairs into CSV columns; failed runs are
/// simply absent.
fn capacity_columns(runs: &[(f64, f64)]) -> [Vec<f64>; 2] {
    let (currents, capacities) = runs.iter().copied().unzip();
    [currents, capacities]
}

fn save_discharge(
    system: &DiscretisedSystem,
    solution: &Solution,
    current: f64,
) -> Result<(), Box<dyn Error>> {
    let voltage = solution.variable(system, "V")?;
    let c_surf = solution.variable(system, "c_surf")?;
    let c_avg = solution.variable(system, "c_avg")?;
    csv_writer::write_csv(
        format!("{OUTPUT}/discharge_I{current}.csv"),
        &["t", "V", "c_surf", "c_avg"],
        &[
            solution.times.clone(),
            voltage.values.row(0).iter().copied().collect(),
            c_surf.values.row(0).iter().copied().collect(),
            c_avg.values.row(0).iter().copied().collect(),
        ],
    )?;
    solution
        .variable(system, "c")?
        .write_csv(format!("{OUTPUT}/concentration_I{current}.csv"))?;
    Ok(())
}
