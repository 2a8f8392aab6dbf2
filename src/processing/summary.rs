use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::discretization::mesh::{CoordinateSystem, Mesh};
use crate::numerics::system::{DiscretisedSystem, EquationKind};
use crate::numerics::timing::Timings;
use crate::processing::solution::{Solution, Termination};

/// Mesh statistics for one region.
#[derive(Clone, Debug)]
pub struct RegionSummary {
    pub name: String,
    pub cells: usize,
    pub extent: (f64, f64),
    pub min_width: f64,
    pub max_width: f64,
    pub spherical: bool,
}

/// Human-readable account of one simulation: mesh, system layout and how the
/// run went.
#[derive(Clone, Debug)]
pub struct SimulationSummary {
    pub model: String,
    pub regions: Vec<RegionSummary>,

    pub states: usize,
    pub differential_states: usize,
    pub algebraic_states: usize,
    pub variables: Vec<(String, usize)>,

    /// The most recent run.
    pub run: Option<RunSummary>,
    pub runs: usize,
    /// Solver timings summed over every run.
    pub timings: Timings,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub final_time: f64,
    pub outputs: usize,
    pub termination: Termination,
    pub events: Vec<(String, f64)>,
    pub steps: usize,
    pub rejected_steps: usize,
    pub newton_iterations: usize,
    pub wall_seconds: f64,
}

impl SimulationSummary {
    pub fn from_system(mesh: &Mesh, system: &DiscretisedSystem) -> Self {
        let regions = mesh
            .regions()
            .map(|(name, sub)| RegionSummary {
                name: name.to_string(),
                cells: sub.npts(),
                extent: (sub.start(), sub.end()),
                min_width: sub.d_edges.iter().copied().fold(f64::INFINITY, f64::min),
                max_width: sub.d_edges.iter().copied().fold(0.0, f64::max),
                spherical: sub.coordinates == CoordinateSystem::Spherical,
            })
            .collect();

        let differential_states = system
            .equations()
            .iter()
            .filter(|eq| eq.kind == EquationKind::Differential)
            .map(|eq| eq.range.len())
            .sum();

        Self {
            model: system.name().to_string(),
            regions,
            states: system.len(),
            differential_states,
            algebraic_states: system.len() - differential_states,
            variables: system
                .slices()
                .iter()
                .map(|s| (s.name.clone(), s.range.len()))
                .collect(),
            run: None,
            runs: 0,
            timings: Timings::new(),
        }
    }

    pub fn add_run(&mut self, solution: &Solution) {
        self.runs += 1;
        self.timings.merge(&solution.stats.timings);
        self.run = Some(RunSummary {
            final_time: solution.last_time().unwrap_or(0.0),
            outputs: solution.len(),
            termination: solution.termination.clone(),
            events: solution
                .events
                .iter()
                .map(|e| (e.name.clone(), e.time))
                .collect(),
            steps: solution.stats.steps,
            rejected_steps: solution.stats.rejected_steps,
            newton_iterations: solution.stats.newton_iterations,
            wall_seconds: solution.stats.wall_time.as_secs_f64(),
        });
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        self.write(&mut file)?;
        file.flush()
    }

    pub fn write(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out, "SIMULATION SUMMARY: {}", self.model)?;
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out)?;

        writeln!(out, "MESH")?;
        writeln!(out, "{}", "-".repeat(60))?;
        for r in &self.regions {
            writeln!(
                out,
                "{:<20} {:>5} cells on [{:.4e}, {:.4e}]{}",
                r.name,
                r.cells,
                r.extent.0,
                r.extent.1,
                if r.spherical { " (spherical)" } else { "" }
            )?;
            writeln!(
                out,
                "{:<20} widths {:.4e} to {:.4e}",
                "", r.min_width, r.max_width
            )?;
        }
        writeln!(out)?;

        writeln!(out, "SYSTEM")?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "States:              {}", self.states)?;
        writeln!(out, "  differential:      {}", self.differential_states)?;
        writeln!(out, "  algebraic:         {}", self.algebraic_states)?;
        for (name, size) in &self.variables {
            writeln!(out, "  {name:<18} {size}")?;
        }
        writeln!(out)?;

        if let Some(run) = &self.run {
            writeln!(out, "RUN")?;
            writeln!(out, "{}", "-".repeat(60))?;
            writeln!(out, "Final time:          {:.6e}", run.final_time)?;
            writeln!(out, "Output times:        {}", run.outputs)?;
            match &run.termination {
                Termination::FinalTime => writeln!(out, "Stopped at:          final time")?,
                Termination::Event(name) => writeln!(out, "Stopped at:          event `{name}`")?,
            }
            for (name, t) in &run.events {
                writeln!(out, "  event {name:<20} t = {t:.6e}")?;
            }
            writeln!(
                out,
                "Steps:               {} accepted, {} rejected",
                run.steps, run.rejected_steps
            )?;
            writeln!(out, "Newton iterations:   {}", run.newton_iterations)?;
            writeln!(out, "Wall time:           {:.3}s", run.wall_seconds)?;
            writeln!(out)?;
        }

        if self.runs > 0 {
            writeln!(out, "TIMINGS ({} runs)", self.runs)?;
            writeln!(out, "{}", "-".repeat(60))?;
            write!(out, "{}", self.timings)?;
            writeln!(out)?;
        }

        writeln!(out, "{}", "=".repeat(60))
    }

    pub fn print_to_console(&self) {
        println!("\n{}", "=".repeat(60));
        println!("SIMULATION SUMMARY");
        println!("{}", "=".repeat(60));
        let cells: usize = self.regions.iter().map(|r| r.cells).sum();
        println!(
            "Mesh:          {} cells in {} regions",
            cells,
            self.regions.len()
        );
        println!(
            "States:        {} ({} algebraic)",
            self.states, self.algebraic_states
        );
        if let Some(run) = &self.run {
            println!(
                "Run:           t = {:.4e}, {} steps, {} rejected",
                run.final_time, run.steps, run.rejected_steps
            );
            if let Termination::Event(name) = &run.termination {
                println!("Stopped by:    {name}");
            }
        }
        println!("{}\n", "=".repeat(60));
    }
}
