pub mod csv_writer;
pub mod solution;
pub mod summary;

pub use solution::{EventRecord, ProcessedVariable, Solution, SolverStats, Termination};
pub use summary::SimulationSummary;
