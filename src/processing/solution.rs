use std::fmt;
use std::path::Path;
use std::time::Duration;

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::numerics::system::DiscretisedSystem;
use crate::numerics::timing::Timings;
use crate::processing::csv_writer::write_csv;

/// An event crossing found during integration.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub name: String,
    pub time: f64,
    pub state: DVector<f64>,
    pub terminal: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Termination {
    FinalTime,
    Event(String),
}

#[derive(Clone, Debug, Default)]
pub struct SolverStats {
    pub steps: usize,
    pub rejected_steps: usize,
    pub newton_iterations: usize,
    pub timings: Timings,
    pub wall_time: Duration,
}

impl fmt::Display for SolverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "{:^60}", "SOLVER SUMMARY")?;
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(
            f,
            "Total solver time:  {:.3}s",
            self.wall_time.as_secs_f64()
        )?;
        writeln!(
            f,
            "Steps:              {} accepted, {} rejected",
            self.steps, self.rejected_steps
        )?;
        writeln!(f, "Newton iterations:  {}", self.newton_iterations)?;
        writeln!(f, "{}", "-".repeat(60))?;
        write!(f, "{}", self.timings)
    }
}

/// Trajectory returned by the integrator: the state at every requested
/// output time (and at a terminal event, if one stopped the run).
#[derive(Clone, Debug)]
pub struct Solution {
    pub times: Vec<f64>,
    pub states: Vec<DVector<f64>>,
    pub events: Vec<EventRecord>,
    pub termination: Termination,
    pub stats: SolverStats,
}

impl Solution {
    pub fn new() -> Self {
        Self {
            times: Vec::new(),
            states: Vec::new(),
            events: Vec::new(),
            termination: Termination::FinalTime,
            stats: SolverStats::default(),
        }
    }

    pub(crate) fn push(&mut self, t: f64, y: DVector<f64>) {
        self.times.push(t);
        self.states.push(y);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    pub fn last_state(&self) -> Option<&DVector<f64>> {
        self.states.last()
    }

    pub fn terminated_by_event(&self) -> Option<&str> {
        match &self.termination {
            Termination::Event(name) => Some(name),
            Termination::FinalTime => None,
        }
    }

    /// Values of a state variable or named output at every stored time.
    pub fn variable(&self, system: &DiscretisedSystem, name: &str) -> Result<ProcessedVariable> {
        let (expression, nodes) = system
            .lookup(name)
            .ok_or_else(|| Error::UnboundSymbol(name.to_string()))?;
        let mut columns = Vec::with_capacity(self.len());
        for (t, y) in self.times.iter().zip(&self.states) {
            columns.push(system.evaluate(&expression, *t, y)?.into_vector());
        }
        let rows = columns.first().map_or(0, |c| c.len());
        if columns.iter().any(|c| c.len() != rows) {
            return Err(Error::shape(name, "output changes size over time"));
        }
        let values = DMatrix::from_fn(rows, columns.len(), |i, j| columns[j][i]);
        Ok(ProcessedVariable {
            name: name.to_string(),
            times: self.times.clone(),
            values,
            nodes,
        })
    }
}

impl Default for Solution {
    fn default() -> Self {
        Self::new()
    }
}

/// One quantity over time: column `j` of `values` holds its value(s) at
/// `times[j]`, one row per cell (a single row for domain-less quantities).
#[derive(Clone, Debug)]
pub struct ProcessedVariable {
    pub name: String,
    pub times: Vec<f64>,
    pub values: DMatrix<f64>,
    pub nodes: DVector<f64>,
}

impl ProcessedVariable {
    pub fn at(&self, index: usize) -> DVector<f64> {
        self.values.column(index).into_owned()
    }

    pub fn last(&self) -> Option<DVector<f64>> {
        (!self.times.is_empty()).then(|| self.at(self.times.len() - 1))
    }

    /// Linear interpolation in time; `None` outside the stored time span.
    pub fn interpolate(&self, t: f64) -> Option<DVector<f64>> {
        let first = *self.times.first()?;
        let last = *self.times.last()?;
        if t < first || t > last {
            return None;
        }
        let j = self.times.partition_point(|&s| s < t);
        if j == 0 || self.times[j] == t {
            return Some(self.at(j));
        }
        let (t0, t1) = (self.times[j - 1], self.times[j]);
        let theta = (t - t0) / (t1 - t0);
        Some(self.at(j - 1) * (1.0 - theta) + self.at(j) * theta)
    }

    /// One column per output time, one row per cell, plus the cell centres
    /// as the first column when the variable is spatially distributed.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut headers = Vec::new();
        let mut columns = Vec::new();
        if !self.nodes.is_empty() {
            headers.push("x".to_string());
            columns.push(self.nodes.iter().copied().collect());
        }
        for (j, t) in self.times.iter().enumerate() {
            headers.push(format!("t={t:.6e}"));
            columns.push(self.values.column(j).iter().copied().collect());
        }
        let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
        write_csv(path, &headers, &columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> ProcessedVariable {
        ProcessedVariable {
            name: "u".into(),
            times: vec![0.0, 1.0, 3.0],
            values: DMatrix::from_row_slice(2, 3, &[0.0, 1.0, 3.0, 10.0, 10.0, 10.0]),
            nodes: DVector::from_vec(vec![0.25, 0.75]),
        }
    }

    #[test]
    fn interpolates_between_samples() {
        let u = ramp();
        let mid = u.interpolate(2.0).unwrap();
        assert_relative_eq!(mid[0], 2.0);
        assert_relative_eq!(mid[1], 10.0);
        assert_eq!(u.interpolate(1.0).unwrap(), u.at(1));
        assert_eq!(u.interpolate(0.0).unwrap(), u.at(0));
        assert!(u.interpolate(3.5).is_none());
    }

    #[test]
    fn writes_one_column_per_time() {
        let path = std::env::temp_dir().join("symfv_processed_variable.csv");
        ramp().write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap().split(',').count(), 4);
        assert_eq!(lines.count(), 2);
        std::fs::remove_file(path).ok();
    }
}
