use std::fmt;
use std::time::{Duration, Instant};

/// Time spent in the two expensive parts of a Newton iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Timings {
    pub jacobian: Duration,
    pub linear_solve: Duration,
    pub jacobian_calls: usize,
    pub linear_solves: usize,
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_jacobian<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.jacobian += start.elapsed();
        self.jacobian_calls += 1;
        result
    }

    pub fn record_linear_solve<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.linear_solve += start.elapsed();
        self.linear_solves += 1;
        result
    }

    pub fn merge(&mut self, other: &Timings) {
        self.jacobian += other.jacobian;
        self.linear_solve += other.linear_solve;
        self.jacobian_calls += other.jacobian_calls;
        self.linear_solves += other.linear_solves;
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let average = |total: Duration, n: usize| {
            if n == 0 {
                0.0
            } else {
                total.as_secs_f64() * 1000.0 / n as f64
            }
        };
        writeln!(
            f,
            "  Jacobian assembly: {:>9.3}ms  (avg: {:>9.3}ms, {} calls)",
            self.jacobian.as_secs_f64() * 1000.0,
            average(self.jacobian, self.jacobian_calls),
            self.jacobian_calls
        )?;
        write!(
            f,
            "  Linear solve:      {:>9.3}ms  (avg: {:>9.3}ms, {} solves)",
            self.linear_solve.as_secs_f64() * 1000.0,
            average(self.linear_solve, self.linear_solves),
            self.linear_solves
        )
    }
}
