use std::time::Duration;

use derive_more::Display;

use super::milp::{Model, Values};

/// Outcome of a solver run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Status {
    /// Proven optimal
    Optimal,
    /// Stopped by the time limit, possibly with a feasible solution
    TimeLimit,
    /// No feasible solution exists
    Infeasible,
}

/// Knobs passed on to the solver engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverConfig {
    pub time_limit: Option<Duration>,
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutput {
    pub status: Status,
    /// The value of every variable of the model, if the solver found a solution
    pub values: Values,
    /// Objective value of the returned solution, if any
    pub objective: Option<f64>,
}

impl SolverOutput {
    /// Whether the output carries a solution
    pub fn has_solution(&self) -> bool {
        self.values.iter().any(|v| v.is_some())
    }
}

impl SolverOutput {
    /// The output of a run that ended without a solution
    pub fn empty(status: Status, variables: usize) -> SolverOutput {
        SolverOutput {
            status,
            values: (0..variables).map(|_| None).collect(),
            objective: None,
        }
    }
}

/// An engine able to solve a [`Model`]. Start values set on the model are passed on as warm start.
pub trait Solver {
    type Error: std::error::Error + 'static;

    fn solve(&mut self, model: Model) -> Result<SolverOutput, Self::Error>;
}
