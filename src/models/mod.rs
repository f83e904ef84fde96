pub mod highs;
pub mod milp;
pub mod rmc;
pub mod solve;
pub mod utils;

#[cfg(feature = "gurobi")]
pub mod gurobi;

pub use milp::{Model, ModelError, Values, VarIndex};
pub use solve::{Solver, SolverConfig, SolverOutput, Status};
