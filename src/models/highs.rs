//! Solving the model with HiGHS, through `good_lp`.

use std::time::Instant;

use good_lp::solvers::highs::highs;
use good_lp::{IntoAffineExpression, ResolutionError, Solution, SolverModel, WithInitialSolution, WithTimeLimit};
use log::{debug, info};

use super::milp::{LpProblem, Model, Values};
use super::solve::{Solver, SolverConfig, SolverOutput, Status};

pub struct HighsSolver {
    config: SolverConfig,
}

impl HighsSolver {
    pub fn new(config: SolverConfig) -> HighsSolver {
        HighsSolver { config }
    }
}

impl Solver for HighsSolver {
    type Error = ResolutionError;

    fn solve(&mut self, model: Model) -> Result<SolverOutput, ResolutionError> {
        info!("Solving {} with HiGHS", model.name());
        let LpProblem {
            variables,
            objective,
            constraints,
            start,
            handles,
        } = model.into_lp();
        debug!("{} of {} variables have a start value", start.len(), handles.len());

        let mut problem = variables
            .minimise(objective.clone())
            .using(highs)
            .with_initial_solution(start);
        if let Some(limit) = self.config.time_limit {
            problem = problem.with_time_limit(limit.as_secs_f64());
        }
        if let Some(threads) = self.config.threads {
            problem = problem.set_option("threads", threads as i32);
        }
        for constraint in constraints {
            problem.add_constraint(constraint);
        }

        let started = Instant::now();
        let solution = match problem.solve() {
            Ok(solution) => solution,
            // the model is bounded, so an unbounded report comes from an infeasible presolve
            Err(ResolutionError::Infeasible | ResolutionError::Unbounded) => return Ok(SolverOutput::empty(Status::Infeasible, handles.len())),
            Err(err) => return Err(err),
        };

        // good_lp hands back the incumbent of an interrupted run without saying so
        let timed_out = self
            .config
            .time_limit
            .map_or(false, |limit| started.elapsed() >= limit);
        let status = if timed_out { Status::TimeLimit } else { Status::Optimal };
        debug!("HiGHS finished after {:?} with status {}", started.elapsed(), status);

        let values: Values = handles.iter().map(|var| Some(solution.value(*var))).collect();
        let constant = objective.constant();
        let objective = objective
            .linear_coefficients()
            .into_iter()
            .map(|(var, coeff)| coeff * solution.value(var))
            .sum::<f64>()
            + constant;

        Ok(SolverOutput {
            status,
            values,
            objective: Some(objective),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::milp::{ge, le};

    #[test]
    fn solves_a_small_model() {
        let mut model = Model::new("small");
        let x = model.add_binary("x").unwrap();
        let y = model.add_binary("y").unwrap();
        let s = model.add_cont("s").unwrap();
        model.add_constr("cover", ge(model.handle(x) + model.handle(y), 1.0)).unwrap();
        model.add_constr("soft", le(model.handle(x) - model.handle(s), 0.0)).unwrap();
        model.set_objective(2.0 * model.handle(x) + 3.0 * model.handle(y) + 10.0 * model.handle(s));
        model.set_start(y, 1.0).unwrap();

        let output = HighsSolver::new(SolverConfig::default()).solve(model).unwrap();
        assert_eq!(output.status, Status::Optimal);
        assert!(output.has_solution());
        assert!((output.objective.unwrap() - 3.0).abs() < 1e-6);
        assert!(output.values[y].unwrap() > 0.5);
        assert!(output.values[s].unwrap().abs() < 1e-6);
    }

    #[test]
    fn infeasible_models_have_no_solution() {
        let mut model = Model::new("infeasible");
        let x = model.add_binary("x").unwrap();
        model.add_constr("high", ge(model.handle(x), 2.0)).unwrap();
        model.set_objective(model.handle(x));

        let output = HighsSolver::new(SolverConfig::default()).solve(model).unwrap();
        assert_eq!(output.status, Status::Infeasible);
        assert!(!output.has_solution());
        assert_eq!(output.objective, None);
    }
}
