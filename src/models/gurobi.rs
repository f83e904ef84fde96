//! Solving the model with Gurobi, through the `grb` crate.

use good_lp::Expression;
use grb::prelude::*;
use log::{debug, info};
use typed_index_collections::TiVec;

use super::milp::{self, Sense, VarIndex};
use super::solve::{Solver, SolverConfig, SolverOutput, Status};

pub struct GurobiSolver {
    config: SolverConfig,
}

impl GurobiSolver {
    pub fn new(config: SolverConfig) -> GurobiSolver {
        GurobiSolver { config }
    }

    fn expr(model: &milp::Model, expr: &Expression, vars: &TiVec<VarIndex, Var>) -> grb::expr::LinExpr {
        let mut out = grb::expr::LinExpr::new();
        for (var, coeff) in model.coefficients(expr) {
            out.add_term(coeff, vars[var]);
        }
        out.add_constant(expr.constant());
        out
    }

    /// Translates the model, including its start values
    fn translate(&self, model: &milp::Model) -> grb::Result<(grb::Model, TiVec<VarIndex, Var>)> {
        let mut grb_model = grb::Model::new(model.name())?;
        grb_model.set_param(param::OutputFlag, 0)?;
        if let Some(limit) = self.config.time_limit {
            grb_model.set_param(param::TimeLimit, limit.as_secs_f64())?;
        }
        if let Some(threads) = self.config.threads {
            grb_model.set_param(param::Threads, threads as i32)?;
        }

        let mut vars = TiVec::with_capacity(model.vars().len());
        for variable in model.vars() {
            let vtype = match variable.vtype {
                milp::VarType::Binary => VarType::Binary,
                milp::VarType::Continuous => VarType::Continuous,
            };
            vars.push(grb_model.add_var(&variable.name, vtype, 0.0, variable.lb, variable.ub, std::iter::empty())?);
        }
        grb_model.update()?;

        for (variable, var) in model.vars().iter().zip(vars.iter()) {
            if let Some(start) = variable.start {
                grb_model.set_obj_attr(attr::Start, var, start)?;
            }
        }

        for constr in model.constrs() {
            let lhs = GurobiSolver::expr(model, &constr.comparison.expr, &vars);
            let rhs = constr.comparison.rhs;
            let constraint = match constr.comparison.sense {
                Sense::Le => c!(lhs <= rhs),
                Sense::Ge => c!(lhs >= rhs),
                Sense::Eq => c!(lhs == rhs),
            };
            grb_model.add_constr(&constr.name, constraint)?;
        }

        grb_model.set_objective(GurobiSolver::expr(model, model.objective(), &vars), Minimize)?;
        Ok((grb_model, vars))
    }
}

impl Solver for GurobiSolver {
    type Error = grb::Error;

    fn solve(&mut self, model: milp::Model) -> grb::Result<SolverOutput> {
        let (mut grb_model, vars) = self.translate(&model)?;
        info!("Solving {} with Gurobi", model.name());
        grb_model.optimize()?;

        let grb_status = grb_model.status()?;
        let solutions = grb_model.get_attr(attr::SolCount)?;
        debug!("Gurobi finished with status {:?} and {} solutions", grb_status, solutions);

        let status = match grb_status {
            grb::Status::Optimal => Status::Optimal,
            grb::Status::Infeasible | grb::Status::InfOrUnbd | grb::Status::Unbounded => Status::Infeasible,
            // interrupted runs are reported as time limited, with or without an incumbent
            _ => Status::TimeLimit,
        };

        if solutions == 0 {
            return Ok(SolverOutput::empty(status, vars.len()));
        }

        let mut values = TiVec::with_capacity(vars.len());
        for var in &vars {
            values.push(Some(grb_model.get_obj_attr(attr::X, var)?));
        }

        Ok(SolverOutput {
            status,
            values,
            objective: Some(grb_model.get_attr(attr::ObjVal)?),
        })
    }
}
