use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgEnum, Parser};
use log::{error, info, warn};

use rmc::heuristic::GreedyConstructor;
use rmc::models::highs::HighsSolver;
use rmc::models::milp::Model;
use rmc::models::rmc::{RmcModel, Variables};
use rmc::models::{Solver, SolverConfig};
use rmc::parse::read_instance;
use rmc::problem::Problem;
use rmc::solution::Schedule;
use rmc::validation::validate;

/// The engine used with `--solve`
#[derive(ArgEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Engine {
    Highs,
    Gurobi,
}

/// Builds the ready-mix concrete scheduling model of an instance, with a greedy warm start
#[derive(Parser, Debug)]
#[clap(name = "rmc", version)]
struct Args {
    /// Path to the JSON instance
    #[clap(short, long)]
    instance: PathBuf,
    /// Write the model in LP format to this path
    #[clap(long)]
    lp: Option<PathBuf>,
    /// Solve the model, starting from the greedy schedule
    #[clap(long)]
    solve: bool,
    /// Solver engine, gurobi needs the `gurobi` feature
    #[clap(long, arg_enum, default_value = "highs")]
    solver: Engine,
    /// Time limit of the solver, in seconds
    #[clap(long)]
    time_limit: Option<u64>,
    /// Number of threads the solver may use
    #[clap(long)]
    threads: Option<usize>,
}

fn report(problem: &Problem, variables: &Variables, values: &rmc::models::Values, label: &str) {
    let schedule = Schedule::from_values(problem, variables, values);
    let report = validate(problem, variables, values);
    info!("{} cost: {}", label, schedule.cost(problem));
    if report.is_empty() {
        info!("{} passes validation", label);
    } else {
        warn!(
            "{} has {} hard and {} soft violations\n{}",
            label,
            report.hard_violations(),
            report.soft_violations(),
            report
        );
    }
    for (slack, value) in schedule.active_slacks() {
        info!("active slack {:?}: {:.1}", slack, value);
    }
}

fn solve<S: Solver>(mut solver: S, problem: &Problem, model: Model, variables: &Variables) -> Result<(), S::Error> {
    let output = solver.solve(model)?;
    info!("solver status: {}", output.status);
    if !output.has_solution() {
        error!("the solver found no solution");
        return Ok(());
    }
    if let Some(objective) = output.objective {
        info!("objective: {:.2}", objective);
    }
    report(problem, variables, &output.values, "solution");
    Ok(())
}

#[cfg(feature = "gurobi")]
fn solve_with_gurobi(
    config: SolverConfig,
    problem: &Problem,
    model: Model,
    variables: &Variables,
) -> Result<(), Box<dyn std::error::Error>> {
    use rmc::models::gurobi::GurobiSolver;
    Ok(solve(GurobiSolver::new(config), problem, model, variables)?)
}

#[cfg(not(feature = "gurobi"))]
fn solve_with_gurobi(_: SolverConfig, _: &Problem, _: Model, _: &Variables) -> Result<(), Box<dyn std::error::Error>> {
    Err("rmc was built without Gurobi, rebuild with `--features gurobi` or use `--solver highs`".into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let problem = read_instance(&args.instance)?;
    let (mut model, variables) = RmcModel::build(&problem)?;
    info!(
        "Built model with {} variables and {} constraints",
        model.vars().len(),
        model.constrs().len()
    );

    let construction = GreedyConstructor::new(&problem, &variables).construct()?;
    construction.apply(&mut model)?;
    info!(
        "Warm start places {} batches, {} of them forced",
        construction.assignments.len(),
        construction.forced()
    );

    if let Some(path) = &args.lp {
        let mut out = BufWriter::new(File::create(path)?);
        model.write_lp(&mut out)?;
        info!("Wrote model to {}", path.display());
    }

    let start = construction.values(&model);
    report(&problem, &variables, &start, "warm start");

    if args.solve {
        let config = SolverConfig {
            time_limit: args.time_limit.map(Duration::from_secs),
            threads: args.threads,
        };
        match args.solver {
            Engine::Highs => solve(HighsSolver::new(config), &problem, model, &variables)?,
            Engine::Gurobi => solve_with_gurobi(config, &problem, model, &variables)?,
        }
    }

    Ok(())
}
