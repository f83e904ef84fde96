use std::cmp::Reverse;
use std::collections::BTreeMap;

use derive_more::Display;
use float_ord::FloatOrd;
use good_lp::Expression;
use itertools::{iproduct, Itertools};
use log::{debug, info, warn};
use typed_index_collections::TiVec;

use crate::models::milp::{eq, ge, le, Model, ModelError, VarIndex, VarType};
use crate::models::utils::{vars, AddVars};
use crate::problem::{BatchIndex, Minutes, Problem, SiteIndex, TruckIndex, UnitIndex};

use super::sets_and_parameters::{Parameters, Sets};

/// The domain tables the model can not be built without
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Table {
    #[display(fmt = "batches")]
    Batches,
    #[display(fmt = "units")]
    Units,
    #[display(fmt = "trucks")]
    Trucks,
    #[display(fmt = "sites")]
    Sites,
}

#[derive(Debug, Clone, PartialEq, Display)]
pub enum BuildError {
    #[display(fmt = "required table '{}' is missing or empty", _0)]
    MissingTable(Table),
    #[display(fmt = "{}", _0)]
    Model(ModelError),
}

impl From<ModelError> for BuildError {
    fn from(err: ModelError) -> Self {
        BuildError::Model(err)
    }
}

impl std::error::Error for BuildError {}

/// Identifies the slack variable of one soft constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlackKey {
    /// Shelf life of a batch
    SettingTime(BatchIndex),
    /// Max tardiness of a batch
    MaxTardiness(BatchIndex),
    /// Gap between the `position`th and the next batch of a site
    Lag { site: SiteIndex, position: usize },
}

impl SlackKey {
    fn name(&self) -> String {
        match self {
            SlackKey::SettingTime(b) => format!("slack_setting_{}", b),
            SlackKey::MaxTardiness(b) => format!("slack_tard_{}", b),
            SlackKey::Lag { site, position } => format!("slack_lag_{}_{}", site, position),
        }
    }
}

/// A variable injected for a batch that would otherwise have no feasible candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fallback {
    Production(BatchIndex),
    Transport(BatchIndex),
}

#[derive(Debug, Clone)]
pub struct Variables {
    /// 1 if batch b starts production on unit u at time t
    pub x: BTreeMap<(BatchIndex, UnitIndex, Minutes), VarIndex>,
    /// 1 if batch b departs with truck v at time t
    pub y: BTreeMap<(BatchIndex, TruckIndex, Minutes), VarIndex>,
    /// Lower bound on the tardiness of batch b
    pub tardiness: TiVec<BatchIndex, VarIndex>,
    /// 1 if truck v performs at least one transport
    pub truck_used: TiVec<TruckIndex, VarIndex>,
    /// Slack of every soft constraint
    pub slacks: BTreeMap<SlackKey, VarIndex>,
    /// Fallback variables injected while building
    pub fallbacks: Vec<Fallback>,
}

impl Variables {
    /// The production variables of batch b, ordered by unit and time
    pub fn production(&self, b: BatchIndex) -> impl Iterator<Item = (UnitIndex, Minutes, VarIndex)> + '_ {
        let lower = (b, UnitIndex::from(0), Minutes::MIN);
        let upper = (b, UnitIndex::from(usize::MAX), Minutes::MAX);
        self.x.range(lower..=upper).map(|(&(_, u, t), &var)| (u, t, var))
    }

    /// The transport variables of batch b, ordered by truck and time
    pub fn transport(&self, b: BatchIndex) -> impl Iterator<Item = (TruckIndex, Minutes, VarIndex)> + '_ {
        let lower = (b, TruckIndex::from(0), Minutes::MIN);
        let upper = (b, TruckIndex::from(usize::MAX), Minutes::MAX);
        self.y.range(lower..=upper).map(|(&(_, v, t), &var)| (v, t, var))
    }

    /// Production candidates of batch b sorted by increasing time, ties broken by unit
    pub fn production_candidates(&self, b: BatchIndex) -> Vec<(UnitIndex, Minutes)> {
        self.production(b)
            .map(|(u, t, _)| (u, t))
            .sorted_by_key(|&(u, t)| (t, u))
            .collect()
    }

    /// Transport candidates of batch b sorted by increasing time, ties broken by truck
    pub fn transport_candidates(&self, b: BatchIndex) -> Vec<(TruckIndex, Minutes)> {
        self.transport(b)
            .map(|(v, t, _)| (v, t))
            .sorted_by_key(|&(v, t)| (t, v))
            .collect()
    }

    /// All transport variables of truck v
    pub fn truck_trips(&self, v: TruckIndex) -> impl Iterator<Item = VarIndex> + '_ {
        self.y
            .iter()
            .filter(move |((_, truck, _), _)| *truck == v)
            .map(|(_, &var)| var)
    }

    pub fn num_batches(&self) -> usize {
        self.tardiness.len()
    }
}

pub struct RmcModel {}

#[allow(non_snake_case)]
impl RmcModel {
    /// Builds the scheduling model of the given problem
    pub fn build(problem: &Problem) -> Result<(Model, Variables), BuildError> {
        let sets = Sets::new(problem)?;
        let parameters = Parameters::new(problem);
        RmcModel::build_from(&sets, &parameters)
    }

    pub fn build_from(sets: &Sets, parameters: &Parameters) -> Result<(Model, Variables), BuildError> {
        info!(
            "Building scheduling model for {} batches, {} units and {} trucks over {} time points",
            sets.B.len(),
            sets.U.len(),
            sets.V.len(),
            sets.T.len()
        );

        let mut model = Model::new("rmc_schedule");

        // assign som variables to save some space later
        let T = &sets.T;
        let B = &sets.B;
        let U = &sets.U;
        let V = &sets.V;
        let S = &sets.S;
        let B_s = &sets.B_s;
        let P = &parameters.P;
        let Q = &parameters.Q;

        //*************CREATE VARIABLES*************//

        let mut fallbacks = Vec::new();

        // production start, only where production ends within the horizon
        let mut x_keys = Vec::new();
        for b in B {
            let keys = iproduct!(U, T)
                .filter(|(u, t)| **t + P[**u] <= parameters.T2)
                .map(|(u, t)| (*b, *u, *t))
                .collect::<Vec<_>>();

            if keys.is_empty() {
                let u = *U
                    .iter()
                    .min_by_key(|u| (P[**u], **u))
                    .ok_or(BuildError::MissingTable(Table::Units))?;
                warn!(
                    "batch {} can not be produced within the horizon, adding fallback production on unit {} at {}",
                    b, u, parameters.T1
                );
                fallbacks.push(Fallback::Production(*b));
                x_keys.push((*b, u, parameters.T1));
            } else {
                x_keys.extend(keys);
            }
        }
        let x = vars(x_keys, &mut model, VarType::Binary, &(0.0..1.0), |(b, u, t)| {
            format!("X_{}_{}_{}", b, u, t)
        })?;

        // departure, only with enough capacity and within the departure window
        let earliest = parameters.earliest_departure();
        let mut y_keys = Vec::new();
        for b in B {
            let keys = iproduct!(V, T)
                .filter(|(v, t)| Q[**v] >= parameters.volume[*b] && **t >= earliest && **t <= parameters.T2)
                .map(|(v, t)| (*b, *v, *t))
                .collect::<Vec<_>>();

            if keys.is_empty() {
                let v = *V
                    .iter()
                    .min_by_key(|v| (Reverse(FloatOrd(Q[**v])), **v))
                    .ok_or(BuildError::MissingTable(Table::Trucks))?;
                warn!(
                    "batch {} ({} m3) has no feasible transport, adding fallback departure on truck {} at {}",
                    b, parameters.volume[*b], v, parameters.T1
                );
                fallbacks.push(Fallback::Transport(*b));
                y_keys.push((*b, v, parameters.T1));
            } else {
                y_keys.extend(keys);
            }
        }
        let y = vars(y_keys, &mut model, VarType::Binary, &(0.0..1.0), |(b, v, t)| {
            format!("Y_{}_{}_{}", b, v, t)
        })?;

        // whether a truck is used at all
        let truck_used: TiVec<TruckIndex, VarIndex> = V.len().binary(&mut model, "V_used")?.into();

        // tardiness of every batch
        let tardiness: TiVec<BatchIndex, VarIndex> = B.len().cont(&mut model, "T_tard")?.into();

        // slack of the soft constraints
        let slack_keys = B
            .iter()
            .map(|b| SlackKey::SettingTime(*b))
            .chain(B.iter().map(|b| SlackKey::MaxTardiness(*b)))
            .chain(S.iter().flat_map(|s| {
                (1..B_s[*s].len()).map(move |i| SlackKey::Lag {
                    site: *s,
                    position: i - 1,
                })
            }))
            .collect::<Vec<_>>();
        let slacks = vars(
            slack_keys,
            &mut model,
            VarType::Continuous,
            &(0.0..f64::INFINITY),
            SlackKey::name,
        )?;

        let variables = Variables {
            x,
            y,
            tardiness,
            truck_used,
            slacks,
            fallbacks,
        };

        debug!(
            "Created {} production, {} transport and {} slack variables",
            variables.x.len(),
            variables.y.len(),
            variables.slacks.len()
        );

        // ******************** ADD CONSTRAINTS ********************

        RmcModel::batch_constraints(&mut model, sets, parameters, &variables)?;
        RmcModel::unit_occupancy(&mut model, parameters, &variables)?;
        RmcModel::truck_occupancy(&mut model, parameters, &variables)?;
        RmcModel::site_sequencing(&mut model, sets, parameters, &variables)?;
        RmcModel::truck_used_linking(&mut model, sets, &variables)?;

        // ******************** OBJECTIVE ********************

        let transport = model.linear(
            variables
                .y
                .iter()
                .map(|(&(b, v, _), &var)| (parameters.trip_cost(b, v), var)),
        );
        let fixed = model.linear(V.iter().map(|v| (parameters.F[*v], variables.truck_used[*v])));
        let tardiness = model.sum(&variables.tardiness);
        let slack = model.sum(variables.slacks.values());

        model.set_objective(
            (transport + fixed) * parameters.alpha + tardiness * parameters.beta + slack * parameters.penalty,
        );

        info!(
            "Built scheduling model with {} variables and {} constraints",
            model.vars().len(),
            model.constrs().len()
        );

        Ok((model, variables))
    }

    /// The time production of batch b finishes, as an expression
    pub fn production_finish(model: &Model, parameters: &Parameters, variables: &Variables, b: BatchIndex) -> Expression {
        model.linear(
            variables
                .production(b)
                .map(|(u, t, var)| ((t + parameters.P[u]) as f64, var)),
        )
    }

    /// The departure time of batch b, as an expression
    pub fn departure(model: &Model, variables: &Variables, b: BatchIndex) -> Expression {
        model.linear(variables.transport(b).map(|(_, t, var)| (t as f64, var)))
    }

    fn batch_constraints(
        model: &mut Model,
        sets: &Sets,
        parameters: &Parameters,
        variables: &Variables,
    ) -> Result<(), ModelError> {
        for b in &sets.B {
            let b = *b;
            let finish = RmcModel::production_finish(model, parameters, variables, b);
            let departure = RmcModel::departure(model, variables, b);
            let to_unload_finish = (parameters.travel[b] + parameters.L) as f64;

            // every batch is produced exactly once and transported exactly once
            let produced = model.linear(variables.production(b).map(|(_, _, var)| (1.0, var)));
            model.add_constr(&format!("one_prod_{}", b), eq(produced, 1.0))?;
            let transported = model.linear(variables.transport(b).map(|(_, _, var)| (1.0, var)));
            model.add_constr(&format!("one_trip_{}", b), eq(transported, 1.0))?;

            // the truck can not leave before the batch is produced and the truck is washed
            let ready = finish.clone() + (parameters.W + parameters.H) as f64;
            model.add_constr(&format!("sync_{}", b), le(ready, departure.clone()))?;

            // the concrete must be unloaded before it sets
            let age = departure.clone() + to_unload_finish - finish;
            let limit = model.handle(variables.slacks[&SlackKey::SettingTime(b)]) + parameters.setting[b] as f64;
            model.add_constr(&format!("shelf_life_{}", b), le(age, limit))?;

            // tardiness is measured when unloading finishes
            let lateness = departure + to_unload_finish - parameters.due[b] as f64;
            let tardiness = model.handle(variables.tardiness[b]);
            model.add_constr(&format!("def_tard_{}", b), ge(tardiness, lateness))?;

            let limit = model.handle(variables.slacks[&SlackKey::MaxTardiness(b)]) + parameters.max_tardiness as f64;
            model.add_constr(&format!("limit_tard_{}", b), le(tardiness, limit))?;
        }

        Ok(())
    }

    fn unit_occupancy(model: &mut Model, parameters: &Parameters, variables: &Variables) -> Result<(), ModelError> {
        let grid = &parameters.grid;
        let mut occupancy: BTreeMap<(UnitIndex, Minutes), Vec<VarIndex>> = BTreeMap::new();

        // a batch started at t occupies the unit for every grid point in [t, t + ceil(P/δ)·δ)
        for (&(_, u, t), &var) in &variables.x {
            for k in 0..grid.cells(parameters.P[u]) {
                let point = t + k * grid.step();
                if grid.contains(point) {
                    occupancy.entry((u, point)).or_default().push(var);
                }
            }
        }

        for ((u, t), vars) in occupancy {
            model.add_constr(&format!("cap_unit_{}_{}", u, t), le(model.sum(&vars), 1.0))?;
        }

        Ok(())
    }

    fn truck_occupancy(model: &mut Model, parameters: &Parameters, variables: &Variables) -> Result<(), ModelError> {
        let grid = &parameters.grid;
        let mut occupancy: BTreeMap<(TruckIndex, Minutes), Vec<VarIndex>> = BTreeMap::new();

        // a truck is washed before departure and busy until it is back at the plant
        let before = grid.cells(parameters.W);
        for (&(b, v, t), &var) in &variables.y {
            let after = grid.cells(2 * parameters.travel[b] + parameters.L);
            for k in -before..after {
                let point = t + k * grid.step();
                if grid.contains(point) {
                    occupancy.entry((v, point)).or_default().push(var);
                }
            }
        }

        for ((v, t), vars) in occupancy {
            model.add_constr(&format!("cap_truck_{}_{}", v, t), le(model.sum(&vars), 1.0))?;
        }

        Ok(())
    }

    fn site_sequencing(
        model: &mut Model,
        sets: &Sets,
        parameters: &Parameters,
        variables: &Variables,
    ) -> Result<(), ModelError> {
        for s in &sets.S {
            for (i, (current, next)) in sets.B_s[*s].iter().tuple_windows().enumerate() {
                let finish_current = RmcModel::departure(model, variables, *current)
                    + (parameters.travel[*current] + parameters.L) as f64;
                let start_next = RmcModel::departure(model, variables, *next) + parameters.travel[*next] as f64;

                // consecutive batches at a site can not be unloaded at the same time
                model.add_constr(
                    &format!("seq_{}_{}", s, i),
                    ge(start_next.clone(), finish_current.clone()),
                )?;

                // and should not leave the site waiting for too long
                let slack = model.handle(variables.slacks[&SlackKey::Lag { site: *s, position: i }]);
                let limit = slack + parameters.max_lag as f64;
                model.add_constr(&format!("lag_{}_{}", s, i), le(start_next - finish_current, limit))?;
            }
        }

        Ok(())
    }

    fn truck_used_linking(model: &mut Model, sets: &Sets, variables: &Variables) -> Result<(), ModelError> {
        for v in &sets.V {
            let trips = variables.truck_trips(*v).collect::<Vec<_>>();
            let used = model.handle(variables.truck_used[*v]);

            model.add_constr(&format!("truck_used_lb_{}", v), le(used, model.sum(&trips)))?;
            if !trips.is_empty() {
                let n = trips.len() as f64;
                model.add_constr(&format!("truck_used_ub_{}", v), le(model.sum(&trips), n * used))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::models::milp::Sense;
    use crate::problem::{Parameters as ProblemParameters, Problem};

    fn coefficient(model: &Model, constr: &str, var: VarIndex) -> Option<f64> {
        model
            .constr(constr)
            .and_then(|c| model.coefficients(&c.comparison.expr).get(&var).copied())
    }

    #[test]
    fn variables_are_pruned_to_the_horizon() {
        let problem = fixtures::single_batch();
        let (model, variables) = RmcModel::build(&problem).unwrap();
        let b = BatchIndex::from(0);

        // production must end by 600, departures start at 480 + 30 + 10
        let starts = variables.production(b).map(|(_, t, _)| t).collect::<Vec<_>>();
        assert_eq!(starts, (480..=570).step_by(10).collect::<Vec<_>>());
        let departures = variables.transport(b).map(|(_, t, _)| t).collect::<Vec<_>>();
        assert_eq!(departures, (520..=600).step_by(10).collect::<Vec<_>>());

        assert!(variables.fallbacks.is_empty());
        assert_eq!(variables.slacks.len(), 2);
        assert_eq!(variables.num_batches(), 1);
        assert_eq!(model.vars().len(), 10 + 9 + 1 + 1 + 2);
        assert_eq!(model.var(variables.x[&(b, UnitIndex::from(0), 480)]).name, "X_0_0_480");
        assert_eq!(model.var(variables.truck_used[TruckIndex::from(0)]).name, "V_used_0");
    }

    #[test]
    fn constraint_families_are_named_and_counted() {
        let problem = fixtures::single_batch();
        let (model, _) = RmcModel::build(&problem).unwrap();

        for name in [
            "one_prod_0",
            "one_trip_0",
            "sync_0",
            "shelf_life_0",
            "def_tard_0",
            "limit_tard_0",
            "truck_used_lb_0",
            "truck_used_ub_0",
        ] {
            assert!(model.constr(name).is_some(), "missing {}", name);
        }

        let count = |prefix: &str| model.constrs().iter().filter(|c| c.name.starts_with(prefix)).count();
        // production covers 480..=590 in three cells
        assert_eq!(count("cap_unit_"), 12);
        // one cell of washing before 520..=600, capped at the horizon
        assert_eq!(count("cap_truck_"), 10);
        assert_eq!(count("seq_"), 0);
        assert!(model.constr("cap_unit_0_600").is_none());
        assert!(model.constr("cap_truck_0_510").is_some());
    }

    #[test]
    fn sync_and_tardiness_coefficients() {
        let problem = fixtures::single_batch();
        let (model, variables) = RmcModel::build(&problem).unwrap();
        let b = BatchIndex::from(0);
        let x = variables.x[&(b, UnitIndex::from(0), 480)];
        let y = variables.y[&(b, TruckIndex::from(0), 520)];

        // finish + wash <= departure
        let sync = model.constr("sync_0").unwrap();
        assert_eq!(sync.comparison.sense, Sense::Le);
        assert_eq!(sync.comparison.rhs, -10.0);
        assert_eq!(coefficient(&model, "sync_0", x), Some(510.0));
        assert_eq!(coefficient(&model, "sync_0", y), Some(-520.0));

        // T >= departure + 20 + 30 - 840
        let def = model.constr("def_tard_0").unwrap();
        assert_eq!(def.comparison.sense, Sense::Ge);
        assert_eq!(def.comparison.rhs, -790.0);
        assert_eq!(coefficient(&model, "def_tard_0", y), Some(-520.0));
        assert_eq!(coefficient(&model, "def_tard_0", variables.tardiness[b]), Some(1.0));

        // 2 * 10 km * 1.5 per km
        let objective = model.coefficients(model.objective());
        assert_eq!(objective.get(&y), Some(&30.0));
        assert_eq!(objective.get(&variables.truck_used[TruckIndex::from(0)]), Some(&100.0));
        assert_eq!(objective.get(&variables.slacks[&SlackKey::SettingTime(b)]), Some(&1000.0));
        assert_eq!(objective.get(&x), None);
    }

    #[test]
    fn shelf_life_uses_the_setting_time_of_the_concrete_type() {
        // age = departure + 20 + 30 - finish <= setting + slack
        let (p6, _) = RmcModel::build(&fixtures::single_batch()).unwrap();
        assert_eq!(p6.constr("shelf_life_0").unwrap().comparison.rhs, 90.0 - 50.0);

        let (p8, variables) = RmcModel::build(&fixtures::p8_site()).unwrap();
        for b in 0..3 {
            let constr = p8.constr(&format!("shelf_life_{}", b)).unwrap();
            assert_eq!(constr.comparison.sense, Sense::Le);
            assert_eq!(constr.comparison.rhs, 126.0 - 50.0);
            let slack = variables.slacks[&SlackKey::SettingTime(BatchIndex::from(b))];
            assert_eq!(coefficient(&p8, &format!("shelf_life_{}", b), slack), Some(-1.0));
        }
    }

    #[test]
    fn consecutive_batches_of_a_site_are_sequenced() {
        let problem = fixtures::two_batches_one_site();
        let (model, variables) = RmcModel::build(&problem).unwrap();

        let lag = SlackKey::Lag {
            site: SiteIndex::from(0),
            position: 0,
        };
        assert!(variables.slacks.contains_key(&lag));
        assert!(model.constr("seq_0_0").is_some());
        let constr = model.constr("lag_0_0").unwrap();
        // next unload start - current unload finish <= 60 + slack, with 20 minutes travel and 50 to unload finish
        assert_eq!(constr.comparison.rhs, 90.0);
        assert_eq!(coefficient(&model, "lag_0_0", variables.slacks[&lag]), Some(-1.0));
    }

    #[test]
    fn fallbacks_are_injected_for_batches_without_candidates() {
        let problem = Problem::new(
            vec![fixtures::site("s1", 840, 20)],
            vec![fixtures::truck("small", 8.0), fixtures::truck("big", 12.0)],
            vec![fixtures::unit("slow", 200), fixtures::unit("slower", 300)],
            vec![fixtures::batch("s1_b1", 0, 20.0)],
            ProblemParameters::new(480, 600),
        )
        .unwrap();
        let (_, variables) = RmcModel::build(&problem).unwrap();
        let b = BatchIndex::from(0);

        assert_eq!(
            variables.fallbacks,
            vec![Fallback::Production(b), Fallback::Transport(b)]
        );
        assert_eq!(variables.production_candidates(b), vec![(UnitIndex::from(0), 480)]);
        assert_eq!(variables.transport_candidates(b), vec![(TruckIndex::from(1), 480)]);
        assert_eq!(variables.truck_trips(TruckIndex::from(0)).count(), 0);
    }

    #[test]
    fn candidates_are_sorted_by_time_then_resource() {
        let problem = fixtures::three_sites();
        let (_, variables) = RmcModel::build(&problem).unwrap();

        let candidates = variables.production_candidates(BatchIndex::from(0));
        assert_eq!(candidates[0], (UnitIndex::from(0), 420));
        assert_eq!(candidates[1], (UnitIndex::from(1), 420));
        assert!(candidates.windows(2).all(|w| (w[0].1, w[0].0) < (w[1].1, w[1].0)));

        // only the big truck can carry 12 m3
        assert!(variables
            .transport(BatchIndex::from(0))
            .all(|(v, _, _)| v == TruckIndex::from(0)));
        assert!(variables
            .transport_candidates(BatchIndex::from(2))
            .iter()
            .any(|(v, _)| *v == TruckIndex::from(1)));
    }

    #[test]
    fn empty_tables_are_rejected() {
        let problem = Problem::new(
            vec![fixtures::site("s1", 840, 20)],
            vec![],
            vec![fixtures::unit("u1", 30)],
            vec![fixtures::batch("s1_b1", 0, 10.0)],
            ProblemParameters::new(480, 600),
        )
        .unwrap();
        assert!(matches!(
            RmcModel::build(&problem),
            Err(BuildError::MissingTable(Table::Trucks))
        ));
    }
}
