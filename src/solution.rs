use std::collections::BTreeMap;
use std::fmt::Display;

use float_ord::FloatOrd;
use itertools::Itertools;
use typed_index_collections::{TiSlice, TiVec};

use crate::models::milp::VarIndex;
use crate::models::rmc::{SlackKey, Variables};
use crate::models::utils::ConvertVars;
use crate::problem::{BatchIndex, Cost, Minutes, Problem, SiteIndex, TruckIndex, UnitIndex};

/// A binary variable with a value above this is taken as one
pub const BINARY_THRESHOLD: f64 = 0.5;
/// Slacks above this are reported as active
pub const ACTIVE_SLACK_THRESHOLD: f64 = 0.1;

/// Production of a batch on a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductionRecord {
    pub batch: BatchIndex,
    pub unit: UnitIndex,
    /// The time production starts
    pub start: Minutes,
    /// The time production is done
    pub finish: Minutes,
}

/// Delivery of a batch by a truck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub batch: BatchIndex,
    pub truck: TruckIndex,
    /// The site the batch is delivered to
    pub site: SiteIndex,
    /// The time the truck leaves the plant
    pub departure: Minutes,
    /// The time the truck arrives at the site and starts unloading
    pub unload_start: Minutes,
    /// The time unloading is done
    pub unload_finish: Minutes,
}

/// The production and delivery schedule encoded by the values of the scheduling model.
/// Nothing is assumed about the values: a batch may appear zero, one or several times.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    /// Productions ordered by unit, then start
    pub production: Vec<ProductionRecord>,
    /// Deliveries ordered by truck, then departure
    pub deliveries: Vec<DeliveryRecord>,
    /// The reported tardiness of each batch
    pub tardiness: TiVec<BatchIndex, f64>,
    /// The reported usage of each truck
    pub truck_used: TiVec<TruckIndex, f64>,
    /// The value of every slack
    pub slacks: BTreeMap<SlackKey, f64>,
}

impl Schedule {
    pub fn from_values(problem: &Problem, variables: &Variables, values: &TiSlice<VarIndex, Option<f64>>) -> Schedule {
        let params = problem.parameters();

        let production = variables
            .x
            .iter()
            .filter(|(_, var)| var.convert(values) > BINARY_THRESHOLD)
            .map(|(&(batch, unit, start), _)| ProductionRecord {
                batch,
                unit,
                start,
                finish: start + problem.units()[unit].process_time,
            })
            .sorted_by_key(|r| (r.unit, r.start, r.batch))
            .collect();

        let deliveries = variables
            .y
            .iter()
            .filter(|(_, var)| var.convert(values) > BINARY_THRESHOLD)
            .map(|(&(batch, truck, departure), _)| {
                let site = problem.batches()[batch].site;
                let unload_start = departure + problem.sites()[site].travel_time;
                DeliveryRecord {
                    batch,
                    truck,
                    site,
                    departure,
                    unload_start,
                    unload_finish: unload_start + params.unload_time,
                }
            })
            .sorted_by_key(|r| (r.truck, r.departure, r.batch))
            .collect();

        Schedule {
            production,
            deliveries,
            tardiness: variables.tardiness.convert(values),
            truck_used: variables.truck_used.convert(values),
            slacks: variables.slacks.convert(values),
        }
    }

    /// The productions of batch b
    pub fn production_of(&self, b: BatchIndex) -> impl Iterator<Item = &ProductionRecord> + '_ {
        self.production.iter().filter(move |r| r.batch == b)
    }

    /// The deliveries of batch b
    pub fn deliveries_of(&self, b: BatchIndex) -> impl Iterator<Item = &DeliveryRecord> + '_ {
        self.deliveries.iter().filter(move |r| r.batch == b)
    }

    /// Slacks above [`ACTIVE_SLACK_THRESHOLD`], largest first
    pub fn active_slacks(&self) -> Vec<(SlackKey, f64)> {
        self.slacks
            .iter()
            .filter(|(_, value)| **value > ACTIVE_SLACK_THRESHOLD)
            .map(|(key, value)| (*key, *value))
            .sorted_by_key(|(key, value)| (std::cmp::Reverse(FloatOrd(*value)), *key))
            .collect()
    }

    /// The objective value of the schedule, split into its parts
    pub fn cost(&self, problem: &Problem) -> CostSummary {
        let params = problem.parameters();

        let transport = self
            .deliveries
            .iter()
            .map(|r| 2.0 * problem.sites()[r.site].distance * problem.trucks()[r.truck].variable_cost)
            .sum::<Cost>();
        let fixed = self
            .truck_used
            .iter_enumerated()
            .map(|(v, used)| problem.trucks()[v].fixed_cost * used)
            .sum::<Cost>();
        let tardiness = self.tardiness.iter().sum::<f64>();
        let slack = params.penalty * self.slacks.values().sum::<f64>();

        CostSummary {
            transport,
            fixed,
            tardiness,
            slack,
            objective: params.alpha * (transport + fixed) + params.beta * tardiness + slack,
        }
    }
}

/// The terms of the objective
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostSummary {
    /// Distance based cost of all trips
    pub transport: Cost,
    /// Fixed cost of the trucks in use
    pub fixed: Cost,
    /// Total tardiness in minutes
    pub tardiness: f64,
    /// Penalty paid for soft constraint violations
    pub slack: Cost,
    /// The weighted objective
    pub objective: Cost,
}

impl Display for CostSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "objective {:.2} (transport {:.2}, fixed {:.2}, tardiness {:.1} min, slack penalty {:.2})",
            self.objective, self.transport, self.fixed, self.tardiness, self.slack
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::heuristic::GreedyConstructor;
    use crate::models::milp::Values;
    use crate::models::rmc::RmcModel;

    #[test]
    fn schedule_of_warm_start() {
        let problem = fixtures::two_batches_one_site();
        let (model, variables) = RmcModel::build(&problem).unwrap();
        let construction = GreedyConstructor::new(&problem, &variables).construct().unwrap();
        let schedule = Schedule::from_values(&problem, &variables, &construction.values(&model));

        let starts = schedule.production.iter().map(|r| (r.batch, r.start, r.finish)).collect::<Vec<_>>();
        assert_eq!(
            starts,
            vec![(BatchIndex::from(0), 480, 510), (BatchIndex::from(1), 510, 540)]
        );
        let unloads = schedule
            .deliveries
            .iter()
            .map(|r| (r.departure, r.unload_start, r.unload_finish))
            .collect::<Vec<_>>();
        assert_eq!(unloads, vec![(520, 540, 570), (600, 620, 650)]);

        assert_eq!(schedule.active_slacks(), vec![(SlackKey::SettingTime(BatchIndex::from(1)), 30.0)]);
    }

    #[test]
    fn cost_matches_model_objective() {
        let problem = fixtures::three_sites();
        let (model, variables) = RmcModel::build(&problem).unwrap();
        let construction = GreedyConstructor::new(&problem, &variables).construct().unwrap();
        let values = construction.values(&model);

        let cost = Schedule::from_values(&problem, &variables, &values).cost(&problem);
        assert!((cost.objective - model.evaluate_objective(&values)).abs() < 1e-6);
        assert!(cost.transport > 0.0);
    }

    #[test]
    fn missing_values_give_an_empty_schedule() {
        let problem = fixtures::single_batch();
        let (_, variables) = RmcModel::build(&problem).unwrap();
        let values: Values = TiVec::new();
        let schedule = Schedule::from_values(&problem, &variables, &values);

        assert!(schedule.production.is_empty());
        assert!(schedule.deliveries.is_empty());
        assert_eq!(schedule.cost(&problem), CostSummary::default());
    }
}
