//! Feasibility checks of a solved (or warm start) schedule.
//!
//! Every check runs regardless of what the others find, and none of them fail: the outcome is a [`Report`]
//! listing each violation found.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use itertools::Itertools;
use log::{debug, info};
use slice_group_by::GroupBy;
use typed_index_collections::TiSlice;

use crate::models::milp::VarIndex;
use crate::models::rmc::Variables;
use crate::problem::{BatchIndex, Minutes, Problem, SiteIndex, TruckIndex, UnitIndex, Volume};
use crate::solution::{DeliveryRecord, ProductionRecord, Schedule, BINARY_THRESHOLD};

/// Largest accepted difference between reported and recomputed tardiness, in minutes
pub const TARDINESS_TOLERANCE: f64 = 1.0;

/// Two productions overlap on the same unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOverlap {
    pub unit: UnitIndex,
    pub first: BatchIndex,
    pub second: BatchIndex,
    /// When the first production finishes
    pub finish: Minutes,
    /// When the second production starts
    pub next_start: Minutes,
}

/// A batch leaves before it is produced and the truck is washed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarlyDeparture {
    pub batch: BatchIndex,
    pub departure: Minutes,
    pub earliest: Minutes,
}

/// A truck leaves with more than one batch at once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruckDoubleUse {
    pub truck: TruckIndex,
    pub departure: Minutes,
    pub batches: Vec<BatchIndex>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapacityExceeded {
    pub batch: BatchIndex,
    pub truck: TruckIndex,
    pub volume: Volume,
    pub capacity: Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruckUsage {
    /// The truck transports something, but is not marked as used
    UsedButUnmarked(TruckIndex),
    /// The truck is marked as used, but transports nothing
    MarkedButUnused(TruckIndex),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TardinessMismatch {
    pub batch: BatchIndex,
    pub recomputed: f64,
    pub reported: f64,
}

/// Two consecutive unloads at a site overlap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadOverlap {
    pub site: SiteIndex,
    pub current: BatchIndex,
    pub next: BatchIndex,
}

/// The site waits too long between two consecutive unloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagExceeded {
    pub site: SiteIndex,
    pub current: BatchIndex,
    pub next: BatchIndex,
    pub gap: Minutes,
}

/// The concrete has set before unloading is done
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingTimeExceeded {
    pub batch: BatchIndex,
    /// Time from production finish to unload finish
    pub elapsed: Minutes,
    pub limit: Minutes,
}

/// A batch that is not produced exactly once and transported exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentIssue {
    MissingProduction(BatchIndex),
    MissingTransport(BatchIndex),
    Unassigned(BatchIndex),
    MultipleProductions(BatchIndex),
    MultipleTransports(BatchIndex),
}

/// The violations found in a schedule, by check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub unit_overlap: Vec<UnitOverlap>,
    pub departure: Vec<EarlyDeparture>,
    pub truck_double_use: Vec<TruckDoubleUse>,
    pub capacity: Vec<CapacityExceeded>,
    pub truck_usage: Vec<TruckUsage>,
    pub tardiness: Vec<TardinessMismatch>,
    pub unload_overlap: Vec<UnloadOverlap>,
    pub max_lag: Vec<LagExceeded>,
    pub setting_time: Vec<SettingTimeExceeded>,
    pub assignment: Vec<AssignmentIssue>,
}

impl Report {
    /// Number of violations of constraints the model treats as hard
    pub fn hard_violations(&self) -> usize {
        self.unit_overlap.len()
            + self.departure.len()
            + self.truck_double_use.len()
            + self.capacity.len()
            + self.truck_usage.len()
            + self.tardiness.len()
            + self.unload_overlap.len()
            + self.assignment.len()
    }

    /// Number of violations of constraints the model may relax at a penalty
    pub fn soft_violations(&self) -> usize {
        self.max_lag.len() + self.setting_time.len()
    }

    pub fn total(&self) -> usize {
        self.hard_violations() + self.soft_violations()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "unit overlap: {}", self.unit_overlap.len())?;
        writeln!(f, "departure before production finish + wait + wash: {}", self.departure.len())?;
        writeln!(f, "truck double use: {}", self.truck_double_use.len())?;
        writeln!(f, "capacity: {}", self.capacity.len())?;
        writeln!(f, "truck usage inconsistencies: {}", self.truck_usage.len())?;
        writeln!(f, "tardiness inconsistencies: {}", self.tardiness.len())?;
        writeln!(f, "unload overlap: {}", self.unload_overlap.len())?;
        writeln!(f, "max time lag: {}", self.max_lag.len())?;
        writeln!(f, "setting time: {}", self.setting_time.len())?;
        write!(f, "assignment: {}", self.assignment.len())
    }
}

/// Rebuilds the schedule encoded by `values` and checks it against the problem
pub fn validate(problem: &Problem, variables: &Variables, values: &TiSlice<VarIndex, Option<f64>>) -> Report {
    let schedule = Schedule::from_values(problem, variables, values);
    validate_schedule(problem, &schedule)
}

pub fn validate_schedule(problem: &Problem, schedule: &Schedule) -> Report {
    debug!(
        "Validating schedule with {} productions and {} deliveries",
        schedule.production.len(),
        schedule.deliveries.len()
    );

    // the first production of each batch, for checks that need to know when the batch is ready
    let mut produced: BTreeMap<BatchIndex, &ProductionRecord> = BTreeMap::new();
    for record in &schedule.production {
        produced.entry(record.batch).or_insert(record);
    }

    let (unload_overlap, max_lag) = site_sequence(schedule, problem.parameters().max_time_lag);
    let report = Report {
        unit_overlap: unit_overlap(schedule),
        departure: departure(problem, schedule, &produced),
        truck_double_use: truck_double_use(schedule),
        capacity: capacity(problem, schedule),
        truck_usage: truck_usage(schedule),
        tardiness: tardiness(problem, schedule),
        unload_overlap,
        max_lag,
        setting_time: setting_time(problem, schedule, &produced),
        assignment: assignment(problem, schedule),
    };

    info!(
        "Validation found {} hard and {} soft violations",
        report.hard_violations(),
        report.soft_violations()
    );

    report
}

fn unit_overlap(schedule: &Schedule) -> Vec<UnitOverlap> {
    // productions are ordered by unit and start
    schedule
        .production
        .linear_group_by_key(|r| r.unit)
        .flat_map(|group| group.iter().tuple_windows())
        .filter(|(current, next)| current.finish > next.start)
        .map(|(current, next)| UnitOverlap {
            unit: current.unit,
            first: current.batch,
            second: next.batch,
            finish: current.finish,
            next_start: next.start,
        })
        .collect()
}

fn departure(
    problem: &Problem,
    schedule: &Schedule,
    produced: &BTreeMap<BatchIndex, &ProductionRecord>,
) -> Vec<EarlyDeparture> {
    let params = problem.parameters();
    schedule
        .deliveries
        .iter()
        .filter_map(|r| {
            let earliest = produced.get(&r.batch)?.finish + params.wait_before_departure + params.wash_time;
            (r.departure < earliest).then(|| EarlyDeparture {
                batch: r.batch,
                departure: r.departure,
                earliest,
            })
        })
        .collect()
}

fn truck_double_use(schedule: &Schedule) -> Vec<TruckDoubleUse> {
    // deliveries are ordered by truck and departure
    schedule
        .deliveries
        .linear_group_by_key(|r| (r.truck, r.departure))
        .filter(|group| group.len() > 1)
        .map(|group| TruckDoubleUse {
            truck: group[0].truck,
            departure: group[0].departure,
            batches: group.iter().map(|r| r.batch).collect(),
        })
        .collect()
}

fn capacity(problem: &Problem, schedule: &Schedule) -> Vec<CapacityExceeded> {
    schedule
        .deliveries
        .iter()
        .filter_map(|r| {
            let volume = problem.batches()[r.batch].volume;
            let capacity = problem.trucks()[r.truck].capacity;
            (volume > capacity + 1e-6).then(|| CapacityExceeded {
                batch: r.batch,
                truck: r.truck,
                volume,
                capacity,
            })
        })
        .collect()
}

fn truck_usage(schedule: &Schedule) -> Vec<TruckUsage> {
    let used = schedule.deliveries.iter().map(|r| r.truck).collect::<BTreeSet<_>>();
    schedule
        .truck_used
        .iter_enumerated()
        .filter_map(|(v, value)| match (used.contains(&v), *value > BINARY_THRESHOLD) {
            (true, false) => Some(TruckUsage::UsedButUnmarked(v)),
            (false, true) => Some(TruckUsage::MarkedButUnused(v)),
            _ => None,
        })
        .collect()
}

fn tardiness(problem: &Problem, schedule: &Schedule) -> Vec<TardinessMismatch> {
    schedule
        .deliveries
        .iter()
        .filter_map(|r| {
            let recomputed = (r.unload_finish - problem.sites()[r.site].tw_end).max(0) as f64;
            let reported = schedule.tardiness.get(r.batch).copied().unwrap_or(0.0);
            ((recomputed - reported).abs() > TARDINESS_TOLERANCE).then(|| TardinessMismatch {
                batch: r.batch,
                recomputed,
                reported,
            })
        })
        .collect()
}

/// Overlapping unloads and too long gaps between consecutive unloads at each site
fn site_sequence(schedule: &Schedule, max_lag: Minutes) -> (Vec<UnloadOverlap>, Vec<LagExceeded>) {
    let by_site = schedule
        .deliveries
        .iter()
        .sorted_by_key(|r| (r.site, r.unload_start, r.batch))
        .collect::<Vec<&DeliveryRecord>>();

    let mut overlap = Vec::new();
    let mut lag = Vec::new();
    for group in by_site.linear_group_by_key(|r| r.site) {
        for (current, next) in group.iter().tuple_windows() {
            if next.unload_start < current.unload_finish {
                overlap.push(UnloadOverlap {
                    site: current.site,
                    current: current.batch,
                    next: next.batch,
                });
            }
            let gap = next.unload_start - current.unload_finish;
            if gap > max_lag {
                lag.push(LagExceeded {
                    site: current.site,
                    current: current.batch,
                    next: next.batch,
                    gap,
                });
            }
        }
    }

    (overlap, lag)
}

fn setting_time(
    problem: &Problem,
    schedule: &Schedule,
    produced: &BTreeMap<BatchIndex, &ProductionRecord>,
) -> Vec<SettingTimeExceeded> {
    schedule
        .deliveries
        .iter()
        .filter_map(|r| {
            let elapsed = r.unload_finish - produced.get(&r.batch)?.finish;
            let limit = problem.setting_time(r.batch);
            (elapsed > limit).then(|| SettingTimeExceeded {
                batch: r.batch,
                elapsed,
                limit,
            })
        })
        .collect()
}

fn assignment(problem: &Problem, schedule: &Schedule) -> Vec<AssignmentIssue> {
    problem
        .batches()
        .keys()
        .flat_map(|b| {
            let productions = schedule.production_of(b).count();
            let transports = schedule.deliveries_of(b).count();

            let mut issues = Vec::new();
            match (productions, transports) {
                (0, 0) => issues.push(AssignmentIssue::Unassigned(b)),
                (0, _) => issues.push(AssignmentIssue::MissingProduction(b)),
                (_, 0) => issues.push(AssignmentIssue::MissingTransport(b)),
                _ => (),
            }
            if productions > 1 {
                issues.push(AssignmentIssue::MultipleProductions(b));
            }
            if transports > 1 {
                issues.push(AssignmentIssue::MultipleTransports(b));
            }
            issues
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::heuristic::GreedyConstructor;
    use crate::models::milp::Values;
    use crate::models::rmc::RmcModel;
    use typed_index_collections::TiVec;

    fn warm_start_report(problem: &Problem) -> Report {
        let (model, variables) = RmcModel::build(problem).unwrap();
        let construction = GreedyConstructor::new(problem, &variables).construct().unwrap();
        validate(problem, &variables, &construction.values(&model))
    }

    #[test]
    fn clean_schedule_has_no_violations() {
        let report = warm_start_report(&fixtures::single_batch());
        assert!(report.is_empty(), "{}", report);
    }

    #[test]
    fn soft_setting_time_violation_is_reported() {
        let report = warm_start_report(&fixtures::two_batches_one_site());
        assert_eq!(report.hard_violations(), 0, "{}", report);
        assert_eq!(
            report.setting_time,
            vec![SettingTimeExceeded {
                batch: BatchIndex::from(1),
                elapsed: 110,
                limit: 90
            }]
        );
    }

    #[test]
    fn forced_placements_accumulate_violations() {
        let report = warm_start_report(&fixtures::tight_horizon(540));
        let (b0, b1) = (BatchIndex::from(0), BatchIndex::from(1));

        assert_eq!(
            report.unit_overlap,
            vec![UnitOverlap {
                unit: UnitIndex::from(0),
                first: b0,
                second: b1,
                finish: 530,
                next_start: 490
            }]
        );
        assert_eq!(
            report.departure,
            vec![EarlyDeparture {
                batch: b1,
                departure: 540,
                earliest: 550
            }]
        );
        assert_eq!(
            report.truck_double_use,
            vec![TruckDoubleUse {
                truck: TruckIndex::from(0),
                departure: 540,
                batches: vec![b0, b1]
            }]
        );
        assert_eq!(report.unload_overlap.len(), 1);
        assert!(report.capacity.is_empty());
        assert!(report.truck_usage.is_empty());
        assert!(report.tardiness.is_empty());
        assert!(report.assignment.is_empty());
    }

    #[test]
    fn absent_values_are_unassigned_batches() {
        let problem = fixtures::two_batches_one_site();
        let (_, variables) = RmcModel::build(&problem).unwrap();
        let values: Values = TiVec::new();
        let report = validate(&problem, &variables, &values);

        assert_eq!(
            report.assignment,
            vec![
                AssignmentIssue::Unassigned(BatchIndex::from(0)),
                AssignmentIssue::Unassigned(BatchIndex::from(1))
            ]
        );
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn inconsistent_reported_values_are_flagged() {
        let problem = fixtures::single_batch();
        let (model, variables) = RmcModel::build(&problem).unwrap();
        let construction = GreedyConstructor::new(&problem, &variables).construct().unwrap();
        let mut values = construction.values(&model);

        let b = BatchIndex::from(0);
        values[variables.tardiness[b]] = Some(15.0);
        values[variables.truck_used[TruckIndex::from(0)]] = Some(0.0);
        // a second production of the same batch
        let (_, _, var) = variables.production(b).last().unwrap();
        values[var] = Some(1.0);

        let report = validate(&problem, &variables, &values);
        assert_eq!(report.tardiness.len(), 1);
        assert_eq!(report.tardiness[0].reported, 15.0);
        assert_eq!(report.truck_usage, vec![TruckUsage::UsedButUnmarked(TruckIndex::from(0))]);
        assert_eq!(report.assignment, vec![AssignmentIssue::MultipleProductions(b)]);
    }

    #[test]
    fn fallback_transport_breaks_capacity() {
        let base = fixtures::single_batch();
        let problem = Problem::new(
            base.sites().iter().cloned().collect(),
            base.trucks().iter().cloned().collect(),
            base.units().iter().cloned().collect(),
            vec![fixtures::batch("huge", 0, 20.0)],
            base.parameters().clone(),
        )
        .unwrap();

        let report = warm_start_report(&problem);
        assert_eq!(report.capacity.len(), 1);
        assert_eq!(report.capacity[0].volume, 20.0);
        assert_eq!(report.capacity[0].capacity, 12.0);
    }
}
