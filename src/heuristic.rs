//! Greedy earliest-due-first construction of a complete schedule, used as warm start for the solver.

use std::collections::BTreeMap;

use derive_more::Display;
use log::{debug, info, trace, warn};
use typed_index_collections::TiVec;

use crate::models::milp::{Model, ModelError, Values, VarIndex};
use crate::models::rmc::sets_and_parameters::Parameters;
use crate::models::rmc::{SlackKey, Variables};
use crate::problem::{BatchIndex, Minutes, Problem, SiteIndex, TruckIndex, UnitIndex};

/// Added to every positive soft constraint violation when setting the start value of its slack
pub const WARM_START_SLACK_MARGIN: Minutes = 10;

/// How a production or transport slot was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Placement {
    /// Every resource and timing restriction is respected
    Ideal,
    /// Timing is respected, but the truck may still be busy
    Relaxed,
    /// Nothing better existed, the latest candidate was taken
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum VariableKind {
    #[display(fmt = "production")]
    Production,
    #[display(fmt = "transport")]
    Transport,
    #[display(fmt = "tardiness")]
    Tardiness,
    #[display(fmt = "truck usage")]
    TruckUsage,
    #[display(fmt = "time lag slack")]
    Lag,
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum HeuristicError {
    #[display(fmt = "no {} variables for batch {}", kind, batch)]
    MissingVariables { batch: BatchIndex, kind: VariableKind },
    #[display(fmt = "expected {} {} variables, the registry has {}", expected, kind, found)]
    RegistryMismatch {
        kind: VariableKind,
        expected: usize,
        found: usize,
    },
}

impl std::error::Error for HeuristicError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductionChoice {
    pub unit: UnitIndex,
    pub start: Minutes,
    pub finish: Minutes,
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportChoice {
    pub truck: TruckIndex,
    pub departure: Minutes,
    pub unload_start: Minutes,
    pub unload_finish: Minutes,
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub production: ProductionChoice,
    pub transport: TransportChoice,
}

/// A complete assignment of every batch, together with a start value for every variable of the model
#[derive(Debug, Clone, PartialEq)]
pub struct Construction {
    /// The batches in the order they were placed
    pub order: Vec<BatchIndex>,
    pub assignments: BTreeMap<BatchIndex, Assignment>,
    pub start: BTreeMap<VarIndex, f64>,
}

impl Construction {
    /// Number of batches where production or transport had to be forced
    pub fn forced(&self) -> usize {
        self.assignments
            .values()
            .filter(|a| a.production.placement == Placement::Forced || a.transport.placement == Placement::Forced)
            .count()
    }

    /// Number of transports placed with the given placement
    pub fn transports(&self, placement: Placement) -> usize {
        self.assignments
            .values()
            .filter(|a| a.transport.placement == placement)
            .count()
    }

    /// Sets the start values of the model
    pub fn apply(&self, model: &mut Model) -> Result<(), ModelError> {
        for (var, value) in &self.start {
            model.set_start(*var, *value)?;
        }
        Ok(())
    }

    /// The start values as a solution of the model
    pub fn values(&self, model: &Model) -> Values {
        model.vars().keys().map(|var| self.start.get(&var).copied()).collect()
    }
}

pub struct GreedyConstructor<'a> {
    problem: &'a Problem,
    variables: &'a Variables,
    parameters: Parameters,
}

impl<'a> GreedyConstructor<'a> {
    pub fn new(problem: &'a Problem, variables: &'a Variables) -> GreedyConstructor<'a> {
        GreedyConstructor {
            problem,
            variables,
            parameters: Parameters::new(problem),
        }
    }

    /// Places every batch in earliest-due-first order
    pub fn construct(&self) -> Result<Construction, HeuristicError> {
        self.check_registry()?;

        let p = &self.parameters;
        let problem = self.problem;
        info!("Constructing warm start for {} batches", problem.batches().len());

        // sort_by_key is stable, ties keep batch index order
        let mut order = problem.batches().keys().collect::<Vec<_>>();
        order.sort_by_key(|b| p.due[*b]);

        let mut next_free: TiVec<UnitIndex, Minutes> = vec![p.T1; problem.units().len()].into();
        let mut busy_until: TiVec<TruckIndex, Minutes> = vec![p.T1; problem.trucks().len()].into();
        let mut last_unload: TiVec<SiteIndex, Option<Minutes>> = vec![None; problem.sites().len()].into();

        let mut assignments = BTreeMap::new();
        for &b in &order {
            let site = problem.batches()[b].site;
            let production = self.place_production(b, &next_free)?;

            let mut min_departure = production.finish + p.W + p.H;
            if let Some(last) = last_unload[site] {
                min_departure = min_departure.max(last - p.travel[b]);
            }

            let transport = self.place_transport(b, min_departure, &busy_until)?;

            trace!(
                "batch {}: unit {} at {} ({}), truck {} at {} ({})",
                b,
                production.unit,
                production.start,
                production.placement,
                transport.truck,
                transport.departure,
                transport.placement
            );
            if production.placement == Placement::Forced || transport.placement == Placement::Forced {
                warn!("batch {} could only be placed by force", b);
            }

            let unit = &mut next_free[production.unit];
            *unit = (*unit).max(production.finish);
            let truck = &mut busy_until[transport.truck];
            *truck = (*truck).max(p.return_time(b, transport.departure));
            last_unload[site] = Some(match last_unload[site] {
                Some(last) => last.max(transport.unload_finish),
                None => transport.unload_finish,
            });

            assignments.insert(b, Assignment { production, transport });
        }

        let start = self.start_values(&assignments);
        let construction = Construction {
            order,
            assignments,
            start,
        };

        info!(
            "Warm start placed {} transports ideally, {} relaxed, {} batches forced",
            construction.transports(Placement::Ideal),
            construction.transports(Placement::Relaxed),
            construction.forced()
        );

        Ok(construction)
    }

    /// Every batch must own production, transport and tardiness variables, and every truck a usage variable
    fn check_registry(&self) -> Result<(), HeuristicError> {
        let batches = self.problem.batches().len();
        let registered = self.variables.num_batches();
        if registered < batches {
            return Err(HeuristicError::MissingVariables {
                batch: BatchIndex::from(registered),
                kind: VariableKind::Tardiness,
            });
        }
        if registered != batches {
            return Err(HeuristicError::RegistryMismatch {
                kind: VariableKind::Tardiness,
                expected: batches,
                found: registered,
            });
        }

        let trucks = self.problem.trucks().len();
        if self.variables.truck_used.len() != trucks {
            return Err(HeuristicError::RegistryMismatch {
                kind: VariableKind::TruckUsage,
                expected: trucks,
                found: self.variables.truck_used.len(),
            });
        }

        // one lag slack between every two consecutive batches of a site
        let expected = self
            .problem
            .batches_by_site()
            .iter_enumerated()
            .flat_map(|(site, batches)| (1..batches.len()).map(move |i| SlackKey::Lag { site, position: i - 1 }))
            .collect::<Vec<_>>();
        let found = self
            .variables
            .slacks
            .keys()
            .filter(|key| matches!(key, SlackKey::Lag { .. }))
            .copied()
            .collect::<Vec<_>>();
        if expected != found {
            return Err(HeuristicError::RegistryMismatch {
                kind: VariableKind::Lag,
                expected: expected.len(),
                found: found.len(),
            });
        }

        Ok(())
    }

    fn place_production(
        &self,
        b: BatchIndex,
        next_free: &TiVec<UnitIndex, Minutes>,
    ) -> Result<ProductionChoice, HeuristicError> {
        let candidates = self.variables.production_candidates(b);

        let ((unit, start), placement) = match candidates.iter().find(|(u, t)| *t >= next_free[*u]) {
            Some(candidate) => (*candidate, Placement::Ideal),
            None => {
                let latest = candidates.last().ok_or(HeuristicError::MissingVariables {
                    batch: b,
                    kind: VariableKind::Production,
                })?;
                (*latest, Placement::Forced)
            }
        };

        Ok(ProductionChoice {
            unit,
            start,
            finish: start + self.parameters.P[unit],
            placement,
        })
    }

    fn place_transport(
        &self,
        b: BatchIndex,
        min_departure: Minutes,
        busy_until: &TiVec<TruckIndex, Minutes>,
    ) -> Result<TransportChoice, HeuristicError> {
        let p = &self.parameters;
        let candidates = self.variables.transport_candidates(b);

        let ideal = candidates
            .iter()
            .find(|(v, t)| *t >= min_departure && *t - p.W >= busy_until[*v])
            .map(|c| (*c, Placement::Ideal));
        let relaxed = || {
            candidates
                .iter()
                .find(|(_, t)| *t >= min_departure)
                .map(|c| (*c, Placement::Relaxed))
        };
        let forced = || candidates.last().map(|c| (*c, Placement::Forced));

        let ((truck, departure), placement) =
            ideal
                .or_else(relaxed)
                .or_else(forced)
                .ok_or(HeuristicError::MissingVariables {
                    batch: b,
                    kind: VariableKind::Transport,
                })?;

        if placement != Placement::Ideal {
            debug!(
                "batch {}: no ideal departure after {}, took truck {} at {} ({})",
                b, min_departure, truck, departure, placement
            );
        }

        Ok(TransportChoice {
            truck,
            departure,
            unload_start: p.unload_start(b, departure),
            unload_finish: p.unload_finish(b, departure),
            placement,
        })
    }

    /// Start values for every variable: chosen binaries at one, tardiness as realized and slacks with a margin
    fn start_values(&self, assignments: &BTreeMap<BatchIndex, Assignment>) -> BTreeMap<VarIndex, f64> {
        let p = &self.parameters;
        let variables = self.variables;
        let mut start = BTreeMap::new();

        let binary = |chosen: bool| if chosen { 1.0 } else { 0.0 };

        for (&(b, u, t), &var) in &variables.x {
            let chosen = assignments
                .get(&b)
                .map_or(false, |a| a.production.unit == u && a.production.start == t);
            start.insert(var, binary(chosen));
        }

        for (&(b, v, t), &var) in &variables.y {
            let chosen = assignments
                .get(&b)
                .map_or(false, |a| a.transport.truck == v && a.transport.departure == t);
            start.insert(var, binary(chosen));
        }

        for (v, &var) in variables.truck_used.iter_enumerated() {
            let used = assignments.values().any(|a| a.transport.truck == v);
            start.insert(var, binary(used));
        }

        let tardiness = |b: BatchIndex| {
            assignments
                .get(&b)
                .map(|a| (a.transport.unload_finish - p.due[b]).max(0))
        };

        for (b, &var) in variables.tardiness.iter_enumerated() {
            if let Some(late) = tardiness(b) {
                start.insert(var, late as f64);
            }
        }

        let by_site = self.problem.batches_by_site();
        for (key, &var) in &variables.slacks {
            let violation = match *key {
                SlackKey::SettingTime(b) => assignments
                    .get(&b)
                    .map(|a| a.transport.unload_finish - a.production.finish - p.setting[b]),
                SlackKey::MaxTardiness(b) => tardiness(b).map(|late| late - p.max_tardiness),
                SlackKey::Lag { site, position } => {
                    let pair = by_site
                        .get(site)
                        .and_then(|batches| Some((batches.get(position)?, batches.get(position + 1)?)));
                    pair.and_then(|(current, next)| {
                        let current = assignments.get(current)?;
                        let next = assignments.get(next)?;
                        Some(next.transport.unload_start - current.transport.unload_finish - p.max_lag)
                    })
                }
            };

            if let Some(violation) = violation {
                start.insert(var, (violation + WARM_START_SLACK_MARGIN).max(0) as f64);
            }
        }

        start
    }
}
