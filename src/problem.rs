use std::collections::HashMap;

use derive_more::{Deref, Display, From, Into};
use serde::{Deserialize, Serialize};
use typed_index_collections::TiVec;

/// The type used for points in time and durations, in whole minutes from midnight
pub type Minutes = i64;
/// The type used for concrete volume (m³)
pub type Volume = f64;
/// The type used for distance (km)
pub type Distance = f64;
/// The type used for cost
pub type Cost = f64;

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct BatchIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct UnitIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct TruckIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct SiteIndex(usize);

/// Setting time of the generic concrete type (`p6`), in minutes.
pub const DEFAULT_SETTING_TIME: Minutes = 90;

/// Normalizes an identifier the way sites are keyed: trimmed and lowercased.
pub fn normalize_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// The concrete category poured at a site. Determines how long a batch may stay unpoured after mixing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConcreteType {
    P1,
    P2,
    P3,
    P4,
    P5,
    P6,
    P7,
    P8,
    /// A category without an entry in the setting time table
    Other(String),
}

impl ConcreteType {
    pub fn parse(raw: &str) -> ConcreteType {
        match normalize_id(raw).as_str() {
            "p1" => ConcreteType::P1,
            "p2" => ConcreteType::P2,
            "p3" => ConcreteType::P3,
            "p4" => ConcreteType::P4,
            "p5" => ConcreteType::P5,
            "p6" => ConcreteType::P6,
            "p7" => ConcreteType::P7,
            "p8" => ConcreteType::P8,
            other => ConcreteType::Other(other.to_string()),
        }
    }

    /// The tabulated setting time of this category, if it has one
    pub fn setting_time(&self) -> Option<Minutes> {
        match self {
            ConcreteType::P1 | ConcreteType::P2 | ConcreteType::P7 => Some(108),
            ConcreteType::P3 | ConcreteType::P4 | ConcreteType::P5 => Some(114),
            ConcreteType::P6 => Some(DEFAULT_SETTING_TIME),
            ConcreteType::P8 => Some(126),
            ConcreteType::Other(_) => None,
        }
    }
}

impl Default for ConcreteType {
    fn default() -> Self {
        ConcreteType::P6
    }
}

/// A construction site with a demand for concrete.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    /// The normalized identifier of the site
    pub id: String,
    /// The total demand of the site
    pub demand: Volume,
    /// Start of the delivery time window
    pub tw_start: Minutes,
    /// End of the delivery time window. Unloading that finishes later is tardy.
    pub tw_end: Minutes,
    /// The concrete type poured at the site
    pub concrete_type: ConcreteType,
    /// Travel time between the plant and the site (one way)
    pub travel_time: Minutes,
    /// Distance between the plant and the site (one way)
    pub distance: Distance,
}

/// A mixer truck.
#[derive(Debug, Clone, PartialEq)]
pub struct Truck {
    pub id: String,
    /// The maximum volume the truck can carry
    pub capacity: Volume,
    /// The minimum economical load of the truck
    pub min_load: Volume,
    /// Cost charged once if the truck is used at all
    pub fixed_cost: Cost,
    /// Cost per distance unit travelled
    pub variable_cost: Cost,
}

/// A production line at the plant.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: String,
    /// The fixed time it takes to produce one batch
    pub process_time: Minutes,
}

/// A portion of a site's demand which is produced once and delivered by a single truck.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: String,
    /// The site the batch is delivered to
    pub site: SiteIndex,
    pub volume: Volume,
}

fn default_delta() -> Minutes {
    10
}
fn default_wash_time() -> Minutes {
    10
}
fn default_unload_time() -> Minutes {
    30
}
fn default_max_tardiness() -> Minutes {
    120
}
fn default_setting_time() -> Minutes {
    DEFAULT_SETTING_TIME
}
fn default_weight() -> f64 {
    1.0
}
fn default_max_time_lag() -> Minutes {
    60
}
fn default_penalty() -> f64 {
    1000.0
}

/// Global parameters of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Start of the planning horizon
    #[serde(rename = "T1")]
    pub t1: Minutes,
    /// End of the planning horizon
    #[serde(rename = "T2")]
    pub t2: Minutes,
    /// Step of the time grid
    #[serde(rename = "delta_min", default = "default_delta")]
    pub delta: Minutes,
    /// Time a truck is washed before departing
    #[serde(default = "default_wash_time")]
    pub wash_time: Minutes,
    /// Time it takes to unload a batch at a site
    #[serde(default = "default_unload_time")]
    pub unload_time: Minutes,
    /// Mandatory wait between the end of production and the departure
    #[serde(default)]
    pub wait_before_departure: Minutes,
    /// Tardiness a batch may accumulate before it is penalized as a violation
    #[serde(default = "default_max_tardiness")]
    pub max_tardiness_allowed: Minutes,
    /// Setting time used for concrete types missing from the setting time table
    #[serde(default = "default_setting_time")]
    pub setting_time: Minutes,
    /// Weight of the transport cost in the objective
    #[serde(default = "default_weight")]
    pub alpha: f64,
    /// Weight of the tardiness in the objective
    #[serde(default = "default_weight")]
    pub beta: f64,
    /// Largest gap allowed between two consecutive unloads at a site
    #[serde(default = "default_max_time_lag")]
    pub max_time_lag: Minutes,
    /// Cost per unit of soft constraint violation
    #[serde(default = "default_penalty")]
    pub penalty: f64,
}

impl Parameters {
    /// Parameters for the horizon `[t1, t2]`, with everything else at its default.
    pub fn new(t1: Minutes, t2: Minutes) -> Parameters {
        Parameters {
            t1,
            t2,
            delta: default_delta(),
            wash_time: default_wash_time(),
            unload_time: default_unload_time(),
            wait_before_departure: 0,
            max_tardiness_allowed: default_max_tardiness(),
            setting_time: default_setting_time(),
            alpha: default_weight(),
            beta: default_weight(),
            max_time_lag: default_max_time_lag(),
            penalty: default_penalty(),
        }
    }

    /// The setting time limit of a concrete type
    pub fn setting_time_of(&self, kind: &ConcreteType) -> Minutes {
        kind.setting_time().unwrap_or(self.setting_time)
    }
}

/// The discrete time points `start, start + step, ..., <= end` on which all decisions are made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeGrid {
    start: Minutes,
    end: Minutes,
    step: Minutes,
}

impl TimeGrid {
    pub fn new(start: Minutes, end: Minutes, step: Minutes) -> Result<TimeGrid, ProblemConstructionError> {
        if step <= 0 {
            return Err(ProblemConstructionError::NonPositiveTimeStep(step));
        }
        if end < start {
            return Err(ProblemConstructionError::EmptyHorizon { start, end });
        }

        Ok(TimeGrid { start, end, step })
    }

    pub fn start(&self) -> Minutes {
        self.start
    }

    pub fn end(&self) -> Minutes {
        self.end
    }

    pub fn step(&self) -> Minutes {
        self.step
    }

    /// The time points of the grid, in increasing order
    pub fn points(&self) -> impl Iterator<Item = Minutes> {
        // `step` is strictly positive
        (self.start..=self.end).step_by(self.step as usize)
    }

    /// Number of grid cells needed to cover `duration` minutes
    pub fn cells(&self, duration: Minutes) -> Minutes {
        if duration <= 0 {
            0
        } else {
            (duration + self.step - 1) / self.step
        }
    }

    /// Whether `time` lies within the horizon
    pub fn contains(&self, time: Minutes) -> bool {
        self.start <= time && time <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Display)]
pub enum ProblemConstructionError {
    /// Two sites normalize to the same identifier
    #[display(fmt = "duplicate site identifier '{}'", _0)]
    DuplicateSite(String),
    /// A batch refers to a site which does not exist
    #[display(fmt = "batch '{}' refers to unknown site '{}'", batch, site)]
    UnknownSite { batch: String, site: String },
    /// The time grid step must be strictly positive
    #[display(fmt = "time grid step must be positive, got {}", _0)]
    NonPositiveTimeStep(Minutes),
    /// The horizon ends before it starts
    #[display(fmt = "horizon [{}, {}] is empty", start, end)]
    EmptyHorizon { start: Minutes, end: Minutes },
    /// A batch has a volume which is not strictly positive
    #[display(fmt = "batch '{}' has non-positive volume {}", batch, volume)]
    NonPositiveVolume { batch: String, volume: Volume },
    /// Demand can not be split into batches without any truck capacity
    #[display(fmt = "no truck with positive capacity to split demand over")]
    NoTruckCapacity,
}

impl std::error::Error for ProblemConstructionError {}

/// The domain tables of a scheduling instance. Read-only once constructed.
#[derive(Debug, Clone)]
pub struct Problem {
    /// The construction sites, ordered by index
    sites: TiVec<SiteIndex, Site>,
    /// Lookup from normalized site identifier to site
    site_lookup: HashMap<String, SiteIndex>,
    /// The available trucks
    trucks: TiVec<TruckIndex, Truck>,
    /// The production units of the plant
    units: TiVec<UnitIndex, Unit>,
    /// The batches to produce and deliver
    batches: TiVec<BatchIndex, Batch>,
    /// The global parameters
    parameters: Parameters,
    /// The time grid all decisions are confined to
    grid: TimeGrid,
}

impl Problem {
    pub fn new(
        sites: Vec<Site>,
        trucks: Vec<Truck>,
        units: Vec<Unit>,
        batches: Vec<Batch>,
        parameters: Parameters,
    ) -> Result<Problem, ProblemConstructionError> {
        let grid = TimeGrid::new(parameters.t1, parameters.t2, parameters.delta)?;

        let mut site_lookup = HashMap::with_capacity(sites.len());
        let sites: TiVec<SiteIndex, Site> = sites
            .into_iter()
            .map(|site| Site {
                id: normalize_id(&site.id),
                ..site
            })
            .collect();

        for (index, site) in sites.iter_enumerated() {
            if site_lookup.insert(site.id.clone(), index).is_some() {
                return Err(ProblemConstructionError::DuplicateSite(site.id.clone()));
            }
        }

        for batch in &batches {
            if sites.get(batch.site).is_none() {
                return Err(ProblemConstructionError::UnknownSite {
                    batch: batch.id.clone(),
                    site: batch.site.to_string(),
                });
            }
            if batch.volume <= 0.0 {
                return Err(ProblemConstructionError::NonPositiveVolume {
                    batch: batch.id.clone(),
                    volume: batch.volume,
                });
            }
        }

        Ok(Problem {
            sites,
            site_lookup,
            trucks: trucks.into(),
            units: units.into(),
            batches: batches.into(),
            parameters,
            grid,
        })
    }

    /// The construction sites, ordered by index
    pub fn sites(&self) -> &TiVec<SiteIndex, Site> {
        &self.sites
    }

    /// The available trucks
    pub fn trucks(&self) -> &TiVec<TruckIndex, Truck> {
        &self.trucks
    }

    /// The production units
    pub fn units(&self) -> &TiVec<UnitIndex, Unit> {
        &self.units
    }

    /// The batches to produce and deliver
    pub fn batches(&self) -> &TiVec<BatchIndex, Batch> {
        &self.batches
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    /// Look up a site by identifier. The identifier is normalized before the lookup.
    pub fn site_index(&self, id: &str) -> Option<SiteIndex> {
        self.site_lookup.get(&normalize_id(id)).copied()
    }

    /// The site a batch is delivered to
    pub fn site_of(&self, batch: BatchIndex) -> &Site {
        &self.sites[self.batches[batch].site]
    }

    /// The setting time limit of a batch, given by the concrete type of its site
    pub fn setting_time(&self, batch: BatchIndex) -> Minutes {
        self.parameters
            .setting_time_of(&self.site_of(batch).concrete_type)
    }

    /// The batches of each site, in increasing batch index
    pub fn batches_by_site(&self) -> TiVec<SiteIndex, Vec<BatchIndex>> {
        let mut by_site: TiVec<SiteIndex, Vec<BatchIndex>> = vec![Vec::new(); self.sites.len()].into();
        for (b, batch) in self.batches.iter_enumerated() {
            by_site[batch.site].push(b);
        }
        by_site
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_time_table_falls_back_to_parameter() {
        let mut parameters = Parameters::new(480, 600);
        assert_eq!(parameters.setting_time_of(&ConcreteType::parse(" P8 ")), 126);
        assert_eq!(parameters.setting_time_of(&ConcreteType::parse("p3")), 114);
        assert_eq!(parameters.setting_time_of(&ConcreteType::parse("x9")), 90);

        parameters.setting_time = 75;
        assert_eq!(parameters.setting_time_of(&ConcreteType::parse("x9")), 75);
        assert_eq!(parameters.setting_time_of(&ConcreteType::P6), 90);
    }

    #[test]
    fn grid_points_and_cells() {
        let grid = TimeGrid::new(480, 530, 20).unwrap();
        assert_eq!(grid.points().collect::<Vec<_>>(), vec![480, 500, 520]);
        assert_eq!(grid.cells(0), 0);
        assert_eq!(grid.cells(20), 1);
        assert_eq!(grid.cells(21), 2);
        assert!(grid.contains(530));
        assert!(!grid.contains(540));

        assert_eq!(
            TimeGrid::new(0, 10, 0),
            Err(ProblemConstructionError::NonPositiveTimeStep(0))
        );
        assert_eq!(
            TimeGrid::new(10, 0, 5),
            Err(ProblemConstructionError::EmptyHorizon { start: 10, end: 0 })
        );
    }

    #[test]
    fn sites_are_normalized_and_unique() {
        let site = |id: &str| Site {
            id: id.to_string(),
            demand: 10.0,
            tw_start: 480,
            tw_end: 840,
            concrete_type: ConcreteType::P6,
            travel_time: 20,
            distance: 10.0,
        };
        let problem = Problem::new(
            vec![site(" North ")],
            vec![],
            vec![],
            vec![],
            Parameters::new(480, 600),
        )
        .unwrap();
        assert_eq!(problem.site_index("NORTH"), Some(SiteIndex::from(0)));

        let duplicate = Problem::new(
            vec![site("a"), site(" A")],
            vec![],
            vec![],
            vec![],
            Parameters::new(480, 600),
        );
        assert_eq!(
            duplicate.unwrap_err(),
            ProblemConstructionError::DuplicateSite("a".to_string())
        );
    }
}
