use typed_index_collections::TiVec;

use crate::problem::{
    BatchIndex, Cost, Distance, Minutes, Problem, SiteIndex, TimeGrid, TruckIndex, UnitIndex, Volume,
};

use super::model::{BuildError, Table};

#[allow(non_snake_case)]
pub struct Sets {
    /// Time points of the grid
    pub T: Vec<Minutes>,
    /// Set of batches
    pub B: Vec<BatchIndex>,
    /// Set of production units
    pub U: Vec<UnitIndex>,
    /// Set of trucks
    pub V: Vec<TruckIndex>,
    /// Set of sites
    pub S: Vec<SiteIndex>,
    /// Set of batches delivered to site s, in site-local (table) order
    pub B_s: TiVec<SiteIndex, Vec<BatchIndex>>,
}

impl Sets {
    pub fn new(problem: &Problem) -> Result<Sets, BuildError> {
        macro_rules! set {
            ($type:ident, $table:expr, $n:expr) => {{
                if $n == 0 {
                    return Err(BuildError::MissingTable($table));
                }
                (0..$n).map(|i| $type::from(i)).collect::<Vec<_>>()
            }};
        }

        let B = set!(BatchIndex, Table::Batches, problem.batches().len());
        let U = set!(UnitIndex, Table::Units, problem.units().len());
        let V = set!(TruckIndex, Table::Trucks, problem.trucks().len());
        let S = set!(SiteIndex, Table::Sites, problem.sites().len());

        Ok(Sets {
            T: problem.grid().points().collect(),
            B,
            U,
            V,
            S,
            B_s: problem.batches_by_site(),
        })
    }
}

#[allow(non_snake_case)]
pub struct Parameters {
    /// The time grid
    pub grid: TimeGrid,
    /// Start of the horizon
    pub T1: Minutes,
    /// End of the horizon
    pub T2: Minutes,
    /// Processing time of unit u
    pub P: TiVec<UnitIndex, Minutes>,
    /// Capacity of truck v
    pub Q: TiVec<TruckIndex, Volume>,
    /// Fixed cost of using truck v
    pub F: TiVec<TruckIndex, Cost>,
    /// Cost per distance unit of truck v
    pub C: TiVec<TruckIndex, Cost>,
    /// Wash time before departure
    pub W: Minutes,
    /// Unload time at a site
    pub L: Minutes,
    /// Wait between production finish and departure
    pub H: Minutes,
    /// Volume of batch b
    pub volume: TiVec<BatchIndex, Volume>,
    /// Travel time from the plant to the site of batch b
    pub travel: TiVec<BatchIndex, Minutes>,
    /// Distance from the plant to the site of batch b
    pub distance: TiVec<BatchIndex, Distance>,
    /// End of the time window of the site of batch b
    pub due: TiVec<BatchIndex, Minutes>,
    /// Setting time limit of batch b
    pub setting: TiVec<BatchIndex, Minutes>,
    /// Tardiness allowed before the max tardiness slack kicks in
    pub max_tardiness: Minutes,
    /// Largest gap between consecutive unloads at a site
    pub max_lag: Minutes,
    /// Weight of transport cost
    pub alpha: f64,
    /// Weight of tardiness
    pub beta: f64,
    /// Cost per unit of slack
    pub penalty: f64,
}

#[allow(non_snake_case)]
impl Parameters {
    pub fn new(problem: &Problem) -> Parameters {
        let params = problem.parameters();
        let batches = problem.batches();

        Parameters {
            grid: *problem.grid(),
            T1: params.t1,
            T2: params.t2,
            P: problem.units().iter().map(|u| u.process_time).collect(),
            Q: problem.trucks().iter().map(|v| v.capacity).collect(),
            F: problem.trucks().iter().map(|v| v.fixed_cost).collect(),
            C: problem.trucks().iter().map(|v| v.variable_cost).collect(),
            W: params.wash_time,
            L: params.unload_time,
            H: params.wait_before_departure,
            volume: batches.iter().map(|b| b.volume).collect(),
            travel: batches.keys().map(|b| problem.site_of(b).travel_time).collect(),
            distance: batches.keys().map(|b| problem.site_of(b).distance).collect(),
            due: batches.keys().map(|b| problem.site_of(b).tw_end).collect(),
            setting: batches.keys().map(|b| problem.setting_time(b)).collect(),
            max_tardiness: params.max_tardiness_allowed,
            max_lag: params.max_time_lag,
            alpha: params.alpha,
            beta: params.beta,
            penalty: params.penalty,
        }
    }

    /// The earliest departure any batch can have: produced on the fastest unit from `T1`, then washed and waited
    pub fn earliest_departure(&self) -> Minutes {
        let fastest = self.P.iter().copied().min().unwrap_or(0);
        self.T1 + fastest + self.W + self.H
    }

    /// Variable cost of delivering batch b with truck v, there and back
    pub fn trip_cost(&self, b: BatchIndex, v: TruckIndex) -> Cost {
        2.0 * self.distance[b] * self.C[v]
    }

    /// When unloading of batch b starts if it departs at `departure`
    pub fn unload_start(&self, b: BatchIndex, departure: Minutes) -> Minutes {
        departure + self.travel[b]
    }

    /// When unloading of batch b finishes if it departs at `departure`
    pub fn unload_finish(&self, b: BatchIndex, departure: Minutes) -> Minutes {
        departure + self.travel[b] + self.L
    }

    /// Time a truck departing at `departure` with batch b is back at the plant
    pub fn return_time(&self, b: BatchIndex, departure: Minutes) -> Minutes {
        departure + 2 * self.travel[b] + self.L
    }
}
