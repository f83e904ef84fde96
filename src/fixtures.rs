//! Small instances shared by the unit tests.

use crate::problem::{Batch, ConcreteType, Minutes, Parameters, Problem, Site, SiteIndex, Truck, Unit};

pub fn site(id: &str, tw_end: i64, travel_time: i64) -> Site {
    typed_site(id, tw_end, travel_time, ConcreteType::P6)
}

pub fn typed_site(id: &str, tw_end: i64, travel_time: i64, concrete_type: ConcreteType) -> Site {
    Site {
        id: id.to_string(),
        demand: 20.0,
        tw_start: 480,
        tw_end,
        concrete_type,
        travel_time,
        distance: 10.0,
    }
}

pub fn truck(id: &str, capacity: f64) -> Truck {
    Truck {
        id: id.to_string(),
        capacity,
        min_load: 2.0,
        fixed_cost: 100.0,
        variable_cost: 1.5,
    }
}

pub fn unit(id: &str, process_time: i64) -> Unit {
    Unit {
        id: id.to_string(),
        process_time,
    }
}

pub fn batch(id: &str, site: usize, volume: f64) -> Batch {
    Batch {
        id: id.to_string(),
        site: SiteIndex::from(site),
        volume,
    }
}

/// One 10 m³ batch, one truck, one unit between 08:00 and 10:00
pub fn single_batch() -> Problem {
    Problem::new(
        vec![site("s1", 840, 20)],
        vec![truck("v1", 12.0)],
        vec![unit("u1", 30)],
        vec![batch("s1_b1", 0, 10.0)],
        Parameters::new(480, 600),
    )
    .unwrap()
}

/// Two 10 m³ batches for the same site sharing one truck and one unit
pub fn two_batches_one_site() -> Problem {
    Problem::new(
        vec![site("s1", 840, 20)],
        vec![truck("v1", 12.0)],
        vec![unit("u1", 30)],
        vec![batch("s1_b1", 0, 10.0), batch("s1_b2", 0, 10.0)],
        Parameters::new(480, 720),
    )
    .unwrap()
}

/// Same as [`two_batches_one_site`], with another largest gap between unloads
pub fn lagging_site(max_time_lag: Minutes) -> Problem {
    let mut parameters = Parameters::new(480, 720);
    parameters.max_time_lag = max_time_lag;
    Problem::new(
        vec![site("s1", 840, 20)],
        vec![truck("v1", 12.0)],
        vec![unit("u1", 30)],
        vec![batch("s1_b1", 0, 10.0), batch("s1_b2", 0, 10.0)],
        parameters,
    )
    .unwrap()
}

/// Three 10 m³ batches of P8 concrete for one site, sharing one truck and one unit
pub fn p8_site() -> Problem {
    Problem::new(
        vec![typed_site("s1", 840, 20, ConcreteType::P8)],
        vec![truck("v1", 12.0)],
        vec![unit("u1", 30)],
        vec![
            batch("s1_b1", 0, 10.0),
            batch("s1_b2", 0, 10.0),
            batch("s1_b3", 0, 10.0),
        ],
        Parameters::new(480, 780),
    )
    .unwrap()
}

/// One batch at each of two sites
pub fn two_sites() -> Problem {
    Problem::new(
        vec![site("s1", 840, 20), site("s2", 840, 20)],
        vec![truck("v1", 12.0)],
        vec![unit("u1", 30)],
        vec![batch("s1_b1", 0, 10.0), batch("s2_b1", 1, 10.0)],
        Parameters::new(480, 720),
    )
    .unwrap()
}

/// Two batches on a slow unit in a horizon ending at `t2`
pub fn tight_horizon(t2: i64) -> Problem {
    Problem::new(
        vec![site("s1", 840, 20)],
        vec![truck("v1", 12.0)],
        vec![unit("u1", 50)],
        vec![batch("s1_b1", 0, 10.0), batch("s1_b2", 0, 10.0)],
        Parameters::new(480, t2),
    )
    .unwrap()
}

/// Five batches over three sites with different due times
pub fn three_sites() -> Problem {
    Problem::new(
        vec![site("late", 900, 15), site("early", 600, 25), site("middle", 720, 35)],
        vec![truck("big", 12.0), truck("small", 8.0)],
        vec![unit("fast", 30), unit("slow", 40)],
        vec![
            batch("late_b1", 0, 12.0),
            batch("late_b2", 0, 6.0),
            batch("early_b1", 1, 8.0),
            batch("middle_b1", 2, 10.0),
            batch("middle_b2", 2, 4.0),
        ],
        Parameters::new(420, 900),
    )
    .unwrap()
}
