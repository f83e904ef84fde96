use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{NaiveTime, Timelike};
use derive_more::Display;
use log::{debug, info};
use serde::Deserialize;
use typed_index_collections::TiVec;

use crate::batching;
use crate::problem::{
    normalize_id, Batch, ConcreteType, Minutes, Parameters, Problem, ProblemConstructionError, Site, SiteIndex,
    Truck, Unit,
};

#[derive(Debug, Display)]
pub enum ParseError {
    #[display(fmt = "could not read instance: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "malformed instance: {}", _0)]
    Json(serde_json::Error),
    #[display(fmt = "instance has no '{}' table", _0)]
    MissingTable(&'static str),
    #[display(fmt = "invalid time of day '{}'", _0)]
    InvalidTime(String),
    #[display(fmt = "{}", _0)]
    Problem(ProblemConstructionError),
}

impl std::error::Error for ParseError {}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> Self {
        ParseError::Io(err)
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::Json(err)
    }
}

impl From<ProblemConstructionError> for ParseError {
    fn from(err: ProblemConstructionError) -> Self {
        ParseError::Problem(err)
    }
}

/// A time of day, either as `"HH:MM"` or as decimal hours
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimeOfDay {
    Hours(f64),
    Text(String),
}

impl TimeOfDay {
    /// Minutes from midnight. Decimal values above 24 are taken to be minutes already.
    pub fn minutes(&self) -> Result<Minutes, ParseError> {
        fn from_number(value: f64) -> Option<Minutes> {
            if !value.is_finite() || value < 0.0 {
                None
            } else if value > 24.0 {
                Some(value.round() as Minutes)
            } else {
                Some((value * 60.0).round() as Minutes)
            }
        }

        match self {
            TimeOfDay::Hours(hours) => from_number(*hours).ok_or_else(|| ParseError::InvalidTime(hours.to_string())),
            TimeOfDay::Text(text) => {
                let text = text.trim();
                let invalid = || ParseError::InvalidTime(text.to_string());
                if text.contains(':') {
                    let time = NaiveTime::parse_from_str(text, "%H:%M").map_err(|_| invalid())?;
                    Ok((time.hour() * 60 + time.minute()) as Minutes)
                } else {
                    text.parse::<f64>().ok().and_then(from_number).ok_or_else(invalid)
                }
            }
        }
    }
}

/// Identifiers may be written as strings or as numbers
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSite {
    site_id: RawId,
    #[serde(default)]
    demand_m3: f64,
    tw_start_h: Option<TimeOfDay>,
    tw_end_h: Option<TimeOfDay>,
    concrete_type: Option<String>,
    #[serde(default)]
    dist_km: f64,
    #[serde(default)]
    travel_time_min: f64,
}

#[derive(Debug, Deserialize)]
struct RawTruck {
    truck_id: RawId,
    capacity_m3: f64,
    #[serde(default)]
    min_load_m3: f64,
    #[serde(default)]
    fixed_cost: f64,
    #[serde(default)]
    var_cost_per_km: f64,
}

#[derive(Debug, Deserialize)]
struct RawUnit {
    unit_id: RawId,
    process_time_min: f64,
}

#[derive(Debug, Deserialize)]
struct RawBatch {
    batch_id: RawId,
    site_id: RawId,
    volume: f64,
}

/// The tables of an instance file, any of which may be missing
#[derive(Debug, Deserialize)]
struct RawInstance {
    sites: Option<Vec<RawSite>>,
    trucks: Option<Vec<RawTruck>>,
    units: Option<Vec<RawUnit>>,
    params: Option<Parameters>,
    batches: Option<Vec<RawBatch>>,
}

impl RawInstance {
    fn into_problem(self) -> Result<Problem, ParseError> {
        let parameters = self.params.ok_or(ParseError::MissingTable("params"))?;
        let raw_sites = self.sites.ok_or(ParseError::MissingTable("sites"))?;
        let raw_trucks = self.trucks.ok_or(ParseError::MissingTable("trucks"))?;
        let raw_units = self.units.ok_or(ParseError::MissingTable("units"))?;

        let sites = raw_sites
            .into_iter()
            .map(|s| {
                let tw_start = s.tw_start_h.map(|t| t.minutes()).transpose()?.unwrap_or(parameters.t1);
                let tw_end = s.tw_end_h.map(|t| t.minutes()).transpose()?.unwrap_or(parameters.t2);
                Ok(Site {
                    id: normalize_id(&s.site_id.into_string()),
                    demand: s.demand_m3,
                    tw_start,
                    tw_end,
                    concrete_type: s.concrete_type.as_deref().map(ConcreteType::parse).unwrap_or_default(),
                    travel_time: s.travel_time_min.round() as Minutes,
                    distance: s.dist_km,
                })
            })
            .collect::<Result<TiVec<SiteIndex, Site>, ParseError>>()?;

        let trucks = raw_trucks
            .into_iter()
            .map(|t| Truck {
                id: t.truck_id.into_string(),
                capacity: t.capacity_m3,
                min_load: t.min_load_m3,
                fixed_cost: t.fixed_cost,
                variable_cost: t.var_cost_per_km,
            })
            .collect::<Vec<_>>();

        let units = raw_units
            .into_iter()
            .map(|u| Unit {
                id: u.unit_id.into_string(),
                process_time: u.process_time_min.round() as Minutes,
            })
            .collect::<Vec<_>>();

        let batches = match self.batches {
            Some(raw_batches) => {
                let lookup = sites
                    .iter_enumerated()
                    .map(|(s, site)| (site.id.clone(), s))
                    .collect::<HashMap<_, _>>();
                let batches = raw_batches
                    .into_iter()
                    .map(|b| {
                        let id = b.batch_id.into_string();
                        let site_id = b.site_id.into_string();
                        match lookup.get(&normalize_id(&site_id)) {
                            Some(site) => Ok(Batch {
                                id,
                                site: *site,
                                volume: b.volume,
                            }),
                            None => Err(ProblemConstructionError::UnknownSite {
                                batch: id,
                                site: site_id,
                            }),
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                batching::remove_oversized(batches, &trucks)
            }
            None => {
                debug!("instance has no batches, splitting site demand");
                batching::split(&sites, &trucks)?
            }
        };

        info!(
            "Read instance with {} sites, {} trucks, {} units and {} batches",
            sites.len(),
            trucks.len(),
            units.len(),
            batches.len()
        );

        Ok(Problem::new(sites.into(), trucks, units, batches, parameters)?)
    }
}

/// Parses an instance from a JSON string
pub fn parse_instance(json: &str) -> Result<Problem, ParseError> {
    let raw: RawInstance = serde_json::from_str(json)?;
    raw.into_problem()
}

/// Reads an instance from a JSON file
pub fn read_instance<P: AsRef<Path>>(path: P) -> Result<Problem, ParseError> {
    let file = File::open(path)?;
    let raw: RawInstance = serde_json::from_reader(BufReader::new(file))?;
    raw.into_problem()
}
