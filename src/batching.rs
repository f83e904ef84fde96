//! Splitting site demand into truck sized batches.

use float_ord::FloatOrd;
use log::{debug, warn};
use typed_index_collections::TiSlice;

use crate::problem::{Batch, ProblemConstructionError, Site, SiteIndex, Truck, Volume};

/// Volumes closer than this are considered equal
const EPSILON: Volume = 1e-6;

/// Splits the demand of every site into batches no larger than the largest truck.
///
/// A site gets as many full batches as possible and one batch for the remainder. A remainder smaller than the
/// smallest minimum load of the fleet is raised to that minimum load by moving volume from the previous batch of
/// the site. Without a previous batch to take from, it is kept as a small batch. Batch ids are `{site}_b{k}`,
/// counting from one.
pub fn split(sites: &TiSlice<SiteIndex, Site>, trucks: &[Truck]) -> Result<Vec<Batch>, ProblemConstructionError> {
    let max_capacity = trucks
        .iter()
        .map(|t| FloatOrd(t.capacity))
        .max()
        .map(|c| c.0)
        .filter(|c| *c > 0.0)
        .ok_or(ProblemConstructionError::NoTruckCapacity)?;
    let min_load = trucks
        .iter()
        .map(|t| FloatOrd(t.min_load))
        .min()
        .map_or(0.0, |l| l.0);

    let mut batches = Vec::new();
    for (s, site) in sites.iter_enumerated() {
        if site.demand <= 0.0 {
            continue;
        }

        let full = (site.demand / max_capacity).floor() as usize;
        let mut chunks = vec![max_capacity; full];
        let remainder = site.demand - full as f64 * max_capacity;

        if remainder > EPSILON {
            // top up a small remainder from the previous batch while that one stays above the minimum load
            let top_up = remainder < min_load
                && chunks
                    .last()
                    .map_or(false, |last| last - (min_load - remainder) >= min_load);

            if top_up {
                if let Some(last) = chunks.last_mut() {
                    *last -= min_load - remainder;
                }
                chunks.push(min_load);
            } else {
                if remainder < min_load {
                    warn!(
                        "site {} gets a batch of {:.2} m3, below the minimum load {:.2} m3",
                        site.id, remainder, min_load
                    );
                }
                chunks.push(remainder);
            }
        }

        debug!("site {}: {:.2} m3 in {} batches", site.id, site.demand, chunks.len());
        batches.extend(chunks.into_iter().enumerate().map(|(k, volume)| Batch {
            id: format!("{}_b{}", site.id, k + 1),
            site: s,
            volume: (volume * 1e6).round() / 1e6,
        }));
    }

    Ok(batches)
}

/// Removes batches no truck can carry
pub fn remove_oversized(batches: Vec<Batch>, trucks: &[Truck]) -> Vec<Batch> {
    let max_capacity = trucks
        .iter()
        .map(|t| FloatOrd(t.capacity))
        .max()
        .map_or(0.0, |c| c.0);

    batches
        .into_iter()
        .filter(|b| {
            let fits = b.volume <= max_capacity + EPSILON;
            if !fits {
                warn!(
                    "removing batch {} of {:.2} m3, larger than any truck ({:.2} m3)",
                    b.id, b.volume, max_capacity
                );
            }
            fits
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use typed_index_collections::TiVec;

    fn volumes(batches: &[Batch]) -> Vec<f64> {
        batches.iter().map(|b| b.volume).collect()
    }

    #[test]
    fn demand_is_split_in_full_batches_and_a_remainder() {
        let mut site = fixtures::site("s1", 840, 20);
        site.demand = 30.0;
        let sites: TiVec<SiteIndex, Site> = vec![site].into();
        let trucks = vec![fixtures::truck("a", 12.0), fixtures::truck("b", 8.0)];

        let batches = split(&sites, &trucks).unwrap();
        assert_eq!(volumes(&batches), vec![12.0, 12.0, 6.0]);
        assert_eq!(batches[2].id, "s1_b3");
        assert!(batches.iter().all(|b| b.site == SiteIndex::from(0)));
    }

    #[test]
    fn small_remainder_is_topped_up_from_the_previous_batch() {
        let mut site = fixtures::site("s1", 840, 20);
        site.demand = 25.0;
        let sites: TiVec<SiteIndex, Site> = vec![site].into();
        let trucks = vec![fixtures::truck("a", 12.0)];

        // 1 m3 is below the 2 m3 minimum load
        let batches = split(&sites, &trucks).unwrap();
        assert_eq!(volumes(&batches), vec![12.0, 11.0, 2.0]);
    }

    #[test]
    fn small_demand_stays_a_small_batch() {
        let mut site = fixtures::site("s1", 840, 20);
        site.demand = 1.5;
        let sites: TiVec<SiteIndex, Site> = vec![site].into();

        let batches = split(&sites, &[fixtures::truck("a", 12.0)]).unwrap();
        assert_eq!(volumes(&batches), vec![1.5]);
    }

    #[test]
    fn sites_without_demand_get_no_batches() {
        let mut empty = fixtures::site("empty", 840, 20);
        empty.demand = 0.0;
        let mut small = fixtures::site("small", 840, 20);
        small.demand = 4.0;
        let sites: TiVec<SiteIndex, Site> = vec![empty, small].into();

        let batches = split(&sites, &[fixtures::truck("a", 12.0)]).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].id, "small_b1");
        assert_eq!(batches[0].site, SiteIndex::from(1));
    }

    #[test]
    fn no_capacity_is_an_error() {
        let sites: TiVec<SiteIndex, Site> = vec![fixtures::site("s1", 840, 20)].into();
        assert_eq!(split(&sites, &[]), Err(ProblemConstructionError::NoTruckCapacity));
        assert_eq!(
            split(&sites, &[fixtures::truck("a", 0.0)]),
            Err(ProblemConstructionError::NoTruckCapacity)
        );
    }

    #[test]
    fn oversized_batches_are_removed() {
        let batches = vec![fixtures::batch("ok", 0, 12.0), fixtures::batch("huge", 0, 20.0)];
        let kept = remove_oversized(batches, &[fixtures::truck("a", 12.0)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "ok");
    }
}
