use crate::core::geometry::orbit_coverage;
use crate::domain::model::{
    BBox, OrbitCandidate, OrbitMetadata, OrbitSelection, OrbitStrategy, SelectedOrbit,
};
use crate::utils::error::{EtlError, Result};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Share of the tile an orbit footprint must exceed to be usable.
pub const MIN_TILE_COVERAGE: f64 = 0.9;

/// An orbit that passed the cloud and coverage filters for one tile.
#[derive(Debug, Clone)]
pub struct ScoredCandidate<'a> {
    pub orbit: &'a OrbitCandidate,
    pub date: NaiveDate,
    pub cloud: f64,
    pub coverage: f64,
}

/// Orbit metadata of one tile, keyed for selection.
#[derive(Debug, Clone)]
pub struct TileOrbits {
    pub index: usize,
    pub label: String,
    pub bbox: BBox,
    pub metadata: OrbitMetadata,
}

/// Candidates with a parsable date, average cloud at or below `max_cloud`
/// and footprint coverage above [`MIN_TILE_COVERAGE`].
pub fn valid_candidates<'a>(
    metadata: &'a OrbitMetadata,
    tile_bbox: &BBox,
    max_cloud: f64,
) -> Vec<ScoredCandidate<'a>> {
    metadata
        .orbits
        .iter()
        .filter_map(|orbit| {
            let date = orbit.acquisition_date()?;
            let cloud = orbit.avg_cloud();
            if cloud > max_cloud {
                return None;
            }
            let coverage = orbit_coverage(orbit, tile_bbox);
            if coverage <= MIN_TILE_COVERAGE {
                tracing::debug!(
                    "Orbit {} covers {:.1}% of tile, rejected",
                    orbit.date_from,
                    coverage * 100.0
                );
                return None;
            }
            Some(ScoredCandidate {
                orbit,
                date,
                cloud,
                coverage,
            })
        })
        .collect()
}

/// True when at least one tile has at least one orbit.
pub fn has_valid_orbits(tiles: &[TileOrbits]) -> bool {
    tiles.iter().any(|t| !t.metadata.orbits.is_empty())
}

fn least_cloud_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    a.cloud.total_cmp(&b.cloud).then(a.date.cmp(&b.date))
}

fn most_recent_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.date.cmp(&a.date).then(a.cloud.total_cmp(&b.cloud))
}

fn best_coverage_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.coverage
        .total_cmp(&a.coverage)
        .then(a.cloud.total_cmp(&b.cloud))
        .then(a.date.cmp(&b.date))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn to_selected(strategy: OrbitStrategy, candidate: &ScoredCandidate) -> SelectedOrbit {
    let orbit = candidate.orbit;
    SelectedOrbit {
        strategy: strategy.as_str().to_string(),
        orbit_date: candidate.date.format("%Y-%m-%d").to_string(),
        product_ids: orbit.product_ids(),
        tile_ids: orbit.tiles.iter().map(|t| t.tile_id.clone()).collect(),
        cloud_coverage: round2(candidate.cloud),
        orbit: orbit.clone(),
    }
}

fn check_implemented(strategy: OrbitStrategy) -> Result<()> {
    if strategy.is_implemented() {
        Ok(())
    } else {
        Err(EtlError::StrategyNotImplementedError {
            strategy: strategy.as_str().to_string(),
        })
    }
}

/// Picks one orbit for a single tile with a per-tile strategy.
pub fn select_best_orbit(
    metadata: &OrbitMetadata,
    strategy: OrbitStrategy,
    tile_bbox: &BBox,
    max_cloud: f64,
    tile_label: &str,
) -> Result<SelectedOrbit> {
    check_implemented(strategy)?;

    if metadata.orbits.is_empty() {
        return Err(EtlError::NoValidOrbitError {
            tile: tile_label.to_string(),
            reason: "no orbits found in metadata".to_string(),
        });
    }

    let candidates = valid_candidates(metadata, tile_bbox, max_cloud);
    let order: fn(&ScoredCandidate, &ScoredCandidate) -> Ordering = match strategy {
        OrbitStrategy::LeastCloud => least_cloud_order,
        OrbitStrategy::MostRecent => most_recent_order,
        OrbitStrategy::BestPerTile => best_coverage_order,
        // Single-tile jobs have nothing to agree on, so same-day reduces to least cloud.
        OrbitStrategy::SameDayAll => least_cloud_order,
        _ => {
            return Err(EtlError::StrategyNotImplementedError {
                strategy: strategy.as_str().to_string(),
            })
        }
    };

    candidates
        .iter()
        .min_by(|a, b| order(a, b))
        .map(|best| to_selected(strategy, best))
        .ok_or_else(|| EtlError::NoValidOrbitError {
            tile: tile_label.to_string(),
            reason: format!(
                "no orbit with cloud cover <= {}% covering more than {:.0}% of the tile",
                max_cloud,
                MIN_TILE_COVERAGE * 100.0
            ),
        })
}

/// Builds the job-level selection from every tile's orbit metadata.
pub fn select_orbits_for_tiles(
    tiles: &[TileOrbits],
    strategy: OrbitStrategy,
    max_cloud: f64,
) -> Result<OrbitSelection> {
    check_implemented(strategy)?;

    let per_tile = if strategy == OrbitStrategy::SameDayAll && tiles.len() > 1 {
        select_same_day(tiles, max_cloud)?
    } else {
        let mut per_tile = BTreeMap::new();
        for tile in tiles {
            let selected =
                select_best_orbit(&tile.metadata, strategy, &tile.bbox, max_cloud, &tile.label)?;
            tracing::info!(
                "🛰️ {}: orbit {} ({:.2}% cloud)",
                tile.label,
                selected.orbit_date,
                selected.cloud_coverage
            );
            per_tile.insert(tile.index, selected);
        }
        per_tile
    };

    Ok(OrbitSelection { strategy, per_tile })
}

/// One date valid for every tile, lowest mean cloud first, earliest on ties.
fn select_same_day(tiles: &[TileOrbits], max_cloud: f64) -> Result<BTreeMap<usize, SelectedOrbit>> {
    // Per tile: best (least cloud) valid candidate for each date.
    let mut by_tile: Vec<BTreeMap<NaiveDate, ScoredCandidate>> = Vec::with_capacity(tiles.len());
    for tile in tiles {
        let mut per_date: BTreeMap<NaiveDate, ScoredCandidate> = BTreeMap::new();
        for candidate in valid_candidates(&tile.metadata, &tile.bbox, max_cloud) {
            let replace = per_date
                .get(&candidate.date)
                .map(|existing| candidate.cloud < existing.cloud)
                .unwrap_or(true);
            if replace {
                per_date.insert(candidate.date, candidate);
            }
        }
        by_tile.push(per_date);
    }

    let mut common: BTreeSet<NaiveDate> = match by_tile.first() {
        Some(first) => first.keys().copied().collect(),
        None => BTreeSet::new(),
    };
    for per_date in by_tile.iter().skip(1) {
        common.retain(|d| per_date.contains_key(d));
    }

    let mut best: Option<(NaiveDate, f64)> = None;
    for date in &common {
        let mean = by_tile
            .iter()
            .filter_map(|per_date| per_date.get(date).map(|c| c.cloud))
            .sum::<f64>()
            / by_tile.len() as f64;
        // Dates iterate ascending, so strict comparison keeps the earliest on ties.
        if best.map(|(_, m)| mean < m).unwrap_or(true) {
            best = Some((*date, mean));
        }
    }

    let Some((date, mean)) = best else {
        return Err(EtlError::NoCommonDateError { tiles: tiles.len() });
    };
    tracing::info!(
        "🛰️ Same-day orbit {} for all {} tiles ({:.2}% mean cloud)",
        date,
        tiles.len(),
        mean
    );

    let mut per_tile = BTreeMap::new();
    for (tile, per_date) in tiles.iter().zip(&by_tile) {
        if let Some(candidate) = per_date.get(&date) {
            per_tile.insert(tile.index, to_selected(OrbitStrategy::SameDayAll, candidate));
        }
    }
    Ok(per_tile)
}
