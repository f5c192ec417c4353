use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::error::EtlError;

/// Inclusive `(start, end)` acquisition window.
pub type TimeInterval = (NaiveDate, NaiveDate);

/// WGS84 bounding box, serialized as `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    pub fn width_deg(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height_deg(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn center_lat(&self) -> f64 {
        (self.min_lat + self.max_lat) / 2.0
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        b.to_array()
    }
}

/// One API-safe sub-region of the area of interest. `row`/`col` index the
/// split grid, north row first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub bbox: BBox,
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSeriesMode {
    Daily,
    Monthly,
    Quarterly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrbitStrategy {
    LeastCloud,
    MostRecent,
    SameDayAll,
    BestPerTile,
    NearestDate,
    MaxCoverage,
    CompositeScore,
}

impl OrbitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrbitStrategy::LeastCloud => "least_cloud",
            OrbitStrategy::MostRecent => "most_recent",
            OrbitStrategy::SameDayAll => "same_day_all",
            OrbitStrategy::BestPerTile => "best_per_tile",
            OrbitStrategy::NearestDate => "nearest_date",
            OrbitStrategy::MaxCoverage => "max_coverage",
            OrbitStrategy::CompositeScore => "composite_score",
        }
    }

    pub fn is_implemented(&self) -> bool {
        matches!(
            self,
            OrbitStrategy::LeastCloud
                | OrbitStrategy::MostRecent
                | OrbitStrategy::SameDayAll
                | OrbitStrategy::BestPerTile
        )
    }
}

impl FromStr for OrbitStrategy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "least_cloud" => Ok(OrbitStrategy::LeastCloud),
            "most_recent" => Ok(OrbitStrategy::MostRecent),
            "same_day_all" | "same_day_all_tiles" => Ok(OrbitStrategy::SameDayAll),
            "best_per_tile" => Ok(OrbitStrategy::BestPerTile),
            "nearest_date" => Ok(OrbitStrategy::NearestDate),
            "max_coverage" => Ok(OrbitStrategy::MaxCoverage),
            "composite_score" => Ok(OrbitStrategy::CompositeScore),
            other => Err(EtlError::UnknownStrategyError {
                strategy: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrbitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orbit discovery document as returned by the provider for one tile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrbitMetadata {
    #[serde(default)]
    pub orbits: Vec<OrbitCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_bbox: Option<BBox>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrbitCandidate {
    pub date_from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(default)]
    pub tiles: Vec<Granule>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single product granule contributing to an orbit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Granule {
    #[serde(default)]
    pub tile_id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_geometry: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_envelope: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrbitCandidate {
    /// Mean granule cloud cover; granules without a value count as fully clouded.
    pub fn avg_cloud(&self) -> f64 {
        if self.tiles.is_empty() {
            return 100.0;
        }
        let total: f64 = self
            .tiles
            .iter()
            .map(|t| t.cloud_coverage.unwrap_or(100.0))
            .sum();
        total / self.tiles.len() as f64
    }

    pub fn acquisition_date(&self) -> Option<NaiveDate> {
        let day = self.date_from.get(..10)?;
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }

    pub fn product_ids(&self) -> Vec<String> {
        self.tiles
            .iter()
            .filter_map(|t| t.product_id.clone())
            .collect()
    }
}

/// The orbit chosen for one tile, as persisted in `<prefix>_selected_orbit.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedOrbit {
    pub strategy: String,
    pub orbit_date: String,
    pub product_ids: Vec<String>,
    pub tile_ids: Vec<Value>,
    pub cloud_coverage: f64,
    pub orbit: OrbitCandidate,
}

/// The job-level selection: one entry per tile index.
#[derive(Debug, Clone)]
pub struct OrbitSelection {
    pub strategy: OrbitStrategy,
    pub per_tile: BTreeMap<usize, SelectedOrbit>,
}

impl OrbitSelection {
    pub fn orbit_dates(&self) -> Vec<String> {
        let mut dates: Vec<String> = self
            .per_tile
            .values()
            .map(|s| s.orbit_date.clone())
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }

    pub fn mean_cloud_coverage(&self) -> f64 {
        if self.per_tile.is_empty() {
            return 0.0;
        }
        self.per_tile.values().map(|s| s.cloud_coverage).sum::<f64>() / self.per_tile.len() as f64
    }
}

#[derive(Debug, Clone)]
pub struct TileDownload {
    pub tile: Tile,
    pub file_name: String,
    pub data: Array3<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTile {
    pub index: usize,
    pub bbox: BBox,
    pub reason: String,
}

/// Output of the extract phase.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub tiles: Vec<Tile>,
    pub selection: OrbitSelection,
    pub downloads: Vec<TileDownload>,
    pub failed: Vec<FailedTile>,
}

/// Output of the transform phase.
#[derive(Debug, Clone)]
pub struct SceneProducts {
    pub bbox: BBox,
    pub stitched: Array3<f32>,
    pub ndvi: Array2<f32>,
    pub cloud_mask: Option<Array2<bool>>,
    pub true_color: Array3<f32>,
    pub selection: OrbitSelection,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub output_path: String,
    pub orbit_dates: Vec<String>,
    pub cloud_coverage: f64,
    pub mean_ndvi: Option<f64>,
    /// Peak resident memory of the run; only set with `--monitor`.
    pub peak_memory_mb: Option<u64>,
}
