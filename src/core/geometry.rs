use crate::domain::model::{BBox, OrbitCandidate};
use crate::utils::error::{EtlError, Result};
use geo::{coord, Area, BooleanOps, Coord, Geometry, MapCoords, MultiPolygon, Rect};
use serde_json::Value;

/// Coordinate reference systems that provider footprints arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    Wgs84,
    Utm { zone: u32, north: bool },
}

/// Parses CRS names by their trailing EPSG code, e.g. `EPSG:4326`,
/// `urn:ogc:def:crs:EPSG::32759`, `http://www.opengis.net/def/crs/EPSG/0/32659`
/// or OGC `CRS84`.
pub fn parse_crs(name: &str) -> Result<Crs> {
    let trimmed = name.trim();
    if trimmed.ends_with("CRS84") {
        return Ok(Crs::Wgs84);
    }

    let digits: String = trimmed
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let code: u32 = digits.parse().map_err(|_| EtlError::ProcessingError {
        message: format!("Unrecognised CRS name: {}", name),
    })?;

    match code {
        4326 => Ok(Crs::Wgs84),
        32601..=32660 => Ok(Crs::Utm {
            zone: code - 32600,
            north: true,
        }),
        32701..=32760 => Ok(Crs::Utm {
            zone: code - 32700,
            north: false,
        }),
        _ => Err(EtlError::ProcessingError {
            message: format!("Unsupported CRS: {}", name),
        }),
    }
}

// Krueger series, inverse direction.
pub fn utm_to_wgs84(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let k0_a = 6364.902166165087;
    let beta1 = 0.000837732164082144;
    let beta2 = 0.00000005906110863719917;
    let beta3 = 0.00000000016769911794379754;
    let delta1 = 0.003356551448628875;
    let delta2 = 0.000006571913193172695;
    let delta3 = 0.0000000176774599620756;

    let e0 = 500.0;
    let n0 = if north { 0.0 } else { 10000.0 };

    let xi = (northing / 1000.0 - n0) / k0_a;
    let eta = (easting / 1000.0 - e0) / k0_a;

    let xi_p = xi
        - (beta1 * (2.0 * xi).sin() * (2.0 * eta).cosh()
            + beta2 * (4.0 * xi).sin() * (4.0 * eta).cosh()
            + beta3 * (6.0 * xi).sin() * (6.0 * eta).cosh());
    let eta_p = eta
        - (beta1 * (2.0 * xi).cos() * (2.0 * eta).sinh()
            + beta2 * (4.0 * xi).cos() * (4.0 * eta).sinh()
            + beta3 * (6.0 * xi).cos() * (6.0 * eta).sinh());

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let phi = chi
        + delta1 * (2.0 * chi).sin()
        + delta2 * (4.0 * chi).sin()
        + delta3 * (6.0 * chi).sin();

    let lambda0 = ((zone as f64) * 6.0 - 183.0).to_radians();
    let lambda = lambda0 + eta_p.sinh().atan2(xi_p.cos());

    (lambda.to_degrees(), phi.to_degrees())
}

fn to_wgs84(crs: Crs, c: Coord<f64>) -> Coord<f64> {
    match crs {
        Crs::Wgs84 => c,
        Crs::Utm { zone, north } => {
            let (lon, lat) = utm_to_wgs84(c.x, c.y, zone, north);
            coord! { x: lon, y: lat }
        }
    }
}

/// Reads a GeoJSON polygon/multipolygon footprint and reprojects it to
/// WGS84 using its `crs.properties.name` member (WGS84 when absent).
pub fn footprint_to_wgs84(geometry: &Value) -> Result<MultiPolygon<f64>> {
    let crs = match geometry.pointer("/crs/properties/name").and_then(Value::as_str) {
        Some(name) => parse_crs(name)?,
        None => Crs::Wgs84,
    };

    let parsed = geojson::Geometry::from_json_value(geometry.clone()).map_err(|e| {
        EtlError::ProcessingError {
            message: format!("Invalid footprint GeoJSON: {}", e),
        }
    })?;
    let geom: Geometry<f64> = parsed.try_into().map_err(|e: geojson::Error| {
        EtlError::ProcessingError {
            message: format!("Unsupported footprint geometry: {}", e),
        }
    })?;

    let polygons = match geom {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        Geometry::MultiPolygon(mp) => mp,
        other => {
            return Err(EtlError::ProcessingError {
                message: format!("Footprint is not a polygon: {:?}", other),
            })
        }
    };

    Ok(polygons.map_coords(move |c| to_wgs84(crs, c)))
}

/// Union of every granule footprint of the orbit, preferring `dataGeometry`
/// over `dataEnvelope`. Unreadable footprints are skipped.
pub fn orbit_footprint(orbit: &OrbitCandidate) -> Option<MultiPolygon<f64>> {
    let mut union: Option<MultiPolygon<f64>> = None;
    for granule in &orbit.tiles {
        let Some(raw) = granule.data_geometry.as_ref().or(granule.data_envelope.as_ref()) else {
            continue;
        };
        match footprint_to_wgs84(raw) {
            Ok(footprint) => {
                union = Some(match union {
                    Some(acc) => acc.union(&footprint),
                    None => footprint,
                });
            }
            Err(e) => {
                tracing::debug!("Skipping granule footprint {}: {}", granule.tile_id, e);
            }
        }
    }
    union
}

pub fn bbox_polygon(bbox: &BBox) -> MultiPolygon<f64> {
    let rect = Rect::new(
        coord! { x: bbox.min_lon, y: bbox.min_lat },
        coord! { x: bbox.max_lon, y: bbox.max_lat },
    );
    MultiPolygon::new(vec![rect.to_polygon()])
}

/// Fraction of the bbox area covered by the footprint, in `[0, 1]`.
pub fn coverage_fraction(footprint: &MultiPolygon<f64>, bbox: &BBox) -> f64 {
    let tile = bbox_polygon(bbox);
    let tile_area = tile.unsigned_area();
    if tile_area <= 0.0 {
        return 0.0;
    }
    (footprint.intersection(&tile).unsigned_area() / tile_area).clamp(0.0, 1.0)
}

/// Coverage of the bbox by the orbit's combined footprint; 0 when the orbit
/// carries no usable geometry.
pub fn orbit_coverage(orbit: &OrbitCandidate, bbox: &BBox) -> f64 {
    orbit_footprint(orbit)
        .map(|fp| coverage_fraction(&fp, bbox))
        .unwrap_or(0.0)
}
