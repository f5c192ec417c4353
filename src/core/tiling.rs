use crate::domain::model::{BBox, Tile};
use crate::utils::error::{EtlError, Result};
use serde_json::{json, Map, Value};

/// Metres per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Pixel grid `(width, height)` of a bbox at `resolution` metres per pixel,
/// each at least 1.
pub fn bbox_to_dimensions(bbox: &BBox, resolution: u32) -> (usize, usize) {
    let res = resolution.max(1) as f64;
    let lon_metres = bbox.width_deg() * METERS_PER_DEGREE * bbox.center_lat().to_radians().cos();
    let lat_metres = bbox.height_deg() * METERS_PER_DEGREE;
    let width = (lon_metres / res).round().max(1.0) as usize;
    let height = (lat_metres / res).round().max(1.0) as usize;
    (width, height)
}

/// Splits the AOI pixel grid into tiles no larger than
/// `floor(max_dim * buffer)` pixels per side.
///
/// Tiles come back row-major, north row first. Interior edges sit on
/// pixel boundaries of the AOI grid and the last row/column ends exactly on
/// the AOI edge, so the tiles stitch back into the AOI grid without
/// resampling.
pub fn generate_safe_tiles(
    aoi: &BBox,
    resolution: u32,
    max_dim: usize,
    buffer: f64,
) -> Result<Vec<Tile>> {
    if max_dim == 0 {
        return Err(EtlError::InvalidConfigValueError {
            field: "max_tile_dim".to_string(),
            value: max_dim.to_string(),
            reason: "Value must be at least 1".to_string(),
        });
    }
    if !(buffer > 0.0 && buffer <= 1.0) {
        return Err(EtlError::InvalidConfigValueError {
            field: "tile_buffer".to_string(),
            value: buffer.to_string(),
            reason: "Must be in (0, 1]".to_string(),
        });
    }

    let (width, height) = bbox_to_dimensions(aoi, resolution);
    let side = ((max_dim as f64 * buffer).floor() as usize).max(1);
    let col_edges = chunk_edges(width, side);
    let row_edges = chunk_edges(height, side);

    let lon_at = |px: usize| {
        if px == width {
            aoi.max_lon
        } else {
            aoi.min_lon + aoi.width_deg() * px as f64 / width as f64
        }
    };
    let lat_at = |px: usize| {
        if px == height {
            aoi.min_lat
        } else {
            aoi.max_lat - aoi.height_deg() * px as f64 / height as f64
        }
    };

    let mut tiles = Vec::with_capacity((col_edges.len() - 1) * (row_edges.len() - 1));
    for (row, rows) in row_edges.windows(2).enumerate() {
        for (col, cols) in col_edges.windows(2).enumerate() {
            tiles.push(Tile {
                index: tiles.len(),
                row,
                col,
                bbox: BBox::new(lon_at(cols[0]), lat_at(rows[1]), lon_at(cols[1]), lat_at(rows[0])),
                width: cols[1] - cols[0],
                height: rows[1] - rows[0],
            });
        }
    }

    tracing::debug!(
        "AOI grid {}x{} px split into {} tiles of at most {} px",
        width,
        height,
        tiles.len(),
        side
    );
    Ok(tiles)
}

fn chunk_edges(total: usize, side: usize) -> Vec<usize> {
    let mut edges: Vec<usize> = (0..total).step_by(side).collect();
    edges.push(total);
    edges
}

/// `{"tile<i>": {"bbox": [...], "crs": "EPSG:4326", "width": w, "height": h}}`.
pub fn workflow_tile_metadata(tiles: &[Tile]) -> Value {
    let mut map = Map::new();
    for tile in tiles {
        map.insert(
            format!("tile{}", tile.index),
            json!({
                "bbox": tile.bbox,
                "crs": "EPSG:4326",
                "row": tile.row,
                "col": tile.col,
                "width": tile.width,
                "height": tile.height,
            }),
        );
    }
    Value::Object(map)
}
