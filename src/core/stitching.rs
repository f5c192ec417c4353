use crate::domain::model::{BBox, Tile, TileDownload};
use crate::utils::error::{EtlError, Result};
use ndarray::{concatenate, Array3, ArrayView3, Axis};
use std::collections::BTreeSet;

/// Tiles whose top edges differ by less than this (degrees) share a row.
pub const ROW_EPSILON: f64 = 1e-4;

/// Groups downloads into rows, north row first, each row west to east.
pub fn order_tiles_into_rows(downloads: &[TileDownload]) -> Vec<Vec<&TileDownload>> {
    let mut sorted: Vec<&TileDownload> = downloads.iter().collect();
    sorted.sort_by(|a, b| {
        b.tile
            .bbox
            .max_lat
            .total_cmp(&a.tile.bbox.max_lat)
            .then(a.tile.bbox.min_lon.total_cmp(&b.tile.bbox.min_lon))
    });

    let mut rows: Vec<Vec<&TileDownload>> = Vec::new();
    for download in sorted {
        let top = download.tile.bbox.max_lat;
        let same_row = rows
            .last()
            .is_some_and(|row| (row[0].tile.bbox.max_lat - top).abs() < ROW_EPSILON);
        match rows.last_mut() {
            Some(row) if same_row => row.push(download),
            _ => rows.push(vec![download]),
        }
    }
    rows
}

/// Fails with the indices of tiles that have no download.
pub fn ensure_complete(tiles: &[Tile], downloads: &[TileDownload]) -> Result<()> {
    let present: BTreeSet<usize> = downloads.iter().map(|d| d.tile.index).collect();
    let missing: Vec<usize> = tiles
        .iter()
        .map(|t| t.index)
        .filter(|i| !present.contains(i))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EtlError::PartialDataError { missing })
    }
}

/// Concatenates tile arrays into one `(rows, cols, bands)` scene. Shapes
/// must line up exactly; nothing is resampled.
pub fn stitch_tiles(downloads: &[TileDownload]) -> Result<Array3<f32>> {
    if downloads.is_empty() {
        return Err(EtlError::StitchError {
            message: "no tiles to stitch".to_string(),
        });
    }

    let bands = downloads[0].data.dim().2;
    let mut row_arrays: Vec<Array3<f32>> = Vec::new();
    for (r, row) in order_tiles_into_rows(downloads).iter().enumerate() {
        let height = row[0].data.dim().0;
        for d in row {
            let (h, _, b) = d.data.dim();
            if h != height || b != bands {
                return Err(EtlError::StitchError {
                    message: format!(
                        "tile {} has shape {:?}, row {} expects height {} and {} bands",
                        d.tile.index,
                        d.data.dim(),
                        r,
                        height,
                        bands
                    ),
                });
            }
        }
        let views: Vec<ArrayView3<f32>> = row.iter().map(|d| d.data.view()).collect();
        row_arrays.push(concatenate(Axis(1), &views)?);
    }

    let width = row_arrays[0].dim().1;
    if let Some((r, bad)) = row_arrays.iter().enumerate().find(|(_, a)| a.dim().1 != width) {
        return Err(EtlError::StitchError {
            message: format!("row {} is {} px wide, expected {}", r, bad.dim().1, width),
        });
    }

    let views: Vec<ArrayView3<f32>> = row_arrays.iter().map(|a| a.view()).collect();
    let stitched = concatenate(Axis(0), &views)?;
    tracing::info!(
        "🧩 Stitched {} tiles into {:?}",
        downloads.len(),
        stitched.dim()
    );
    Ok(stitched)
}

/// Union of tile bboxes.
pub fn compute_stitched_bbox<'a>(bboxes: impl IntoIterator<Item = &'a BBox>) -> Option<BBox> {
    bboxes
        .into_iter()
        .fold(None, |acc: Option<BBox>, b| Some(acc.map_or(*b, |a| a.union(b))))
}
