use crate::adapters::raster::{
    encode_geotiff_gray, encode_geotiff_rgb, encode_npy, render_mask_png, render_ndvi_png,
    render_rgb_png,
};
use crate::core::job::{Job, JobPaths};
use crate::core::orbit_selection::{has_valid_orbits, select_orbits_for_tiles, TileOrbits};
use crate::core::postprocess::{
    apply_cloud_mask, cloud_mask, compute_ndvi, ndvi_stats, rasterize_true_color,
};
use crate::core::stitching::{compute_stitched_bbox, ensure_complete, stitch_tiles};
use crate::core::tiling::{generate_safe_tiles, workflow_tile_metadata};
use crate::core::{Acquisition, ImageryProvider, JobReport, Pipeline, SceneProducts, Storage};
use crate::domain::model::{FailedTile, OrbitMetadata, OrbitSelection, Tile, TileDownload};
use crate::utils::error::{EtlError, Result};
use chrono::NaiveDate;
use ndarray::Array3;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

/// Single acquisition job: orbit discovery and selection, tile download,
/// stitching and product rendering.
pub struct AcquisitionPipeline<S: Storage, P: ImageryProvider> {
    pub(crate) storage: S,
    pub(crate) provider: Arc<P>,
    pub(crate) job: Job,
}

impl<S: Storage, P: ImageryProvider> AcquisitionPipeline<S, P> {
    pub fn new(storage: S, provider: Arc<P>, job: Job) -> Self {
        Self {
            storage,
            provider,
            job,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    async fn discover_orbits(&self, tiles: &[Tile], paths: &JobPaths) -> Result<Vec<TileOrbits>> {
        let mut discovered = Vec::with_capacity(tiles.len());
        for tile in tiles {
            let prefix = self.job.tile_prefix(tile.index);
            let document = self
                .provider
                .discover_orbits(tile, &self.job.time_interval)
                .await?;
            let mut metadata: OrbitMetadata = serde_json::from_value(document)?;
            metadata.tile_bbox = Some(tile.bbox);

            self.storage
                .write_file(&paths.orbit_metadata(&prefix), &pretty(&metadata)?)
                .await?;
            tracing::info!("🔭 {}: {} candidate orbits", prefix, metadata.orbits.len());

            discovered.push(TileOrbits {
                index: tile.index,
                label: prefix,
                bbox: tile.bbox,
                metadata,
            });
        }
        Ok(discovered)
    }

    /// Merges catalog entries for the selected products into
    /// `product_metadata.json`. Entries already on disk are kept as they are.
    async fn record_products(&self, selection: &OrbitSelection, paths: &JobPaths) -> Result<()> {
        let path = paths.product_metadata();
        let mut records: Map<String, Value> = if self.storage.exists(&path).await {
            match serde_json::from_slice::<Value>(&self.storage.read_file(&path).await?)? {
                Value::Object(map) => map,
                _ => Map::new(),
            }
        } else {
            Map::new()
        };

        let product_ids: BTreeSet<String> = selection
            .per_tile
            .values()
            .flat_map(|s| s.product_ids.iter().cloned())
            .collect();

        let mut added = 0usize;
        for product_id in product_ids {
            if records.contains_key(&product_id) {
                continue;
            }
            match self.provider.fetch_product(&product_id).await {
                Ok(Some(feature)) => {
                    records.insert(product_id, feature);
                    added += 1;
                }
                Ok(None) => tracing::warn!("⚠️ Product {} not found in catalog", product_id),
                Err(e) => tracing::warn!("⚠️ Catalog lookup for {} failed: {}", product_id, e),
            }
        }

        self.storage
            .write_file(&path, &pretty(&Value::Object(records))?)
            .await?;
        tracing::info!("🗂️ Recorded {} new product entries", added);
        Ok(())
    }

    async fn download_tile(&self, tile: &Tile, date: NaiveDate) -> Result<Array3<f32>> {
        let data = self
            .provider
            .fetch_tile(tile, date, self.job.profile.cloud_cover_threshold)
            .await?;

        let (height, width, _) = data.dim();
        if (height, width) != (tile.height, tile.width) {
            return Err(EtlError::ProcessingError {
                message: format!(
                    "expected {}x{} px, got {}x{}",
                    tile.width, tile.height, width, height
                ),
            });
        }
        if data.iter().all(|v| *v == 0.0) {
            return Err(EtlError::ProcessingError {
                message: "tile contains only zeros".to_string(),
            });
        }
        Ok(data)
    }

    async fn download_tiles(
        &self,
        tiles: &[Tile],
        selection: &OrbitSelection,
        paths: &JobPaths,
    ) -> Result<(Vec<TileDownload>, Vec<FailedTile>)> {
        let mut downloads = Vec::new();
        let mut failed = Vec::new();

        for tile in tiles {
            let prefix = self.job.tile_prefix(tile.index);
            let date = selection
                .per_tile
                .get(&tile.index)
                .and_then(|s| NaiveDate::parse_from_str(&s.orbit_date, "%Y-%m-%d").ok());
            let Some(date) = date else {
                failed.push(FailedTile {
                    index: tile.index,
                    bbox: tile.bbox,
                    reason: "no orbit selected".to_string(),
                });
                continue;
            };

            match self.download_tile(tile, date).await {
                Ok(data) => {
                    let file_name = format!("{}_000.npy", prefix);
                    self.storage
                        .write_file(&paths.raw_tile(&file_name), &encode_npy(&data)?)
                        .await?;
                    tracing::info!("📥 {}: {:?} on {}", prefix, data.dim(), date);
                    downloads.push(TileDownload {
                        tile: tile.clone(),
                        file_name,
                        data,
                    });
                }
                Err(e @ EtlError::AuthError { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!("⚠️ {}: download failed: {}", prefix, e);
                    failed.push(FailedTile {
                        index: tile.index,
                        bbox: tile.bbox,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !failed.is_empty() {
            self.storage
                .write_file(&format!("{}/failed_tiles.json", paths.metadata), &pretty(&failed)?)
                .await?;
        }
        Ok((downloads, failed))
    }
}

#[async_trait::async_trait]
impl<S: Storage, P: ImageryProvider> Pipeline for AcquisitionPipeline<S, P> {
    async fn extract(&self) -> Result<Acquisition> {
        let profile = &self.job.profile;
        let strategy = profile.strategy()?;
        tracing::info!(
            "🛰️ Job {} ({} to {}, strategy {})",
            self.job.job_id,
            self.job.time_interval.0,
            self.job.time_interval.1,
            strategy
        );

        let paths = self.job.prepare_output_dirs(&self.storage).await?;
        let tiles = generate_safe_tiles(
            &profile.bbox,
            profile.resolution,
            profile.max_tile_dim,
            profile.tile_buffer,
        )?;
        tracing::info!("🧱 Split area into {} tiles", tiles.len());
        self.storage
            .write_file(
                &paths.workflow_tile_metadata(),
                &pretty(&workflow_tile_metadata(&tiles))?,
            )
            .await?;

        let tile_orbits = self.discover_orbits(&tiles, &paths).await?;
        if !has_valid_orbits(&tile_orbits) {
            return Err(EtlError::NoValidOrbitError {
                tile: "all tiles".to_string(),
                reason: format!(
                    "no orbits between {} and {}",
                    self.job.time_interval.0, self.job.time_interval.1
                ),
            });
        }

        let selection =
            select_orbits_for_tiles(&tile_orbits, strategy, profile.cloud_cover_threshold)?;
        for (index, selected) in &selection.per_tile {
            let prefix = self.job.tile_prefix(*index);
            self.storage
                .write_file(&paths.selected_orbit(&prefix), &pretty(selected)?)
                .await?;
        }

        self.record_products(&selection, &paths).await?;
        let (downloads, failed) = self.download_tiles(&tiles, &selection, &paths).await?;

        Ok(Acquisition {
            tiles,
            selection,
            downloads,
            failed,
        })
    }

    async fn transform(&self, acquisition: Acquisition) -> Result<SceneProducts> {
        ensure_complete(&acquisition.tiles, &acquisition.downloads)?;

        let stitched = stitch_tiles(&acquisition.downloads)?;
        let bbox = compute_stitched_bbox(acquisition.tiles.iter().map(|t| &t.bbox)).ok_or_else(
            || EtlError::StitchError {
                message: "no tile geometry".to_string(),
            },
        )?;

        let raw_ndvi = compute_ndvi(&stitched)?;
        let mask = cloud_mask(&stitched);
        let ndvi = match &mask {
            Some(mask) => apply_cloud_mask(&raw_ndvi, mask)?,
            None => {
                tracing::warn!("⚠️ No SCL band, NDVI left unmasked");
                raw_ndvi
            }
        };
        let true_color = rasterize_true_color(&stitched)?;

        Ok(SceneProducts {
            bbox,
            stitched,
            ndvi,
            cloud_mask: mask,
            true_color,
            selection: acquisition.selection,
        })
    }

    async fn load(&self, products: SceneProducts) -> Result<JobReport> {
        let paths = self.job.paths();

        self.storage
            .write_file(&paths.stitched_raw_bands(), &encode_npy(&products.stitched)?)
            .await?;
        self.storage
            .write_file(
                &paths.imagery_file("ndvi.tif"),
                &encode_geotiff_gray(&products.ndvi, &products.bbox)?,
            )
            .await?;
        self.storage
            .write_file(
                &paths.imagery_file("true_color.tif"),
                &encode_geotiff_rgb(&products.true_color, &products.bbox)?,
            )
            .await?;
        self.storage
            .write_file(&paths.imagery_file("ndvi.png"), &render_ndvi_png(&products.ndvi)?)
            .await?;
        self.storage
            .write_file(
                &paths.imagery_file("true_color.png"),
                &render_rgb_png(&products.true_color)?,
            )
            .await?;
        if let Some(mask) = &products.cloud_mask {
            self.storage
                .write_file(
                    &paths.imagery_file("ndvi_cloud_mask.png"),
                    &render_mask_png(mask)?,
                )
                .await?;
        }

        let stats = ndvi_stats(&products.ndvi);
        tracing::info!(
            "🌿 NDVI: {}/{} valid pixels, mean {:?}",
            stats.valid_pixels,
            stats.total_pixels,
            stats.mean
        );

        Ok(JobReport {
            job_id: self.job.job_id.clone(),
            output_path: format!(
                "{}/{}",
                self.job.profile.output_base_dir.trim_end_matches('/'),
                paths.base
            ),
            orbit_dates: products.selection.orbit_dates(),
            cloud_coverage: products.selection.mean_cloud_coverage(),
            mean_ndvi: stats.mean,
            peak_memory_mb: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::core::{ImageryProvider, Storage};
    use crate::domain::model::{Tile, TimeInterval};
    use crate::utils::error::{EtlError, Result};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use ndarray::Array3;
    use serde_json::{json, Value};
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    pub struct MockStorage {
        pub files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().await.get(path).cloned()
        }

        pub async fn paths(&self) -> Vec<String> {
            let mut paths: Vec<String> = self.files.lock().await.keys().cloned().collect();
            paths.sort();
            paths
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.files.lock().await.get(path).cloned().ok_or_else(|| {
                EtlError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            self.files
                .lock()
                .await
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn create_dir_all(&self, _path: &str) -> Result<()> {
            Ok(())
        }

        async fn remove_dir_all(&self, path: &str) -> Result<()> {
            let prefix = format!("{}/", path);
            self.files.lock().await.retain(|k, _| !k.starts_with(&prefix));
            Ok(())
        }

        async fn exists(&self, path: &str) -> bool {
            self.files.lock().await.contains_key(path)
        }
    }

    /// Provider that reports one clear orbit per date in `dates` for every
    /// tile and serves a uniform vegetated band stack.
    pub struct MockProvider {
        pub dates: Vec<&'static str>,
        pub cloud: f64,
        pub failing_tiles: BTreeSet<usize>,
        pub zero_tiles: BTreeSet<usize>,
        pub discover_calls: AtomicUsize,
        pub fetch_calls: AtomicUsize,
    }

    impl MockProvider {
        pub fn new(dates: Vec<&'static str>) -> Self {
            Self {
                dates,
                cloud: 5.0,
                failing_tiles: BTreeSet::new(),
                zero_tiles: BTreeSet::new(),
                discover_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
            }
        }
    }

    pub fn covering_polygon(tile: &Tile) -> Value {
        let b = tile.bbox;
        json!({
            "type": "Polygon",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::4326"}},
            "coordinates": [[
                [b.min_lon - 0.01, b.min_lat - 0.01],
                [b.max_lon + 0.01, b.min_lat - 0.01],
                [b.max_lon + 0.01, b.max_lat + 0.01],
                [b.min_lon - 0.01, b.max_lat + 0.01],
                [b.min_lon - 0.01, b.min_lat - 0.01]
            ]]
        })
    }

    #[async_trait]
    impl ImageryProvider for MockProvider {
        async fn discover_orbits(&self, tile: &Tile, _interval: &TimeInterval) -> Result<Value> {
            self.discover_calls.fetch_add(1, Ordering::SeqCst);
            let orbits: Vec<Value> = self
                .dates
                .iter()
                .map(|date| {
                    json!({
                        "dateFrom": format!("{}T00:00:00Z", date),
                        "dateTo": format!("{}T23:59:59Z", date),
                        "tiles": [{
                            "tileId": 1000 + tile.index,
                            "productId": format!("S2A_{}", date.replace('-', "")),
                            "date": date,
                            "cloudCoverage": self.cloud,
                            "dataGeometry": covering_polygon(tile)
                        }]
                    })
                })
                .collect();
            Ok(json!({ "orbits": orbits }))
        }

        async fn fetch_tile(
            &self,
            tile: &Tile,
            _date: NaiveDate,
            _max_cloud_coverage: f64,
        ) -> Result<Array3<f32>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_tiles.contains(&tile.index) {
                return Err(EtlError::ProviderError {
                    status: 500,
                    message: "internal error".to_string(),
                });
            }
            if self.zero_tiles.contains(&tile.index) {
                return Ok(Array3::zeros((tile.height, tile.width, 7)));
            }
            // B02, B03, B04, B08, B11, B12, SCL (4 = vegetation).
            let pixel = [0.04f32, 0.08, 0.1, 0.5, 0.2, 0.1, 4.0];
            Ok(Array3::from_shape_fn((tile.height, tile.width, 7), |(_, _, b)| pixel[b]))
        }

        async fn fetch_product(&self, product_id: &str) -> Result<Option<Value>> {
            Ok(Some(json!({
                "id": product_id,
                "properties": {"eo:cloud_cover": self.cloud}
            })))
        }
    }
}
