use crate::domain::model::{Acquisition, JobReport, SceneProducts, Tile, TimeInterval};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use ndarray::Array3;
use serde_json::Value;

/// Byte-level persistence rooted at an output base directory. Paths are
/// relative to that root and use `/` separators.
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn create_dir_all(&self, path: &str) -> impl std::future::Future<Output = Result<()>> + Send;
    fn remove_dir_all(&self, path: &str) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

/// Remote imagery service: orbit discovery, band download and product lookup.
#[async_trait]
pub trait ImageryProvider: Send + Sync {
    /// Raw orbit discovery document for one tile over the interval.
    async fn discover_orbits(&self, tile: &Tile, interval: &TimeInterval) -> Result<Value>;

    /// Band stack `(height, width, bands)` for one tile on one acquisition day.
    async fn fetch_tile(
        &self,
        tile: &Tile,
        date: NaiveDate,
        max_cloud_coverage: f64,
    ) -> Result<Array3<f32>>;

    /// Catalog entry for a product id, `None` when the catalog has no match.
    async fn fetch_product(&self, product_id: &str) -> Result<Option<Value>>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Acquisition>;
    async fn transform(&self, acquisition: Acquisition) -> Result<SceneProducts>;
    async fn load(&self, products: SceneProducts) -> Result<JobReport>;
}
