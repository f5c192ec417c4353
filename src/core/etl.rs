use crate::core::Pipeline;
use crate::domain::model::JobReport;
use crate::utils::error::Result;
use crate::utils::monitor::{Phase, SystemMonitor};

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<JobReport> {
        tracing::info!("🚀 Starting acquisition job");

        tracing::info!("📡 Extracting: orbit discovery, selection and tile download");
        let acquisition = self.pipeline.extract().await?;
        tracing::info!(
            "📥 Downloaded {}/{} tiles ({} failed)",
            acquisition.downloads.len(),
            acquisition.tiles.len(),
            acquisition.failed.len()
        );
        self.monitor.sample(Phase::Extract);

        tracing::info!("🧵 Transforming: stitching and derived products");
        let products = self.pipeline.transform(acquisition).await?;
        tracing::info!("🧪 Scene raster {:?}", products.stitched.dim());
        self.monitor.sample(Phase::Transform);

        tracing::info!("💾 Loading: writing rasters and provenance");
        let mut report = self.pipeline.load(products).await?;
        tracing::info!("📁 Output saved to: {}", report.output_path);
        self.monitor.sample(Phase::Load);
        report.peak_memory_mb = self
            .monitor
            .finish()
            .and_then(|usage| usage.peak_memory_mb());

        Ok(report)
    }
}
