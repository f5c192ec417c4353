use crate::app::pipelines::acquisition_pipeline::AcquisitionPipeline;
use crate::config::Profile;
use crate::core::etl::EtlEngine;
use crate::core::job::Job;
use crate::core::time_intervals::create_timeseries_jobs;
use crate::core::{ImageryProvider, JobReport, Storage};
use crate::domain::model::TimeInterval;
use crate::utils::error::{EtlError, Result};
use serde::Serialize;
use std::sync::Arc;

pub const SUMMARY_FILE: &str = "timeseries_summary.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubJobStatus {
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SubJobOutcome {
    pub job_id: String,
    pub interval: TimeInterval,
    pub status: SubJobStatus,
    pub report: Option<JobReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesSummary {
    pub parent_job_id: String,
    pub outcomes: Vec<SubJobOutcome>,
}

impl TimeSeriesSummary {
    pub fn count(&self, status: SubJobStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    job_id: &'a str,
    start: String,
    end: String,
    status: SubJobStatus,
    orbit_dates: String,
    cloud_coverage: Option<f64>,
    mean_ndvi: Option<f64>,
    peak_memory_mb: Option<u64>,
}

/// Runs one acquisition job per interval of a time-series profile.
pub struct TimeSeriesRunner<S: Storage + Clone, P: ImageryProvider> {
    storage: S,
    provider: Arc<P>,
    profile: Profile,
    monitor_enabled: bool,
}

impl<S: Storage + Clone, P: ImageryProvider> TimeSeriesRunner<S, P> {
    pub fn new(storage: S, provider: Arc<P>, profile: Profile) -> Self {
        Self {
            storage,
            provider,
            profile,
            monitor_enabled: false,
        }
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor_enabled = enabled;
        self
    }

    async fn run_job(&self, job: Job) -> SubJobOutcome {
        let job_id = job.job_id.clone();
        let interval = job.time_interval;
        let pipeline = AcquisitionPipeline::new(self.storage.clone(), self.provider.clone(), job);
        let engine = EtlEngine::new_with_monitoring(pipeline, self.monitor_enabled);

        match engine.run().await {
            Ok(report) => SubJobOutcome {
                job_id,
                interval,
                status: SubJobStatus::Completed,
                report: Some(report),
                error: None,
            },
            Err(e) if e.is_no_data() => {
                tracing::warn!("⏭️ Skipping {}: {}", job_id, e);
                if let Err(cleanup) = self.storage.remove_dir_all(&job_id).await {
                    tracing::warn!("⚠️ Could not remove {}: {}", job_id, cleanup);
                }
                SubJobOutcome {
                    job_id,
                    interval,
                    status: SubJobStatus::Skipped,
                    report: None,
                    error: Some(e.to_string()),
                }
            }
            Err(e) => {
                tracing::error!("❌ {} failed: {} ({:?})", job_id, e, e.category());
                SubJobOutcome {
                    job_id,
                    interval,
                    status: SubJobStatus::Failed,
                    report: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Runs every sub-job in order. Fails only when all of them failed.
    pub async fn run(&self) -> Result<TimeSeriesSummary> {
        let jobs = create_timeseries_jobs(&self.profile)?;
        let parent_job_id = Job::from_profile(&self.profile).job_id;
        tracing::info!(
            "📅 Time series {}: {} intervals",
            parent_job_id,
            jobs.len()
        );

        let total = jobs.len();
        let mut outcomes = Vec::with_capacity(total);
        for (i, job) in jobs.into_iter().enumerate() {
            tracing::info!("▶️ [{}/{}] {}", i + 1, total, job.job_id);
            outcomes.push(self.run_job(job).await);
        }

        let summary = TimeSeriesSummary {
            parent_job_id,
            outcomes,
        };
        self.write_summary(&summary).await?;

        tracing::info!(
            "📈 Time series done: {} completed, {} skipped, {} failed",
            summary.count(SubJobStatus::Completed),
            summary.count(SubJobStatus::Skipped),
            summary.count(SubJobStatus::Failed)
        );

        let failed = summary.count(SubJobStatus::Failed);
        if failed > 0 && failed == summary.outcomes.len() {
            return Err(EtlError::ProcessingError {
                message: format!("all {} time-series sub-jobs failed", failed),
            });
        }
        Ok(summary)
    }

    async fn write_summary(&self, summary: &TimeSeriesSummary) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for outcome in &summary.outcomes {
            writer.serialize(SummaryRow {
                job_id: &outcome.job_id,
                start: outcome.interval.0.format("%Y-%m-%d").to_string(),
                end: outcome.interval.1.format("%Y-%m-%d").to_string(),
                status: outcome.status,
                orbit_dates: outcome
                    .report
                    .as_ref()
                    .map(|r| r.orbit_dates.join(";"))
                    .unwrap_or_default(),
                cloud_coverage: outcome.report.as_ref().map(|r| r.cloud_coverage),
                mean_ndvi: outcome.report.as_ref().and_then(|r| r.mean_ndvi),
                peak_memory_mb: outcome.report.as_ref().and_then(|r| r.peak_memory_mb),
            })?;
        }
        let bytes = writer.into_inner().map_err(|e| EtlError::ProcessingError {
            message: format!("could not finish summary CSV: {}", e),
        })?;

        let path = format!("{}/{}", summary.parent_job_id, SUMMARY_FILE);
        self.storage.write_file(&path, &bytes).await?;
        tracing::info!("🧾 Summary written to {}", path);
        Ok(())
    }
}
