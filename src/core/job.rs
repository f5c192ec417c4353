use crate::config::Profile;
use crate::domain::model::TimeInterval;
use crate::domain::ports::Storage;
use crate::utils::error::Result;

/// `"Canterbury Plains"` -> `"canterbury_plains"`.
pub fn region_slug(region: &str) -> String {
    region.trim().to_lowercase().replace(' ', "_")
}

/// `<region_slug>__<YYYYMMDD>_<YYYYMMDD>`, nested under the parent id for
/// time-series sub-jobs.
pub fn generate_job_id(region: &str, interval: &TimeInterval, parent_job_id: Option<&str>) -> String {
    let own = format!(
        "{}__{}_{}",
        region_slug(region),
        interval.0.format("%Y%m%d"),
        interval.1.format("%Y%m%d")
    );
    match parent_job_id {
        Some(parent) => format!("{}/{}", parent, own),
        None => own,
    }
}

/// One acquisition run: a profile narrowed to a single interval.
#[derive(Debug, Clone)]
pub struct Job {
    pub profile: Profile,
    pub time_interval: TimeInterval,
    pub job_id: String,
    pub parent_job_id: Option<String>,
}

/// Storage-relative output locations of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub base: String,
    pub raw_tiles: String,
    pub stitched: String,
    pub imagery: String,
    pub metadata: String,
}

impl JobPaths {
    fn for_job_id(job_id: &str) -> Self {
        Self {
            base: job_id.to_string(),
            raw_tiles: format!("{}/raw_tiles", job_id),
            stitched: format!("{}/stitched", job_id),
            imagery: format!("{}/imagery", job_id),
            metadata: format!("{}/metadata", job_id),
        }
    }

    pub fn all(&self) -> [&str; 5] {
        [
            &self.base,
            &self.raw_tiles,
            &self.stitched,
            &self.imagery,
            &self.metadata,
        ]
    }

    pub fn workflow_tile_metadata(&self) -> String {
        format!("{}/workflow_tile_metadata.json", self.metadata)
    }

    pub fn orbit_metadata(&self, prefix: &str) -> String {
        format!("{}/{}_orbit_metadata.json", self.metadata, prefix)
    }

    pub fn selected_orbit(&self, prefix: &str) -> String {
        format!("{}/{}_selected_orbit.json", self.metadata, prefix)
    }

    pub fn product_metadata(&self) -> String {
        format!("{}/product_metadata.json", self.metadata)
    }

    pub fn raw_tile(&self, file_name: &str) -> String {
        format!("{}/{}", self.raw_tiles, file_name)
    }

    pub fn stitched_raw_bands(&self) -> String {
        format!("{}/stitched_raw_bands.npy", self.stitched)
    }

    pub fn imagery_file(&self, name: &str) -> String {
        format!("{}/{}", self.imagery, name)
    }
}

impl Job {
    /// Single job covering the whole profile interval.
    pub fn from_profile(profile: &Profile) -> Self {
        Self::for_interval(profile, profile.time_interval, None)
    }

    pub fn for_interval(
        profile: &Profile,
        interval: TimeInterval,
        parent_job_id: Option<String>,
    ) -> Self {
        let job_id = generate_job_id(&profile.region, &interval, parent_job_id.as_deref());
        let mut profile = profile.clone();
        profile.time_interval = interval;
        Self {
            profile,
            time_interval: interval,
            job_id,
            parent_job_id,
        }
    }

    pub fn paths(&self) -> JobPaths {
        JobPaths::for_job_id(&self.job_id)
    }

    pub fn tile_prefix(&self, tile_index: usize) -> String {
        format!("{}_tile{}", region_slug(&self.profile.region), tile_index)
    }

    pub async fn prepare_output_dirs<S: Storage>(&self, storage: &S) -> Result<JobPaths> {
        let paths = self.paths();
        for dir in paths.all() {
            storage.create_dir_all(dir).await?;
        }
        Ok(paths)
    }
}
