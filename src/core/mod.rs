pub mod etl;
pub mod geometry;
pub mod job;
pub mod orbit_selection;
pub mod postprocess;
pub mod stitching;
pub mod tiling;
pub mod time_intervals;

pub use crate::domain::model::{Acquisition, JobReport, SceneProducts};
pub use crate::domain::ports::{ImageryProvider, Pipeline, Storage};
pub use crate::utils::error::Result;
