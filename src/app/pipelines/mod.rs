pub mod acquisition_pipeline;
pub mod timeseries;

pub use acquisition_pipeline::AcquisitionPipeline;
pub use timeseries::{SubJobStatus, TimeSeriesRunner, TimeSeriesSummary};
