pub mod archive;
pub mod raster;
pub mod sentinel_hub;
pub mod storage;
