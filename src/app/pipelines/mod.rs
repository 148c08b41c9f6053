pub mod clean_pipeline;
pub mod detect_pipeline;
pub mod download_pipeline;

pub use clean_pipeline::{CleanOptions, CleanPipeline};
pub use detect_pipeline::{DetectOptions, DetectPipeline, SimulationRequest, SimulationShape};
pub use download_pipeline::{DownloadOptions, DownloadPipeline};
