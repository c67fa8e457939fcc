//! Streaming pipeline: device -> archive -> dispatcher -> consumer threads.

mod orchestrator;
mod stats;

pub use orchestrator::{Pipeline, PipelineConfig};
pub use stats::PipelineStats;
