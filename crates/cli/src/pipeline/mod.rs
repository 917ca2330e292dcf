//! Pipeline orchestration module.

mod input;
mod orchestrator;
mod stats;

pub use input::BatchReader;
pub use orchestrator::{Pipeline, PipelineOptions};
pub use stats::PipelineStats;
