//! Render orchestration.
//!
//! [`RenderPipeline`] owns the GPU resources and compositors for one output,
//! pulls the newest decoded frame from the attached decoder's hand-off queue,
//! and sequences the video, HUD and (optionally) HMD passes each tick.

mod composition;
mod config;
mod error;
mod pipeline;
mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{PipelineConfig, PipelineState, RenderOutcome};
pub use error::RenderError;
pub use pipeline::RenderPipeline;
pub use stats::RenderStats;
