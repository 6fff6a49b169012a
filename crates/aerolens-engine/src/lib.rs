//! Aerolens engine crate.
//!
//! This crate owns the rendering orchestration for a live drone-video viewer:
//! decoded frames are handed off from a decoder thread, composited with a HUD,
//! and optionally warped for head-mounted display lenses before reaching the
//! caller's surface.

pub mod compositor;
pub mod coords;
pub mod device;
pub mod gpu;
pub mod logging;
pub mod media;
pub mod render;
pub mod settings;
pub mod time;

pub use render::{PipelineConfig, PipelineState, RenderError, RenderOutcome, RenderPipeline};
