//! Compositor contracts.
//!
//! A compositor draws one aspect of the output (video, HUD, or the
//! distortion-corrected image) into a target chosen by the render pipeline.
//! Implementations are created by a [`GpuBackend`](crate::device::GpuBackend)
//! and receive that backend back on every call, so they can reach device
//! state without owning it.
//!
//! Conventions:
//! - per-frame failures are reported as `anyhow::Error`; the pipeline logs
//!   them and moves on to the next frame
//! - geometry is in physical pixels, top-left origin

mod distortion;
mod hud;
mod target;
mod video;

pub use distortion::DistortionCorrector;
pub use hud::{HudCompositor, HudParams};
pub use target::DrawTarget;
pub use video::{
    check_frame_against_stream, fit_rect, head_tracking_offset, ColorConversion, DrawOutcome,
    FrameUpload, PlaneShape, VideoCompositor, VideoParams,
};
