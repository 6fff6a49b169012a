//! wgpu implementation of the GPU backend and compositors.
//!
//! All passes record into the encoder of the caller's [`GpuFrame`]
//! (`crate::device::GpuFrame`); nothing here submits work.
//!
//! Video, HUD and corrector passes attach color only. The depth buffer of
//! an off-screen target is cleared with it and is otherwise unused.

mod backend;
mod common;
mod hmd;
mod hud;
mod video;

pub use backend::{ActiveTarget, OffscreenTarget, WgpuBackend};
pub use hmd::{EyeLens, WgpuHmd};
pub use hud::{build_symbology, HudBar, Symbology, WgpuHud};
pub use video::WgpuVideo;
