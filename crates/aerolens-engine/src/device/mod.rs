//! GPU device layer.
//!
//! This module is responsible for:
//! - the [`GpuBackend`] contract the render pipeline drives (resource
//!   allocation, target binding, compositor factories)
//! - creating the wgpu Instance/Adapter/Device/Queue and the window surface
//! - acquiring surface frames and mapping surface errors to actions

mod backend;
mod gpu;
mod init;

pub use backend::GpuBackend;
pub use gpu::{Gpu, GpuFrame, SurfaceErrorAction};
pub use init::GpuInit;
