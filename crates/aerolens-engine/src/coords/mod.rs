//! Coordinate types.
//!
//! Render geometry is expressed in physical pixels with a top-left origin,
//! matching what the windowing layer reports and what wgpu viewports expect.

mod rect;
mod size;

pub use rect::RenderRect;
pub use size::Size;
