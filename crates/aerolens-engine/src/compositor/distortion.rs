use crate::coords::Size;
use crate::device::GpuBackend;

use super::DrawTarget;

/// Warps a side-by-side source image for head-mounted display lenses.
///
/// Built once per configuration from `LensParams` and the eye size; the
/// warp is a pure function of those and the source image.
pub trait DistortionCorrector<B: GpuBackend + ?Sized> {
    /// Reads `source` (one eye, `source_size`) and draws both eyes into
    /// `target.viewport` on the surface.
    fn render_hmd(
        &mut self,
        gpu: &B,
        target: &mut DrawTarget<'_, B>,
        source: &B::Offscreen,
        source_size: Size,
    ) -> anyhow::Result<()>;
}
