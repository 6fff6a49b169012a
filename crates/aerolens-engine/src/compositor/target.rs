use crate::coords::RenderRect;
use crate::device::GpuBackend;

/// Where a compositor draws during one pass.
///
/// `offscreen` is `None` when drawing straight to the caller's surface.
/// `viewport` is expressed in the coordinates of whichever target is active.
pub struct DrawTarget<'a, B: GpuBackend + ?Sized> {
    pub surface: &'a mut B::Surface,
    pub offscreen: Option<&'a B::Offscreen>,
    pub viewport: RenderRect,
}

impl<'a, B: GpuBackend + ?Sized> DrawTarget<'a, B> {
    #[inline]
    pub fn new(
        surface: &'a mut B::Surface,
        offscreen: Option<&'a B::Offscreen>,
        viewport: RenderRect,
    ) -> Self {
        Self {
            surface,
            offscreen,
            viewport,
        }
    }
}
