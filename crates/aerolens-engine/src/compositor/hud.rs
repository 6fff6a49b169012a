use std::sync::Arc;

use crate::coords::Size;
use crate::device::GpuBackend;
use crate::media::{OverlayMetadata, StreamDescriptor};

use super::DrawTarget;

/// Inputs for one HUD pass.
#[derive(Debug, Clone, Copy)]
pub struct HudParams<'a> {
    /// Picture width after sample-aspect correction (`width * sar.width`).
    pub display_width: f32,
    /// Picture height after sample-aspect correction (`height * sar.height`).
    pub display_height: f32,
    /// Size of the viewport the HUD is drawn into.
    pub target: Size,
    pub metadata: &'a OverlayMetadata,
    /// Drawing into one eye of a side-by-side HMD layout.
    pub hmd_split: bool,
    pub head_tracking: bool,
}

/// Draws telemetry symbology over already rendered video.
pub trait HudCompositor<B: GpuBackend + ?Sized> {
    /// Rebinds to a new stream after a decoder attach.
    fn bind_stream(&mut self, stream: Option<&Arc<StreamDescriptor>>);

    /// Draws the HUD for the current frame.
    ///
    /// Layout derives from the display dimensions, never from raw pixel
    /// dimensions, so anamorphic streams keep round symbology.
    fn render_hud(
        &mut self,
        gpu: &B,
        target: &mut DrawTarget<'_, B>,
        params: &HudParams<'_>,
    ) -> anyhow::Result<()>;
}
