use std::sync::Arc;

use crate::compositor::{DistortionCorrector, HudCompositor, VideoCompositor};
use crate::coords::{RenderRect, Size};
use crate::media::StreamDescriptor;
use crate::settings::LensParams;

/// GPU resource contract driven by the render pipeline.
///
/// The backend allocates everything the pipeline owns: off-screen targets
/// and compositor instances. Resources are released by dropping them, so
/// the pipeline frees GPU state simply by letting go of its handles.
///
/// `Surface` is the caller's frame (the drawing surface of the current
/// tick). The pipeline never creates or stores one; it only borrows it for
/// the duration of a `render` call.
pub trait GpuBackend {
    type Surface;
    type Offscreen;
    type Video: VideoCompositor<Self>;
    type Hud: HudCompositor<Self>;
    type Corrector: DistortionCorrector<Self>;

    /// Allocates a color + depth render target of `size`.
    fn create_offscreen(&mut self, size: Size) -> anyhow::Result<Self::Offscreen>;

    fn create_video_compositor(
        &mut self,
        stream: Option<&Arc<StreamDescriptor>>,
    ) -> anyhow::Result<Self::Video>;

    fn create_hud_compositor(
        &mut self,
        stream: Option<&Arc<StreamDescriptor>>,
    ) -> anyhow::Result<Self::Hud>;

    /// Builds a corrector for one eye of `eye` size using `lens`.
    fn create_distortion_corrector(
        &mut self,
        lens: &LensParams,
        eye: Size,
    ) -> anyhow::Result<Self::Corrector>;

    /// Selects the draw target (`None` for the surface) and viewport for the
    /// passes that follow.
    fn bind_target(
        &mut self,
        surface: &mut Self::Surface,
        target: Option<&Self::Offscreen>,
        viewport: RenderRect,
    );

    /// Clears the bound target (color and, for off-screen targets, depth).
    fn clear(&mut self, surface: &mut Self::Surface, target: Option<&Self::Offscreen>);
}
