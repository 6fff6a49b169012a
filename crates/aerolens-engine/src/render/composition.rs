use std::sync::Arc;

use crate::compositor::{
    DistortionCorrector, DrawOutcome, DrawTarget, FrameUpload, HudCompositor, HudParams,
    VideoCompositor, VideoParams,
};
use crate::coords::{RenderRect, Size};
use crate::device::GpuBackend;
use crate::media::StreamDescriptor;
use crate::settings::SettingsStore;

use super::{PipelineConfig, RenderError};

/// How composited layers reach the surface.
pub(crate) enum Composition<B: GpuBackend> {
    /// Video and HUD draw straight into the render rectangle.
    Direct,
    /// Video and HUD draw into a half-width off-screen eye, which the
    /// corrector then warps onto both halves of the render rectangle.
    HmdWarp {
        target: B::Offscreen,
        corrector: B::Corrector,
        eye: Size,
    },
}

/// Per-tick inputs shared by both composition variants.
pub(crate) struct FramePass<'a> {
    /// Set when the held frame has not been uploaded to the current
    /// compositors yet.
    pub upload: Option<FrameUpload<'a>>,
    pub video: VideoParams<'a>,
    pub hud: HudParams<'a>,
}

/// What one [`Compositors::draw`] achieved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    Drawn,
    /// Nothing loaded yet, or a draw step failed.
    NotDrawn,
    /// The pending upload failed; the frame must be uploaded again before
    /// anything is drawn for it.
    LoadFailed,
}

/// Everything a configuration allocates; dropped as a unit.
pub(crate) struct Compositors<B: GpuBackend> {
    video: B::Video,
    hud: Option<B::Hud>,
    composition: Composition<B>,
}

impl<B: GpuBackend> Compositors<B> {
    /// Allocates the compositors `config` asks for.
    ///
    /// On failure every resource built so far is dropped before returning.
    pub(crate) fn build(
        backend: &mut B,
        config: &PipelineConfig,
        stream: Option<&Arc<StreamDescriptor>>,
        settings: &SettingsStore,
    ) -> Result<Self, RenderError> {
        let video = backend
            .create_video_compositor(stream)
            .map_err(|source| RenderError::Compositor { stage: "video", source })?;

        let hud = if config.hud {
            let hud = backend
                .create_hud_compositor(stream)
                .map_err(|source| RenderError::Compositor { stage: "hud", source })?;
            Some(hud)
        } else {
            None
        };

        let composition = if config.hmd_correction {
            let eye = config.eye_size();
            let target = backend
                .create_offscreen(eye)
                .map_err(RenderError::ResourceExhausted)?;
            let corrector = backend
                .create_distortion_corrector(&settings.lens_params(), eye)
                .map_err(|source| RenderError::Compositor {
                    stage: "distortion",
                    source,
                })?;
            Composition::HmdWarp {
                target,
                corrector,
                eye,
            }
        } else {
            Composition::Direct
        };

        Ok(Self {
            video,
            hud,
            composition,
        })
    }

    pub(crate) fn bind_stream(&mut self, stream: Option<&Arc<StreamDescriptor>>) {
        self.video.bind_stream(stream);
        if let Some(hud) = self.hud.as_mut() {
            hud.bind_stream(stream);
        }
    }

    pub(crate) fn is_hmd(&self) -> bool {
        matches!(self.composition, Composition::HmdWarp { .. })
    }

    /// Draws one frame into `render` on `surface`.
    ///
    /// Compositor failures are logged and reported through the returned
    /// [`PassOutcome`]; they never abort the pipeline.
    pub(crate) fn draw(
        &mut self,
        backend: &mut B,
        surface: &mut B::Surface,
        render: RenderRect,
        pass: &FramePass<'_>,
    ) -> PassOutcome {
        match &mut self.composition {
            Composition::Direct => {
                backend.bind_target(surface, None, render);
                draw_layers::<B>(
                    &mut self.video,
                    self.hud.as_mut(),
                    backend,
                    DrawTarget::<B>::new(surface, None, render),
                    pass,
                    false,
                )
            }
            Composition::HmdWarp {
                target,
                corrector,
                eye,
            } => {
                let eye_rect = RenderRect::from_size(*eye);
                backend.bind_target(surface, Some(&*target), eye_rect);
                backend.clear(surface, Some(&*target));

                let outcome = draw_layers::<B>(
                    &mut self.video,
                    self.hud.as_mut(),
                    backend,
                    DrawTarget::<B>::new(surface, Some(&*target), eye_rect),
                    pass,
                    true,
                );

                backend.bind_target(surface, None, render);
                if outcome != PassOutcome::Drawn {
                    return outcome;
                }

                let mut draw_target = DrawTarget::<B>::new(surface, None, render);
                match corrector.render_hmd(backend, &mut draw_target, target, *eye) {
                    Ok(()) => PassOutcome::Drawn,
                    Err(err) => {
                        log::error!("failed to render HMD distortion: {err:#}");
                        PassOutcome::NotDrawn
                    }
                }
            }
        }
    }
}

fn draw_layers<B: GpuBackend>(
    video: &mut B::Video,
    hud: Option<&mut B::Hud>,
    backend: &B,
    mut target: DrawTarget<'_, B>,
    pass: &FramePass<'_>,
    hmd_split: bool,
) -> PassOutcome {
    if let Some(upload) = &pass.upload
        && let Err(err) = video.load_frame(backend, upload)
    {
        log::error!("failed to load video frame {}: {err:#}", upload.sequence);
        return PassOutcome::LoadFailed;
    }

    let video_params = VideoParams {
        target: target.viewport,
        ..pass.video
    };
    let outcome = match video.render_frame(backend, &mut target, &video_params) {
        Ok(DrawOutcome::Drawn) => PassOutcome::Drawn,
        Ok(DrawOutcome::NothingLoaded) => PassOutcome::NotDrawn,
        Err(err) => {
            log::error!("failed to render video frame: {err:#}");
            return PassOutcome::NotDrawn;
        }
    };

    if let Some(hud) = hud {
        let hud_params = HudParams {
            target: target.viewport.size(),
            hmd_split,
            ..pass.hud
        };
        if let Err(err) = hud.render_hud(backend, &mut target, &hud_params) {
            log::error!("failed to render HUD: {err:#}");
        }
    }

    outcome
}
