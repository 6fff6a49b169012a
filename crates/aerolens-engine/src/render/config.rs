use crate::coords::{RenderRect, Size};

/// Configuration lifecycle of a [`RenderPipeline`](super::RenderPipeline).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Never configured, torn down, or the last configure failed.
    #[default]
    Unconfigured,
    /// A configure call is in progress.
    Configuring,
    /// Configured with a zero-area render rectangle; nothing to draw yet.
    Ready,
    /// Compositors exist and `render` draws.
    Running,
}

/// Output geometry and feature flags.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub window: Size,
    /// Render viewport inside the window. A zero width or height falls back
    /// to the window's.
    pub render: RenderRect,
    pub hud: bool,
    pub hmd_correction: bool,
    pub head_tracking: bool,
}

impl PipelineConfig {
    /// Full-window rendering with the HUD on.
    pub fn new(window: Size) -> Self {
        Self {
            window,
            render: RenderRect::from_size(window),
            hud: true,
            hmd_correction: false,
            head_tracking: false,
        }
    }

    pub fn with_render_rect(mut self, render: RenderRect) -> Self {
        self.render = render;
        self
    }

    pub fn with_hud(mut self, hud: bool) -> Self {
        self.hud = hud;
        self
    }

    pub fn with_hmd_correction(mut self, hmd_correction: bool) -> Self {
        self.hmd_correction = hmd_correction;
        self
    }

    pub fn with_head_tracking(mut self, head_tracking: bool) -> Self {
        self.head_tracking = head_tracking;
        self
    }

    /// Render rectangle after window-size defaulting.
    pub fn effective_render_rect(&self) -> RenderRect {
        let mut rect = self.render;
        if rect.width == 0 {
            rect.width = self.window.width;
        }
        if rect.height == 0 {
            rect.height = self.window.height;
        }
        rect
    }

    /// Size of the off-screen eye target used by HMD correction.
    pub fn eye_size(&self) -> Size {
        self.effective_render_rect().half_width_at_origin().size()
    }
}

/// Non-error result of one render tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RenderOutcome {
    /// A frame was drawn to the surface.
    Rendered,
    /// Nothing was drawn: not running, no frame yet, or the frame could not
    /// be drawn this tick.
    Empty,
}
