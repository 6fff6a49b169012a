use std::f32::consts::PI;
use std::sync::Arc;

use anyhow::{bail, ensure};

use crate::coords::{RenderRect, Size};
use crate::device::GpuBackend;
use crate::media::{ColorFormat, Fov, OverlayMetadata, Plane, SampleAspect, StreamDescriptor};

use super::DrawTarget;

/// Conversion the video compositor applies when sampling frame planes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ColorConversion {
    Yuv420PlanarToRgb,
    Yuv420SemiPlanarToRgb,
    /// Pixels are already RGBA.
    None,
}

impl From<ColorFormat> for ColorConversion {
    fn from(format: ColorFormat) -> Self {
        match format {
            ColorFormat::Yuv420SemiPlanar => ColorConversion::Yuv420SemiPlanarToRgb,
            ColorFormat::Opaque => ColorConversion::None,
            // Unrecognized formats are assumed to be I420, the decoder default.
            ColorFormat::Yuv420Planar | ColorFormat::Unknown(_) => {
                ColorConversion::Yuv420PlanarToRgb
            }
        }
    }
}

/// Texel extent of one plane.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PlaneShape {
    pub width: u32,
    pub height: u32,
    pub bytes_per_texel: u32,
}

impl ColorConversion {
    /// Plane extents for a `width` x `height` picture.
    pub fn plane_shapes(self, width: u32, height: u32) -> Vec<PlaneShape> {
        let cw = width.div_ceil(2);
        let ch = height.div_ceil(2);
        let luma = PlaneShape { width, height, bytes_per_texel: 1 };
        match self {
            ColorConversion::Yuv420PlanarToRgb => vec![
                luma,
                PlaneShape { width: cw, height: ch, bytes_per_texel: 1 },
                PlaneShape { width: cw, height: ch, bytes_per_texel: 1 },
            ],
            ColorConversion::Yuv420SemiPlanarToRgb => vec![
                luma,
                PlaneShape { width: cw, height: ch, bytes_per_texel: 2 },
            ],
            ColorConversion::None => vec![PlaneShape { width, height, bytes_per_texel: 4 }],
        }
    }
}

/// Pixel payload handed to `VideoCompositor::load_frame`.
#[derive(Debug, Clone, Copy)]
pub struct FrameUpload<'a> {
    pub data: &'a [u8],
    pub planes: &'a [Plane],
    pub width: u32,
    pub height: u32,
    pub conversion: ColorConversion,
    pub sequence: u64,
}

impl FrameUpload<'_> {
    /// Checks that every plane the conversion needs lies inside `data`.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.width > 0 && self.height > 0, "frame has zero size");

        let shapes = self.conversion.plane_shapes(self.width, self.height);
        ensure!(
            self.planes.len() >= shapes.len(),
            "{:?} needs {} planes, frame has {}",
            self.conversion,
            shapes.len(),
            self.planes.len()
        );

        for (index, (plane, shape)) in self.planes.iter().zip(&shapes).enumerate() {
            let row_bytes = shape.width as usize * shape.bytes_per_texel as usize;
            ensure!(
                plane.stride >= row_bytes,
                "plane {index}: stride {} shorter than row ({row_bytes} bytes)",
                plane.stride
            );
            let end = plane.offset + plane.stride * (shape.height as usize - 1) + row_bytes;
            ensure!(
                end <= self.data.len(),
                "plane {index}: needs {end} bytes, payload has {}",
                self.data.len()
            );
        }
        Ok(())
    }
}

/// Inputs for one video pass.
#[derive(Debug, Clone, Copy)]
pub struct VideoParams<'a> {
    pub planes: &'a [Plane],
    pub source: Size,
    pub sample_aspect: SampleAspect,
    /// Viewport inside the active target (dimensions and offset).
    pub target: RenderRect,
    pub conversion: ColorConversion,
    pub metadata: &'a OverlayMetadata,
    pub head_tracking: bool,
}

/// Result of a draw call that may legitimately have nothing to draw.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn,
    /// No frame has been loaded yet.
    NothingLoaded,
}

/// Uploads decoded frames to GPU textures and draws them.
pub trait VideoCompositor<B: GpuBackend + ?Sized> {
    /// Rebinds to a new stream after a decoder attach.
    fn bind_stream(&mut self, stream: Option<&Arc<StreamDescriptor>>);

    /// Uploads the planes of one frame.
    ///
    /// Fails if the frame does not fit the bound stream's geometry.
    fn load_frame(&mut self, gpu: &B, upload: &FrameUpload<'_>) -> anyhow::Result<()>;

    /// Draws the last loaded frame into `target`.
    ///
    /// Returns `DrawOutcome::NothingLoaded` instead of failing when called
    /// before any successful `load_frame`.
    fn render_frame(
        &mut self,
        gpu: &B,
        target: &mut DrawTarget<'_, B>,
        params: &VideoParams<'_>,
    ) -> anyhow::Result<DrawOutcome>;
}

/// Rejects frames larger than the stream they claim to belong to.
pub fn check_frame_against_stream(
    stream: Option<&StreamDescriptor>,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    let Some(stream) = stream else { return Ok(()) };
    let g = stream.geometry();
    if g.width == 0 || g.height == 0 {
        // Geometry not announced yet.
        return Ok(());
    }
    if width > g.width || height > g.height {
        bail!(
            "frame {width}x{height} larger than stream {} geometry {}x{}",
            stream.id(),
            g.width,
            g.height
        );
    }
    Ok(())
}

/// Largest rectangle with the display aspect ratio centered in `target`.
pub fn fit_rect(display_width: f32, display_height: f32, target: RenderRect) -> RenderRect {
    if target.is_empty() || !(display_width > 0.0) || !(display_height > 0.0) {
        return target;
    }

    let src = display_width / display_height;
    let dst = target.width as f32 / target.height as f32;

    let (w, h) = if src > dst {
        (target.width, (target.width as f32 / src).round() as u32)
    } else {
        ((target.height as f32 * src).round() as u32, target.height)
    };
    let w = w.clamp(1, target.width);
    let h = h.clamp(1, target.height);

    RenderRect::new(
        target.x + ((target.width - w) / 2) as i32,
        target.y + ((target.height - h) / 2) as i32,
        w,
        h,
    )
}

/// View shift, in NDC units, compensating head motion relative to the drone.
///
/// Turning the head right moves the picture left by the angle expressed as
/// a fraction of the field of view. Returns zero without head attitude.
pub fn head_tracking_offset(metadata: &OverlayMetadata, fov: Fov) -> [f32; 2] {
    let Some(head) = metadata.head else { return [0.0, 0.0] };
    if !(fov.horizontal > 0.0) || !(fov.vertical > 0.0) {
        return [0.0, 0.0];
    }

    let (head_yaw, head_pitch, _) = head.to_euler();
    let (drone_yaw, drone_pitch, _) = metadata.drone.to_euler();

    let d_yaw = wrap_angle(head_yaw - drone_yaw);
    let d_pitch = head_pitch - drone_pitch;

    let x = -d_yaw / fov.horizontal.to_radians() * 2.0;
    let y = -d_pitch / fov.vertical.to_radians() * 2.0;
    [x.clamp(-2.0, 2.0), y.clamp(-2.0, 2.0)]
}

fn wrap_angle(a: f32) -> f32 {
    let mut a = a % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}
