use std::sync::Arc;

use anyhow::ensure;

use crate::coords::{RenderRect, Size};
use crate::device::{Gpu, GpuBackend, GpuFrame};
use crate::media::StreamDescriptor;
use crate::settings::LensParams;

use super::{WgpuHmd, WgpuHud, WgpuVideo};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth16Unorm;

/// Color + depth render target used for the HMD pre-warp pass.
pub struct OffscreenTarget {
    id: u64,
    size: Size,
    _color: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

impl OffscreenTarget {
    /// Unique per allocation; lets the corrector cache bind groups.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }
}

impl std::fmt::Debug for OffscreenTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffscreenTarget")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Target selected by the last `bind_target`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ActiveTarget {
    /// Off-screen target id, `None` for the surface.
    pub offscreen: Option<u64>,
    pub viewport: RenderRect,
}

/// wgpu-backed [`GpuBackend`].
///
/// Holds clones of the device and queue handles; the window surface stays
/// with [`Gpu`], which hands out one [`GpuFrame`] per tick.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    format: wgpu::TextureFormat,
    active: ActiveTarget,
    next_offscreen_id: u64,
}

impl WgpuBackend {
    pub fn new(gpu: &Gpu<'_>) -> Self {
        Self::from_parts(gpu.device().clone(), gpu.queue().clone(), gpu.surface_format())
    }

    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue, format: wgpu::TextureFormat) -> Self {
        Self {
            device,
            queue,
            format,
            active: ActiveTarget::default(),
            next_offscreen_id: 1,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Color format shared by the surface and off-screen targets.
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn active_target(&self) -> ActiveTarget {
        self.active
    }

    fn texture(&self, label: &str, size: Size, format: wgpu::TextureFormat) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        })
    }
}

impl GpuBackend for WgpuBackend {
    type Surface = GpuFrame;
    type Offscreen = OffscreenTarget;
    type Video = WgpuVideo;
    type Hud = WgpuHud;
    type Corrector = WgpuHmd;

    fn create_offscreen(&mut self, size: Size) -> anyhow::Result<OffscreenTarget> {
        // wgpu reports oversized textures through the device error handler,
        // so the limits are checked up front.
        let max = self.device.limits().max_texture_dimension_2d;
        ensure!(!size.is_empty(), "off-screen target has zero size");
        ensure!(
            size.width <= max && size.height <= max,
            "off-screen target {}x{} exceeds device limit {max}",
            size.width,
            size.height
        );

        let color = self.texture("aerolens offscreen color", size, self.format);
        let depth = self.texture("aerolens offscreen depth", size, DEPTH_FORMAT);
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.next_offscreen_id;
        self.next_offscreen_id += 1;
        log::debug!("offscreen #{id}: {}x{}", size.width, size.height);

        Ok(OffscreenTarget {
            id,
            size,
            _color: color,
            color_view,
            _depth: depth,
            depth_view,
        })
    }

    fn create_video_compositor(
        &mut self,
        stream: Option<&Arc<StreamDescriptor>>,
    ) -> anyhow::Result<WgpuVideo> {
        WgpuVideo::new(self, stream)
    }

    fn create_hud_compositor(
        &mut self,
        stream: Option<&Arc<StreamDescriptor>>,
    ) -> anyhow::Result<WgpuHud> {
        WgpuHud::new(self, stream)
    }

    fn create_distortion_corrector(
        &mut self,
        lens: &LensParams,
        eye: Size,
    ) -> anyhow::Result<WgpuHmd> {
        WgpuHmd::new(self, lens, eye)
    }

    fn bind_target(
        &mut self,
        _surface: &mut GpuFrame,
        target: Option<&OffscreenTarget>,
        viewport: RenderRect,
    ) {
        let active = ActiveTarget {
            offscreen: target.map(OffscreenTarget::id),
            viewport,
        };
        if active != self.active {
            log::trace!("bind target {:?}", active);
            self.active = active;
        }
    }

    fn clear(&mut self, surface: &mut GpuFrame, target: Option<&OffscreenTarget>) {
        let view = match target {
            Some(o) => &o.color_view,
            None => &surface.view,
        };
        let depth = target.map(|o| wgpu::RenderPassDepthStencilAttachment {
            view: &o.depth_view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let _pass = surface.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("aerolens clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: depth,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }
}
