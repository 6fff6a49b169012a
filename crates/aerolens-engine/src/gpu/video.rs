use std::sync::{Arc, Weak};

use anyhow::Context;
use bytemuck::{Pod, Zeroable};

use crate::compositor::{
    check_frame_against_stream, fit_rect, head_tracking_offset, ColorConversion, DrawOutcome,
    DrawTarget, FrameUpload, PlaneShape, VideoCompositor, VideoParams,
};
use crate::media::{Fov, StreamDescriptor};

use super::common::{
    apply_viewport, begin_load_pass, linear_sampler, quad_pipeline, sampler_layout_entry,
    target_size, texture_layout_entry, uniform_buffer, uniform_layout_entry, QuadBuffers,
    QuadVertex,
};
use super::WgpuBackend;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct VideoUniform {
    offset: [f32; 2],
    scale: [f32; 2],
    mode: u32,
    _pad: [u32; 3],
}

fn shader_mode(conversion: ColorConversion) -> u32 {
    match conversion {
        ColorConversion::Yuv420PlanarToRgb => 0,
        ColorConversion::Yuv420SemiPlanarToRgb => 1,
        ColorConversion::None => 2,
    }
}

fn plane_format(shape: PlaneShape) -> wgpu::TextureFormat {
    match shape.bytes_per_texel {
        1 => wgpu::TextureFormat::R8Unorm,
        2 => wgpu::TextureFormat::Rg8Unorm,
        _ => wgpu::TextureFormat::Rgba8Unorm,
    }
}

/// Plane textures for one frame geometry + conversion.
struct PlaneSet {
    conversion: ColorConversion,
    width: u32,
    height: u32,
    shapes: Vec<PlaneShape>,
    textures: Vec<wgpu::Texture>,
    bind_group: wgpu::BindGroup,
    sequence: u64,
}

/// Uploads YUV or RGBA planes and draws them letterboxed into the target.
pub struct WgpuVideo {
    /// Non-owning; the stream belongs to the decoder.
    stream: Weak<StreamDescriptor>,

    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform: wgpu::Buffer,
    sampler: wgpu::Sampler,
    quad: QuadBuffers,

    /// Bound to plane slots a conversion does not use.
    placeholder: wgpu::TextureView,

    planes: Option<PlaneSet>,
}

impl WgpuVideo {
    pub(super) fn new(
        gpu: &WgpuBackend,
        stream: Option<&Arc<StreamDescriptor>>,
    ) -> anyhow::Result<Self> {
        let device = gpu.device();

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("aerolens video bgl"),
            entries: &[
                uniform_layout_entry::<VideoUniform>(
                    0,
                    wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ),
                texture_layout_entry(1),
                texture_layout_entry(2),
                texture_layout_entry(3),
                sampler_layout_entry(4),
            ],
        });

        let pipeline = quad_pipeline(
            device,
            "aerolens video",
            include_str!("shaders/video.wgsl"),
            &bind_group_layout,
            gpu.format(),
            &[QuadVertex::layout()],
            None,
        );

        let placeholder = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("aerolens video placeholder"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            stream: stream.map(Arc::downgrade).unwrap_or_default(),
            pipeline,
            bind_group_layout,
            uniform: uniform_buffer(device, "aerolens video ubo", &VideoUniform::zeroed()),
            sampler: linear_sampler(device, "aerolens video sampler"),
            quad: QuadBuffers::new(device, "aerolens video"),
            placeholder,
            planes: None,
        })
    }

    fn fov(&self) -> Fov {
        self.stream.upgrade().map(|s| s.fov()).unwrap_or_default()
    }

    fn ensure_planes(&mut self, gpu: &WgpuBackend, upload: &FrameUpload<'_>) {
        if let Some(p) = &self.planes
            && p.conversion == upload.conversion
            && p.width == upload.width
            && p.height == upload.height
        {
            return;
        }

        let device = gpu.device();
        let shapes = upload.conversion.plane_shapes(upload.width, upload.height);
        let textures: Vec<wgpu::Texture> = shapes
            .iter()
            .enumerate()
            .map(|(i, shape)| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("aerolens video plane {i}")),
                    size: wgpu::Extent3d {
                        width: shape.width,
                        height: shape.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: plane_format(*shape),
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            })
            .collect();

        let views: Vec<wgpu::TextureView> = textures
            .iter()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();
        let view = |i: usize| views.get(i).unwrap_or(&self.placeholder);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("aerolens video bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view(0)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(view(1)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(view(2)),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        log::debug!(
            "video planes: {}x{} {:?}",
            upload.width,
            upload.height,
            upload.conversion
        );

        self.planes = Some(PlaneSet {
            conversion: upload.conversion,
            width: upload.width,
            height: upload.height,
            shapes,
            textures,
            bind_group,
            sequence: upload.sequence,
        });
    }
}

impl VideoCompositor<WgpuBackend> for WgpuVideo {
    fn bind_stream(&mut self, stream: Option<&Arc<StreamDescriptor>>) {
        self.stream = stream.map(Arc::downgrade).unwrap_or_default();
        self.planes = None;
    }

    fn load_frame(&mut self, gpu: &WgpuBackend, upload: &FrameUpload<'_>) -> anyhow::Result<()> {
        let stream = self.stream.upgrade();
        let checked = upload.validate().and_then(|()| {
            check_frame_against_stream(stream.as_deref(), upload.width, upload.height)?;
            upload
                .planes
                .iter()
                .map(|plane| u32::try_from(plane.stride).context("plane stride overflows u32"))
                .collect::<anyhow::Result<Vec<u32>>>()
        });
        let strides = match checked {
            Ok(strides) => strides,
            Err(err) => {
                // Never keep drawing an older frame in place of a rejected one.
                self.planes = None;
                return Err(err);
            }
        };

        self.ensure_planes(gpu, upload);
        let Some(planes) = self.planes.as_mut() else { return Ok(()) };

        for (((texture, shape), plane), bytes_per_row) in
            planes.textures.iter().zip(&planes.shapes).zip(upload.planes).zip(strides)
        {
            gpu.queue().write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                upload.data,
                wgpu::TexelCopyBufferLayout {
                    offset: plane.offset as u64,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(shape.height),
                },
                wgpu::Extent3d {
                    width: shape.width,
                    height: shape.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        planes.sequence = upload.sequence;
        Ok(())
    }

    fn render_frame(
        &mut self,
        gpu: &WgpuBackend,
        target: &mut DrawTarget<'_, WgpuBackend>,
        params: &VideoParams<'_>,
    ) -> anyhow::Result<DrawOutcome> {
        let Some(planes) = self.planes.as_ref() else {
            return Ok(DrawOutcome::NothingLoaded);
        };
        if planes.conversion != params.conversion {
            log::debug!(
                "render conversion {:?} differs from loaded {:?} (frame {})",
                params.conversion,
                planes.conversion,
                planes.sequence
            );
        }

        let sar = params.sample_aspect.normalized();
        let display_width = params.source.width as f32 * sar.width as f32;
        let display_height = params.source.height as f32 * sar.height as f32;
        let fitted = fit_rect(display_width, display_height, params.target);

        let offset = if params.head_tracking {
            head_tracking_offset(params.metadata, self.fov())
        } else {
            [0.0, 0.0]
        };

        let uniform = VideoUniform {
            offset,
            scale: [1.0, 1.0],
            mode: shader_mode(planes.conversion),
            _pad: [0; 3],
        };
        gpu.queue().write_buffer(&self.uniform, 0, bytemuck::bytes_of(&uniform));

        let bounds = target_size(target);
        let mut rpass = begin_load_pass(target, "aerolens video pass");
        if !apply_viewport(&mut rpass, fitted, bounds) {
            return Ok(DrawOutcome::Drawn);
        }
        rpass.set_pipeline(&self.pipeline);
        rpass.set_bind_group(0, &planes.bind_group, &[]);
        self.quad.bind(&mut rpass);
        rpass.draw_indexed(0..QuadBuffers::INDEX_COUNT, 0, 0..1);

        Ok(DrawOutcome::Drawn)
    }
}
