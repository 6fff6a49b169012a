use std::sync::{Arc, Weak};

use bytemuck::{Pod, Zeroable};

use crate::compositor::{fit_rect, DrawTarget, HudCompositor, HudParams};
use crate::coords::RenderRect;
use crate::media::{Fov, StreamDescriptor};

use super::common::{
    apply_viewport, begin_load_pass, quad_pipeline, straight_alpha_blend, target_size,
    uniform_buffer, uniform_layout_entry, QuadBuffers, QuadVertex,
};
use super::WgpuBackend;

const SYMBOL_COLOR: [f32; 4] = [0.9, 1.0, 0.9, 0.9];
const HORIZON_COLOR: [f32; 4] = [0.2, 1.0, 0.3, 0.9];
const GAUGE_BACKGROUND: [f32; 4] = [0.1, 0.1, 0.1, 0.6];
const DIM_COLOR: [f32; 4] = [0.5, 0.5, 0.5, 0.5];

/// One rotated rectangle, in viewport pixels. Also the GPU instance layout.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct HudBar {
    pub center: [f32; 2],
    pub size: [f32; 2],
    /// Radians, clockwise on screen.
    pub angle: f32,
    /// Straight (non-premultiplied) RGBA.
    pub color: [f32; 4],
}

impl HudBar {
    const ATTRS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        1 => Float32x2, // center
        2 => Float32x2, // size
        3 => Float32,   // angle
        4 => Float32x4  // color
    ];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<HudBar>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }

    fn axis(center: [f32; 2], size: [f32; 2], color: [f32; 4]) -> Self {
        Self {
            center,
            size,
            angle: 0.0,
            color,
        }
    }
}

/// HUD symbology laid out for one viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbology {
    pub crosshair: [HudBar; 2],
    /// `None` when the horizon is out of view.
    pub horizon: Option<HudBar>,
    pub battery_frame: HudBar,
    pub battery_fill: Option<HudBar>,
    pub link: [HudBar; 5],
}

impl Symbology {
    pub fn into_bars(self) -> Vec<HudBar> {
        let mut bars = Vec::with_capacity(10);
        bars.extend(self.crosshair);
        bars.extend(self.horizon);
        bars.push(self.battery_frame);
        bars.extend(self.battery_fill);
        bars.extend(self.link);
        bars
    }
}

/// Lays out the HUD for `params`.
///
/// Symbology lives inside the display-aspect rectangle fitted to the
/// viewport, so its scale follows the picture rather than the raw pixels.
/// In HMD split mode the gauges move inwards, away from the lens edges.
pub fn build_symbology(params: &HudParams<'_>, fov: Fov) -> Symbology {
    let area = fit_rect(
        params.display_width,
        params.display_height,
        RenderRect::from_size(params.target),
    );
    let (ax, ay) = (area.x as f32, area.y as f32);
    let (aw, ah) = (area.width as f32, area.height as f32);
    let unit = aw.min(ah) / 100.0;
    let inset = if params.hmd_split { 0.2 } else { 0.05 };
    let (cx, cy) = (ax + aw / 2.0, ay + ah / 2.0);

    let crosshair = [
        HudBar::axis([cx, cy], [6.0 * unit, 0.4 * unit], SYMBOL_COLOR),
        HudBar::axis([cx, cy], [0.4 * unit, 6.0 * unit], SYMBOL_COLOR),
    ];

    let meta = params.metadata;
    let attitude = match meta.head {
        Some(head) if params.head_tracking => head,
        _ => meta.drone,
    };
    let (_, pitch, roll) = attitude.to_euler();
    let vfov = if fov.vertical > 0.0 { fov.vertical } else { Fov::default().vertical };
    let horizon_y = cy + pitch / vfov.to_radians() * ah;
    let horizon = ((horizon_y - cy).abs() < ah / 2.0).then(|| HudBar {
        center: [cx, horizon_y],
        size: [40.0 * unit, 0.3 * unit],
        angle: -roll,
        color: HORIZON_COLOR,
    });

    let bottom = ay + ah * (1.0 - inset);

    let gauge_width = 20.0 * unit;
    let left = ax + aw * inset;
    let battery_frame =
        HudBar::axis([left + gauge_width / 2.0, bottom], [gauge_width, 2.0 * unit], GAUGE_BACKGROUND);
    let percent = meta.battery_percent.min(100);
    let battery_fill = (percent > 0).then(|| {
        let width = gauge_width * f32::from(percent) / 100.0;
        HudBar::axis([left + width / 2.0, bottom], [width, 1.4 * unit], battery_color(percent))
    });

    let right = ax + aw * (1.0 - inset);
    let quality = meta.link_quality.min(5);
    let link = std::array::from_fn(|i| {
        let height = (i as f32 + 1.0) * unit;
        let color = if (i as u8) < quality { SYMBOL_COLOR } else { DIM_COLOR };
        HudBar::axis(
            [right - (4 - i) as f32 * 2.0 * unit, bottom + unit - height / 2.0],
            [1.2 * unit, height],
            color,
        )
    });

    Symbology {
        crosshair,
        horizon,
        battery_frame,
        battery_fill,
        link,
    }
}

fn battery_color(percent: u8) -> [f32; 4] {
    match percent {
        51.. => [0.2, 0.9, 0.3, 0.9],
        21..=50 => [1.0, 0.8, 0.1, 0.9],
        _ => [1.0, 0.2, 0.2, 0.9],
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct ViewportUniform {
    size: [f32; 2],
    _pad: [f32; 2],
}

/// Instanced bar renderer for the HUD.
pub struct WgpuHud {
    /// Non-owning; the stream belongs to the decoder.
    stream: Weak<StreamDescriptor>,

    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    viewport_ubo: wgpu::Buffer,
    quad: QuadBuffers,

    instance_vbo: Option<wgpu::Buffer>,
    instance_capacity: usize,
}

impl WgpuHud {
    pub(super) fn new(
        gpu: &WgpuBackend,
        stream: Option<&Arc<StreamDescriptor>>,
    ) -> anyhow::Result<Self> {
        let device = gpu.device();

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("aerolens hud bgl"),
            entries: &[uniform_layout_entry::<ViewportUniform>(0, wgpu::ShaderStages::VERTEX)],
        });

        let pipeline = quad_pipeline(
            device,
            "aerolens hud",
            include_str!("shaders/hud.wgsl"),
            &bind_group_layout,
            gpu.format(),
            &[QuadVertex::layout(), HudBar::layout()],
            Some(straight_alpha_blend()),
        );

        let viewport_ubo = uniform_buffer(device, "aerolens hud viewport ubo", &ViewportUniform::zeroed());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("aerolens hud bind group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: viewport_ubo.as_entire_binding(),
            }],
        });

        Ok(Self {
            stream: stream.map(Arc::downgrade).unwrap_or_default(),
            pipeline,
            bind_group,
            viewport_ubo,
            quad: QuadBuffers::new(device, "aerolens hud"),
            instance_vbo: None,
            instance_capacity: 0,
        })
    }

    fn ensure_instance_capacity(&mut self, gpu: &WgpuBackend, required: usize) {
        if required <= self.instance_capacity && self.instance_vbo.is_some() {
            return;
        }

        let new_cap = required.next_power_of_two().max(16);
        self.instance_vbo = Some(gpu.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("aerolens hud instance vbo"),
            size: (new_cap * std::mem::size_of::<HudBar>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.instance_capacity = new_cap;
    }
}

impl HudCompositor<WgpuBackend> for WgpuHud {
    fn bind_stream(&mut self, stream: Option<&Arc<StreamDescriptor>>) {
        self.stream = stream.map(Arc::downgrade).unwrap_or_default();
    }

    fn render_hud(
        &mut self,
        gpu: &WgpuBackend,
        target: &mut DrawTarget<'_, WgpuBackend>,
        params: &HudParams<'_>,
    ) -> anyhow::Result<()> {
        let fov = self.stream.upgrade().map(|s| s.fov()).unwrap_or_default();
        let bars = build_symbology(params, fov).into_bars();

        self.ensure_instance_capacity(gpu, bars.len());
        let Some(instance_vbo) = self.instance_vbo.as_ref() else { return Ok(()) };

        let viewport = target.viewport;
        let uniform = ViewportUniform {
            size: [viewport.width.max(1) as f32, viewport.height.max(1) as f32],
            _pad: [0.0; 2],
        };
        gpu.queue().write_buffer(&self.viewport_ubo, 0, bytemuck::bytes_of(&uniform));
        gpu.queue().write_buffer(instance_vbo, 0, bytemuck::cast_slice(&bars));

        let bounds = target_size(target);
        let mut rpass = begin_load_pass(target, "aerolens hud pass");
        if !apply_viewport(&mut rpass, viewport, bounds) {
            return Ok(());
        }
        rpass.set_pipeline(&self.pipeline);
        rpass.set_bind_group(0, &self.bind_group, &[]);
        self.quad.bind(&mut rpass);
        rpass.set_vertex_buffer(1, instance_vbo.slice(..));
        rpass.draw_indexed(0..QuadBuffers::INDEX_COUNT, 0, 0..bars.len() as u32);

        Ok(())
    }
}
