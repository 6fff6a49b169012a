use bytemuck::{Pod, Zeroable};

use crate::compositor::{DistortionCorrector, DrawTarget};
use crate::coords::{RenderRect, Size};
use crate::settings::{HmdModel, LensParams};

use super::common::{
    apply_viewport, begin_load_pass, linear_sampler, quad_pipeline, sampler_layout_entry,
    target_size, texture_layout_entry, uniform_buffer, uniform_layout_entry, QuadBuffers,
    QuadVertex,
};
use super::{OffscreenTarget, WgpuBackend};

const MM_PER_INCH: f32 = 25.4;

/// Fixed optics of a lens model.
struct LensModel {
    /// Radial distortion coefficients (r^2, r^4).
    coeffs: [f32; 2],
    /// Lens axis height above the bottom of the HMD frame, millimetres.
    axis_height_mm: f32,
}

fn lens_model(model: HmdModel) -> Option<LensModel> {
    match model {
        HmdModel::Unknown => None,
        HmdModel::Cockpitglasses => Some(LensModel {
            coeffs: [0.34, 0.55],
            axis_height_mm: 35.0,
        }),
    }
}

/// Warp parameters for one eye.
///
/// Coordinates are normalized to the eye viewport, top-left origin.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EyeLens {
    pub center: [f32; 2],
    pub coeffs: [f32; 2],
    pub scale: f32,
    /// Eye width / height in millimetres, keeps the distortion circular.
    pub aspect: f32,
}

impl EyeLens {
    /// Computes `[left, right]` eye lenses for eyes of `eye` pixels.
    pub fn compute(params: &LensParams, eye: Size) -> [EyeLens; 2] {
        let display = params.display;
        let hmd = params.hmd;

        let eye_w_mm = eye.width as f32 / display.xdpi.max(1.0) * MM_PER_INCH;
        let eye_h_mm = eye.height as f32 / display.ydpi.max(1.0) * MM_PER_INCH;
        let aspect = if eye_h_mm > 0.0 { eye_w_mm / eye_h_mm } else { 1.0 };
        let scale = hmd.scale.max(0.1);

        let (left_x, right_x, y, coeffs) = match (lens_model(hmd.model), eye_w_mm > 0.0 && eye_h_mm > 0.0) {
            (Some(model), true) => {
                // Eyes meet at the screen center; each lens sits ipd/2 from it.
                let half_ipd = hmd.ipd_mm / 2.0 / eye_w_mm;
                let y = 1.0 - (display.device_margin_mm + model.axis_height_mm) / eye_h_mm;
                (1.0 - half_ipd, half_ipd, y, model.coeffs)
            }
            _ => (0.5, 0.5, 0.5, [0.0, 0.0]),
        };

        let eye_lens = |x: f32| EyeLens {
            center: [
                (x + hmd.pan_h).clamp(0.0, 1.0),
                (y + hmd.pan_v).clamp(0.0, 1.0),
            ],
            coeffs,
            scale,
            aspect,
        };
        [eye_lens(left_x), eye_lens(right_x)]
    }

    /// Source coordinate sampled for output coordinate `uv`, or `None` when
    /// it falls outside the source image.
    pub fn source_uv(&self, uv: [f32; 2]) -> Option<[f32; 2]> {
        let rel = [uv[0] - self.center[0], uv[1] - self.center[1]];
        let d = [rel[0] * self.aspect, rel[1]];
        let r2 = d[0] * d[0] + d[1] * d[1];
        let f = 1.0 + self.coeffs[0] * r2 + self.coeffs[1] * r2 * r2;
        let src = [
            self.center[0] + rel[0] * f / self.scale,
            self.center[1] + rel[1] * f / self.scale,
        ];
        src.iter().all(|c| (0.0..=1.0).contains(c)).then_some(src)
    }

    fn uniform(&self) -> LensUniform {
        LensUniform {
            center: self.center,
            coeffs: self.coeffs,
            scale: self.scale,
            aspect: self.aspect,
            _pad: [0.0; 2],
        }
    }
}

/// Splits `viewport` into left and right eye viewports.
fn eye_viewports(viewport: RenderRect) -> [RenderRect; 2] {
    let left_w = viewport.width / 2;
    [
        RenderRect::new(viewport.x, viewport.y, left_w, viewport.height),
        RenderRect::new(
            viewport.x + left_w as i32,
            viewport.y,
            viewport.width - left_w,
            viewport.height,
        ),
    ]
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct LensUniform {
    center: [f32; 2],
    coeffs: [f32; 2],
    scale: f32,
    aspect: f32,
    _pad: [f32; 2],
}

/// Barrel-distortion corrector drawing both eyes from one source image.
pub struct WgpuHmd {
    lenses: [EyeLens; 2],

    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    ubos: [wgpu::Buffer; 2],
    quad: QuadBuffers,

    /// Bind groups for the off-screen target with this id.
    bind_groups: Option<(u64, [wgpu::BindGroup; 2])>,
}

impl WgpuHmd {
    pub(super) fn new(gpu: &WgpuBackend, lens: &LensParams, eye: Size) -> anyhow::Result<Self> {
        anyhow::ensure!(!eye.is_empty(), "eye viewport has zero size");

        let device = gpu.device();
        let lenses = EyeLens::compute(lens, eye);
        log::debug!("hmd lenses for {:?} eye {}x{}: {:?}", lens.hmd.model, eye.width, eye.height, lenses);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("aerolens hmd bgl"),
            entries: &[
                uniform_layout_entry::<LensUniform>(0, wgpu::ShaderStages::FRAGMENT),
                texture_layout_entry(1),
                sampler_layout_entry(2),
            ],
        });

        let pipeline = quad_pipeline(
            device,
            "aerolens hmd",
            include_str!("shaders/hmd.wgsl"),
            &bind_group_layout,
            gpu.format(),
            &[QuadVertex::layout()],
            None,
        );

        let ubos = [
            uniform_buffer(device, "aerolens hmd left ubo", &lenses[0].uniform()),
            uniform_buffer(device, "aerolens hmd right ubo", &lenses[1].uniform()),
        ];

        Ok(Self {
            lenses,
            pipeline,
            bind_group_layout,
            sampler: linear_sampler(device, "aerolens hmd sampler"),
            ubos,
            quad: QuadBuffers::new(device, "aerolens hmd"),
            bind_groups: None,
        })
    }

    pub fn lenses(&self) -> [EyeLens; 2] {
        self.lenses
    }

    fn ensure_bind_groups(&mut self, gpu: &WgpuBackend, source: &OffscreenTarget) {
        if matches!(&self.bind_groups, Some((id, _)) if *id == source.id()) {
            return;
        }

        let make = |ubo: &wgpu::Buffer| {
            gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("aerolens hmd bind group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: ubo.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(source.color_view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            })
        };
        let groups = [make(&self.ubos[0]), make(&self.ubos[1])];
        self.bind_groups = Some((source.id(), groups));
    }
}

impl DistortionCorrector<WgpuBackend> for WgpuHmd {
    fn render_hmd(
        &mut self,
        gpu: &WgpuBackend,
        target: &mut DrawTarget<'_, WgpuBackend>,
        source: &OffscreenTarget,
        source_size: Size,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            source_size == source.size(),
            "source size {:?} does not match off-screen target {:?}",
            source_size,
            source.size()
        );
        self.ensure_bind_groups(gpu, source);
        let Some((_, groups)) = self.bind_groups.as_ref() else { return Ok(()) };

        let bounds = target_size(target);
        let eyes = eye_viewports(target.viewport);

        let mut rpass = begin_load_pass(target, "aerolens hmd pass");
        rpass.set_pipeline(&self.pipeline);
        self.quad.bind(&mut rpass);
        for (eye, group) in eyes.into_iter().zip(groups) {
            if !apply_viewport(&mut rpass, eye, bounds) {
                continue;
            }
            rpass.set_bind_group(0, group, &[]);
            rpass.draw_indexed(0..QuadBuffers::INDEX_COUNT, 0, 0..1);
        }
        Ok(())
    }
}
