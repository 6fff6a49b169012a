//! Window + event loop hosting one render pipeline.
//!
//! Owns the `winit` window and its `Gpu`, wires a `RenderPipeline` to the
//! window surface and drives one render per redraw.

use std::sync::Arc;

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use aerolens_engine::coords::Size;
use aerolens_engine::device::{Gpu, GpuFrame, GpuInit, SurfaceErrorAction};
use aerolens_engine::gpu::WgpuBackend;
use aerolens_engine::media::{Decoder, StreamDescriptor};
use aerolens_engine::settings::SettingsStore;
use aerolens_engine::time::{FrameClock, FrameTime};
use aerolens_engine::{PipelineConfig, RenderOutcome, RenderPipeline};

/// Log render statistics every this many frames.
const STATS_EVERY: u64 = 600;

/// Window and pipeline options.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    pub hud: bool,
    pub hmd_correction: bool,
    pub head_tracking: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "aerolens".to_string(),
            initial_size: LogicalSize::new(1280.0, 720.0),
            hud: true,
            hmd_correction: false,
            head_tracking: false,
        }
    }
}

impl ViewerConfig {
    fn pipeline_config(&self, window: Size) -> PipelineConfig {
        PipelineConfig::new(window)
            .with_hud(self.hud)
            .with_hmd_correction(self.hmd_correction)
            .with_head_tracking(self.head_tracking)
    }
}

/// Entry point for the viewer.
pub struct Runtime;

impl Runtime {
    /// Runs the event loop until the window closes.
    ///
    /// `stream` must already have a decoder enabled.
    pub fn run(
        config: ViewerConfig,
        gpu_init: GpuInit,
        settings: Arc<SettingsStore>,
        stream: Arc<StreamDescriptor>,
    ) -> Result<()> {
        let decoder = stream
            .decoder()
            .with_context(|| format!("stream {} has no decoder", stream.id()))?;

        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState {
            config,
            gpu_init,
            settings,
            stream,
            decoder,
            session: None,
            exit_requested: false,
        };

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        state.shutdown();
        Ok(())
    }
}

#[self_referencing]
struct WindowEntry {
    clock: FrameClock,

    window: Window,

    #[borrows(window)]
    #[covariant]
    gpu: Gpu<'this>,
}

/// Live window plus the pipeline rendering into it.
///
/// Field order is drop order: the pipeline releases its GPU resources
/// before the surface goes away.
struct Session {
    pipeline: RenderPipeline<WgpuBackend>,
    entry: WindowEntry,
}

struct AppState {
    config: ViewerConfig,
    gpu_init: GpuInit,
    settings: Arc<SettingsStore>,
    stream: Arc<StreamDescriptor>,
    decoder: Arc<dyn Decoder>,

    session: Option<Session>,
    exit_requested: bool,
}

impl AppState {
    fn request_exit(&mut self, event_loop: &ActiveEventLoop) {
        self.exit_requested = true;
        event_loop.exit();
    }

    fn create_session(&self, event_loop: &ActiveEventLoop) -> Result<Session> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;

        let gpu_init = self.gpu_init.clone();
        let entry = WindowEntryTryBuilder {
            clock: FrameClock::default(),
            window,
            gpu_builder: |w| pollster::block_on(Gpu::new(w, gpu_init)),
        }
        .try_build()
        .context("GPU initialization failed for window")?;

        let (backend, size) = entry.with_gpu(|gpu| {
            let info = gpu.adapter_info();
            log::info!(
                "adapter: {} ({:?}), surface {:?}",
                info.name,
                info.backend,
                gpu.surface_format()
            );
            (WgpuBackend::new(gpu), gpu.size())
        });

        let pipeline = RenderPipeline::new(backend, Arc::clone(&self.settings));
        let state = pipeline.configure(self.config.pipeline_config(size))?;
        log::info!("pipeline {state:?} at {}x{}", size.width, size.height);

        pipeline.attach_decoder(&self.decoder)?;

        Ok(Session { pipeline, entry })
    }

    /// Pushes the current options and window size into the pipeline.
    fn reconfigure(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let size = session.entry.with_gpu(|gpu| gpu.size());
        match session.pipeline.configure(self.config.pipeline_config(size)) {
            Ok(state) => log::debug!("pipeline {state:?} at {}x{}", size.width, size.height),
            Err(err) => log::warn!("pipeline configuration failed: {err}"),
        }
    }

    fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if let Some(session) = self.session.as_mut() {
            session.entry.with_gpu_mut(|gpu| gpu.resize(new_size));
            session.entry.with_clock_mut(|clock| clock.reset());
        }
        self.reconfigure();
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }

        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };

        match code {
            KeyCode::Escape => {
                self.request_exit(event_loop);
                return;
            }
            KeyCode::KeyH => self.config.hud = !self.config.hud,
            KeyCode::KeyM => self.config.hmd_correction = !self.config.hmd_correction,
            KeyCode::KeyT => self.config.head_tracking = !self.config.head_tracking,
            _ => return,
        }

        log::info!(
            "hud {}, hmd correction {}, head tracking {}",
            on_off(self.config.hud),
            on_off(self.config.hmd_correction),
            on_off(self.config.head_tracking)
        );
        self.reconfigure();
    }

    /// Drives one frame. Returns `false` when the surface is unusable.
    fn redraw(&mut self) -> bool {
        let Some(Session { pipeline, entry }) = self.session.as_mut() else {
            return true;
        };

        let mut alive = true;
        entry.with_mut(|fields| {
            let last_render_us = fields.clock.last_timestamp_us();
            let ft: FrameTime = fields.clock.tick();

            let mut frame = match fields.gpu.begin_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    log::debug!("surface error: {err:?}");
                    let action = fields.gpu.handle_surface_error(err);
                    alive = action != SurfaceErrorAction::Fatal;
                    return;
                }
            };

            clear_surface(&mut frame);

            match pipeline.render(last_render_us, &mut frame) {
                Ok(RenderOutcome::Rendered) => {}
                Ok(RenderOutcome::Empty) => log::trace!("frame {}: nothing rendered", ft.frame_index),
                Err(err) => log::warn!("render failed: {err}"),
            }

            fields.gpu.submit(frame);

            if ft.frame_index > 0 && ft.frame_index % STATS_EVERY == 0 {
                log::info!("{:?}", pipeline.stats());
            }
        });

        alive
    }

    /// Detaches the decoder and tears the window down. Idempotent.
    fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Err(err) = session.pipeline.detach_decoder(&self.decoder) {
            log::warn!("failed to detach decoder: {err}");
        }
        log::info!("final {:?}", session.pipeline.stats());
        session.pipeline.destroy();

        if let Err(err) = self.stream.disable_decoder() {
            log::debug!("{err}");
        }
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }

        match self.create_session(event_loop) {
            Ok(session) => {
                session.entry.with_window(|w| w.request_redraw());
                self.session = Some(session);
            }
            Err(err) => {
                log::error!("failed to start viewer: {err:#}");
                self.request_exit(event_loop);
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        // Live video: redraw continuously, paced by the present mode.
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(session) = self.session.as_ref() {
            session.entry.with_window(|w| w.request_redraw());
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        match &event {
            WindowEvent::CloseRequested => {
                self.shutdown();
                self.request_exit(event_loop);
            }

            WindowEvent::Resized(new_size) => self.resize(*new_size),

            WindowEvent::ScaleFactorChanged { .. } => {
                let new_size = self
                    .session
                    .as_ref()
                    .map(|s| s.entry.with_window(|w| w.inner_size()));
                if let Some(new_size) = new_size {
                    self.resize(new_size);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => self.handle_key(event_loop, event),

            WindowEvent::RedrawRequested => {
                if !self.redraw() {
                    log::error!("surface lost for good, exiting");
                    self.shutdown();
                    self.request_exit(event_loop);
                }
            }

            _ => {}
        }
    }
}

/// Black background for the letterbox bars around the video.
fn clear_surface(frame: &mut GpuFrame) {
    let _pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("aerolens viewer clear"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &frame.view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    });
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
