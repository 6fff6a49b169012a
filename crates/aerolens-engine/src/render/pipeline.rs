use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::compositor::{ColorConversion, FrameUpload, HudParams, VideoParams};
use crate::coords::Size;
use crate::device::GpuBackend;
use crate::media::{Decoder, FrameBuffer, FrameReceiver, StreamDescriptor};
use crate::settings::SettingsStore;
use crate::time::monotonic_us;

use super::composition::{Compositors, FramePass, PassOutcome};
use super::{PipelineConfig, PipelineState, RenderError, RenderOutcome, RenderStats};

/// Link to the attached decoder. Neither the decoder nor its stream is
/// owned; the hand-off queue is.
struct Attachment {
    decoder: Weak<dyn Decoder>,
    stream: Weak<StreamDescriptor>,
    queue: FrameReceiver,
}

impl Attachment {
    fn is(&self, decoder: &Arc<dyn Decoder>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(decoder), self.decoder.as_ptr())
    }
}

struct Inner<B: GpuBackend> {
    backend: B,
    state: PipelineState,
    config: PipelineConfig,
    compositors: Option<Compositors<B>>,
    attachment: Option<Attachment>,
    /// Newest frame pulled from the queue; exactly one reference is held.
    current: Option<FrameBuffer>,
    /// The current compositors have not seen `current` yet.
    needs_load: bool,
    stats: RenderStats,
}

/// Drives the compositors of one output surface.
///
/// All operations serialize on one internal lock, so GPU calls issued by a
/// pipeline never overlap. The decoder thread only touches the hand-off
/// queue, which needs no extra locking.
///
/// ```text
///   Unconfigured ──configure──▶ Configuring ──▶ Ready   (zero-area render rect)
///        ▲                          │      └──▶ Running (compositors built)
///        └──── compositor failure ──┘
/// ```
pub struct RenderPipeline<B: GpuBackend> {
    inner: Mutex<Inner<B>>,
    settings: Arc<SettingsStore>,
}

impl<B: GpuBackend> RenderPipeline<B> {
    pub fn new(backend: B, settings: Arc<SettingsStore>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                backend,
                state: PipelineState::Unconfigured,
                config: PipelineConfig::default(),
                compositors: None,
                attachment: None,
                current: None,
                needs_load: false,
                stats: RenderStats::default(),
            }),
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn config(&self) -> PipelineConfig {
        self.lock().config
    }

    pub fn stats(&self) -> RenderStats {
        self.lock().stats
    }

    /// Sequence number of the frame currently held, if any.
    pub fn current_frame_sequence(&self) -> Option<u64> {
        self.lock().current.as_ref().map(FrameBuffer::sequence)
    }

    /// True when a decoder is attached.
    pub fn has_decoder(&self) -> bool {
        self.lock().attachment.is_some()
    }

    /// Applies new geometry and feature flags.
    ///
    /// Previously allocated compositors and GPU resources are released
    /// first. A zero-area render rectangle leaves the pipeline `Ready` with
    /// nothing allocated. Any allocation failure tears down what was built
    /// and leaves the pipeline `Unconfigured`.
    pub fn configure(&self, config: PipelineConfig) -> Result<PipelineState, RenderError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        inner.state = PipelineState::Configuring;
        inner.release_gpu();

        let render = config.effective_render_rect();
        if render.x < 0 || render.y < 0 {
            inner.state = PipelineState::Unconfigured;
            return Err(RenderError::InvalidArgument("render rectangle has a negative offset"));
        }
        inner.config = config;

        if render.is_empty() {
            log::debug!("configure: empty render rect, nothing to draw yet");
            inner.state = PipelineState::Ready;
            return Ok(inner.state);
        }

        let stream = inner.stream();
        match Compositors::build(&mut inner.backend, &config, stream.as_ref(), &self.settings) {
            Ok(compositors) => {
                log::debug!(
                    "configure: {}x{}+{}+{} hud={} hmd={} head_tracking={}",
                    render.width,
                    render.height,
                    render.x,
                    render.y,
                    config.hud,
                    compositors.is_hmd(),
                    config.head_tracking
                );
                inner.compositors = Some(compositors);
                inner.needs_load = true;
                inner.state = PipelineState::Running;
                Ok(inner.state)
            }
            Err(err) => {
                log::error!("configure failed: {err}");
                inner.state = PipelineState::Unconfigured;
                Err(err)
            }
        }
    }

    /// Starts consuming frames from `decoder`.
    ///
    /// Only one decoder may be attached at a time.
    pub fn attach_decoder(&self, decoder: &Arc<dyn Decoder>) -> Result<(), RenderError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.attachment.is_some() {
            return Err(RenderError::Precondition("a decoder is already attached"));
        }

        let stream = decoder
            .stream()
            .ok_or(RenderError::InvalidArgument("decoder has no stream"))?;
        let queue = decoder
            .add_output_queue()
            .map_err(|err| RenderError::Upstream(format!("failed to add output queue: {err:#}")))?;

        if let Some(compositors) = inner.compositors.as_mut() {
            compositors.bind_stream(Some(&stream));
        }

        log::debug!("attached decoder for stream {} (queue {:?})", stream.id(), queue.id());
        inner.attachment = Some(Attachment {
            decoder: Arc::downgrade(decoder),
            stream: Arc::downgrade(&stream),
            queue,
        });
        inner.needs_load = true;
        Ok(())
    }

    /// Stops consuming frames from `decoder` and releases the held frame.
    pub fn detach_decoder(&self, decoder: &Arc<dyn Decoder>) -> Result<(), RenderError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        match inner.attachment.as_ref() {
            None => return Err(RenderError::Precondition("no decoder is attached")),
            Some(attachment) if !attachment.is(decoder) => {
                return Err(RenderError::InvalidArgument("decoder is not the attached one"));
            }
            Some(_) => {}
        }

        inner.detach(Some(decoder));
        Ok(())
    }

    /// Draws the newest available frame onto `surface`.
    ///
    /// `last_render_us` is the caller's previous render time on the
    /// [`monotonic_us`] clock; it only feeds [`RenderStats`].
    ///
    /// Frames queued behind a newer one are dropped. Without a new frame the
    /// held frame is drawn again. Per-frame compositor failures are logged
    /// and yield `RenderOutcome::Empty`.
    pub fn render(
        &self,
        last_render_us: u64,
        surface: &mut B::Surface,
    ) -> Result<RenderOutcome, RenderError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.state != PipelineState::Running {
            return Ok(RenderOutcome::Empty);
        }

        if inner.drain() > 0 {
            inner.needs_load = true;
        }

        let Some(frame) = inner.current.as_ref() else {
            return Ok(RenderOutcome::Empty);
        };

        let render = inner.config.effective_render_rect();
        if render.is_empty() {
            return Ok(RenderOutcome::Empty);
        }

        let stream_id = inner
            .attachment
            .as_ref()
            .and_then(|a| a.stream.upgrade())
            .map_or(frame.stream_id(), |s| s.id());
        let info = frame.info_for(stream_id).ok_or_else(|| {
            RenderError::Upstream(format!("frame {} has no metadata for stream {stream_id}", frame.sequence()))
        })?;
        if frame.data().is_empty() {
            return Err(RenderError::Upstream(format!("frame {} has no pixel data", info.sequence)));
        }

        let Some(compositors) = inner.compositors.as_mut() else {
            return Ok(RenderOutcome::Empty);
        };

        let conversion = ColorConversion::from(info.color_format);
        let sar = info.sample_aspect.normalized();
        let head_tracking = inner.config.head_tracking;

        let pass = FramePass {
            upload: inner.needs_load.then_some(FrameUpload {
                data: frame.data(),
                planes: &info.planes,
                width: info.width,
                height: info.height,
                conversion,
                sequence: info.sequence,
            }),
            video: VideoParams {
                planes: &info.planes,
                source: Size::new(info.width, info.height),
                sample_aspect: info.sample_aspect,
                target: render,
                conversion,
                metadata: &info.metadata,
                head_tracking,
            },
            hud: HudParams {
                display_width: info.width as f32 * sar.width as f32,
                display_height: info.height as f32 * sar.height as f32,
                target: render.size(),
                metadata: &info.metadata,
                hmd_split: false,
                head_tracking,
            },
        };

        let outcome = compositors.draw(&mut inner.backend, surface, render, &pass);

        // A failed upload is retried next tick rather than drawing whatever
        // the compositor still holds from an older frame.
        match outcome {
            PassOutcome::LoadFailed => return Ok(RenderOutcome::Empty),
            PassOutcome::NotDrawn => {
                inner.needs_load = false;
                return Ok(RenderOutcome::Empty);
            }
            PassOutcome::Drawn => inner.needs_load = false,
        }

        inner.stats.record_render(&info.timing, monotonic_us(), last_render_us);
        log::trace!("render stats: {:?}", inner.stats);
        Ok(RenderOutcome::Rendered)
    }

    /// Detaches any decoder, releases the held frame and frees every GPU
    /// resource. Safe to call repeatedly; also runs on drop.
    pub fn destroy(&self) {
        self.lock().teardown();
    }
}

impl<B: GpuBackend> Drop for RenderPipeline<B> {
    fn drop(&mut self) {
        self.inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .teardown();
    }
}

impl<B: GpuBackend> Inner<B> {
    fn stream(&self) -> Option<Arc<StreamDescriptor>> {
        self.attachment.as_ref().and_then(|a| a.stream.upgrade())
    }

    /// Pops every queued frame, keeping only the newest. Returns the number
    /// of frames pulled.
    fn drain(&mut self) -> usize {
        let Some(attachment) = self.attachment.as_ref() else { return 0 };

        let mut pulled = 0;
        loop {
            match attachment.queue.try_pop() {
                Ok(Some(frame)) => {
                    // Dropping the replaced handle releases its reference.
                    self.current = Some(frame);
                    pulled += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    log::error!("failed to get frame from queue: {err}");
                    break;
                }
            }
        }

        if pulled > 1 {
            self.stats.record_dropped(pulled as u64 - 1);
        }
        pulled
    }

    fn release_frame(&mut self) {
        if let Some(frame) = self.current.take() {
            log::trace!("releasing frame {}", frame.sequence());
        }
    }

    fn release_gpu(&mut self) {
        if self.compositors.take().is_some() {
            log::debug!("released compositors");
        }
    }

    /// Clears the attachment, asking the decoder (the caller's handle if
    /// given, else the one still alive behind the weak link) to drop its
    /// queue.
    fn detach(&mut self, decoder: Option<&Arc<dyn Decoder>>) {
        let Some(attachment) = self.attachment.take() else { return };
        self.release_frame();

        let decoder = decoder.cloned().or_else(|| attachment.decoder.upgrade());
        match decoder {
            Some(decoder) => {
                if let Err(err) = decoder.remove_output_queue(&attachment.queue) {
                    log::error!("failed to remove output queue {:?}: {err:#}", attachment.queue.id());
                }
            }
            None => log::debug!("decoder gone before detach"),
        }

        if let Some(compositors) = self.compositors.as_mut() {
            compositors.bind_stream(None);
        }
        log::debug!("detached decoder (queue {:?})", attachment.queue.id());
    }

    fn teardown(&mut self) {
        self.detach(None);
        self.release_frame();
        self.release_gpu();
        self.state = PipelineState::Unconfigured;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::coords::RenderRect;
    use crate::media::ColorFormat;
    use crate::render::testing::{
        Event, FakeBackend, FakeDecoder, FakeSurface, Probe, ReleaseCounter,
    };
    use crate::settings::{HmdModel, Settings};

    const WINDOW: Size = Size::new(1280, 720);

    fn pipeline() -> (RenderPipeline<FakeBackend>, Probe) {
        let (backend, probe) = FakeBackend::new();
        (RenderPipeline::new(backend, Arc::new(SettingsStore::default())), probe)
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new(WINDOW)
    }

    fn as_decoder(decoder: &Arc<FakeDecoder>) -> Arc<dyn Decoder> {
        decoder.clone()
    }

    fn attached(pipe: &RenderPipeline<FakeBackend>) -> (Arc<FakeDecoder>, Arc<dyn Decoder>) {
        let fake = FakeDecoder::new(7);
        let decoder = as_decoder(&fake);
        pipe.attach_decoder(&decoder).unwrap();
        (fake, decoder)
    }

    // ── configure ─────────────────────────────────────────────────────────

    #[test]
    fn configure_with_area_runs() {
        let (pipe, probe) = pipeline();
        assert_eq!(pipe.configure(config()).unwrap(), PipelineState::Running);
        assert_eq!(pipe.state(), PipelineState::Running);
        assert_eq!(probe.live_videos(), 1);
        assert_eq!(probe.live_huds(), 1);
        assert_eq!(probe.live_offscreens(), 0);
        assert_eq!(probe.live_correctors(), 0);
    }

    #[test]
    fn zero_area_configure_is_ready_without_resources() {
        let (pipe, probe) = pipeline();
        let state = pipe.configure(PipelineConfig::new(Size::new(0, 0))).unwrap();
        assert_eq!(state, PipelineState::Ready);
        assert!(probe.events().is_empty());
    }

    #[test]
    fn resources_follow_enabled_features_across_reconfigures() {
        let (pipe, probe) = pipeline();
        let sequence = [
            config().with_hmd_correction(true),
            config().with_hud(false),
            config().with_hmd_correction(true).with_hud(false),
            PipelineConfig::new(Size::new(0, 0)).with_hmd_correction(true),
            config(),
            config().with_hmd_correction(true),
        ];

        for cfg in sequence {
            pipe.configure(cfg).unwrap();
            let area = !cfg.effective_render_rect().is_empty();
            let hmd = area && cfg.hmd_correction;
            assert_eq!(probe.live_offscreens(), usize::from(hmd), "{cfg:?}");
            assert_eq!(probe.live_correctors(), usize::from(hmd), "{cfg:?}");
            assert_eq!(probe.live_huds(), usize::from(area && cfg.hud), "{cfg:?}");
            assert_eq!(probe.live_videos(), usize::from(area), "{cfg:?}");
        }
    }

    #[test]
    fn hmd_round_trip_leaks_nothing() {
        let (pipe, probe) = pipeline();
        pipe.configure(config().with_hmd_correction(true)).unwrap();
        pipe.configure(config().with_hmd_correction(false)).unwrap();

        assert_eq!(probe.live_offscreens(), 0);
        assert_eq!(probe.live_correctors(), 0);
        assert_eq!(probe.count(|e| matches!(e, Event::AllocOffscreen { .. })), 1);
        assert_eq!(probe.count(|e| matches!(e, Event::FreeOffscreen(_))), 1);
    }

    #[test]
    fn offscreen_is_half_the_render_width() {
        let (pipe, probe) = pipeline();
        pipe.configure(
            config()
                .with_render_rect(RenderRect::new(0, 0, 1000, 600))
                .with_hmd_correction(true),
        )
        .unwrap();
        assert!(probe.events().contains(&Event::AllocOffscreen {
            id: 1,
            size: Size::new(500, 600),
        }));
        assert!(probe.events().contains(&Event::AllocCorrector {
            model: HmdModel::Unknown,
            eye: Size::new(500, 600),
        }));
    }

    #[test]
    fn corrector_reads_lens_settings_at_configure() {
        let (backend, probe) = FakeBackend::new();
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        let pipe = RenderPipeline::new(backend, settings.clone());

        settings.update(|s| s.hmd.model = HmdModel::Cockpitglasses);
        pipe.configure(config().with_hmd_correction(true)).unwrap();

        assert!(probe.events().iter().any(|e| matches!(
            e,
            Event::AllocCorrector { model: HmdModel::Cockpitglasses, .. }
        )));
    }

    #[test]
    fn video_failure_aborts_configure() {
        let (pipe, probe) = pipeline();
        probe.failures().video = true;

        let err = pipe.configure(config()).unwrap_err();
        assert!(matches!(err, RenderError::Compositor { stage: "video", .. }));
        assert_eq!(pipe.state(), PipelineState::Unconfigured);
        assert_eq!(probe.live_total(), 0);
    }

    #[test]
    fn hud_failure_tears_down_video() {
        let (pipe, probe) = pipeline();
        probe.failures().hud = true;

        let err = pipe.configure(config()).unwrap_err();
        assert!(matches!(err, RenderError::Compositor { stage: "hud", .. }));
        assert_eq!(pipe.state(), PipelineState::Unconfigured);
        assert_eq!(probe.live_total(), 0);
    }

    #[test]
    fn hud_failure_is_ignored_when_hud_disabled() {
        let (pipe, probe) = pipeline();
        probe.failures().hud = true;
        assert_eq!(pipe.configure(config().with_hud(false)).unwrap(), PipelineState::Running);
    }

    #[test]
    fn offscreen_failure_reports_resource_exhaustion() {
        let (pipe, probe) = pipeline();
        probe.failures().offscreen = true;

        let err = pipe.configure(config().with_hmd_correction(true)).unwrap_err();
        assert!(matches!(err, RenderError::ResourceExhausted(_)));
        assert_eq!(probe.live_total(), 0);
    }

    #[test]
    fn corrector_failure_frees_offscreen() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        probe.failures().corrector = true;

        let err = pipe.configure(config().with_hmd_correction(true)).unwrap_err();
        assert!(matches!(err, RenderError::Compositor { stage: "distortion", .. }));
        assert_eq!(pipe.state(), PipelineState::Unconfigured);
        assert_eq!(probe.live_total(), 0);
    }

    #[test]
    fn negative_render_offset_is_rejected() {
        let (pipe, probe) = pipeline();
        let err = pipe
            .configure(config().with_render_rect(RenderRect::new(-1, 0, 10, 10)))
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidArgument(_)));
        assert_eq!(probe.live_total(), 0);
    }

    // ── decoder attach/detach ─────────────────────────────────────────────

    #[test]
    fn second_attach_fails_and_keeps_first_queue() {
        let (pipe, _probe) = pipeline();
        let (first, _decoder) = attached(&pipe);
        let second = as_decoder(&FakeDecoder::new(8));

        let err = pipe.attach_decoder(&second).unwrap_err();
        assert!(matches!(err, RenderError::Precondition(_)));
        assert_eq!(first.queue_count(), 1);
        assert_eq!(first.removed(), 0);
        assert!(pipe.has_decoder());
    }

    #[test]
    fn decoder_without_stream_is_invalid() {
        let (pipe, _probe) = pipeline();
        let decoder = as_decoder(&FakeDecoder::without_stream());
        let err = pipe.attach_decoder(&decoder).unwrap_err();
        assert!(matches!(err, RenderError::InvalidArgument(_)));
        assert!(!pipe.has_decoder());
    }

    #[test]
    fn attach_rebinds_existing_compositors() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        attached(&pipe);

        assert!(probe.events().contains(&Event::BindStream(Some(7))));
    }

    #[test]
    fn detach_releases_held_frame_once() {
        let (pipe, _probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, decoder) = attached(&pipe);
        let releases = ReleaseCounter::new();

        fake.publish(releases.frame(7, 1, ColorFormat::Yuv420Planar));
        pipe.render(0, &mut FakeSurface).unwrap();
        assert_eq!(releases.count(), 0);

        pipe.detach_decoder(&decoder).unwrap();
        assert_eq!(releases.count(), 1);
        assert_eq!(fake.removed(), 1);
        assert_eq!(pipe.current_frame_sequence(), None);

        let err = pipe.detach_decoder(&decoder).unwrap_err();
        assert!(matches!(err, RenderError::Precondition(_)));
        assert_eq!(releases.count(), 1);
        assert_eq!(fake.removed(), 1);
    }

    #[test]
    fn detach_without_frame_is_fine() {
        let (pipe, _probe) = pipeline();
        let (fake, decoder) = attached(&pipe);
        pipe.detach_decoder(&decoder).unwrap();
        assert_eq!(fake.removed(), 1);
        assert_eq!(fake.queue_count(), 0);
    }

    #[test]
    fn detach_of_other_decoder_is_invalid() {
        let (pipe, _probe) = pipeline();
        let (fake, _decoder) = attached(&pipe);
        let other = as_decoder(&FakeDecoder::new(7));

        let err = pipe.detach_decoder(&other).unwrap_err();
        assert!(matches!(err, RenderError::InvalidArgument(_)));
        assert_eq!(fake.removed(), 0);
        assert!(pipe.has_decoder());
    }

    #[test]
    fn remove_queue_failure_does_not_block_detach() {
        let (pipe, _probe) = pipeline();
        let (fake, decoder) = attached(&pipe);
        fake.fail_remove();

        pipe.detach_decoder(&decoder).unwrap();
        assert!(!pipe.has_decoder());
    }

    // ── render ────────────────────────────────────────────────────────────

    #[test]
    fn render_keeps_only_newest_frame() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        let releases = ReleaseCounter::new();

        for seq in 1..=3 {
            fake.publish(releases.frame(7, seq, ColorFormat::Yuv420Planar));
        }
        let outcome = pipe.render(0, &mut FakeSurface).unwrap();

        assert_eq!(outcome, RenderOutcome::Rendered);
        assert_eq!(pipe.current_frame_sequence(), Some(3));
        assert_eq!(releases.count(), 2);
        assert_eq!(releases.released(), vec![1, 2]);
        assert_eq!(pipe.stats().frames_dropped, 2);

        let loads: Vec<u64> = probe
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Load { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect();
        assert_eq!(loads, vec![3]);
    }

    #[test]
    fn zero_area_render_never_touches_video() {
        let (pipe, probe) = pipeline();
        pipe.configure(PipelineConfig::new(Size::new(0, 0))).unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420Planar));

        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Empty);
        assert_eq!(
            probe.count(|e| matches!(e, Event::Load { .. } | Event::RenderVideo { .. })),
            0
        );
    }

    #[test]
    fn render_before_configure_is_empty() {
        let (pipe, probe) = pipeline();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420Planar));

        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Empty);
        assert!(probe.events().is_empty());
    }

    #[test]
    fn render_without_frame_is_empty() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        attached(&pipe);

        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Empty);
        assert_eq!(probe.count(|e| matches!(e, Event::RenderVideo { .. })), 0);
    }

    #[test]
    fn semiplanar_frame_selects_semiplanar_conversion() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420SemiPlanar));

        pipe.render(0, &mut FakeSurface).unwrap();
        assert!(probe.events().contains(&Event::Load {
            conversion: ColorConversion::Yuv420SemiPlanarToRgb,
            sequence: 1,
        }));
    }

    #[test]
    fn unknown_format_selects_planar_conversion() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Unknown(0x7f)));

        pipe.render(0, &mut FakeSurface).unwrap();
        assert!(probe.events().contains(&Event::Load {
            conversion: ColorConversion::Yuv420PlanarToRgb,
            sequence: 1,
        }));
    }

    #[test]
    fn held_frame_is_redrawn_without_reload() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420Planar));

        pipe.render(0, &mut FakeSurface).unwrap();
        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Rendered);

        assert_eq!(probe.count(|e| matches!(e, Event::Load { .. })), 1);
        assert_eq!(probe.count(|e| matches!(e, Event::RenderVideo { .. })), 2);
    }

    #[test]
    fn reconfigure_reloads_held_frame() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420Planar));
        pipe.render(0, &mut FakeSurface).unwrap();

        pipe.configure(config().with_hud(false)).unwrap();
        pipe.render(0, &mut FakeSurface).unwrap();

        assert_eq!(probe.count(|e| matches!(e, Event::Load { .. })), 2);
    }

    #[test]
    fn direct_composition_draws_at_render_offset() {
        let (pipe, probe) = pipeline();
        let rect = RenderRect::new(40, 30, 640, 360);
        pipe.configure(config().with_render_rect(rect)).unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420Planar));
        probe.clear();

        pipe.render(0, &mut FakeSurface).unwrap();

        assert_eq!(
            probe.draw_events(),
            vec![
                Event::Bind { offscreen: None, viewport: rect },
                Event::Load {
                    conversion: ColorConversion::Yuv420PlanarToRgb,
                    sequence: 1,
                },
                Event::RenderVideo { offscreen: None, viewport: rect },
                Event::RenderHud {
                    offscreen: None,
                    target: rect.size(),
                    hmd_split: false,
                },
            ]
        );
    }

    #[test]
    fn hmd_composition_warps_offscreen_onto_surface() {
        let (pipe, probe) = pipeline();
        let rect = RenderRect::new(0, 0, 1000, 500);
        pipe.configure(config().with_render_rect(rect).with_hmd_correction(true))
            .unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420Planar));
        probe.clear();

        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Rendered);

        let eye = RenderRect::new(0, 0, 500, 500);
        assert_eq!(
            probe.draw_events(),
            vec![
                Event::Bind { offscreen: Some(1), viewport: eye },
                Event::Clear { offscreen: Some(1) },
                Event::Load {
                    conversion: ColorConversion::Yuv420PlanarToRgb,
                    sequence: 1,
                },
                Event::RenderVideo { offscreen: Some(1), viewport: eye },
                Event::RenderHud {
                    offscreen: Some(1),
                    target: eye.size(),
                    hmd_split: true,
                },
                Event::Bind { offscreen: None, viewport: rect },
                Event::RenderHmd { source: 1, viewport: rect },
            ]
        );
    }

    #[test]
    fn load_failure_skips_frame_but_keeps_running() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        probe.failures().load = true;
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420Planar));

        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Empty);
        assert_eq!(pipe.state(), PipelineState::Running);

        probe.failures().load = false;
        fake.publish(ReleaseCounter::new().frame(7, 2, ColorFormat::Yuv420Planar));
        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Rendered);
    }

    #[test]
    fn failed_upload_is_retried_instead_of_drawing_older_frame() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        let releases = ReleaseCounter::new();

        fake.publish(releases.frame(7, 1, ColorFormat::Yuv420Planar));
        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Rendered);

        probe.failures().load = true;
        fake.publish(releases.frame(7, 2, ColorFormat::Yuv420Planar));
        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Empty);
        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Empty);

        probe.failures().load = false;
        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Rendered);
        assert_eq!(pipe.current_frame_sequence(), Some(2));

        let loads: Vec<u64> = probe
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Load { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect();
        assert_eq!(loads, vec![1, 2, 2, 2]);

        // Once uploaded, the held frame is redrawn without another load.
        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Rendered);
        assert_eq!(probe.count(|e| matches!(e, Event::Load { .. })), 4);
    }

    #[test]
    fn video_render_failure_is_empty_not_error() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        probe.failures().render_video = true;
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420Planar));

        assert_eq!(pipe.render(0, &mut FakeSurface).unwrap(), RenderOutcome::Empty);
        assert_eq!(pipe.state(), PipelineState::Running);
    }

    #[test]
    fn frame_for_other_stream_is_upstream_error() {
        let (pipe, _probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(99, 1, ColorFormat::Yuv420Planar));

        let err = pipe.render(0, &mut FakeSurface).unwrap_err();
        assert!(matches!(err, RenderError::Upstream(_)));
        assert_eq!(pipe.state(), PipelineState::Running);
    }

    #[test]
    fn empty_payload_is_upstream_error() {
        let (pipe, _probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().empty_frame(7, 1));

        let err = pipe.render(0, &mut FakeSurface).unwrap_err();
        assert!(matches!(err, RenderError::Upstream(_)));
    }

    #[test]
    fn render_updates_stats() {
        let (pipe, _probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        fake.publish(ReleaseCounter::new().frame(7, 1, ColorFormat::Yuv420Planar));

        pipe.render(0, &mut FakeSurface).unwrap();
        assert_eq!(pipe.stats().frames_rendered, 1);
    }

    // ── concurrency ───────────────────────────────────────────────────────

    #[test]
    fn concurrent_producer_releases_every_frame() {
        const FRAMES: u64 = 2000;

        let (pipe, _probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        let releases = ReleaseCounter::new();

        let producer = {
            let fake = Arc::clone(&fake);
            let releases = releases.clone();
            std::thread::spawn(move || {
                for seq in 1..=FRAMES {
                    fake.publish(releases.frame(7, seq, ColorFormat::Yuv420Planar));
                    if seq % 64 == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut last_seen = 0;
        for _ in 0..500 {
            pipe.render(0, &mut FakeSurface).unwrap();
            if let Some(seq) = pipe.current_frame_sequence() {
                assert!(seq >= last_seen, "frame {seq} after {last_seen}");
                last_seen = seq;
            }
        }
        producer.join().unwrap();
        pipe.render(0, &mut FakeSurface).unwrap();

        // Every frame but the held one has been released by now.
        let held = usize::from(pipe.current_frame_sequence().is_some());
        assert_eq!(releases.count() + held, FRAMES as usize);

        pipe.destroy();
        assert_eq!(releases.count(), FRAMES as usize);
        let mut released = releases.released();
        released.sort_unstable();
        released.dedup();
        assert_eq!(released.len(), FRAMES as usize);
    }

    // ── teardown ──────────────────────────────────────────────────────────

    #[test]
    fn destroy_releases_everything_and_is_idempotent() {
        let (pipe, probe) = pipeline();
        pipe.configure(config().with_hmd_correction(true)).unwrap();
        let (fake, _decoder) = attached(&pipe);
        let releases = ReleaseCounter::new();
        fake.publish(releases.frame(7, 1, ColorFormat::Yuv420Planar));
        pipe.render(0, &mut FakeSurface).unwrap();

        pipe.destroy();
        pipe.destroy();

        assert_eq!(pipe.state(), PipelineState::Unconfigured);
        assert_eq!(probe.live_total(), 0);
        assert_eq!(releases.count(), 1);
        assert_eq!(fake.removed(), 1);
        assert!(!pipe.has_decoder());
    }

    #[test]
    fn drop_detaches_and_frees() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, _decoder) = attached(&pipe);
        let releases = ReleaseCounter::new();
        fake.publish(releases.frame(7, 1, ColorFormat::Yuv420Planar));
        pipe.render(0, &mut FakeSurface).unwrap();

        drop(pipe);

        assert_eq!(probe.live_total(), 0);
        assert_eq!(releases.count(), 1);
        assert_eq!(fake.removed(), 1);
    }

    #[test]
    fn teardown_tolerates_dropped_decoder() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        let (fake, decoder) = attached(&pipe);
        drop(decoder);
        drop(fake);

        pipe.destroy();
        assert_eq!(probe.live_total(), 0);
        assert!(!pipe.has_decoder());
    }

    #[test]
    fn reconfigure_after_destroy_runs_again() {
        let (pipe, probe) = pipeline();
        pipe.configure(config()).unwrap();
        pipe.destroy();
        assert_eq!(pipe.configure(config()).unwrap(), PipelineState::Running);
        assert_eq!(probe.live_videos(), 1);
    }
}
