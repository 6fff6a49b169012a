//! Recording fakes for pipeline tests.
//!
//! `FakeBackend` logs every allocation, free, bind, clear and compositor
//! call into a shared [`Probe`], so tests can assert resource balance and
//! pass ordering without a GPU.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::bail;

use crate::compositor::{
    ColorConversion, DistortionCorrector, DrawOutcome, DrawTarget, FrameUpload, HudCompositor,
    HudParams, VideoCompositor, VideoParams,
};
use crate::coords::{RenderRect, Size};
use crate::device::GpuBackend;
use crate::media::{
    ColorFormat, Decoder, ElementaryStreamType, FrameBuffer, FrameInfo, FrameReceiver,
    FrameRecycler, FrameTiming, OutputQueues, OverlayMetadata, Plane, SampleAspect,
    StreamDescriptor,
};
use crate::settings::{HmdModel, LensParams};

// ── journal ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    AllocOffscreen { id: u64, size: Size },
    FreeOffscreen(u64),
    AllocVideo,
    FreeVideo,
    AllocHud,
    FreeHud,
    AllocCorrector { model: HmdModel, eye: Size },
    FreeCorrector,
    BindStream(Option<u32>),
    Bind { offscreen: Option<u64>, viewport: RenderRect },
    Clear { offscreen: Option<u64> },
    Load { conversion: ColorConversion, sequence: u64 },
    RenderVideo { offscreen: Option<u64>, viewport: RenderRect },
    RenderHud { offscreen: Option<u64>, target: Size, hmd_split: bool },
    RenderHmd { source: u64, viewport: RenderRect },
}

impl Event {
    fn is_draw(&self) -> bool {
        matches!(
            self,
            Event::Bind { .. }
                | Event::Clear { .. }
                | Event::Load { .. }
                | Event::RenderVideo { .. }
                | Event::RenderHud { .. }
                | Event::RenderHmd { .. }
        )
    }
}

/// Calls the fakes should fail.
#[derive(Debug, Default)]
pub(crate) struct Failures {
    pub video: bool,
    pub hud: bool,
    pub offscreen: bool,
    pub corrector: bool,
    pub load: bool,
    pub render_video: bool,
}

/// Test-side handle on the fake backend's journal and failure switches.
#[derive(Clone, Default)]
pub(crate) struct Probe {
    events: Arc<Mutex<Vec<Event>>>,
    failures: Arc<Mutex<Failures>>,
}

impl Probe {
    fn push(&self, event: Event) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Bind, clear, load and render events in call order.
    pub fn draw_events(&self) -> Vec<Event> {
        self.events().into_iter().filter(Event::is_draw).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn failures(&self) -> MutexGuard<'_, Failures> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self, alloc: impl Fn(&Event) -> bool, free: impl Fn(&Event) -> bool) -> usize {
        let events = self.events();
        let allocated = events.iter().filter(|e| alloc(e)).count();
        let freed = events.iter().filter(|e| free(e)).count();
        assert!(freed <= allocated, "more frees than allocations: {events:?}");
        allocated - freed
    }

    pub fn live_offscreens(&self) -> usize {
        self.live(
            |e| matches!(e, Event::AllocOffscreen { .. }),
            |e| matches!(e, Event::FreeOffscreen(_)),
        )
    }

    pub fn live_videos(&self) -> usize {
        self.live(|e| *e == Event::AllocVideo, |e| *e == Event::FreeVideo)
    }

    pub fn live_huds(&self) -> usize {
        self.live(|e| *e == Event::AllocHud, |e| *e == Event::FreeHud)
    }

    pub fn live_correctors(&self) -> usize {
        self.live(
            |e| matches!(e, Event::AllocCorrector { .. }),
            |e| *e == Event::FreeCorrector,
        )
    }

    pub fn live_total(&self) -> usize {
        self.live_offscreens() + self.live_videos() + self.live_huds() + self.live_correctors()
    }
}

// ── backend ───────────────────────────────────────────────────────────────

pub(crate) struct FakeSurface;

pub(crate) struct FakeOffscreen {
    id: u64,
    probe: Probe,
}

impl Drop for FakeOffscreen {
    fn drop(&mut self) {
        self.probe.push(Event::FreeOffscreen(self.id));
    }
}

fn offscreen_id(target: &DrawTarget<'_, FakeBackend>) -> Option<u64> {
    target.offscreen.map(|o| o.id)
}

pub(crate) struct FakeBackend {
    probe: Probe,
    next_id: u64,
}

impl FakeBackend {
    pub fn new() -> (Self, Probe) {
        let probe = Probe::default();
        (
            Self {
                probe: probe.clone(),
                next_id: 1,
            },
            probe,
        )
    }
}

impl GpuBackend for FakeBackend {
    type Surface = FakeSurface;
    type Offscreen = FakeOffscreen;
    type Video = FakeVideo;
    type Hud = FakeHud;
    type Corrector = FakeCorrector;

    fn create_offscreen(&mut self, size: Size) -> anyhow::Result<FakeOffscreen> {
        if self.probe.failures().offscreen {
            bail!("out of texture memory");
        }
        let id = self.next_id;
        self.next_id += 1;
        self.probe.push(Event::AllocOffscreen { id, size });
        Ok(FakeOffscreen {
            id,
            probe: self.probe.clone(),
        })
    }

    fn create_video_compositor(
        &mut self,
        _stream: Option<&Arc<StreamDescriptor>>,
    ) -> anyhow::Result<FakeVideo> {
        if self.probe.failures().video {
            bail!("video shader failed to compile");
        }
        self.probe.push(Event::AllocVideo);
        Ok(FakeVideo {
            probe: self.probe.clone(),
            loaded: false,
        })
    }

    fn create_hud_compositor(
        &mut self,
        _stream: Option<&Arc<StreamDescriptor>>,
    ) -> anyhow::Result<FakeHud> {
        if self.probe.failures().hud {
            bail!("hud shader failed to compile");
        }
        self.probe.push(Event::AllocHud);
        Ok(FakeHud {
            probe: self.probe.clone(),
        })
    }

    fn create_distortion_corrector(
        &mut self,
        lens: &LensParams,
        eye: Size,
    ) -> anyhow::Result<FakeCorrector> {
        if self.probe.failures().corrector {
            bail!("hmd shader failed to compile");
        }
        self.probe.push(Event::AllocCorrector {
            model: lens.hmd.model,
            eye,
        });
        Ok(FakeCorrector {
            probe: self.probe.clone(),
        })
    }

    fn bind_target(
        &mut self,
        _surface: &mut FakeSurface,
        target: Option<&FakeOffscreen>,
        viewport: RenderRect,
    ) {
        self.probe.push(Event::Bind {
            offscreen: target.map(|t| t.id),
            viewport,
        });
    }

    fn clear(&mut self, _surface: &mut FakeSurface, target: Option<&FakeOffscreen>) {
        self.probe.push(Event::Clear {
            offscreen: target.map(|t| t.id),
        });
    }
}

// ── compositors ───────────────────────────────────────────────────────────

pub(crate) struct FakeVideo {
    probe: Probe,
    loaded: bool,
}

impl Drop for FakeVideo {
    fn drop(&mut self) {
        self.probe.push(Event::FreeVideo);
    }
}

impl VideoCompositor<FakeBackend> for FakeVideo {
    fn bind_stream(&mut self, stream: Option<&Arc<StreamDescriptor>>) {
        self.probe.push(Event::BindStream(stream.map(|s| s.id())));
        self.loaded = false;
    }

    fn load_frame(&mut self, _gpu: &FakeBackend, upload: &FrameUpload<'_>) -> anyhow::Result<()> {
        self.probe.push(Event::Load {
            conversion: upload.conversion,
            sequence: upload.sequence,
        });
        if self.probe.failures().load {
            // A failed upload leaves no usable texture behind.
            self.loaded = false;
            bail!("texture upload failed");
        }
        self.loaded = true;
        Ok(())
    }

    fn render_frame(
        &mut self,
        _gpu: &FakeBackend,
        target: &mut DrawTarget<'_, FakeBackend>,
        _params: &VideoParams<'_>,
    ) -> anyhow::Result<DrawOutcome> {
        self.probe.push(Event::RenderVideo {
            offscreen: offscreen_id(target),
            viewport: target.viewport,
        });
        if self.probe.failures().render_video {
            bail!("draw failed");
        }
        Ok(if self.loaded {
            DrawOutcome::Drawn
        } else {
            DrawOutcome::NothingLoaded
        })
    }
}

pub(crate) struct FakeHud {
    probe: Probe,
}

impl Drop for FakeHud {
    fn drop(&mut self) {
        self.probe.push(Event::FreeHud);
    }
}

impl HudCompositor<FakeBackend> for FakeHud {
    fn bind_stream(&mut self, stream: Option<&Arc<StreamDescriptor>>) {
        self.probe.push(Event::BindStream(stream.map(|s| s.id())));
    }

    fn render_hud(
        &mut self,
        _gpu: &FakeBackend,
        target: &mut DrawTarget<'_, FakeBackend>,
        params: &HudParams<'_>,
    ) -> anyhow::Result<()> {
        self.probe.push(Event::RenderHud {
            offscreen: offscreen_id(target),
            target: params.target,
            hmd_split: params.hmd_split,
        });
        Ok(())
    }
}

pub(crate) struct FakeCorrector {
    probe: Probe,
}

impl Drop for FakeCorrector {
    fn drop(&mut self) {
        self.probe.push(Event::FreeCorrector);
    }
}

impl DistortionCorrector<FakeBackend> for FakeCorrector {
    fn render_hmd(
        &mut self,
        _gpu: &FakeBackend,
        target: &mut DrawTarget<'_, FakeBackend>,
        source: &FakeOffscreen,
        _source_size: Size,
    ) -> anyhow::Result<()> {
        self.probe.push(Event::RenderHmd {
            source: source.id,
            viewport: target.viewport,
        });
        Ok(())
    }
}

// ── decoder ───────────────────────────────────────────────────────────────

pub(crate) struct FakeDecoder {
    stream: Option<Arc<StreamDescriptor>>,
    outputs: OutputQueues,
    removed: AtomicUsize,
    fail_remove: AtomicBool,
}

impl FakeDecoder {
    pub fn new(stream_id: u32) -> Arc<Self> {
        Self::build(Some(StreamDescriptor::new(stream_id, ElementaryStreamType::H264)))
    }

    pub fn without_stream() -> Arc<Self> {
        Self::build(None)
    }

    fn build(stream: Option<Arc<StreamDescriptor>>) -> Arc<Self> {
        Arc::new(Self {
            stream,
            outputs: OutputQueues::new(8),
            removed: AtomicUsize::new(0),
            fail_remove: AtomicBool::new(false),
        })
    }

    pub fn publish(&self, frame: FrameBuffer) -> usize {
        self.outputs.publish(&frame)
    }

    /// Number of `remove_output_queue` calls.
    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn queue_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn fail_remove(&self) {
        self.fail_remove.store(true, Ordering::SeqCst);
    }
}

impl Decoder for FakeDecoder {
    fn add_output_queue(&self) -> anyhow::Result<FrameReceiver> {
        Ok(self.outputs.add())
    }

    fn remove_output_queue(&self, queue: &FrameReceiver) -> anyhow::Result<()> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        if self.fail_remove.load(Ordering::SeqCst) {
            bail!("decoder busy");
        }
        self.outputs.remove(queue.id())?;
        Ok(())
    }

    fn stream(&self) -> Option<Arc<StreamDescriptor>> {
        self.stream.clone()
    }
}

// ── frames ────────────────────────────────────────────────────────────────

/// Builds frames and records the sequence of each one whose storage is
/// released.
#[derive(Clone, Default)]
pub(crate) struct ReleaseCounter {
    released: Arc<Mutex<Vec<u64>>>,
}

impl FrameRecycler for ReleaseCounter {
    fn recycle(&self, _data: Vec<u8>, info: &FrameInfo) {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(info.sequence);
    }
}

impl ReleaseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 4x4 frame of `format` for stream `stream_id`.
    pub fn frame(&self, stream_id: u32, sequence: u64, format: ColorFormat) -> FrameBuffer {
        let planes = vec![
            Plane { offset: 0, stride: 4 },
            Plane { offset: 16, stride: 2 },
            Plane { offset: 20, stride: 2 },
        ];
        self.build(stream_id, sequence, format, vec![0x80; 24], planes)
    }

    pub fn empty_frame(&self, stream_id: u32, sequence: u64) -> FrameBuffer {
        self.build(stream_id, sequence, ColorFormat::Yuv420Planar, Vec::new(), Vec::new())
    }

    fn build(
        &self,
        stream_id: u32,
        sequence: u64,
        color_format: ColorFormat,
        data: Vec<u8>,
        planes: Vec<Plane>,
    ) -> FrameBuffer {
        let info = FrameInfo {
            color_format,
            planes,
            width: 4,
            height: 4,
            sample_aspect: SampleAspect::SQUARE,
            timing: FrameTiming::default(),
            metadata: OverlayMetadata::default(),
            sequence,
        };
        FrameBuffer::with_recycler(stream_id, data, info, Arc::new(self.clone()))
    }

    pub fn count(&self) -> usize {
        self.released().len()
    }

    pub fn released(&self) -> Vec<u64> {
        self.released.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
