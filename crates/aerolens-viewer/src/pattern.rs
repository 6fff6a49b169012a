//! Synthetic I420 source standing in for a real decoder.
//!
//! A worker thread paints SMPTE-style color bars with a sweeping marker and
//! animated telemetry, publishing one frame per tick. The thread holds only
//! a weak reference to its decoder and exits once the last strong handle is
//! dropped.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;

use aerolens_engine::media::{
    ColorFormat, Decoder, DecoderFactory, FrameBuffer, FrameInfo, FrameReceiver, FrameRecycler,
    FrameTiming, Orientation, OverlayMetadata, OutputQueues, Plane, SampleAspect,
    StreamDescriptor, StreamGeometry,
};
use aerolens_engine::time::monotonic_us;

/// BT.601 limited-range (Y, U, V) for the eight classic bars.
const BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128), // white
    (210, 16, 146),  // yellow
    (170, 166, 16),  // cyan
    (145, 54, 34),   // green
    (106, 202, 222), // magenta
    (81, 90, 240),   // red
    (41, 240, 110),  // blue
    (16, 128, 128),  // black
];

/// Frames each output queue may buffer before the producer starts dropping.
const QUEUE_CAPACITY: usize = 4;

/// Recycled payloads kept around for reuse.
const POOL_DEPTH: usize = 4;

/// Creates [`PatternDecoder`]s through `StreamDescriptor::enable_decoder`.
#[derive(Debug, Clone, Copy)]
pub struct PatternSource {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

impl DecoderFactory for PatternSource {
    fn create(&self, stream: &Arc<StreamDescriptor>) -> anyhow::Result<Arc<dyn Decoder>> {
        anyhow::ensure!(
            self.width >= 2 && self.height >= 2,
            "pattern size {}x{} is too small",
            self.width,
            self.height
        );

        stream.set_geometry(StreamGeometry {
            width: self.width,
            height: self.height,
            ..Default::default()
        })?;

        let decoder = Arc::new(PatternDecoder {
            stream: Arc::downgrade(stream),
            outputs: OutputQueues::new(QUEUE_CAPACITY),
            pool: Arc::new(BufferPool::default()),
        });

        let weak = Arc::downgrade(&decoder);
        let source = *self;
        thread::Builder::new()
            .name(format!("pattern-decoder-{}", stream.id()))
            .spawn(move || run(weak, source))
            .context("failed to spawn pattern decoder thread")?;

        log::info!(
            "pattern decoder started: {}x{} @ {} fps",
            self.width,
            self.height,
            self.fps
        );
        Ok(decoder)
    }
}

/// Decoder producing a moving test pattern.
pub struct PatternDecoder {
    stream: Weak<StreamDescriptor>,
    outputs: OutputQueues,
    pool: Arc<BufferPool>,
}

impl Decoder for PatternDecoder {
    fn add_output_queue(&self) -> anyhow::Result<FrameReceiver> {
        Ok(self.outputs.add())
    }

    fn remove_output_queue(&self, queue: &FrameReceiver) -> anyhow::Result<()> {
        self.outputs.remove(queue.id())?;
        Ok(())
    }

    fn stream(&self) -> Option<Arc<StreamDescriptor>> {
        self.stream.upgrade()
    }
}

impl PatternDecoder {
    fn produce(&self, stream_id: u32, source: &PatternSource, sequence: u64, t: f32) -> FrameBuffer {
        let demux_output_us = monotonic_us();
        let (width, height) = (source.width, source.height);
        let layout = I420Layout::new(width, height);

        let mut data = self.pool.take(layout.len());
        fill_bars(&mut data, &layout, t);

        let info = FrameInfo {
            color_format: ColorFormat::Yuv420Planar,
            planes: layout.planes().to_vec(),
            width,
            height,
            sample_aspect: SampleAspect::SQUARE,
            timing: FrameTiming {
                demux_output_us,
                decoder_output_us: monotonic_us(),
                ntp_local_us: demux_output_us,
            },
            metadata: telemetry(t),
            sequence,
        };

        FrameBuffer::with_recycler(stream_id, data, info, self.pool.clone())
    }
}

fn run(decoder: Weak<PatternDecoder>, source: PatternSource) {
    let started = Instant::now();
    let interval = source.interval();
    let mut sequence = 0u64;

    loop {
        let Some(decoder) = decoder.upgrade() else {
            break;
        };
        let Some(stream) = decoder.stream.upgrade() else {
            break;
        };

        let frame = decoder.produce(stream.id(), &source, sequence, started.elapsed().as_secs_f32());
        stream.dispatch_to_filters(&frame);
        if decoder.outputs.publish(&frame) == 0 {
            log::trace!("pattern frame {sequence} had no consumer");
        }
        sequence += 1;

        // Release strong handles before sleeping so teardown is not delayed.
        drop(frame);
        drop(stream);
        drop(decoder);
        thread::sleep(interval);
    }

    log::debug!("pattern decoder stopped after {sequence} frames");
}

// ── pixel layout ─────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone)]
struct I420Layout {
    width: usize,
    height: usize,
    chroma_width: usize,
    chroma_height: usize,
}

impl I420Layout {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            height: height as usize,
            chroma_width: width.div_ceil(2) as usize,
            chroma_height: height.div_ceil(2) as usize,
        }
    }

    fn luma_len(&self) -> usize {
        self.width * self.height
    }

    fn chroma_len(&self) -> usize {
        self.chroma_width * self.chroma_height
    }

    fn len(&self) -> usize {
        self.luma_len() + 2 * self.chroma_len()
    }

    fn planes(&self) -> [Plane; 3] {
        [
            Plane { offset: 0, stride: self.width },
            Plane { offset: self.luma_len(), stride: self.chroma_width },
            Plane { offset: self.luma_len() + self.chroma_len(), stride: self.chroma_width },
        ]
    }
}

fn bar_at(x: usize, width: usize) -> (u8, u8, u8) {
    BARS[(x * BARS.len() / width.max(1)).min(BARS.len() - 1)]
}

/// Paints color bars plus a white marker sweeping left to right every 4 s.
fn fill_bars(data: &mut [u8], layout: &I420Layout, t: f32) {
    let (luma, chroma) = data.split_at_mut(layout.luma_len());
    let (u_plane, v_plane) = chroma.split_at_mut(layout.chroma_len());

    let marker = ((t / 4.0).fract() * layout.width as f32) as usize;
    let marker_half = (layout.width / 64).max(1);

    for row in luma.chunks_exact_mut(layout.width) {
        for (x, px) in row.iter_mut().enumerate() {
            *px = if x.abs_diff(marker) < marker_half { 235 } else { bar_at(x, layout.width).0 };
        }
    }

    for (u_row, v_row) in u_plane
        .chunks_exact_mut(layout.chroma_width)
        .zip(v_plane.chunks_exact_mut(layout.chroma_width))
    {
        for cx in 0..layout.chroma_width {
            let (_, u, v) = bar_at(cx * 2, layout.width);
            u_row[cx] = u;
            v_row[cx] = v;
        }
    }
}

/// Gentle banking flight with a draining battery and a cycling link.
fn telemetry(t: f32) -> OverlayMetadata {
    let yaw = 0.3 * (t * 0.2).sin();
    let pitch = 0.1 * (t * 0.5).sin();
    let roll = 0.25 * (t * 0.7).sin();

    OverlayMetadata {
        drone: Orientation::from_euler(yaw, pitch, roll),
        head: None,
        location: None,
        ground_speed_mps: 8.0 + 2.0 * (t * 0.3).sin(),
        battery_percent: 100 - ((t / 6.0) as u32 % 101) as u8,
        link_quality: ((t / 2.0) as u32 % 6) as u8,
    }
}

// ── buffer pool ──────────────────────────────────────────────────────────

#[derive(Default)]
struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn take(&self, len: usize) -> Vec<u8> {
        let mut data = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        data.resize(len, 0);
        data
    }
}

impl FrameRecycler for BufferPool {
    fn recycle(&self, data: Vec<u8>, _info: &FrameInfo) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < POOL_DEPTH {
            free.push(data);
        }
    }
}
