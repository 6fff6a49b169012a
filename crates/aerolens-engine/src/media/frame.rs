use std::fmt;
use std::sync::Arc;

/// Pixel layout a decoder declares for its output.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    /// Three planes: Y, U, V (4:2:0).
    Yuv420Planar,
    /// Two planes: Y, interleaved UV (4:2:0), a.k.a. NV12.
    Yuv420SemiPlanar,
    /// Hardware surface already in display color space (RGBA8 in memory).
    Opaque,
    /// A format this renderer does not know about.
    Unknown(u32),
}

/// One plane of a decoded picture inside the frame payload.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Plane {
    /// Byte offset of the first row.
    pub offset: usize,
    /// Bytes between the starts of two consecutive rows.
    pub stride: usize,
}

/// Sample (pixel) aspect ratio.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SampleAspect {
    pub width: u32,
    pub height: u32,
}

impl SampleAspect {
    pub const SQUARE: Self = Self { width: 1, height: 1 };

    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns a usable ratio; zero components fall back to square pixels.
    #[inline]
    pub fn normalized(self) -> Self {
        if self.width == 0 || self.height == 0 {
            Self::SQUARE
        } else {
            self
        }
    }
}

impl Default for SampleAspect {
    fn default() -> Self {
        Self::SQUARE
    }
}

/// Per-frame pipeline timestamps, microseconds on `time::monotonic_us`.
///
/// Zero means "not measured".
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FrameTiming {
    pub demux_output_us: u64,
    pub decoder_output_us: u64,
    /// Capture time of the access unit converted to the local clock.
    pub ntp_local_us: u64,
}

/// Attitude as a unit quaternion (w, x, y, z), NED body frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Orientation {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Orientation {
    pub const IDENTITY: Self = Self { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    /// Builds a quaternion from yaw/pitch/roll in radians (ZYX order).
    pub fn from_euler(yaw: f32, pitch: f32, roll: f32) -> Self {
        let (sy, cy) = (yaw * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sr, cr) = (roll * 0.5).sin_cos();
        Self {
            w: cr * cp * cy + sr * sp * sy,
            x: sr * cp * cy - cr * sp * sy,
            y: cr * sp * cy + sr * cp * sy,
            z: cr * cp * sy - sr * sp * cy,
        }
    }

    /// Returns (yaw, pitch, roll) in radians (ZYX order).
    pub fn to_euler(self) -> (f32, f32, f32) {
        let Self { w, x, y, z } = self;
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let sin_pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0);
        let pitch = sin_pitch.asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        (yaw, pitch, roll)
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// WGS84 position.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
}

/// Telemetry attached to a frame, consumed by the HUD and head tracking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayMetadata {
    /// Drone attitude at capture time.
    pub drone: Orientation,
    /// Viewer head attitude, present when head tracking is active upstream.
    pub head: Option<Orientation>,
    pub location: Option<GeoPoint>,
    pub ground_speed_mps: f32,
    /// 0..=100
    pub battery_percent: u8,
    /// 0..=5
    pub link_quality: u8,
}

/// Decoder-side description of one picture.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub color_format: ColorFormat,
    pub planes: Vec<Plane>,
    pub width: u32,
    pub height: u32,
    pub sample_aspect: SampleAspect,
    pub timing: FrameTiming,
    pub metadata: OverlayMetadata,
    /// Decode order index, monotonically increasing per decoder.
    pub sequence: u64,
}

/// Receives payload storage once the last `FrameBuffer` handle is dropped.
///
/// Decoders use this to recycle pixel buffers into their pool.
pub trait FrameRecycler: Send + Sync {
    fn recycle(&self, data: Vec<u8>, info: &FrameInfo);
}

struct FrameStorage {
    stream_id: u32,
    data: Vec<u8>,
    info: FrameInfo,
    recycler: Option<Arc<dyn FrameRecycler>>,
}

impl Drop for FrameStorage {
    fn drop(&mut self) {
        if let Some(recycler) = self.recycler.take() {
            recycler.recycle(std::mem::take(&mut self.data), &self.info);
        }
    }
}

/// Shared-ownership handle to one decoded picture.
///
/// Cloning acquires a reference, dropping releases one. The payload is never
/// mutated after construction, so handles may cross threads freely; storage
/// is released (or recycled) when the last handle goes away.
#[derive(Clone)]
pub struct FrameBuffer {
    inner: Arc<FrameStorage>,
}

impl FrameBuffer {
    /// Wraps a decoded payload produced for stream `stream_id`.
    pub fn new(stream_id: u32, data: Vec<u8>, info: FrameInfo) -> Self {
        Self::build(stream_id, data, info, None)
    }

    /// Like [`FrameBuffer::new`], returning storage to `recycler` on release.
    pub fn with_recycler(
        stream_id: u32,
        data: Vec<u8>,
        info: FrameInfo,
        recycler: Arc<dyn FrameRecycler>,
    ) -> Self {
        Self::build(stream_id, data, info, Some(recycler))
    }

    fn build(
        stream_id: u32,
        data: Vec<u8>,
        info: FrameInfo,
        recycler: Option<Arc<dyn FrameRecycler>>,
    ) -> Self {
        Self {
            inner: Arc::new(FrameStorage {
                stream_id,
                data,
                info,
                recycler,
            }),
        }
    }

    /// Pixel payload (all planes).
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// Frame description, looked up for the stream it belongs to.
    ///
    /// Returns `None` when the buffer was produced for another stream.
    pub fn info_for(&self, stream_id: u32) -> Option<&FrameInfo> {
        (self.inner.stream_id == stream_id).then_some(&self.inner.info)
    }

    /// Frame description regardless of stream.
    pub fn info(&self) -> &FrameInfo {
        &self.inner.info
    }

    pub fn stream_id(&self) -> u32 {
        self.inner.stream_id
    }

    pub fn sequence(&self) -> u64 {
        self.inner.info.sequence
    }

    /// Number of live handles to this picture.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// True if both handles refer to the same picture.
    pub fn same_as(&self, other: &FrameBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("stream_id", &self.inner.stream_id)
            .field("sequence", &self.inner.info.sequence)
            .field("format", &self.inner.info.color_format)
            .field("size", &(self.inner.info.width, self.inner.info.height))
            .field("refs", &self.ref_count())
            .finish()
    }
}
