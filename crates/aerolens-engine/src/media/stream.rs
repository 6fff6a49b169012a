use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::{Decoder, DecoderFactory, FilterId, FrameBuffer, FrameFilter, MediaError, SampleAspect};

/// Elementary stream coding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ElementaryStreamType {
    H264,
    H265,
    Unknown,
}

/// Media kind; only video streams are described here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
}

/// Projection of the picture.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum VideoType {
    #[default]
    Unknown,
    Perspective,
    Equirectangular,
}

/// Pixels removed from each edge of the coded picture.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Crop {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

/// Coded picture geometry.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct StreamGeometry {
    pub width: u32,
    pub height: u32,
    pub crop: Crop,
    pub sample_aspect: SampleAspect,
}

impl StreamGeometry {
    pub fn cropped_width(&self) -> u32 {
        self.width
            .saturating_sub(self.crop.left)
            .saturating_sub(self.crop.right)
    }

    pub fn cropped_height(&self) -> u32 {
        self.height
            .saturating_sub(self.crop.top)
            .saturating_sub(self.crop.bottom)
    }
}

/// Field of view in degrees.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Fov {
    pub horizontal: f32,
    pub vertical: f32,
}

impl Default for Fov {
    fn default() -> Self {
        // Typical drone front camera.
        Self {
            horizontal: 78.0,
            vertical: 49.0,
        }
    }
}

/// Link to the demuxer track this stream comes from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DemuxLink {
    pub demuxer_id: u32,
    pub es_index: u32,
}

#[derive(Default)]
struct Attributes {
    video_type: VideoType,
    geometry: StreamGeometry,
    fov: Fov,
}

/// Metadata for one video elementary stream.
///
/// Geometry and field of view stay fixed until the demuxer reports new
/// parameters. The descriptor owns at most one decoder and an ordered list
/// of frame filters.
pub struct StreamDescriptor {
    id: u32,
    es_type: ElementaryStreamType,
    demux: Option<DemuxLink>,
    attributes: RwLock<Attributes>,
    decoder: Mutex<Option<Arc<dyn Decoder>>>,
    filters: Mutex<Vec<(FilterId, Arc<dyn FrameFilter>)>>,
}

static NEXT_FILTER_ID: AtomicU64 = AtomicU64::new(1);

impl StreamDescriptor {
    pub fn new(id: u32, es_type: ElementaryStreamType) -> Arc<Self> {
        Arc::new(Self::build(id, es_type, None))
    }

    pub fn with_demux(id: u32, es_type: ElementaryStreamType, demux: DemuxLink) -> Arc<Self> {
        Arc::new(Self::build(id, es_type, Some(demux)))
    }

    fn build(id: u32, es_type: ElementaryStreamType, demux: Option<DemuxLink>) -> Self {
        Self {
            id,
            es_type,
            demux,
            attributes: RwLock::new(Attributes::default()),
            decoder: Mutex::new(None),
            filters: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn es_type(&self) -> ElementaryStreamType {
        self.es_type
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    pub fn demux(&self) -> Option<DemuxLink> {
        self.demux
    }

    pub fn video_type(&self) -> VideoType {
        self.attributes.read().unwrap_or_else(PoisonError::into_inner).video_type
    }

    pub fn set_video_type(&self, video_type: VideoType) {
        self.attributes.write().unwrap_or_else(PoisonError::into_inner).video_type = video_type;
    }

    pub fn geometry(&self) -> StreamGeometry {
        self.attributes.read().unwrap_or_else(PoisonError::into_inner).geometry
    }

    /// Replaces the picture geometry.
    ///
    /// The crop must leave a non-negative picture: cropped dimensions never
    /// exceed raw dimensions.
    pub fn set_geometry(&self, geometry: StreamGeometry) -> Result<(), MediaError> {
        let crop_x = u64::from(geometry.crop.left) + u64::from(geometry.crop.right);
        let crop_y = u64::from(geometry.crop.top) + u64::from(geometry.crop.bottom);
        if crop_x > u64::from(geometry.width) || crop_y > u64::from(geometry.height) {
            return Err(MediaError::CropOutOfBounds {
                width: geometry.width,
                height: geometry.height,
                crop_x: u32::try_from(crop_x).unwrap_or(u32::MAX),
                crop_y: u32::try_from(crop_y).unwrap_or(u32::MAX),
            });
        }

        self.attributes.write().unwrap_or_else(PoisonError::into_inner).geometry = geometry;
        Ok(())
    }

    pub fn fov(&self) -> Fov {
        self.attributes.read().unwrap_or_else(PoisonError::into_inner).fov
    }

    pub fn set_fov(&self, fov: Fov) {
        self.attributes.write().unwrap_or_else(PoisonError::into_inner).fov = fov;
    }

    // ── decoder ───────────────────────────────────────────────────────────

    /// Creates this stream's decoder through `factory`.
    ///
    /// Fails if a decoder already exists; at most one is alive at a time.
    pub fn enable_decoder(
        self: &Arc<Self>,
        factory: &dyn DecoderFactory,
    ) -> Result<Arc<dyn Decoder>, MediaError> {
        if self.decoder().is_some() {
            return Err(MediaError::DecoderAlreadyEnabled(self.id));
        }

        // The factory may call back into this stream, so it runs unlocked.
        let decoder = factory.create(self)?;

        let mut slot = self.decoder.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(MediaError::DecoderAlreadyEnabled(self.id));
        }
        *slot = Some(Arc::clone(&decoder));
        log::debug!("stream {}: decoder enabled", self.id);
        Ok(decoder)
    }

    /// Drops this stream's reference to its decoder.
    pub fn disable_decoder(&self) -> Result<(), MediaError> {
        let mut slot = self.decoder.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_none() {
            return Err(MediaError::NoDecoder(self.id));
        }
        log::debug!("stream {}: decoder disabled", self.id);
        Ok(())
    }

    pub fn decoder(&self) -> Option<Arc<dyn Decoder>> {
        self.decoder.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    // ── frame filters ─────────────────────────────────────────────────────

    /// Appends a filter; filters are invoked in attach order.
    pub fn add_frame_filter(&self, filter: Arc<dyn FrameFilter>) -> FilterId {
        let id = FilterId(NEXT_FILTER_ID.fetch_add(1, Ordering::Relaxed));
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, filter));
        id
    }

    /// Detaches a filter previously attached to this stream.
    pub fn remove_frame_filter(&self, id: FilterId) -> Result<Arc<dyn FrameFilter>, MediaError> {
        let mut filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
        let index = filters
            .iter()
            .position(|(fid, _)| *fid == id)
            .ok_or(MediaError::FilterNotOwned(id))?;
        Ok(filters.remove(index).1)
    }

    pub fn filter_count(&self) -> usize {
        self.filters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Hands a decoded frame to every attached filter.
    ///
    /// Called by the decoder before publishing to its output queues.
    pub fn dispatch_to_filters(&self, frame: &FrameBuffer) {
        // Snapshot so a filter may detach itself without deadlocking.
        let filters: Vec<Arc<dyn FrameFilter>> = self
            .filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();

        for filter in filters {
            filter.on_frame(self.id, frame);
        }
    }
}

impl fmt::Debug for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDescriptor")
            .field("id", &self.id)
            .field("es_type", &self.es_type)
            .field("demux", &self.demux)
            .field("geometry", &self.geometry())
            .field("fov", &self.fov())
            .field("has_decoder", &self.decoder().is_some())
            .field("filters", &self.filter_count())
            .finish()
    }
}
