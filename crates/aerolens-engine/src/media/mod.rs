//! Media model shared by decoder and renderer.
//!
//! - `StreamDescriptor`: per-stream geometry, field of view, decoder linkage
//!   and attached frame filters
//! - `FrameBuffer`: one decoded picture, shared-ownership across threads
//! - `frame_queue`: the non-blocking hand-off channel between a decoder and
//!   one consumer
//! - `Decoder`: the contract the render pipeline expects from a decoder

mod decoder;
mod error;
mod filter;
mod frame;
mod queue;
mod stream;

pub use decoder::{Decoder, DecoderFactory, OutputQueues};
pub use error::MediaError;
pub use filter::{FilterId, FrameFilter};
pub use frame::{
    ColorFormat, FrameBuffer, FrameInfo, FrameRecycler, FrameTiming, GeoPoint, Orientation,
    OverlayMetadata, Plane, SampleAspect,
};
pub use queue::{frame_queue, FrameReceiver, FrameSender, PushError, QueueError, QueueId};
pub use stream::{
    Crop, DemuxLink, ElementaryStreamType, Fov, MediaKind, StreamDescriptor, StreamGeometry,
    VideoType,
};
