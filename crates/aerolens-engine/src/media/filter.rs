use super::FrameBuffer;

/// Handle returned when a filter is attached to a stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FilterId(pub(crate) u64);

/// Observer that receives every decoded frame of a stream, independently of
/// rendering.
///
/// Filters run on the decoder thread and must not block. Keeping a clone of
/// the frame extends its lifetime; the renderer is unaffected.
pub trait FrameFilter: Send + Sync {
    fn on_frame(&self, stream_id: u32, frame: &FrameBuffer);
}

impl<F> FrameFilter for F
where
    F: Fn(u32, &FrameBuffer) + Send + Sync,
{
    fn on_frame(&self, stream_id: u32, frame: &FrameBuffer) {
        self(stream_id, frame)
    }
}
