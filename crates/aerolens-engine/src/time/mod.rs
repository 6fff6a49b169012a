//! Time subsystem.
//!
//! All timestamps exchanged between decoder and renderer are microseconds on a
//! single process-wide monotonic clock (`monotonic_us`), so decode and render
//! latencies can be computed by plain subtraction.
//!
//! Intended usage:
//! - one `FrameClock` per display loop
//! - call `tick()` once per presented frame and pass `FrameTime::timestamp_us`
//!   of the previous tick to `RenderPipeline::render`

mod frame_clock;

pub use frame_clock::{monotonic_us, FrameClock, FrameTime};
