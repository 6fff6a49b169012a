use thiserror::Error;

use super::{FilterId, QueueId};

/// Errors reported by stream descriptors and decoder output plumbing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("crop {crop_x}x{crop_y} exceeds picture {width}x{height}")]
    CropOutOfBounds {
        width: u32,
        height: u32,
        crop_x: u32,
        crop_y: u32,
    },

    #[error("frame filter {0:?} is not attached to this stream")]
    FilterNotOwned(FilterId),

    #[error("a decoder is already enabled on stream {0}")]
    DecoderAlreadyEnabled(u32),

    #[error("no decoder is enabled on stream {0}")]
    NoDecoder(u32),

    #[error("output queue {0:?} is not registered on this decoder")]
    UnknownQueue(QueueId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
