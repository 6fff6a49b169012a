use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use thiserror::Error;

use super::FrameBuffer;

/// Identity of one hand-off queue, used to unregister it from a decoder.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Consumer-side failure other than "no frame available yet".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("frame queue {0:?} producer disconnected")]
    Disconnected(QueueId),
}

/// Producer-side failure; the rejected frame is handed back.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("frame queue is full")]
    Full(FrameBuffer),
    #[error("frame queue consumer is gone")]
    Closed(FrameBuffer),
}

impl PushError {
    pub fn into_frame(self) -> FrameBuffer {
        match self {
            PushError::Full(frame) | PushError::Closed(frame) => frame,
        }
    }
}

/// Creates a bounded hand-off queue for decoded frames.
///
/// The producer's reference moves into the queue on `push` and becomes the
/// consumer's reference on `try_pop`; no extra locking is required around it.
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let id = QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed));
    let (tx, rx) = bounded(capacity.max(1));
    (FrameSender { id, tx }, FrameReceiver { id, rx })
}

/// Producer end (decoder side).
#[derive(Debug, Clone)]
pub struct FrameSender {
    id: QueueId,
    tx: Sender<FrameBuffer>,
}

impl FrameSender {
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Enqueues without blocking.
    pub fn push(&self, frame: FrameBuffer) -> Result<(), PushError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(f) => PushError::Full(f),
            TrySendError::Disconnected(f) => PushError::Closed(f),
        })
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Consumer end (renderer side).
#[derive(Debug)]
pub struct FrameReceiver {
    id: QueueId,
    rx: Receiver<FrameBuffer>,
}

impl FrameReceiver {
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Pops the oldest frame without ever suspending.
    ///
    /// `Ok(None)` means the queue is momentarily empty. Frames still queued
    /// when the producer disconnects are drained before the error surfaces.
    pub fn try_pop(&self) -> Result<Option<FrameBuffer>, QueueError> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(QueueError::Disconnected(self.id)),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{ColorFormat, FrameInfo, FrameTiming, OverlayMetadata, SampleAspect};

    fn frame(sequence: u64) -> FrameBuffer {
        FrameBuffer::new(
            0,
            vec![0; 4],
            FrameInfo {
                color_format: ColorFormat::Opaque,
                planes: Vec::new(),
                width: 1,
                height: 1,
                sample_aspect: SampleAspect::SQUARE,
                timing: FrameTiming::default(),
                metadata: OverlayMetadata::default(),
                sequence,
            },
        )
    }

    #[test]
    fn pop_on_empty_queue_returns_none() {
        let (_tx, rx) = frame_queue(2);
        assert_eq!(rx.try_pop().map(|f| f.is_none()), Ok(true));
    }

    #[test]
    fn frames_come_out_in_fifo_order() {
        let (tx, rx) = frame_queue(4);
        for seq in 1..=3 {
            tx.push(frame(seq)).unwrap();
        }
        let popped: Vec<u64> = std::iter::from_fn(|| rx.try_pop().unwrap())
            .map(|f| f.sequence())
            .collect();
        assert_eq!(popped, vec![1, 2, 3]);
    }

    #[test]
    fn full_queue_hands_frame_back() {
        let (tx, _rx) = frame_queue(1);
        tx.push(frame(1)).unwrap();
        let rejected = tx.push(frame(2)).unwrap_err().into_frame();
        assert_eq!(rejected.sequence(), 2);
    }

    #[test]
    fn disconnect_surfaces_after_drain() {
        let (tx, rx) = frame_queue(2);
        tx.push(frame(1)).unwrap();
        drop(tx);
        assert_eq!(rx.try_pop().unwrap().map(|f| f.sequence()), Some(1));
        assert_eq!(rx.try_pop().unwrap_err(), QueueError::Disconnected(rx.id()));
    }

    #[test]
    fn reference_moves_from_producer_to_consumer() {
        let (tx, rx) = frame_queue(1);
        tx.push(frame(1)).unwrap();
        let popped = rx.try_pop().unwrap().unwrap();
        assert_eq!(popped.ref_count(), 1);
    }

    #[test]
    fn queue_ids_are_unique() {
        let (a, _) = frame_queue(1);
        let (b, _) = frame_queue(1);
        assert_ne!(a.id(), b.id());
    }
}
