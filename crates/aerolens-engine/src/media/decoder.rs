use std::sync::{Arc, Mutex, PoisonError};

use super::{frame_queue, FrameBuffer, FrameReceiver, FrameSender, MediaError, PushError, QueueId, StreamDescriptor};

/// Contract the render pipeline expects from a video decoder.
///
/// Decoding itself happens elsewhere; this trait only covers output
/// plumbing. Implementations are shared across threads.
pub trait Decoder: Send + Sync {
    /// Registers a new hand-off queue and returns its consumer end.
    fn add_output_queue(&self) -> anyhow::Result<FrameReceiver>;

    /// Unregisters a queue previously returned by `add_output_queue`.
    fn remove_output_queue(&self, queue: &FrameReceiver) -> anyhow::Result<()>;

    /// Stream this decoder produces frames for, if it is still alive.
    fn stream(&self) -> Option<Arc<StreamDescriptor>>;
}

/// Creates decoders on behalf of `StreamDescriptor::enable_decoder`.
pub trait DecoderFactory {
    fn create(&self, stream: &Arc<StreamDescriptor>) -> anyhow::Result<Arc<dyn Decoder>>;
}

/// Fan-out helper for decoders serving several consumers.
///
/// Each published frame is cloned into every registered queue. A queue that
/// is full drops the frame it was offered; capacity is the decoder's call.
#[derive(Debug)]
pub struct OutputQueues {
    capacity: usize,
    senders: Mutex<Vec<FrameSender>>,
}

impl OutputQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self) -> FrameReceiver {
        let (tx, rx) = frame_queue(self.capacity);
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn remove(&self, id: QueueId) -> Result<(), MediaError> {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let before = senders.len();
        senders.retain(|tx| tx.id() != id);
        if senders.len() == before {
            return Err(MediaError::UnknownQueue(id));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offers `frame` to every queue and returns how many accepted it.
    ///
    /// Queues whose consumer went away are pruned.
    pub fn publish(&self, frame: &FrameBuffer) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;

        senders.retain(|tx| match tx.push(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(PushError::Full(_)) => {
                log::trace!("output queue {:?} full; frame {} dropped", tx.id(), frame.sequence());
                true
            }
            Err(PushError::Closed(_)) => {
                log::debug!("output queue {:?} closed by consumer", tx.id());
                false
            }
        });

        delivered
    }
}
