//! Device output queues.
//!
//! Each queue is bounded and never blocks either side: a full queue drops its
//! oldest item to make room, and an empty queue reports "nothing available".
//! Once every producer handle is gone and the queue has drained, the consumer
//! sees a `StreamFault`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::error::StreamFault;

/// Default capacity for the frame and detection queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Create a named queue holding at most `capacity` items (minimum 1).
pub fn output_queue<T>(name: &str, capacity: usize) -> (QueueProducer<T>, OutputQueue<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let producer = QueueProducer {
        name: name.to_string(),
        tx,
        overflow: rx.clone(),
        dropped: dropped.clone(),
    };
    let queue = OutputQueue {
        name: name.to_string(),
        rx,
        dropped,
    };
    (producer, queue)
}

/// Producer side, held by the device.
pub struct QueueProducer<T> {
    name: String,
    tx: Sender<T>,
    // Used only to evict the oldest item when the queue is full.
    overflow: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> QueueProducer<T> {
    /// Enqueue `item`, evicting the oldest queued items if needed.
    pub fn send(&self, item: T) {
        let mut item = item;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.overflow.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    item = back;
                }
                // Unreachable while `overflow` keeps a receiver alive.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Consumer side, polled by the preview loop.
pub struct OutputQueue<T> {
    name: String,
    rx: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> OutputQueue<T> {
    /// Non-blocking poll. `Ok(None)` when nothing is ready.
    pub fn try_get(&self) -> Result<Option<T>, StreamFault> {
        match self.rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StreamFault {
                queue: self.name.clone(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Items evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
