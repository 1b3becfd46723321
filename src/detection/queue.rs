use crate::types::{DetectionSet, Frame};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Frames waiting for the detection worker.
pub const DETECTION_QUEUE_CAPACITY: usize = 2;

/// Producer side of the bounded detection queue.
///
/// A full queue rejects the new frame instead of blocking; the frames already
/// queued stay where they are.
#[derive(Clone)]
pub struct DetectionQueue {
    tx: Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

/// Create a queue and the receiver handed to the worker.
pub fn detection_queue(capacity: usize) -> (DetectionQueue, Receiver<Frame>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        DetectionQueue {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl DetectionQueue {
    /// Offer a frame. Returns `false` when it was dropped.
    pub fn try_enqueue(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    log::debug!("Detection queue full, {} frames dropped", dropped);
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(DETECTION_QUEUE_CAPACITY)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Single-slot holder of the most recent detection set.
///
/// The worker swaps a new `Arc` in; readers clone the `Arc` out and never
/// hold the lock while using it.
#[derive(Clone)]
pub struct DetectionCache {
    slot: Arc<RwLock<Arc<DetectionSet>>>,
    published: Arc<AtomicBool>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(RwLock::new(Arc::new(DetectionSet::empty()))),
            published: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn latest(&self) -> Arc<DetectionSet> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn publish(&self, set: DetectionSet) {
        let set = Arc::new(set);
        match self.slot.write() {
            Ok(mut guard) => *guard = set,
            Err(poisoned) => *poisoned.into_inner() = set,
        }
        self.published.store(true, Ordering::Release);
    }

    /// False until the worker has published its first result.
    pub fn has_result(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Detection, DetectionClass};

    #[test]
    fn test_full_queue_drops_newest() {
        let (queue, rx) = detection_queue(DETECTION_QUEUE_CAPACITY);
        assert!(queue.try_enqueue(Frame::new(1, 1, 1, vec![0; 3])));
        assert!(queue.try_enqueue(Frame::new(2, 1, 1, vec![0; 3])));
        assert!(!queue.try_enqueue(Frame::new(3, 1, 1, vec![0; 3])));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(rx.recv().unwrap().sequence, 1);
        assert_eq!(rx.recv().unwrap().sequence, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnected_queue_counts_drop() {
        let (queue, rx) = detection_queue(2);
        drop(rx);
        assert!(!queue.try_enqueue(Frame::new(1, 1, 1, vec![0; 3])));
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_cache_swaps_whole_set() {
        let cache = DetectionCache::new();
        assert!(cache.latest().is_empty());
        assert!(!cache.has_result());

        let held = cache.latest();
        cache.publish(DetectionSet::new(
            5,
            vec![Detection::new([0.0, 0.0, 1.0, 1.0], DetectionClass::SeaPerson, 0.8)],
        ));

        assert!(held.is_empty());
        assert!(cache.has_result());
        assert_eq!(cache.latest().frame_sequence, 5);
        assert_eq!(cache.latest().len(), 1);
    }
}
