use super::VideoFrame;
use crate::capture::FrameSource;
use crate::detection::{DetectionCache, DetectionQueue};
use crate::overlay::{draw_detections, placeholder_frame};
use crate::timing::{FramePacer, TimeBase};
use std::sync::Arc;

/// Produces one overlaid frame per `1/fps`.
///
/// Every `stride`-th tick a copy of the camera frame is offered to the
/// detection queue. The offer never waits; a full queue just drops it.
pub struct FrameProducer {
    source: Arc<dyn FrameSource>,
    detection: Option<DetectionQueue>,
    cache: DetectionCache,
    pacer: FramePacer,
    time_base: TimeBase,
    stride: u32,
    overlay: bool,
    tick: u64,
    placeholder_size: (u32, u32),
}

impl FrameProducer {
    pub fn new(
        source: Arc<dyn FrameSource>,
        detection: Option<DetectionQueue>,
        cache: DetectionCache,
        fps: u32,
        stride: u32,
        placeholder_size: (u32, u32),
    ) -> Self {
        Self {
            source,
            detection,
            cache,
            pacer: FramePacer::new(fps),
            time_base: TimeBase::per_frame(fps),
            stride: stride.max(1),
            overlay: true,
            tick: 0,
            placeholder_size,
        }
    }

    pub fn with_overlay(mut self, overlay: bool) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Wait for the next slot and produce a frame.
    pub async fn recv(&mut self) -> VideoFrame {
        self.pacer.wait().await;

        let pts = self.tick;
        self.tick += 1;

        let (mut frame, placeholder) = match self.source.latest_frame() {
            Some(frame) => (frame, false),
            None => {
                let (w, h) = self.placeholder_size;
                (placeholder_frame(w, h, pts), true)
            }
        };

        if !placeholder && pts % self.stride as u64 == 0 {
            if let Some(queue) = &self.detection {
                queue.try_enqueue(frame.clone());
            }
        }

        let detections = self.cache.latest();
        if self.overlay && !placeholder {
            draw_detections(&mut frame, &detections);
        }

        VideoFrame {
            frame,
            pts,
            time_base: self.time_base,
            detections,
            placeholder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::detection_queue;
    use crate::types::{Detection, DetectionClass, DetectionSet, Frame};
    use std::sync::Mutex;

    struct Fixed(Mutex<Option<Frame>>);

    impl FrameSource for Fixed {
        fn latest_frame(&self) -> Option<Frame> {
            self.0.lock().unwrap().clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_when_no_frame() {
        let source = Arc::new(Fixed(Mutex::new(None)));
        let mut producer =
            FrameProducer::new(source, None, DetectionCache::new(), 30, 3, (64, 48));

        let out = producer.recv().await;
        assert!(out.placeholder);
        assert_eq!(out.frame.width, 64);
        assert_eq!(out.pts, 0);
        assert_eq!(out.time_base, TimeBase { num: 1, den: 30 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_nth_tick_is_enqueued() {
        let source = Arc::new(Fixed(Mutex::new(Some(Frame::black(8, 8)))));
        let (queue, rx) = detection_queue(16);
        let mut producer = FrameProducer::new(
            source,
            Some(queue.clone()),
            DetectionCache::new(),
            30,
            3,
            (8, 8),
        );

        for _ in 0..9 {
            producer.recv().await;
        }
        assert_eq!(rx.len(), 3);
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_does_not_block() {
        let source = Arc::new(Fixed(Mutex::new(Some(Frame::black(8, 8)))));
        let (queue, _rx) = detection_queue(2);
        let mut producer =
            FrameProducer::new(source, Some(queue.clone()), DetectionCache::new(), 30, 1, (8, 8));

        for _ in 0..10 {
            producer.recv().await;
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlays_cached_set() {
        let source = Arc::new(Fixed(Mutex::new(Some(Frame::black(64, 64)))));
        let cache = DetectionCache::new();
        cache.publish(DetectionSet::new(
            1,
            vec![Detection::new([10.0, 20.0, 40.0, 50.0], DetectionClass::EarthPerson, 0.9)],
        ));
        let mut producer = FrameProducer::new(source, None, cache, 30, 3, (64, 64));

        let out = producer.recv().await;
        assert_eq!(out.detections.len(), 1);
        let i = ((50 * 64 + 25) * 3) as usize;
        assert_eq!(&out.frame.data[i..i + 3], &[0, 255, 0]);
    }
}
