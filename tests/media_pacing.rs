//! Frame pacing of the media path on a paused clock.

use skycast::capture::FrameSource;
use skycast::detection::{detection_queue, DetectionCache, DETECTION_QUEUE_CAPACITY};
use skycast::media::{FrameProducer, MediaPump, SessionSlot};
use skycast::testing::{synthetic_video_frame, MockPeerSession};
use skycast::webrtc::SessionEvents;
use skycast::Frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

struct Pattern;

impl FrameSource for Pattern {
    fn latest_frame(&self) -> Option<Frame> {
        Some(synthetic_video_frame(0, 32, 24))
    }
}

#[tokio::test(start_paused = true)]
async fn pump_holds_the_configured_rate() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let session = Arc::new(MockPeerSession::new(SessionEvents::new(1, tx)));
    let slot = SessionSlot::new();
    slot.replace(Some(session.clone()));

    let producer = FrameProducer::new(Arc::new(Pattern), None, DetectionCache::new(), 30, 3, (32, 24));
    let (stop_tx, stop_rx) = watch::channel(false);
    let pump = tokio::spawn(MediaPump::new(producer, slot).run(stop_rx));

    tokio::time::sleep(Duration::from_secs(2)).await;
    stop_tx.send(true).unwrap();
    let pump = pump.await.unwrap();

    let written = pump.written();
    assert!((48..=72).contains(&written), "wrote {} frames in 2s at 30 fps", written);
    assert_eq!(session.frames_written(), written);
    assert_eq!(pump.write_errors(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_detection_never_slows_video() {
    let (queue, _frames) = detection_queue(DETECTION_QUEUE_CAPACITY);
    let mut producer = FrameProducer::new(
        Arc::new(Pattern),
        Some(queue.clone()),
        DetectionCache::new(),
        30,
        3,
        (32, 24),
    );

    let start = tokio::time::Instant::now();
    for _ in 0..90 {
        producer.recv().await;
    }
    let elapsed = start.elapsed();

    assert!(elapsed <= Duration::from_millis(3100), "took {:?}", elapsed);
    assert_eq!(queue.len(), DETECTION_QUEUE_CAPACITY);
    assert_eq!(queue.dropped(), 30 - DETECTION_QUEUE_CAPACITY as u64);
}
