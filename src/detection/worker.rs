use super::engine::InferenceEngine;
use super::nms::non_max_suppression;
use super::parser::parse_output;
use super::preprocess::preprocess;
use super::queue::DetectionCache;
use super::DetectionParams;
use crate::capture::join_with_timeout;
use crate::errors::StreamError;
use crate::types::{DetectionSet, Frame};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ERROR_LOG_EVERY: u64 = 30;

/// Run the full pipeline on one frame: preprocess, infer, decode, suppress.
pub fn detect_frame<E: InferenceEngine + ?Sized>(
    engine: &mut E,
    frame: &Frame,
    params: &DetectionParams,
) -> Result<DetectionSet, StreamError> {
    let input_size = engine.input_size();
    let input = preprocess(frame, input_size)?;
    let output = engine.infer(&input)?;
    let candidates = parse_output(
        &output,
        &params.thresholds,
        input_size,
        (frame.width, frame.height),
    )?;
    let detections =
        non_max_suppression(candidates, params.iou_threshold, params.max_detections);
    Ok(DetectionSet::new(frame.sequence, detections))
}

#[derive(Default)]
struct WorkerCounters {
    processed: AtomicU64,
    failures: AtomicU64,
}

/// Detection thread draining the bounded queue into the cache.
pub struct DetectionWorker {
    running: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DetectionWorker {
    pub fn spawn(
        mut engine: Box<dyn InferenceEngine>,
        frames: Receiver<Frame>,
        cache: DetectionCache,
        params: DetectionParams,
    ) -> Result<Self, StreamError> {
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(WorkerCounters::default());

        let thread_running = running.clone();
        let thread_counters = counters.clone();
        let handle = std::thread::Builder::new()
            .name("skycast-detection".to_string())
            .spawn(move || {
                while thread_running.load(Ordering::SeqCst) {
                    let frame = match frames.recv_timeout(POLL_INTERVAL) {
                        Ok(frame) => frame,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };

                    match detect_frame(&mut engine, &frame, &params) {
                        Ok(set) => {
                            cache.publish(set);
                            thread_counters.processed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            let failures =
                                thread_counters.failures.fetch_add(1, Ordering::Relaxed) + 1;
                            if failures == 1 || failures % ERROR_LOG_EVERY == 0 {
                                log::error!(
                                    "Object detection error on frame {} ({} failures): {}",
                                    frame.sequence,
                                    failures,
                                    e
                                );
                            }
                        }
                    }
                }
                log::debug!("Detection worker exiting");
            })?;

        Ok(Self {
            running,
            counters,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the thread, waiting at most `join_timeout`.
    pub fn stop(&self, join_timeout: Duration) -> Result<(), StreamError> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        match handle {
            Some(handle) => join_with_timeout(handle, join_timeout, "detection worker"),
            None => Ok(()),
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop(Duration::from_millis(100));
        }
    }
}
