//! Camera capture thread with a single "latest frame" slot
//!
//! [`CaptureSource`] owns a backend on a dedicated thread. Every tick the
//! thread replaces the slot contents; readers copy the frame out.

use crate::errors::StreamError;
use crate::platform::{BackendOpener, CaptureBackend, CaptureSettings, RawFrame};
use crate::timing::StreamClock;
use crate::types::{Frame, PixelLayout};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);
const READ_ERROR_LOG_EVERY: u64 = 30;
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can hand out the most recent frame.
pub trait FrameSource: Send + Sync {
    fn latest_frame(&self) -> Option<Frame>;
}

/// Counters for a running capture source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub read_errors: u64,
    pub backend: String,
}

struct Shared {
    latest: Mutex<Option<Frame>>,
    running: AtomicBool,
    frames_captured: AtomicU64,
    read_errors: AtomicU64,
    backend: Mutex<String>,
}

pub struct CaptureSource {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    settings: CaptureSettings,
}

impl CaptureSource {
    /// Spawn the capture thread and wait until a backend has opened.
    ///
    /// Openers are tried in order; unsupported ones are skipped.
    pub fn start(
        openers: Vec<Arc<dyn BackendOpener>>,
        settings: CaptureSettings,
    ) -> Result<Self, StreamError> {
        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            running: AtomicBool::new(true),
            frames_captured: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            backend: Mutex::new(String::new()),
        });

        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<String, String>>(1);
        let thread_shared = shared.clone();
        let thread_settings = settings.clone();

        let handle = std::thread::Builder::new()
            .name("skycast-capture".to_string())
            .spawn(move || {
                let backend = match open_first(&openers, &thread_settings) {
                    Ok(backend) => backend,
                    Err(reason) => {
                        let _ = open_tx.send(Err(reason));
                        return;
                    }
                };
                let _ = open_tx.send(Ok(backend.name().to_string()));
                capture_loop(thread_shared, backend, thread_settings);
            })?;

        let opened = match open_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(format!("backend did not open within {:?}", OPEN_TIMEOUT)),
        };

        match opened {
            Ok(name) => {
                log::info!(
                    "Capture started on {} at {}x{}@{}",
                    name,
                    settings.width,
                    settings.height,
                    settings.fps
                );
                if let Ok(mut backend) = shared.backend.lock() {
                    *backend = name;
                }
                Ok(Self {
                    shared,
                    thread: Mutex::new(Some(handle)),
                    settings,
                })
            }
            Err(reason) => {
                shared.running.store(false, Ordering::SeqCst);
                if handle.is_finished() {
                    let _ = handle.join();
                }
                Err(StreamError::CameraUnavailable {
                    attempts: 1,
                    reason,
                })
            }
        }
    }

    /// Camera setup with retries. Exhausting all attempts is fatal.
    pub async fn start_with_retries(
        openers: Vec<Arc<dyn BackendOpener>>,
        settings: CaptureSettings,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, StreamError> {
        let attempts = attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let openers = openers.clone();
            let settings = settings.clone();
            let result = tokio::task::spawn_blocking(move || Self::start(openers, settings))
                .await
                .map_err(|e| StreamError::Capture(format!("capture setup task failed: {}", e)))?;

            match result {
                Ok(source) => return Ok(source),
                Err(StreamError::CameraUnavailable { reason, .. }) => {
                    log::warn!(
                        "Camera setup attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        reason
                    );
                    last_reason = reason;
                }
                Err(other) => {
                    log::warn!("Camera setup attempt {}/{} failed: {}", attempt, attempts, other);
                    last_reason = other.to_string();
                }
            }

            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        log::error!("Camera unavailable after {} attempts", attempts);
        Err(StreamError::CameraUnavailable {
            attempts,
            reason: last_reason,
        })
    }

    /// Copy of the latest frame, `None` before the first frame arrives.
    pub fn get_frame(&self) -> Option<Frame> {
        self.shared.latest.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            read_errors: self.shared.read_errors.load(Ordering::Relaxed),
            backend: self
                .shared
                .backend
                .lock()
                .map(|b| b.clone())
                .unwrap_or_default(),
        }
    }

    /// Stop the capture thread, waiting at most `join_timeout`.
    ///
    /// The frame slot is cleared either way. A thread that misses the
    /// deadline is left detached and never joined again.
    pub fn stop(&self, join_timeout: Duration) -> Result<(), StreamError> {
        self.shared.running.store(false, Ordering::SeqCst);

        let handle = self.thread.lock().ok().and_then(|mut t| t.take());
        let result = match handle {
            Some(handle) => join_with_timeout(handle, join_timeout, "capture thread"),
            None => Ok(()),
        };

        if let Ok(mut slot) = self.shared.latest.lock() {
            *slot = None;
        }
        result
    }
}

impl FrameSource for CaptureSource {
    fn latest_frame(&self) -> Option<Frame> {
        self.get_frame()
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop(Duration::from_millis(100)) {
                log::warn!("Error stopping capture in drop: {}", e);
            }
        }
    }
}

/// Poll a thread handle until it finishes or the timeout passes.
pub(crate) fn join_with_timeout(
    handle: JoinHandle<()>,
    timeout: Duration,
    component: &'static str,
) -> Result<(), StreamError> {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            if handle.join().is_err() {
                log::warn!("{} panicked", component);
            }
            return Ok(());
        }
        if start.elapsed() >= timeout {
            log::warn!("{} did not stop within {:?}, detaching", component, timeout);
            return Err(StreamError::JoinTimeout { component, timeout });
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn open_first(
    openers: &[Arc<dyn BackendOpener>],
    settings: &CaptureSettings,
) -> Result<Box<dyn CaptureBackend>, String> {
    let mut reasons = Vec::new();
    for opener in openers {
        if !opener.is_supported() {
            log::debug!("Skipping unsupported backend {}", opener.name());
            continue;
        }
        match opener.open(settings) {
            Ok(backend) => return Ok(backend),
            Err(e) => {
                log::warn!("Backend {} failed to open: {}", opener.name(), e);
                reasons.push(format!("{}: {}", opener.name(), e));
            }
        }
    }
    if reasons.is_empty() {
        Err("no supported backend".to_string())
    } else {
        Err(reasons.join("; "))
    }
}

fn capture_loop(shared: Arc<Shared>, mut backend: Box<dyn CaptureBackend>, settings: CaptureSettings) {
    let clock = StreamClock::new();
    let frame_interval = Duration::from_nanos(1_000_000_000 / settings.fps.max(1) as u64);
    let self_paced = backend.paces_itself();
    let mut sequence = 0u64;

    while shared.running.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        match backend.read_frame() {
            Ok(raw) => match normalize(raw) {
                Ok(mut frame) => {
                    sequence += 1;
                    frame.sequence = sequence;
                    frame.timestamp_us = clock.elapsed_us();
                    if let Ok(mut slot) = shared.latest.lock() {
                        *slot = Some(frame);
                    }
                    shared.frames_captured.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => record_read_error(&shared, &e),
            },
            Err(e) => {
                record_read_error(&shared, &e);
                std::thread::sleep(READ_ERROR_BACKOFF);
                continue;
            }
        }

        if !self_paced {
            let elapsed = tick_start.elapsed();
            if elapsed < frame_interval {
                std::thread::sleep(frame_interval - elapsed);
            }
        }
    }

    backend.release();
    log::info!("Capture thread exiting after {} frames", sequence);
}

fn record_read_error(shared: &Shared, error: &StreamError) {
    let count = shared.read_errors.fetch_add(1, Ordering::Relaxed) + 1;
    if count == 1 || count % READ_ERROR_LOG_EVERY == 0 {
        log::warn!("Camera read failed ({} so far): {}", count, error);
    }
}

/// Convert a backend frame to the canonical RGB layout.
fn normalize(raw: RawFrame) -> Result<Frame, StreamError> {
    let mut frame = Frame::new(0, raw.width, raw.height, raw.data);
    if !frame.is_well_formed() {
        return Err(StreamError::Capture(format!(
            "frame of {} bytes does not match {}x{}",
            frame.data.len(),
            raw.width,
            raw.height
        )));
    }
    if raw.layout == PixelLayout::Bgr {
        frame.swap_red_blue();
    }
    Ok(frame)
}
