use super::FrameProducer;
use crate::webrtc::PeerSession;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

/// The session currently carrying video, if any.
///
/// Written by the lifecycle manager, read by the pump. Readers clone the
/// `Arc` out so no lock is held across an await.
#[derive(Clone, Default)]
pub struct SessionSlot {
    inner: Arc<RwLock<Option<Arc<dyn PeerSession>>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<dyn PeerSession>> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Install a session, returning the previous one.
    pub fn replace(&self, session: Option<Arc<dyn PeerSession>>) -> Option<Arc<dyn PeerSession>> {
        match self.inner.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, session),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), session),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_none()
    }
}

/// Forwards produced frames into the current session.
pub struct MediaPump {
    producer: FrameProducer,
    slot: SessionSlot,
    written: u64,
    write_errors: u64,
}

impl MediaPump {
    pub fn new(producer: FrameProducer, slot: SessionSlot) -> Self {
        Self {
            producer,
            slot,
            written: 0,
            write_errors: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }

    /// Produce one frame and hand it to the session. Returns `true` if a
    /// session accepted it.
    pub async fn pump_once(&mut self) -> bool {
        let frame = self.producer.recv().await;
        let Some(session) = self.slot.current() else {
            return false;
        };

        match session.write_frame(&frame).await {
            Ok(()) => {
                self.written += 1;
                true
            }
            Err(e) => {
                self.write_errors += 1;
                log::debug!("Video write failed for frame {}: {}", frame.pts, e);
                false
            }
        }
    }

    /// Pump until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.pump_once() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        log::debug!(
            "Media pump stopped after {} frames ({} write errors)",
            self.written,
            self.write_errors
        );
        self
    }
}
