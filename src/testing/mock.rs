//! In-process peer sessions for tests and demos without a network stack.

use crate::errors::StreamError;
use crate::media::VideoFrame;
use crate::types::DetectionSet;
use crate::webrtc::{
    ConnectionState, IceCandidate, IceState, PeerSession, SessionDescription, SessionEvents,
    SessionFactory, TransportStats,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Failure injected into `set_remote_description`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Race,
    Transport,
}

#[derive(Default)]
struct MockState {
    offers: u32,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    answer_failure: Option<MockFailure>,
    reject_candidates: bool,
    ice_state: Option<IceState>,
    stats: TransportStats,
    frames: u64,
    last_detections: Option<Arc<DetectionSet>>,
    closed: bool,
}

/// A session that records what it is asked to do.
pub struct MockPeerSession {
    events: SessionEvents,
    state: Mutex<MockState>,
}

impl MockPeerSession {
    pub fn new(events: SessionEvents) -> Self {
        Self {
            events,
            state: Mutex::new(MockState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    /// Report a connection state change as the transport would.
    pub fn emit_state(&self, state: ConnectionState) {
        self.events.state(state);
    }

    pub fn emit_local_candidate(&self, candidate: IceCandidate) {
        self.events.local_candidate(candidate);
    }

    pub fn fail_answers_with(&self, failure: Option<MockFailure>) {
        self.lock().answer_failure = failure;
    }

    pub fn reject_candidates(&self, reject: bool) {
        self.lock().reject_candidates = reject;
    }

    pub fn set_ice_state(&self, state: IceState) {
        self.lock().ice_state = Some(state);
    }

    pub fn set_stats(&self, stats: TransportStats) {
        self.lock().stats = stats;
    }

    pub fn offers_created(&self) -> u32 {
        self.lock().offers
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.lock().applied.clone()
    }

    pub fn frames_written(&self) -> u64 {
        self.lock().frames
    }

    /// The detection set carried by the last written frame.
    pub fn last_detections(&self) -> Option<Arc<DetectionSet>> {
        self.lock().last_detections.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait::async_trait]
impl PeerSession for MockPeerSession {
    async fn create_offer(&self) -> Result<SessionDescription, StreamError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StreamError::Transport("session is closed".to_string()));
        }
        state.offers += 1;
        let offer = SessionDescription::offer(format!(
            "v=0\r\no=- {} {} IN IP4 0.0.0.0\r\n",
            self.events.generation(),
            state.offers
        ));
        state.local = Some(offer.clone());
        state.remote = None;
        Ok(offer)
    }

    async fn wait_for_gathering(&self, _timeout: Duration) -> bool {
        true
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.lock().local.clone()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), StreamError> {
        let mut state = self.lock();
        match state.answer_failure {
            Some(MockFailure::Race) => {
                return Err(StreamError::SignalingRace("signaling state is stable".to_string()))
            }
            Some(MockFailure::Transport) => {
                return Err(StreamError::Transport("remote description rejected".to_string()))
            }
            None => {}
        }
        if state.local.is_none() || state.remote.is_some() {
            return Err(StreamError::SignalingRace("no offer outstanding".to_string()));
        }
        state.remote = Some(desc);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.lock().remote.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), StreamError> {
        let mut state = self.lock();
        if state.reject_candidates {
            return Err(StreamError::MalformedCandidate(candidate.candidate));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn ice_state(&self) -> IceState {
        let state = self.lock();
        match state.ice_state {
            Some(ice) => ice,
            None if state.closed => IceState::Closed,
            None => IceState::Connected,
        }
    }

    async fn stats(&self) -> TransportStats {
        self.lock().stats
    }

    async fn write_frame(&self, frame: &VideoFrame) -> Result<(), StreamError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StreamError::Transport("session is closed".to_string()));
        }
        state.frames += 1;
        state.last_detections = Some(frame.detections.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        let was_open = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if was_open {
            self.events.state(ConnectionState::Closed);
        }
        Ok(())
    }
}

/// Hands out [`MockPeerSession`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockSessionFactory {
    sessions: Mutex<Vec<Arc<MockPeerSession>>>,
    failures: AtomicU32,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `create` fail.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.sessions().len()
    }

    pub fn sessions(&self) -> Vec<Arc<MockPeerSession>> {
        match self.sessions.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn latest(&self) -> Option<Arc<MockPeerSession>> {
        self.sessions().last().cloned()
    }
}

#[async_trait::async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn PeerSession>, StreamError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StreamError::Transport("peer connection setup failed".to_string()));
        }

        let session = Arc::new(MockPeerSession::new(events));
        match self.sessions.lock() {
            Ok(mut guard) => guard.push(session.clone()),
            Err(poisoned) => poisoned.into_inner().push(session.clone()),
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_factory_failures_are_consumed() {
        let factory = MockSessionFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        factory.fail_next(2);

        assert!(factory.create(SessionEvents::new(1, tx.clone())).await.is_err());
        assert!(factory.create(SessionEvents::new(2, tx.clone())).await.is_err());
        assert!(factory.create(SessionEvents::new(3, tx)).await.is_ok());
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.latest().unwrap().generation(), 3);
    }

    #[tokio::test]
    async fn test_answer_requires_offer() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = MockPeerSession::new(SessionEvents::new(1, tx));
        assert!(matches!(
            session.set_remote_description(SessionDescription::answer("v=0")).await,
            Err(StreamError::SignalingRace(_))
        ));

        session.create_offer().await.unwrap();
        session
            .set_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap();
        assert!(session.has_remote_description().await);
    }

    #[tokio::test]
    async fn test_close_reports_closed_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = MockPeerSession::new(SessionEvents::new(4, tx));
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(rx.recv().await.unwrap().generation(), 4);
        assert!(rx.try_recv().is_err());
        assert_eq!(session.ice_state().await, IceState::Closed);
    }
}
