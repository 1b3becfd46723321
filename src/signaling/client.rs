use super::bus::BusHandle;
use super::candidates::PendingCandidateBuffer;
use super::message::{CandidatePayload, Outbound, SdpPayload};
use crate::errors::StreamError;
use crate::webrtc::{IceCandidate, PeerSession, SessionDescription};
use std::time::Duration;

/// Offer/answer progress for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    AnswerApplied,
    Negotiated,
}

/// Drives SDP negotiation for one device. This side always offers.
#[derive(Debug)]
pub struct SignalingClient {
    device_id: String,
    gathering_timeout: Duration,
    trickle_local: bool,
    state: NegotiationState,
    pending: PendingCandidateBuffer,
}

impl SignalingClient {
    pub fn new(device_id: impl Into<String>, gathering_timeout: Duration, trickle_local: bool) -> Self {
        Self {
            device_id: device_id.into(),
            gathering_timeout,
            trickle_local,
            state: NegotiationState::Idle,
            pending: PendingCandidateBuffer::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// True when a message addressed to `device_id` is ours.
    pub fn accepts(&self, device_id: &str) -> bool {
        device_id == self.device_id
    }

    /// Back to `Idle` for a fresh session. Buffered candidates belong to the
    /// old one and are discarded.
    pub fn reset(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("Discarding {} buffered remote candidates", self.pending.len());
        }
        self.pending.clear();
        self.state = NegotiationState::Idle;
    }

    /// Create the offer, give ICE gathering a bounded head start, and send it.
    pub async fn begin(
        &mut self,
        session: &dyn PeerSession,
        bus: &BusHandle,
    ) -> Result<(), StreamError> {
        self.reset();
        let offer = session.create_offer().await?;

        if !session.wait_for_gathering(self.gathering_timeout).await {
            log::warn!(
                "ICE gathering did not finish within {:?}, sending partial offer",
                self.gathering_timeout
            );
        }

        let local = session.local_description().await.unwrap_or(offer);
        bus.send(&Outbound::WebrtcOffer(SdpPayload {
            device_id: self.device_id.clone(),
            sdp: local.sdp,
            sdp_type: "offer".to_string(),
        }))?;

        self.state = NegotiationState::OfferSent;
        log::info!("Sent WebRTC offer for {}", self.device_id);
        Ok(())
    }

    /// Apply the remote answer and flush any buffered candidates.
    ///
    /// Only a transport-level failure is returned; races and unexpected
    /// answers are logged and ignored.
    pub async fn on_answer(&mut self, session: &dyn PeerSession, sdp: String) -> Result<(), StreamError> {
        if self.state != NegotiationState::OfferSent {
            log::warn!(
                "Ignoring answer for {} without an outstanding offer ({:?})",
                self.device_id,
                self.state
            );
            return Ok(());
        }

        match session.set_remote_description(SessionDescription::answer(sdp)).await {
            Ok(()) => {}
            Err(StreamError::SignalingRace(reason)) => {
                log::warn!("Ignoring answer that raced the signaling state: {}", reason);
                return Ok(());
            }
            Err(e) => {
                return Err(StreamError::Transport(format!(
                    "failed to apply remote answer: {}",
                    e
                )));
            }
        }
        self.state = NegotiationState::AnswerApplied;

        let buffered = self.pending.drain();
        if !buffered.is_empty() {
            log::debug!("Applying {} buffered remote candidates", buffered.len());
        }
        for candidate in buffered {
            self.apply_candidate(session, candidate).await;
        }

        self.state = NegotiationState::Negotiated;
        log::info!("WebRTC negotiation complete for {}", self.device_id);
        Ok(())
    }

    /// Buffer a remote candidate until the answer is applied, then apply
    /// directly.
    pub async fn on_candidate(&mut self, session: &dyn PeerSession, candidate: IceCandidate) {
        if candidate.is_end_of_candidates() {
            log::debug!("Remote end of candidates");
            return;
        }

        if session.has_remote_description().await {
            self.apply_candidate(session, candidate).await;
        } else {
            self.pending.push(candidate);
        }
    }

    /// Trickle a candidate gathered after the offer went out.
    pub fn on_local_candidate(&self, bus: &BusHandle, candidate: IceCandidate) {
        if !self.trickle_local || self.state == NegotiationState::Idle {
            return;
        }
        let message = Outbound::WebrtcIceCandidate(CandidatePayload {
            device_id: self.device_id.clone(),
            candidate,
        });
        if let Err(e) = bus.send(&message) {
            log::debug!("Could not trickle local candidate: {}", e);
        }
    }

    async fn apply_candidate(&self, session: &dyn PeerSession, candidate: IceCandidate) {
        if let Err(e) = session.add_ice_candidate(candidate).await {
            log::warn!("Dropping remote ICE candidate: {}", e);
        }
    }
}
