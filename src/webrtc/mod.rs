//! Peer session abstraction
//!
//! The signaling client, lifecycle manager and media pump only see the
//! [`PeerSession`] trait. The webrtc-rs implementation lives behind the
//! `webrtc` feature; tests drive the same code with in-process doubles.
//!
//! Sessions never call back into the agent. They push [`TransportEvent`]s
//! tagged with the generation they were created for, and the lifecycle
//! manager drops events from generations it has already torn down.

#[cfg(feature = "webrtc")]
pub mod peer;
#[cfg(feature = "webrtc")]
pub mod streaming;

#[cfg(feature = "webrtc")]
pub use peer::{RtcPeerSession, RtcSessionFactory};
#[cfg(feature = "webrtc")]
pub use streaming::{EncoderSettings, H264Sink};

use crate::errors::StreamError;
use crate::media::VideoFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Peer connection state as seen by the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States that can only be left by rebuilding the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// ICE agent connectivity, polled by the keepalive check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in its browser JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// An empty candidate string marks the end of candidates.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Cumulative outbound counters of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub packets_lost: u64,
}

/// Something that happened inside a session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectionState {
        generation: u64,
        state: ConnectionState,
    },
    LocalCandidate {
        generation: u64,
        candidate: IceCandidate,
    },
}

impl TransportEvent {
    pub fn generation(&self) -> u64 {
        match self {
            TransportEvent::ConnectionState { generation, .. }
            | TransportEvent::LocalCandidate { generation, .. } => *generation,
        }
    }
}

/// Event sink handed to a session when it is built.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl SessionEvents {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self, state: ConnectionState) {
        let _ = self.tx.send(TransportEvent::ConnectionState {
            generation: self.generation,
            state,
        });
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        let _ = self.tx.send(TransportEvent::LocalCandidate {
            generation: self.generation,
            candidate,
        });
    }
}

/// One peer connection with a single outgoing video track.
#[async_trait::async_trait]
pub trait PeerSession: Send + Sync {
    /// Create an offer and install it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, StreamError>;

    /// Wait for ICE gathering to finish. Returns `false` on timeout.
    async fn wait_for_gathering(&self, timeout: Duration) -> bool;

    /// Current local description, including candidates gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Apply the remote answer. Fails with [`StreamError::SignalingRace`]
    /// when no offer is outstanding.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), StreamError>;

    async fn has_remote_description(&self) -> bool;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), StreamError>;

    async fn ice_state(&self) -> IceState;

    async fn stats(&self) -> TransportStats;

    /// Encode and send one produced frame.
    async fn write_frame(&self, frame: &VideoFrame) -> Result<(), StreamError>;

    async fn close(&self) -> Result<(), StreamError>;
}

/// Builds a fresh session for every (re)negotiation.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn PeerSession>, StreamError>;
}
