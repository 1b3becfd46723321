//! webrtc-rs implementation of [`PeerSession`]

use super::streaming::{EncoderSettings, H264Sink};
use super::{
    ConnectionState, IceCandidate, IceState, PeerSession, SdpType, SessionDescription,
    SessionEvents, SessionFactory, TransportStats,
};
use crate::config::SkycastConfig;
use crate::errors::StreamError;
use crate::media::VideoFrame;
use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use ::webrtc::api::APIBuilder;
use ::webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use ::webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::interceptor::registry::Registry;
use ::webrtc::media::Sample;
use ::webrtc::peer_connection::configuration::RTCConfiguration;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::peer_connection::signaling_state::RTCSignalingState;
use ::webrtc::peer_connection::RTCPeerConnection;
use ::webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use ::webrtc::stats::StatsReportType;
use ::webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use ::webrtc::track::track_local::TrackLocal;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

fn transport<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> StreamError {
    move |e| StreamError::Transport(format!("{}: {}", context, e))
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                ConnectionState::New
            }
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

impl From<RTCIceConnectionState> for IceState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => IceState::New,
            RTCIceConnectionState::Checking => IceState::Checking,
            RTCIceConnectionState::Connected => IceState::Connected,
            RTCIceConnectionState::Completed => IceState::Completed,
            RTCIceConnectionState::Disconnected => IceState::Disconnected,
            RTCIceConnectionState::Failed => IceState::Failed,
            RTCIceConnectionState::Closed => IceState::Closed,
        }
    }
}

/// One `RTCPeerConnection` with a send-only H.264 track.
pub struct RtcPeerSession {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    gathering: Mutex<Option<mpsc::Receiver<()>>>,
    sink: Mutex<H264Sink>,
    generation: u64,
}

impl RtcPeerSession {
    pub async fn new(
        ice_servers: &[String],
        encoder: EncoderSettings,
        events: SessionEvents,
    ) -> Result<Self, StreamError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(transport("failed to register codecs"))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(transport("failed to register interceptors"))?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(transport("failed to create peer connection"))?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            "skycast".to_owned(),
        ));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(transport("failed to add video track"))?;

        // RTCP has to be read for the interceptors to work.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let generation = events.generation();
        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            log::debug!("Peer connection {} state: {}", generation, state);
            state_events.state(state.into());
            Box::pin(async {})
        }));

        let candidate_events = events;
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => candidate_events.local_candidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    }),
                    Err(e) => log::debug!("Could not serialize local candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        log::info!("Created peer connection (generation {})", generation);
        Ok(Self {
            pc,
            track,
            gathering: Mutex::new(None),
            sink: Mutex::new(H264Sink::new(encoder)),
            generation,
        })
    }

    fn sink(&self) -> MutexGuard<'_, H264Sink> {
        match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn take_gathering(&self) -> Option<mpsc::Receiver<()>> {
        match self.gathering.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait::async_trait]
impl PeerSession for RtcPeerSession {
    async fn create_offer(&self) -> Result<SessionDescription, StreamError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(transport("failed to create offer"))?;

        let gathering = self.pc.gathering_complete_promise().await;
        match self.gathering.lock() {
            Ok(mut guard) => *guard = Some(gathering),
            Err(poisoned) => *poisoned.into_inner() = Some(gathering),
        }

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(transport("failed to set local description"))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn wait_for_gathering(&self, timeout: Duration) -> bool {
        let Some(mut gathering) = self.take_gathering() else {
            return true;
        };
        tokio::time::timeout(timeout, gathering.recv()).await.is_ok()
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Answer => SdpType::Answer,
            _ => SdpType::Offer,
        };
        Some(SessionDescription {
            sdp_type,
            sdp: desc.sdp,
        })
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), StreamError> {
        let state = self.pc.signaling_state();
        if state != RTCSignalingState::HaveLocalOffer {
            return Err(StreamError::SignalingRace(format!(
                "remote answer in signaling state {}",
                state
            )));
        }

        let answer = RTCSessionDescription::answer(desc.sdp)
            .map_err(transport("invalid SDP answer"))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(transport("failed to set remote description"))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), StreamError> {
        log::debug!("Adding remote ICE candidate: {}", candidate.candidate);
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| StreamError::MalformedCandidate(e.to_string()))
    }

    async fn ice_state(&self) -> IceState {
        self.pc.ice_connection_state().into()
    }

    async fn stats(&self) -> TransportStats {
        let report = self.pc.get_stats().await;
        let mut stats = TransportStats::default();
        for entry in report.reports.values() {
            match entry {
                StatsReportType::OutboundRTP(outbound) => {
                    stats.bytes_sent += outbound.bytes_sent;
                    stats.packets_sent += outbound.packets_sent;
                }
                StatsReportType::RemoteInboundRTP(remote) => {
                    stats.packets_lost += remote.packets_lost.max(0) as u64;
                }
                _ => {}
            }
        }
        stats
    }

    async fn write_frame(&self, frame: &VideoFrame) -> Result<(), StreamError> {
        if self.pc.connection_state() != RTCPeerConnectionState::Connected {
            return Ok(());
        }

        let sample = self.sink().encode(&frame.frame)?;
        self.track
            .write_sample(&Sample {
                data: sample.data,
                duration: frame.time_base.tick_duration(),
                ..Default::default()
            })
            .await
            .map_err(transport("failed to write video sample"))
    }

    async fn close(&self) -> Result<(), StreamError> {
        log::info!("Closing peer connection (generation {})", self.generation);
        self.pc
            .close()
            .await
            .map_err(transport("failed to close peer connection"))
    }
}

/// Builds [`RtcPeerSession`]s with the configured STUN servers and
/// encoder rate.
#[derive(Debug, Clone)]
pub struct RtcSessionFactory {
    ice_servers: Vec<String>,
    encoder: EncoderSettings,
}

impl RtcSessionFactory {
    pub fn new(ice_servers: Vec<String>, encoder: EncoderSettings) -> Self {
        Self {
            ice_servers,
            encoder,
        }
    }

    pub fn encoder(&self) -> EncoderSettings {
        self.encoder
    }
}

impl From<&SkycastConfig> for RtcSessionFactory {
    fn from(config: &SkycastConfig) -> Self {
        Self::new(
            config.signaling.stun_servers.clone(),
            EncoderSettings::from(config),
        )
    }
}

#[async_trait::async_trait]
impl SessionFactory for RtcSessionFactory {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn PeerSession>, StreamError> {
        let session = RtcPeerSession::new(&self.ice_servers, self.encoder, events).await?;
        Ok(Arc::new(session))
    }
}
