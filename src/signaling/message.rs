//! Wire messages
//!
//! Every text frame on the bus is `{"event": "<name>", "data": {...}}`.
//! Outbound messages serialize through [`Outbound`]. Inbound frames are
//! decoded in two steps (envelope, then payload by event name) so that one
//! bad field is reported precisely instead of failing the whole frame.

use crate::errors::StreamError;
use crate::gps::GpsFix;
use crate::types::{ClassCounts, Detection, DetectionClass};
use crate::webrtc::IceCandidate;
use serde::{Deserialize, Serialize};

/// Signaling traffic for one device.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    Offer { device_id: String, sdp: String },
    Answer { device_id: String, sdp: String },
    IceCandidate { device_id: String, candidate: IceCandidate },
    Start { device_id: String },
    Stop { device_id: String },
}

impl SignalingMessage {
    pub fn device_id(&self) -> &str {
        match self {
            SignalingMessage::Offer { device_id, .. }
            | SignalingMessage::Answer { device_id, .. }
            | SignalingMessage::IceCandidate { device_id, .. }
            | SignalingMessage::Start { device_id }
            | SignalingMessage::Stop { device_id } => device_id,
        }
    }
}

/// Anything the agent can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Signaling(SignalingMessage),
    Capture(CaptureCommand),
    ReportConfig(ReportConfig),
    RequestSnapshot { device_id: String },
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDevice {
    pub device_id: String,
    pub device_name: String,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpPayload {
    pub device_id: String,
    pub sdp: String,
    #[serde(rename = "type", default)]
    pub sdp_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePayload {
    pub device_id: String,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedDetection {
    pub bbox: [f32; 4],
    pub class: DetectionClass,
    pub score: f32,
}

impl From<&Detection> for ReportedDetection {
    fn from(det: &Detection) -> Self {
        Self {
            bbox: det.bbox,
            class: det.class,
            score: det.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub device_id: String,
    pub timestamp: String,
    pub earth_person_count: usize,
    pub sea_person_count: usize,
    pub person_count: usize,
    pub detections: Vec<ReportedDetection>,
    pub gps: Option<GpsFix>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureCommand {
    pub device_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub device_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub gps_data: Option<GpsFix>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub earth_person: usize,
    pub sea_person: usize,
    pub total: usize,
    pub timestamp: String,
}

impl SnapshotCounts {
    pub fn new(counts: &ClassCounts, timestamp: String) -> Self {
        Self {
            earth_person: counts.earth_person,
            sea_person: counts.sea_person,
            total: counts.total(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    pub device_id: String,
    pub device_name: String,
    pub detection_data: SnapshotCounts,
    /// Base64 JPEG
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub device_id: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// Messages this side sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    RegisterDevice(RegisterDevice),
    WebrtcOffer(SdpPayload),
    WebrtcIceCandidate(CandidatePayload),
    DetectionResult(DetectionReport),
    CaptureResult(CaptureResult),
    DetectionSnapshot(DetectionSnapshot),
}

impl Outbound {
    pub fn event_name(&self) -> &'static str {
        match self {
            Outbound::RegisterDevice(_) => "register_device",
            Outbound::WebrtcOffer(_) => "webrtc_offer",
            Outbound::WebrtcIceCandidate(_) => "webrtc_ice_candidate",
            Outbound::DetectionResult(_) => "detection_result",
            Outbound::CaptureResult(_) => "capture_result",
            Outbound::DetectionSnapshot(_) => "detection_snapshot",
        }
    }

    pub fn to_text(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct DeviceOnly {
    device_id: String,
}

#[derive(Deserialize)]
struct RawCandidate {
    device_id: String,
    candidate: serde_json::Value,
}

fn payload<T: serde::de::DeserializeOwned>(
    event: &str,
    data: serde_json::Value,
) -> Result<T, StreamError> {
    serde_json::from_value(data)
        .map_err(|e| StreamError::Bus(format!("invalid {} payload: {}", event, e)))
}

/// Decode one inbound text frame.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, StreamError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let event = envelope.event.as_str();
    let data = envelope.data;

    let message = match event {
        "webrtc_offer" => {
            let p: SdpPayload = payload(event, data)?;
            InboundMessage::Signaling(SignalingMessage::Offer {
                device_id: p.device_id,
                sdp: p.sdp,
            })
        }
        "webrtc_answer" => {
            let p: SdpPayload = payload(event, data)?;
            InboundMessage::Signaling(SignalingMessage::Answer {
                device_id: p.device_id,
                sdp: p.sdp,
            })
        }
        "webrtc_ice_candidate" => {
            let raw: RawCandidate = payload(event, data)?;
            let candidate = parse_candidate(raw.candidate)?;
            InboundMessage::Signaling(SignalingMessage::IceCandidate {
                device_id: raw.device_id,
                candidate,
            })
        }
        "start_webrtc" => {
            let p: DeviceOnly = payload(event, data)?;
            InboundMessage::Signaling(SignalingMessage::Start {
                device_id: p.device_id,
            })
        }
        "stop_webrtc" => {
            let p: DeviceOnly = payload(event, data)?;
            InboundMessage::Signaling(SignalingMessage::Stop {
                device_id: p.device_id,
            })
        }
        "capture_command" => InboundMessage::Capture(payload(event, data)?),
        "report_config" => InboundMessage::ReportConfig(payload(event, data)?),
        "request_snapshot" => {
            let p: DeviceOnly = payload(event, data)?;
            InboundMessage::RequestSnapshot {
                device_id: p.device_id,
            }
        }
        other => InboundMessage::Unknown(other.to_string()),
    };
    Ok(message)
}

/// Candidates arrive either as the browser object or as a bare string.
fn parse_candidate(value: serde_json::Value) -> Result<IceCandidate, StreamError> {
    match value {
        serde_json::Value::String(candidate) => Ok(IceCandidate {
            candidate,
            sdp_mid: None,
            sdp_mline_index: None,
        }),
        serde_json::Value::Object(_) => serde_json::from_value(value)
            .map_err(|e| StreamError::MalformedCandidate(e.to_string())),
        other => Err(StreamError::MalformedCandidate(format!(
            "unexpected candidate value {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_envelope() {
        let msg = Outbound::WebrtcOffer(SdpPayload {
            device_id: "drone-001".to_string(),
            sdp: "v=0".to_string(),
            sdp_type: "offer".to_string(),
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "webrtc_offer");
        assert_eq!(value["data"]["device_id"], "drone-001");
        assert_eq!(value["data"]["type"], "offer");
        assert_eq!(msg.event_name(), "webrtc_offer");
    }

    #[test]
    fn test_register_device_shape() {
        let msg = Outbound::RegisterDevice(RegisterDevice {
            device_id: "d".to_string(),
            device_name: "Drone".to_string(),
            capabilities: Capabilities {
                width: 640,
                height: 480,
                fps: 30,
            },
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "register_device");
        assert_eq!(value["data"]["capabilities"]["fps"], 30);
    }

    #[test]
    fn test_decode_answer() {
        let text = json!({
            "event": "webrtc_answer",
            "data": {"device_id": "drone-001", "sdp": "v=0", "type": "answer"}
        })
        .to_string();
        assert_eq!(
            decode_inbound(&text).unwrap(),
            InboundMessage::Signaling(SignalingMessage::Answer {
                device_id: "drone-001".to_string(),
                sdp: "v=0".to_string()
            })
        );
    }

    #[test]
    fn test_decode_candidate_object_and_string() {
        let text = json!({
            "event": "webrtc_ice_candidate",
            "data": {
                "device_id": "drone-001",
                "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 9 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
            }
        })
        .to_string();
        match decode_inbound(&text).unwrap() {
            InboundMessage::Signaling(SignalingMessage::IceCandidate { candidate, .. }) => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected {:?}", other),
        }

        let text = json!({
            "event": "webrtc_ice_candidate",
            "data": {"device_id": "drone-001", "candidate": "candidate:2 1 udp 1 10.0.0.1 9 typ host"}
        })
        .to_string();
        assert!(matches!(
            decode_inbound(&text).unwrap(),
            InboundMessage::Signaling(SignalingMessage::IceCandidate { .. })
        ));
    }

    #[test]
    fn test_malformed_candidate_error() {
        let text = json!({
            "event": "webrtc_ice_candidate",
            "data": {"device_id": "drone-001", "candidate": {"sdpMid": 5}}
        })
        .to_string();
        match decode_inbound(&text) {
            Err(StreamError::MalformedCandidate(_)) => {}
            other => panic!("expected MalformedCandidate, got {:?}", other),
        }

        let text = json!({
            "event": "webrtc_ice_candidate",
            "data": {"device_id": "drone-001", "candidate": 42}
        })
        .to_string();
        assert!(matches!(
            decode_inbound(&text),
            Err(StreamError::MalformedCandidate(_))
        ));
    }

    #[test]
    fn test_decode_control_messages() {
        let start = json!({"event": "start_webrtc", "data": {"device_id": "a"}}).to_string();
        assert_eq!(
            decode_inbound(&start).unwrap(),
            InboundMessage::Signaling(SignalingMessage::Start {
                device_id: "a".to_string()
            })
        );

        let capture = json!({"event": "capture_command", "data": {"device_id": "a", "quality": 80}})
            .to_string();
        match decode_inbound(&capture).unwrap() {
            InboundMessage::Capture(cmd) => assert_eq!(cmd.quality, Some(80)),
            other => panic!("unexpected {:?}", other),
        }

        let config = json!({"event": "report_config", "data": {"device_id": "a", "enabled": false}})
            .to_string();
        match decode_inbound(&config).unwrap() {
            InboundMessage::ReportConfig(cfg) => {
                assert_eq!(cfg.enabled, Some(false));
                assert_eq!(cfg.interval_secs, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_invalid() {
        let text = json!({"event": "gps_data", "data": {}}).to_string();
        assert_eq!(
            decode_inbound(&text).unwrap(),
            InboundMessage::Unknown("gps_data".to_string())
        );

        assert!(matches!(decode_inbound("not json"), Err(StreamError::Bus(_))));
        let missing = json!({"event": "webrtc_answer", "data": {"device_id": "a"}}).to_string();
        assert!(matches!(decode_inbound(&missing), Err(StreamError::Bus(_))));
    }

    #[test]
    fn test_capture_result_omits_empty_fields() {
        let msg = Outbound::CaptureResult(CaptureResult {
            device_id: "a".to_string(),
            success: false,
            image_url: None,
            error: Some("No frame available".to_string()),
            gps_data: None,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value["data"].get("image_url").is_none());
        assert_eq!(value["data"]["error"], "No frame available");
        assert!(value["data"]["gps_data"].is_null());
    }
}
