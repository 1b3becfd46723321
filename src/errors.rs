use std::time::Duration;

/// Errors raised by the streaming subsystem.
///
/// Only [`StreamError::CameraUnavailable`] is fatal. Everything else is
/// recovered locally (skipped, ignored, retried or rate limited).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Camera unavailable after {attempts} attempt(s): {reason}")]
    CameraUnavailable { attempts: u32, reason: String },

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Signaling race: {0}")]
    SignalingRace(String),

    #[error("Malformed ICE candidate: {0}")]
    MalformedCandidate(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("{component} did not stop within {timeout:?}")]
    JoinTimeout {
        component: &'static str,
        timeout: Duration,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// True when the error should end the subsystem rather than degrade it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::CameraUnavailable { .. })
    }

    /// Short machine-friendly name used in log lines and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::CameraUnavailable { .. } => "camera_unavailable",
            StreamError::Capture(_) => "capture",
            StreamError::Inference(_) => "inference",
            StreamError::SignalingRace(_) => "signaling_race",
            StreamError::MalformedCandidate(_) => "malformed_candidate",
            StreamError::Transport(_) => "transport",
            StreamError::JoinTimeout { .. } => "join_timeout",
            StreamError::Config(_) => "config",
            StreamError::Bus(_) => "bus",
            StreamError::Encoding(_) => "encoding",
            StreamError::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Bus(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_camera_unavailable_is_fatal() {
        let fatal = StreamError::CameraUnavailable {
            attempts: 3,
            reason: "no device".to_string(),
        };
        assert!(fatal.is_fatal());

        let recoverable = [
            StreamError::Inference("bad tensor".to_string()),
            StreamError::SignalingRace("stable".to_string()),
            StreamError::MalformedCandidate("empty".to_string()),
            StreamError::Transport("ice failed".to_string()),
            StreamError::JoinTimeout {
                component: "capture",
                timeout: Duration::from_secs(1),
            },
        ];
        for err in &recoverable {
            assert!(!err.is_fatal(), "{} should not be fatal", err.kind());
        }
    }

    #[test]
    fn test_error_display() {
        let err = StreamError::CameraUnavailable {
            attempts: 3,
            reason: "no backend opened".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Camera unavailable after 3 attempt(s): no backend opened"
        );

        let err = StreamError::JoinTimeout {
            component: "detection worker",
            timeout: Duration::from_millis(500),
        };
        assert!(err.to_string().contains("detection worker"));
    }

    #[test]
    fn test_json_error_maps_to_bus() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StreamError = json_err.into();
        assert_eq!(err.kind(), "bus");
    }
}
