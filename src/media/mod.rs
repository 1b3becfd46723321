//! Outgoing video: paced frame production and delivery into the session

pub mod producer;
pub mod pump;

pub use producer::FrameProducer;
pub use pump::{MediaPump, SessionSlot};

use crate::timing::TimeBase;
use crate::types::{DetectionSet, Frame};
use std::sync::Arc;

/// A produced frame ready for the transport.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub frame: Frame,
    /// Presentation timestamp in `time_base` units
    pub pts: u64,
    pub time_base: TimeBase,
    /// The detection set drawn onto `frame`
    pub detections: Arc<DetectionSet>,
    /// True when `frame` is the camera-error placeholder
    pub placeholder: bool,
}
