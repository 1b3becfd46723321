//! On-device person detection
//!
//! Frames sampled by the producer go through a bounded queue to a worker
//! thread. Each frame is preprocessed, run through an [`InferenceEngine`],
//! decoded with per-class confidence thresholds and reduced with NMS. The
//! result replaces the contents of the shared [`DetectionCache`].

pub mod engine;
pub mod nms;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod parser;
pub mod preprocess;
pub mod queue;
pub mod worker;

pub use engine::{load_engine, InferenceEngine, ModelInput, NullEngine, RawOutput};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEngine;
pub use nms::{iou, non_max_suppression};
pub use queue::{detection_queue, DetectionCache, DetectionQueue, DETECTION_QUEUE_CAPACITY};
pub use worker::{detect_frame, DetectionWorker};

use crate::config::DetectionConfig;
use crate::types::DetectionClass;

/// One confidence cutoff per class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassThresholds {
    pub earth_person: f32,
    pub sea_person: f32,
}

impl ClassThresholds {
    pub fn for_class(&self, class: DetectionClass) -> f32 {
        match class {
            DetectionClass::EarthPerson => self.earth_person,
            DetectionClass::SeaPerson => self.sea_person,
        }
    }
}

/// Post-processing parameters of the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub thresholds: ClassThresholds,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for DetectionParams {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            thresholds: ClassThresholds {
                earth_person: config.threshold_for(DetectionClass::EarthPerson),
                sea_person: config.threshold_for(DetectionClass::SeaPerson),
            },
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        }
    }
}
