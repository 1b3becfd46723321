//! Detection reports sent over the message bus
//!
//! [`DetectionPublisher`] emits the cached detection set twice a second.
//! [`SnapshotReporter`] attaches a JPEG of the current frame once a minute
//! or on request.

use crate::config::PublisherConfig;
use crate::errors::StreamError;
use crate::gps::GpsFix;
use crate::signaling::message::{
    DetectionReport, DetectionSnapshot, Outbound, ReportConfig, ReportedDetection, SnapshotCounts,
};
use crate::signaling::BusHandle;
use crate::still::encode_jpeg;
use crate::types::{DetectionSet, Frame};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Lower bound on the periodic snapshot interval.
pub const MIN_SNAPSHOT_INTERVAL_SECS: u64 = 60;

fn set_timestamp(set: &DetectionSet) -> String {
    DateTime::<Utc>::from(set.created_at).to_rfc3339()
}

pub struct DetectionPublisher {
    device_id: String,
    interval: Duration,
    max_boxes: usize,
    published: u64,
}

impl DetectionPublisher {
    pub fn new(device_id: impl Into<String>, config: &PublisherConfig) -> Self {
        Self {
            device_id: device_id.into(),
            interval: Duration::from_millis(config.interval_ms.max(1)),
            max_boxes: config.max_boxes,
            published: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Counts cover every detection in `set`; only the box list is capped.
    pub fn build_report(&self, set: &DetectionSet, gps: Option<GpsFix>) -> DetectionReport {
        let counts = set.counts();
        DetectionReport {
            device_id: self.device_id.clone(),
            timestamp: set_timestamp(set),
            earth_person_count: counts.earth_person,
            sea_person_count: counts.sea_person,
            person_count: counts.total(),
            detections: set
                .detections
                .iter()
                .take(self.max_boxes)
                .map(ReportedDetection::from)
                .collect(),
            gps,
        }
    }

    /// Send one report. Returns `Ok(false)` while the bus is down.
    pub fn publish(
        &mut self,
        bus: &BusHandle,
        set: &DetectionSet,
        gps: Option<GpsFix>,
    ) -> Result<bool, StreamError> {
        if !bus.is_connected() {
            return Ok(false);
        }
        bus.send(&Outbound::DetectionResult(self.build_report(set, gps)))?;
        self.published += 1;
        Ok(true)
    }
}

pub struct SnapshotReporter {
    device_id: String,
    device_name: String,
    enabled: bool,
    interval: Duration,
    quality: u8,
    sent: u64,
}

impl SnapshotReporter {
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        config: &PublisherConfig,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            enabled: config.snapshot_enabled,
            interval: config.snapshot_interval(),
            quality: config.snapshot_jpeg_quality,
            sent: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Apply a `report_config` message. Returns `true` when the interval
    /// changed and the caller should rearm its timer.
    pub fn apply_config(&mut self, config: &ReportConfig) -> bool {
        if let Some(enabled) = config.enabled {
            if enabled != self.enabled {
                log::info!(
                    "Periodic snapshots {}",
                    if enabled { "enabled" } else { "disabled" }
                );
            }
            self.enabled = enabled;
        }

        let Some(secs) = config.interval_secs else {
            return false;
        };
        let interval = Duration::from_secs(secs.max(MIN_SNAPSHOT_INTERVAL_SECS));
        if secs < MIN_SNAPSHOT_INTERVAL_SECS {
            log::warn!(
                "Snapshot interval {}s below minimum, using {}s",
                secs,
                MIN_SNAPSHOT_INTERVAL_SECS
            );
        }
        let changed = interval != self.interval;
        self.interval = interval;
        changed
    }

    /// Build a snapshot, or `None` when there is nothing to show yet.
    pub fn build(
        &self,
        frame: Option<&Frame>,
        set: Option<&DetectionSet>,
    ) -> Result<Option<DetectionSnapshot>, StreamError> {
        let (Some(frame), Some(set)) = (frame, set) else {
            log::warn!("Skipping snapshot, no frame or detection result yet");
            return Ok(None);
        };

        let jpeg = encode_jpeg(frame, self.quality)?;
        let image = base64::engine::general_purpose::STANDARD.encode(jpeg);

        Ok(Some(DetectionSnapshot {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            detection_data: SnapshotCounts::new(&set.counts(), set_timestamp(set)),
            image,
        }))
    }

    /// Send one snapshot. Returns whether anything was sent.
    pub fn report(
        &mut self,
        bus: &BusHandle,
        frame: Option<&Frame>,
        set: Option<&DetectionSet>,
    ) -> Result<bool, StreamError> {
        if !bus.is_connected() {
            return Ok(false);
        }
        let Some(snapshot) = self.build(frame, set)? else {
            return Ok(false);
        };
        bus.send(&Outbound::DetectionSnapshot(snapshot))?;
        self.sent += 1;
        log::info!("Snapshot sent for {}", self.device_id);
        Ok(true)
    }
}
