//! Camera backends
//!
//! A backend is picked at capture start by walking a list of
//! [`BackendOpener`]s in priority order. Each opener reports whether its
//! interface exists on this host before it is asked to open a device.

use crate::errors::StreamError;
use crate::types::PixelLayout;
use std::sync::Arc;

#[cfg(feature = "hardware")]
pub mod generic;
#[cfg(all(target_os = "linux", feature = "hardware"))]
pub mod linux;

/// What the capture loop asks a backend for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Device indices to try, in order
    pub device_indices: Vec<u32>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            device_indices: vec![0, 1],
        }
    }
}

impl From<&crate::config::CameraConfig> for CaptureSettings {
    fn from(camera: &crate::config::CameraConfig) -> Self {
        Self {
            width: camera.width,
            height: camera.height,
            fps: camera.fps,
            device_indices: camera.device_indices.clone(),
        }
    }
}

/// One frame as delivered by a backend, before normalization.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
}

/// An opened camera. Lives on the capture thread only.
pub trait CaptureBackend {
    fn name(&self) -> &str;

    /// Read the next frame. Blocking backends wait for the device; others
    /// return immediately and rely on the capture loop for pacing.
    fn read_frame(&mut self) -> Result<RawFrame, StreamError>;

    /// True when reads block until the device delivers a frame.
    fn paces_itself(&self) -> bool {
        true
    }

    fn release(&mut self) {}
}

/// Capability-checked factory for a [`CaptureBackend`].
pub trait BackendOpener: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this interface exists on the current host.
    fn is_supported(&self) -> bool;

    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CaptureBackend>, StreamError>;
}

/// Hardware openers compiled into this build, primary interface first.
pub fn default_openers() -> Vec<Arc<dyn BackendOpener>> {
    #[allow(unused_mut)]
    let mut openers: Vec<Arc<dyn BackendOpener>> = Vec::new();

    #[cfg(all(target_os = "linux", feature = "hardware"))]
    openers.push(Arc::new(linux::V4l2Opener));

    #[cfg(feature = "hardware")]
    openers.push(Arc::new(generic::NokhwaOpener));

    openers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_camera_config() {
        let mut camera = crate::config::CameraConfig::default();
        camera.width = 1280;
        camera.height = 720;
        camera.device_indices = vec![2];

        let settings = CaptureSettings::from(&camera);
        assert_eq!(settings.width, 1280);
        assert_eq!(settings.height, 720);
        assert_eq!(settings.fps, 30);
        assert_eq!(settings.device_indices, vec![2]);
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn test_no_hardware_openers_without_feature() {
        assert!(default_openers().is_empty());
    }
}
