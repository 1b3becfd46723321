//! Generic device-index backend built on nokhwa

use super::{BackendOpener, CaptureBackend, CaptureSettings, RawFrame};
use crate::errors::StreamError;
use crate::types::PixelLayout;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    },
    Camera,
};

pub struct NokhwaOpener;

impl BackendOpener for NokhwaOpener {
    fn name(&self) -> &'static str {
        "nokhwa"
    }

    fn is_supported(&self) -> bool {
        nokhwa::query(ApiBackend::Auto)
            .map(|cameras| !cameras.is_empty())
            .unwrap_or(false)
    }

    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CaptureBackend>, StreamError> {
        let mut last_error = None;
        for &index in &settings.device_indices {
            match open_camera(index, settings) {
                Ok(camera) => {
                    log::info!("Opened camera index {} via nokhwa", index);
                    return Ok(Box::new(NokhwaBackend { camera }));
                }
                Err(e) => {
                    log::debug!("nokhwa index {} failed: {}", index, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| StreamError::Capture("No device indices configured".into())))
    }
}

fn open_camera(index: u32, settings: &CaptureSettings) -> Result<Camera, StreamError> {
    let wanted = CameraFormat::new(
        Resolution::new(settings.width, settings.height),
        FrameFormat::MJPEG,
        settings.fps,
    );
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

    let mut camera = Camera::new(CameraIndex::Index(index), requested)
        .map_err(|e| StreamError::Capture(format!("Failed to initialize camera: {}", e)))?;

    camera
        .open_stream()
        .map_err(|e| StreamError::Capture(format!("Failed to start stream: {}", e)))?;

    Ok(camera)
}

struct NokhwaBackend {
    camera: Camera,
}

impl CaptureBackend for NokhwaBackend {
    fn name(&self) -> &str {
        "nokhwa"
    }

    fn read_frame(&mut self) -> Result<RawFrame, StreamError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| StreamError::Capture(format!("Failed to capture frame: {}", e)))?;

        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| StreamError::Capture(format!("Failed to decode frame: {}", e)))?;

        Ok(RawFrame {
            width: image.width(),
            height: image.height(),
            layout: PixelLayout::Rgb,
            data: image.into_raw(),
        })
    }

    fn release(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            log::warn!("Failed to stop camera stream: {}", e);
        }
    }
}
