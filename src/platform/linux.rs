//! V4L2 capture backend (primary interface on Linux)

use super::{BackendOpener, CaptureBackend, CaptureSettings, RawFrame};
use crate::errors::StreamError;
use crate::types::PixelLayout;
use std::path::Path;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

const BUFFER_COUNT: u32 = 4;

/// Check if V4L2 device nodes exist
pub fn is_v4l2_available() -> bool {
    Path::new("/dev/video0").exists() || Path::new("/dev/video1").exists()
}

pub struct V4l2Opener;

impl BackendOpener for V4l2Opener {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn is_supported(&self) -> bool {
        is_v4l2_available()
    }

    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CaptureBackend>, StreamError> {
        let mut last_error = None;
        for &index in &settings.device_indices {
            match V4l2Backend::open(index as usize, settings) {
                Ok(backend) => {
                    log::info!(
                        "Opened /dev/video{} via V4L2 at {}x{}",
                        index,
                        backend.width,
                        backend.height
                    );
                    return Ok(Box::new(backend));
                }
                Err(e) => {
                    log::debug!("V4L2 device {} failed: {}", index, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| StreamError::Capture("No V4L2 device indices configured".into())))
    }
}

struct V4l2Backend {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl V4l2Backend {
    fn open(index: usize, settings: &CaptureSettings) -> Result<Self, StreamError> {
        let device = Device::new(index)
            .map_err(|e| StreamError::Capture(format!("Failed to open device: {}", e)))?;

        let mut format = device
            .format()
            .map_err(|e| StreamError::Capture(format!("Failed to read format: {}", e)))?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = FourCC::new(b"RGB3");

        let format = device
            .set_format(&format)
            .map_err(|e| StreamError::Capture(format!("Failed to set format: {}", e)))?;

        let layout = match &format.fourcc.repr {
            b"RGB3" => PixelLayout::Rgb,
            b"BGR3" => PixelLayout::Bgr,
            other => {
                return Err(StreamError::Capture(format!(
                    "Unsupported pixel format {}",
                    String::from_utf8_lossy(other)
                )))
            }
        };

        if let Err(e) = device.set_params(&Parameters::with_fps(settings.fps)) {
            log::warn!("Could not set {} fps on /dev/video{}: {}", settings.fps, index, e);
        }

        let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| StreamError::Capture(format!("Failed to start stream: {}", e)))?;

        Ok(Self {
            stream,
            width: format.width,
            height: format.height,
            layout,
        })
    }
}

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn read_frame(&mut self) -> Result<RawFrame, StreamError> {
        let (buffer, meta) = self
            .stream
            .next()
            .map_err(|e| StreamError::Capture(format!("Failed to capture frame: {}", e)))?;

        let expected = (self.width * self.height * 3) as usize;
        let used = (meta.bytesused as usize).min(buffer.len());
        if used < expected {
            return Err(StreamError::Capture(format!(
                "Short frame: {} of {} bytes",
                used, expected
            )));
        }

        Ok(RawFrame {
            width: self.width,
            height: self.height,
            layout: self.layout,
            data: buffer[..expected].to_vec(),
        })
    }
}
