//! One-shot still capture on operator request
//!
//! A `capture_command` grabs the current camera frame, encodes it as JPEG
//! and hands it to a [`StillSink`]. Uploading to an object store is the
//! sink's business; [`LocalStillStore`] just writes files.

use crate::config::StillConfig;
use crate::errors::StreamError;
use crate::gps::GpsFix;
use crate::signaling::message::{CaptureCommand, CaptureResult};
use crate::types::Frame;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_STILL_QUALITY: u8 = 95;

/// Encode an RGB frame as JPEG. `quality` is clamped to 1..=100.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, StreamError> {
    let img = image::RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| {
            StreamError::Encoding(format!(
                "frame buffer does not match {}x{}",
                frame.width, frame.height
            ))
        })?;

    let mut out = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    image::DynamicImage::ImageRgb8(img)
        .write_with_encoder(encoder)
        .map_err(|e| StreamError::Encoding(format!("JPEG encoding failed: {}", e)))?;
    Ok(out)
}

/// Where encoded stills end up.
#[async_trait::async_trait]
pub trait StillSink: Send + Sync {
    /// Store one JPEG and return a URL or path for it.
    async fn store(&self, device_id: &str, jpeg: Vec<u8>) -> Result<String, StreamError>;
}

/// Writes `<dir>/<device>_<uuid>.jpg`.
#[derive(Debug, Clone)]
pub struct LocalStillStore {
    dir: PathBuf,
}

impl LocalStillStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }
}

#[async_trait::async_trait]
impl StillSink for LocalStillStore {
    async fn store(&self, device_id: &str, jpeg: Vec<u8>) -> Result<String, StreamError> {
        let path = self
            .dir
            .join(format!("{}_{}.jpg", device_id, uuid::Uuid::new_v4()));
        let dir = self.dir.clone();
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            std::fs::write(&target, jpeg)
        })
        .await
        .map_err(|e| StreamError::Io(std::io::Error::other(e.to_string())))??;

        log::info!("Still saved to {}", path.display());
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Answers `capture_command` messages.
pub struct StillCapture {
    device_id: String,
    default_quality: u8,
    sink: Arc<dyn StillSink>,
}

impl StillCapture {
    pub fn new(device_id: impl Into<String>, config: &StillConfig, sink: Arc<dyn StillSink>) -> Self {
        Self {
            device_id: device_id.into(),
            default_quality: config.default_quality,
            sink,
        }
    }

    /// Still store rooted at the configured output directory.
    pub fn local(device_id: impl Into<String>, config: &StillConfig) -> Self {
        let sink = Arc::new(LocalStillStore::new(&config.output_directory));
        Self::new(device_id, config, sink)
    }

    /// Run one capture and build the reply. Never fails; failures are
    /// reported in the result.
    pub async fn capture(
        &self,
        frame: Option<Frame>,
        command: &CaptureCommand,
        gps: Option<GpsFix>,
    ) -> CaptureResult {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let quality = command.quality.unwrap_or(self.default_quality);

        let outcome = match frame {
            None => Err("No frame available".to_string()),
            Some(frame) => self.encode_and_store(frame, quality).await,
        };

        match outcome {
            Ok(url) => CaptureResult {
                device_id: self.device_id.clone(),
                success: true,
                image_url: Some(url),
                error: None,
                gps_data: gps,
                timestamp,
            },
            Err(error) => {
                log::warn!("Still capture failed: {}", error);
                CaptureResult {
                    device_id: self.device_id.clone(),
                    success: false,
                    image_url: None,
                    error: Some(error),
                    gps_data: gps,
                    timestamp,
                }
            }
        }
    }

    async fn encode_and_store(&self, frame: Frame, quality: u8) -> Result<String, String> {
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality))
            .await
            .map_err(|e| format!("encode task failed: {}", e))?
            .map_err(|e| e.to_string())?;
        self.sink
            .store(&self.device_id, jpeg)
            .await
            .map_err(|e| e.to_string())
    }
}
