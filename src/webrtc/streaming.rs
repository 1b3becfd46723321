//! H.264 encoding of produced frames for the video track

use crate::config::SkycastConfig;
use crate::errors::StreamError;
use crate::types::Frame;
use bytes::Bytes;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType, RateControlMode};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;

/// Convert RGB24 to planar YUV420 (BT.601).
///
/// `width`/`height` are the output size and must be even; `stride` is the
/// source row width in pixels, so odd-sized frames are cropped by one
/// column or row.
pub(crate) fn rgb_to_yuv420(rgb: &[u8], stride: usize, width: usize, height: usize) -> Vec<u8> {
    let y_size = width * height;
    let uv_size = (width / 2) * (height / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..height {
        for x in 0..width {
            let i = (y * stride + x) * 3;
            let r = rgb[i] as i32;
            let g = rgb[i + 1] as i32;
            let b = rgb[i + 2] as i32;

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * width + x] = y_val.clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 {
                let uv = (y / 2) * (width / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv] = u_val.clamp(0, 255) as u8;
                v_plane[uv] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

/// One encoded access unit.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub data: Bytes,
    pub keyframe: bool,
    pub width: u32,
    pub height: u32,
}

/// Rate control for the outgoing track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderSettings {
    pub bitrate_kbps: u32,
    pub max_fps: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bitrate_kbps: 2000,
            max_fps: 30,
        }
    }
}

impl From<&SkycastConfig> for EncoderSettings {
    fn from(config: &SkycastConfig) -> Self {
        Self {
            bitrate_kbps: config.stream.bitrate_kbps,
            max_fps: config.camera.fps,
        }
    }
}

impl EncoderSettings {
    fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig::new()
            .rate_control_mode(RateControlMode::Bitrate)
            .bitrate(BitRate::from_bps(self.bitrate_kbps.saturating_mul(1000)))
            .max_frame_rate(FrameRate::from_hz(self.max_fps.max(1) as f32))
    }
}

/// H.264 encoder that follows the frame size.
///
/// The encoder is (re)built whenever the even-cropped frame size changes,
/// and the first frame after that is a keyframe.
pub struct H264Sink {
    settings: EncoderSettings,
    encoder: Option<Encoder>,
    size: (u32, u32),
    frames: u64,
}

impl Default for H264Sink {
    fn default() -> Self {
        Self::new(EncoderSettings::default())
    }
}

impl H264Sink {
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            encoder: None,
            size: (0, 0),
            frames: 0,
        }
    }

    pub fn settings(&self) -> EncoderSettings {
        self.settings
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn encode(&mut self, frame: &Frame) -> Result<EncodedSample, StreamError> {
        if !frame.is_well_formed() {
            return Err(StreamError::Encoding(format!(
                "frame {} has {} bytes for {}x{}",
                frame.sequence,
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }
        let width = frame.width & !1;
        let height = frame.height & !1;
        if width == 0 || height == 0 {
            return Err(StreamError::Encoding(format!(
                "frame {}x{} too small to encode",
                frame.width, frame.height
            )));
        }

        if self.encoder.is_none() || self.size != (width, height) {
            log::debug!(
                "Creating H.264 encoder for {}x{} at {} kbps",
                width,
                height,
                self.settings.bitrate_kbps
            );
            let encoder = Encoder::with_api_config(
                OpenH264API::from_source(),
                self.settings.encoder_config(),
            )
            .map_err(|e| StreamError::Encoding(format!("failed to create H.264 encoder: {}", e)))?;
            self.encoder = Some(encoder);
            self.size = (width, height);
        }
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(StreamError::Encoding("H.264 encoder missing".to_string()));
        };

        let yuv = rgb_to_yuv420(
            &frame.data,
            frame.width as usize,
            width as usize,
            height as usize,
        );
        let buffer = YUVBuffer::from_vec(yuv, width as usize, height as usize);
        let bitstream = encoder
            .encode(&buffer)
            .map_err(|e| StreamError::Encoding(format!("H.264 encoding failed: {}", e)))?;

        self.frames += 1;
        Ok(EncodedSample {
            keyframe: matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I),
            data: Bytes::from(bitstream.to_vec()),
            width,
            height,
        })
    }

    pub fn force_keyframe(&mut self) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.force_intra_frame();
        }
    }
}
