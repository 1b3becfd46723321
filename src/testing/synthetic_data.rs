//! Synthetic camera source
//!
//! Generates moving gradient frames so the whole pipeline can run without
//! hardware, in tests and on bench setups.

use crate::errors::StreamError;
use crate::platform::{BackendOpener, CaptureBackend, CaptureSettings, RawFrame};
use crate::types::{Frame, PixelLayout};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Create a synthetic RGB frame whose content changes with `frame_number`.
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32) -> Frame {
    Frame::new(frame_number, width, height, gradient(frame_number, width, height))
}

fn gradient(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0u8; Frame::expected_len(width, height)];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }

    data
}

/// Opener for the synthetic pattern source. Always supported.
#[derive(Debug, Clone)]
pub struct SyntheticOpener {
    layout: PixelLayout,
}

impl SyntheticOpener {
    pub fn new() -> Self {
        Self {
            layout: PixelLayout::Rgb,
        }
    }

    /// Deliver frames in BGR order, like many native camera APIs do.
    pub fn bgr() -> Self {
        Self {
            layout: PixelLayout::Bgr,
        }
    }
}

impl Default for SyntheticOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendOpener for SyntheticOpener {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CaptureBackend>, StreamError> {
        Ok(Box::new(SyntheticBackend {
            width: settings.width,
            height: settings.height,
            layout: self.layout,
            frame_number: 0,
        }))
    }
}

struct SyntheticBackend {
    width: u32,
    height: u32,
    layout: PixelLayout,
    frame_number: u64,
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn read_frame(&mut self) -> Result<RawFrame, StreamError> {
        let mut data = gradient(self.frame_number, self.width, self.height);
        if self.layout == PixelLayout::Bgr {
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }
        self.frame_number += 1;

        Ok(RawFrame {
            width: self.width,
            height: self.height,
            layout: self.layout,
            data,
        })
    }

    fn paces_itself(&self) -> bool {
        false
    }
}

/// Opener that never manages to open a device. Counts its attempts.
#[derive(Debug, Default, Clone)]
pub struct UnavailableOpener {
    attempts: Arc<AtomicU32>,
    unsupported: bool,
}

impl UnavailableOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// An opener whose interface does not exist on this host.
    pub fn unsupported() -> Self {
        Self {
            attempts: Arc::default(),
            unsupported: true,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl BackendOpener for UnavailableOpener {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_supported(&self) -> bool {
        !self.unsupported
    }

    fn open(&self, _settings: &CaptureSettings) -> Result<Box<dyn CaptureBackend>, StreamError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StreamError::Capture("device busy".to_string()))
    }
}

/// Backend whose reads fail until `failures` reads have been attempted.
pub struct FlakyOpener {
    pub failures: u32,
}

impl BackendOpener for FlakyOpener {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CaptureBackend>, StreamError> {
        Ok(Box::new(FlakyBackend {
            inner: SyntheticBackend {
                width: settings.width,
                height: settings.height,
                layout: PixelLayout::Rgb,
                frame_number: 0,
            },
            remaining_failures: self.failures,
        }))
    }
}

struct FlakyBackend {
    inner: SyntheticBackend,
    remaining_failures: u32,
}

impl CaptureBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    fn read_frame(&mut self) -> Result<RawFrame, StreamError> {
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            return Err(StreamError::Capture("select timeout".to_string()));
        }
        self.inner.read_frame()
    }

    fn paces_itself(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_video_frame_correct_size() {
        let frame = synthetic_video_frame(0, 320, 240);
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_synthetic_video_frames_differ() {
        let frame0 = synthetic_video_frame(0, 32, 24);
        let frame1 = synthetic_video_frame(1, 32, 24);
        assert_ne!(frame0.data[0], frame1.data[0]);
    }

    #[test]
    fn test_bgr_backend_swaps_channels() {
        let settings = CaptureSettings {
            width: 4,
            height: 4,
            ..CaptureSettings::default()
        };
        let mut rgb = SyntheticOpener::new().open(&settings).unwrap();
        let mut bgr = SyntheticOpener::bgr().open(&settings).unwrap();

        let a = rgb.read_frame().unwrap();
        let b = bgr.read_frame().unwrap();
        assert_eq!(b.layout, PixelLayout::Bgr);
        assert_eq!(a.data[5], b.data[3]);
        assert_eq!(a.data[3], b.data[5]);
    }

    #[test]
    fn test_unavailable_opener_counts_attempts() {
        let opener = UnavailableOpener::new();
        assert!(opener.open(&CaptureSettings::default()).is_err());
        assert!(opener.open(&CaptureSettings::default()).is_err());
        assert_eq!(opener.attempts(), 2);
        assert!(!UnavailableOpener::unsupported().is_supported());
    }
}
