//! Core data types shared by capture, detection and streaming.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Byte order of the three channels in a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    Rgb,
    Bgr,
}

/// An owned RGB24 frame.
///
/// `data` is `height * width * 3` bytes in [`PixelLayout::Rgb`] order once it
/// has left the capture loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            sequence,
            timestamp_us: 0,
            width,
            height,
            data,
        }
    }

    /// All-black frame of the given size.
    pub fn black(width: u32, height: u32) -> Self {
        Self::new(0, width, height, vec![0u8; Self::expected_len(width, height)])
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == Self::expected_len(self.width, self.height)
    }

    /// Swap red and blue channels in place.
    pub fn swap_red_blue(&mut self) {
        for px in self.data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }
}

/// The two object classes the detector distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionClass {
    EarthPerson,
    SeaPerson,
}

impl DetectionClass {
    pub const ALL: [DetectionClass; 2] = [DetectionClass::EarthPerson, DetectionClass::SeaPerson];

    /// Map a model output channel to a class.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(DetectionClass::EarthPerson),
            1 => Some(DetectionClass::SeaPerson),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            DetectionClass::EarthPerson => 0,
            DetectionClass::SeaPerson => 1,
        }
    }

    /// Short label drawn on the video overlay.
    pub fn label(self) -> &'static str {
        match self {
            DetectionClass::EarthPerson => "EARTH",
            DetectionClass::SeaPerson => "SEA",
        }
    }
}

impl fmt::Display for DetectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionClass::EarthPerson => write!(f, "earth_person"),
            DetectionClass::SeaPerson => write!(f, "sea_person"),
        }
    }
}

/// A single detected object in original frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub class: DetectionClass,
    pub score: f32,
}

impl Detection {
    pub fn new(bbox: [f32; 4], class: DetectionClass, score: f32) -> Self {
        Self { bbox, class, score }
    }

    pub fn width(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bbox[3] - self.bbox[1]).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Per-class counts of a detection set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub earth_person: usize,
    pub sea_person: usize,
}

impl ClassCounts {
    pub fn total(&self) -> usize {
        self.earth_person + self.sea_person
    }

    pub fn get(&self, class: DetectionClass) -> usize {
        match class {
            DetectionClass::EarthPerson => self.earth_person,
            DetectionClass::SeaPerson => self.sea_person,
        }
    }
}

/// Detections produced by one inference pass. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSet {
    /// Sequence number of the frame the set was computed from.
    pub frame_sequence: u64,
    pub created_at: SystemTime,
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(frame_sequence: u64, detections: Vec<Detection>) -> Self {
        Self {
            frame_sequence,
            created_at: SystemTime::now(),
            detections,
        }
    }

    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Count detections per class. This is the only counting routine; the
    /// overlay summary and the published report both call it.
    pub fn counts(&self) -> ClassCounts {
        let mut counts = ClassCounts::default();
        for det in &self.detections {
            match det.class {
                DetectionClass::EarthPerson => counts.earth_person += 1,
                DetectionClass::SeaPerson => counts.sea_person += 1,
            }
        }
        counts
    }
}
