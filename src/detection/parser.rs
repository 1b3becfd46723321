//! YOLO output decoding
//!
//! Accepts the two common export layouts, `[1, 4 + C, N]` (channel-major)
//! and `[1, N, 4 + C]` (row-major). Each of the N rows holds a box centre,
//! size and one score per class, all in model-input pixels.

use super::engine::RawOutput;
use super::ClassThresholds;
use crate::errors::StreamError;
use crate::types::{Detection, DetectionClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    ChannelMajor { features: usize, rows: usize },
    RowMajor { features: usize, rows: usize },
}

fn layout(shape: &[usize]) -> Result<Layout, StreamError> {
    let (a, b) = match shape {
        [1, a, b] | [a, b] => (*a, *b),
        other => {
            return Err(StreamError::Inference(format!(
                "unsupported output shape {:?}",
                other
            )))
        }
    };

    // Feature axis is the short one: 4 box values plus at least one class.
    if a >= 5 && (a <= b || b < 5) {
        Ok(Layout::ChannelMajor {
            features: a,
            rows: b,
        })
    } else if b >= 5 {
        Ok(Layout::RowMajor {
            features: b,
            rows: a,
        })
    } else {
        Err(StreamError::Inference(format!(
            "output shape {:?} has no box/score axis",
            shape
        )))
    }
}

/// Decode raw output into frame-space candidates that pass their class
/// threshold. No suppression is applied here.
pub fn parse_output(
    output: &RawOutput,
    thresholds: &ClassThresholds,
    input_size: (u32, u32),
    frame_size: (u32, u32),
) -> Result<Vec<Detection>, StreamError> {
    let layout = layout(&output.shape)?;
    let (features, rows) = match layout {
        Layout::ChannelMajor { features, rows } | Layout::RowMajor { features, rows } => {
            (features, rows)
        }
    };

    if output.data.len() < features * rows {
        return Err(StreamError::Inference(format!(
            "output has {} values, shape {:?} needs {}",
            output.data.len(),
            output.shape,
            features * rows
        )));
    }

    let value = |row: usize, feature: usize| -> f32 {
        match layout {
            Layout::ChannelMajor { rows, .. } => output.data[feature * rows + row],
            Layout::RowMajor { features, .. } => output.data[row * features + feature],
        }
    };

    let scale_x = frame_size.0 as f32 / input_size.0.max(1) as f32;
    let scale_y = frame_size.1 as f32 / input_size.1.max(1) as f32;
    let max_x = frame_size.0 as f32;
    let max_y = frame_size.1 as f32;

    let mut candidates = Vec::new();
    for row in 0..rows {
        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for class_idx in 0..features - 4 {
            let score = value(row, 4 + class_idx);
            if score > best_score {
                best_score = score;
                best_class = class_idx;
            }
        }

        let Some(class) = DetectionClass::from_index(best_class) else {
            continue;
        };
        if !best_score.is_finite() || best_score < thresholds.for_class(class) {
            continue;
        }

        let cx = value(row, 0) * scale_x;
        let cy = value(row, 1) * scale_y;
        let w = value(row, 2) * scale_x;
        let h = value(row, 3) * scale_y;

        let bbox = [
            (cx - w / 2.0).clamp(0.0, max_x),
            (cy - h / 2.0).clamp(0.0, max_y),
            (cx + w / 2.0).clamp(0.0, max_x),
            (cy + h / 2.0).clamp(0.0, max_y),
        ];
        if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
            continue;
        }

        candidates.push(Detection::new(bbox, class, best_score.min(1.0)));
    }

    Ok(candidates)
}
