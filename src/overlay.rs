//! Detection overlay drawn directly into RGB frames
//!
//! Boxes, class labels with scores, a running per-class summary, and the
//! placeholder shown when the camera has no frame. Text uses a 5x7 bitmap
//! font so no font files are needed on the device.

use crate::types::{ClassCounts, DetectionClass, DetectionSet, Frame};
use image::{ImageBuffer, Rgb};

type Canvas<'a> = ImageBuffer<Rgb<u8>, &'a mut [u8]>;

const GLYPH_ADVANCE: i32 = 6;
const LABEL_HEIGHT: i32 = 8;
const TEXT_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const SUMMARY_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const ERROR_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

pub const PLACEHOLDER_TEXT: &str = "CAMERA ERROR";

fn class_color(class: DetectionClass) -> Rgb<u8> {
    match class {
        DetectionClass::EarthPerson => Rgb([0, 255, 0]),
        DetectionClass::SeaPerson => Rgb([0, 128, 255]),
    }
}

/// Text of the per-class summary line.
pub fn summary_text(counts: &ClassCounts) -> String {
    format!(
        "{}:{} {}:{}",
        DetectionClass::EarthPerson.label(),
        counts.earth_person,
        DetectionClass::SeaPerson.label(),
        counts.sea_person
    )
}

/// Draw a detection set onto `frame` and return the counts shown in the
/// summary line.
pub fn draw_detections(frame: &mut Frame, set: &DetectionSet) -> ClassCounts {
    let counts = set.counts();
    let (width, height) = (frame.width, frame.height);
    if width == 0 || height == 0 {
        return counts;
    }
    let Some(mut canvas) = Canvas::from_raw(width, height, &mut frame.data[..]) else {
        log::debug!("Skipping overlay on malformed {}x{} frame", width, height);
        return counts;
    };

    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;

    for det in &set.detections {
        draw_rectangle(
            &mut canvas,
            det.bbox[0].clamp(0.0, max_x).round() as i32,
            det.bbox[1].clamp(0.0, max_y).round() as i32,
            det.bbox[2].clamp(0.0, max_x).round() as i32,
            det.bbox[3].clamp(0.0, max_y).round() as i32,
            class_color(det.class),
        );
    }

    for det in &set.detections {
        let label = format!("{} {:.0}%", det.class.label(), det.score * 100.0);
        let x = det.bbox[0].clamp(0.0, max_x).round() as i32;
        let y = (det.bbox[1].clamp(0.0, max_y).round() as i32 - 12).max(0);
        draw_text_box(&mut canvas, x, y, &label, class_color(det.class));
    }

    draw_text_box(&mut canvas, 4, 4, &summary_text(&counts), SUMMARY_COLOR);
    counts
}

/// Black frame carrying the camera error marker.
pub fn placeholder_frame(width: u32, height: u32, sequence: u64) -> Frame {
    let mut frame = Frame::black(width, height);
    frame.sequence = sequence;

    if let Some(mut canvas) = Canvas::from_raw(width, height, &mut frame.data[..]) {
        let text_width = PLACEHOLDER_TEXT.len() as i32 * GLYPH_ADVANCE;
        let x = ((width as i32 - text_width) / 2).max(0);
        let y = ((height as i32 - LABEL_HEIGHT) / 2).max(0);
        draw_label(&mut canvas, x, y, PLACEHOLDER_TEXT, ERROR_COLOR);
    }
    frame
}

fn draw_text_box(canvas: &mut Canvas<'_>, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let text_width = text.chars().count() as i32 * GLYPH_ADVANCE;
    fill_rect(canvas, x, y, x + text_width, y + LABEL_HEIGHT, TEXT_BACKGROUND);
    draw_label(canvas, x + 1, y, text, color);
}

fn draw_rectangle(
    canvas: &mut Canvas<'_>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = canvas.width() as i32;
    let height = canvas.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        canvas.put_pixel(x as u32, top as u32, color);
        canvas.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        canvas.put_pixel(left as u32, y as u32, color);
        canvas.put_pixel(right as u32, y as u32, color);
    }
}

fn fill_rect(
    canvas: &mut Canvas<'_>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = canvas.width() as i32;
    let height = canvas.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(canvas: &mut Canvas<'_>, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = canvas.width() as i32;
    let height = canvas.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            canvas.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'E' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111]),
        'H' => Some([0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110]),
        'T' => Some([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        '%' => Some([0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000]),
        ':' => Some([0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0]),
        ' ' => Some([0; 7]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Detection;

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * frame.width + x) * 3) as usize;
        [frame.data[i], frame.data[i + 1], frame.data[i + 2]]
    }

    #[test]
    fn test_summary_text() {
        let counts = ClassCounts {
            earth_person: 3,
            sea_person: 1,
        };
        assert_eq!(summary_text(&counts), "EARTH:3 SEA:1");
    }

    #[test]
    fn test_draws_box_edges_in_class_color() {
        let mut frame = Frame::black(200, 200);
        let set = DetectionSet::new(
            1,
            vec![Detection::new([100.0, 120.0, 150.0, 180.0], DetectionClass::SeaPerson, 0.8)],
        );
        let counts = draw_detections(&mut frame, &set);

        assert_eq!(counts.sea_person, 1);
        assert_eq!(pixel(&frame, 150, 150), [0, 128, 255]);
        assert_eq!(pixel(&frame, 125, 180), [0, 128, 255]);
        // Interior is untouched.
        assert_eq!(pixel(&frame, 125, 150), [0, 0, 0]);
    }

    #[test]
    fn test_summary_is_drawn_for_empty_set() {
        let mut frame = Frame::black(120, 40);
        let counts = draw_detections(&mut frame, &DetectionSet::empty());
        assert_eq!(counts.total(), 0);
        assert!(frame.data.iter().any(|b| *b == 255));
    }

    #[test]
    fn test_out_of_frame_boxes_are_clamped() {
        let mut frame = Frame::black(32, 32);
        let set = DetectionSet::new(
            1,
            vec![Detection::new([-10.0, -10.0, 100.0, 100.0], DetectionClass::EarthPerson, 0.9)],
        );
        draw_detections(&mut frame, &set);
        assert_eq!(pixel(&frame, 31, 31), [0, 255, 0]);
    }

    #[test]
    fn test_placeholder_has_marker() {
        let frame = placeholder_frame(160, 120, 9);
        assert_eq!(frame.sequence, 9);
        assert!(frame.is_well_formed());
        assert!(frame.data.chunks_exact(3).any(|px| px == [255, 0, 0]));
    }

    #[test]
    fn test_tiny_frames_do_not_panic() {
        let mut frame = Frame::black(1, 1);
        let set = DetectionSet::new(
            1,
            vec![Detection::new([0.0, 0.0, 1.0, 1.0], DetectionClass::EarthPerson, 0.5)],
        );
        draw_detections(&mut frame, &set);
        let _ = placeholder_frame(2, 2, 0);
    }

    #[test]
    fn test_empty_frames_are_left_alone() {
        let set = DetectionSet::new(
            1,
            vec![Detection::new([0.0, 0.0, 8.0, 8.0], DetectionClass::SeaPerson, 0.9)],
        );
        for (width, height) in [(0, 0), (0, 48), (64, 0)] {
            let mut frame = Frame::black(width, height);
            assert_eq!(draw_detections(&mut frame, &set).sea_person, 1);
            assert!(frame.data.is_empty());
            assert!(placeholder_frame(width, height, 3).data.is_empty());
        }
    }
}
