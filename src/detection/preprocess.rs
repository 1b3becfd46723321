use super::engine::ModelInput;
use crate::errors::StreamError;
use crate::types::Frame;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Resize an RGB frame to the model input size and lay it out as
/// normalized planar CHW floats.
pub fn preprocess(frame: &Frame, input_size: (u32, u32)) -> Result<ModelInput, StreamError> {
    let (width, height) = input_size;
    if width == 0 || height == 0 {
        return Err(StreamError::Inference("model input size is zero".to_string()));
    }

    let image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(
        || {
            StreamError::Inference(format!(
                "frame buffer of {} bytes does not match {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            ))
        },
    )?;

    let resized = if (frame.width, frame.height) == input_size {
        image
    } else {
        imageops::resize(&image, width, height, FilterType::Triangle)
    };

    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (i, px) in resized.pixels().enumerate() {
        data[i] = px[0] as f32 / 255.0;
        data[plane + i] = px[1] as f32 / 255.0;
        data[2 * plane + i] = px[2] as f32 / 255.0;
    }

    Ok(ModelInput {
        width,
        height,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_layout_and_scale() {
        // 2x1 frame: one red pixel, one white pixel
        let frame = Frame::new(1, 2, 1, vec![255, 0, 0, 255, 255, 255]);
        let input = preprocess(&frame, (2, 1)).unwrap();

        assert_eq!(input.data.len(), 6);
        assert_eq!(&input.data[0..2], &[1.0, 1.0]); // R plane
        assert_eq!(&input.data[2..4], &[0.0, 1.0]); // G plane
        assert_eq!(&input.data[4..6], &[0.0, 1.0]); // B plane
    }

    #[test]
    fn test_resizes_to_input() {
        let frame = Frame::black(64, 48);
        let input = preprocess(&frame, (32, 32)).unwrap();
        assert_eq!(input.width, 32);
        assert_eq!(input.height, 32);
        assert_eq!(input.data.len(), 3 * 32 * 32);
        assert!(input.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_rejects_bad_buffer() {
        let frame = Frame::new(1, 10, 10, vec![0; 5]);
        assert!(preprocess(&frame, (8, 8)).is_err());
    }
}
