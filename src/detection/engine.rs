use crate::config::DetectionConfig;
use crate::errors::StreamError;

/// Planar CHW float tensor fed to a model, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    pub width: u32,
    pub height: u32,
    /// `3 * height * width` values, channel-major
    pub data: Vec<f32>,
}

/// Raw model output tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawOutput {
    /// Copy a runtime tensor whose dimensions come as signed values.
    pub fn from_dims(dims: &[i64], data: &[f32]) -> Result<Self, StreamError> {
        let shape = dims
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| StreamError::Inference(format!("dynamic output shape {:?}", dims)))?;
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(StreamError::Inference(format!(
                "output shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            shape,
            data: data.to_vec(),
        })
    }
}

/// A loaded object-detection model.
///
/// Implementations wrap whatever runtime executes the network. The worker
/// owns the engine on its own thread, so `infer` takes `&mut self`.
pub trait InferenceEngine: Send {
    /// Model input resolution as `(width, height)`.
    fn input_size(&self) -> (u32, u32) {
        (640, 640)
    }

    fn infer(&mut self, input: &ModelInput) -> Result<RawOutput, StreamError>;
}

/// Engine that never finds anything. Used when no model is linked in.
#[derive(Debug, Default)]
pub struct NullEngine;

impl InferenceEngine for NullEngine {
    fn infer(&mut self, _input: &ModelInput) -> Result<RawOutput, StreamError> {
        Ok(RawOutput {
            shape: vec![1, 6, 0],
            data: Vec::new(),
        })
    }
}

/// Engine for the configured model, or [`NullEngine`] when none loads.
///
/// A missing or broken model never stops the agent; video keeps flowing
/// without boxes.
pub fn load_engine(config: &DetectionConfig) -> Box<dyn InferenceEngine> {
    let path = &config.model_path;
    if path.as_os_str().is_empty() {
        log::warn!("No detection model configured, running without detections");
        return Box::new(NullEngine);
    }
    if !path.is_file() {
        log::warn!(
            "Detection model {} not found, running without detections",
            path.display()
        );
        return Box::new(NullEngine);
    }

    #[cfg(feature = "onnx")]
    {
        let size = (config.input_size, config.input_size);
        match super::onnx::OnnxEngine::load(path, size) {
            Ok(engine) => {
                log::info!("Loaded detection model {}", path.display());
                return Box::new(engine);
            }
            Err(e) => log::warn!("{}, running without detections", e),
        }
    }
    #[cfg(not(feature = "onnx"))]
    log::warn!(
        "Built without the onnx feature, ignoring model {}",
        path.display()
    );

    Box::new(NullEngine)
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }

    fn infer(&mut self, input: &ModelInput) -> Result<RawOutput, StreamError> {
        (**self).infer(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dims_copies_tensor() {
        let output = RawOutput::from_dims(&[1, 6, 2], &[0.0; 12]).unwrap();
        assert_eq!(output.shape, vec![1, 6, 2]);
        assert_eq!(output.data.len(), 12);
    }

    #[test]
    fn test_from_dims_rejects_bad_tensors() {
        assert!(matches!(
            RawOutput::from_dims(&[1, -1, 8], &[0.0; 8]),
            Err(StreamError::Inference(_))
        ));
        assert!(matches!(
            RawOutput::from_dims(&[1, 6, 2], &[0.0; 11]),
            Err(StreamError::Inference(_))
        ));
    }

    #[test]
    fn test_missing_model_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = DetectionConfig {
            model_path: dir.path().join("absent.onnx"),
            ..DetectionConfig::default()
        };
        let mut engine = load_engine(&config);
        let input = ModelInput {
            width: 640,
            height: 640,
            data: vec![0.0; 3 * 640 * 640],
        };
        let output = engine.infer(&input).unwrap();
        assert!(output.data.is_empty());
    }

    #[test]
    fn test_unreadable_model_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"not a model").unwrap();
        let config = DetectionConfig {
            model_path: path,
            ..DetectionConfig::default()
        };
        let mut engine = load_engine(&config);
        let input = ModelInput {
            width: 640,
            height: 640,
            data: vec![0.0; 3 * 640 * 640],
        };
        assert!(engine.infer(&input).unwrap().data.is_empty());
    }
}
