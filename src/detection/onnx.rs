//! ONNX Runtime detector
//!
//! Runs a YOLO-style export with one image input (`[1, 3, H, W]`, f32 in
//! `[0, 1]`) and one output tensor, which the parser decodes.

use super::engine::{InferenceEngine, ModelInput, RawOutput};
use crate::errors::StreamError;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

const DEFAULT_INPUT: &str = "images";

pub struct OnnxEngine {
    session: Session,
    input_name: String,
    output_name: String,
    input_size: (u32, u32),
}

impl OnnxEngine {
    pub fn load(path: impl AsRef<Path>, input_size: (u32, u32)) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| {
                StreamError::Inference(format!("failed to load model {}: {}", path.display(), e))
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| DEFAULT_INPUT.to_string());
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| {
                StreamError::Inference(format!("model {} has no outputs", path.display()))
            })?;

        log::debug!(
            "Model {}: input '{}' at {}x{}, output '{}'",
            path.display(),
            input_name,
            input_size.0,
            input_size.1,
            output_name
        );
        Ok(Self {
            session,
            input_name,
            output_name,
            input_size,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn infer(&mut self, input: &ModelInput) -> Result<RawOutput, StreamError> {
        let shape = [1usize, 3, input.height as usize, input.width as usize];
        let tensor = Tensor::from_array((shape, input.data.clone()))
            .map_err(|e| StreamError::Inference(format!("failed to build input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| StreamError::Inference(format!("inference failed: {}", e)))?;
        let (dims, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| StreamError::Inference(format!("failed to read output: {}", e)))?;

        RawOutput::from_dims(dims, data)
    }
}
