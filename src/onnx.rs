//! YOLOv8 detector backed by ONNX Runtime.
//!
//! Expects an exported detection model with a single `[1, 3, S, S]` input and
//! a `[1, 4 + classes, anchors]` output.

use image::imageops::{self, FilterType};
use image::RgbImage;
use log::{debug, info};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;

use crate::detection::Detector;
use crate::error::{PipelineError, Result};
use crate::postprocess::{decode_output, non_max_suppression};
use crate::types::RawDetection;

const INPUT_SIZE: u32 = 640;
const IOU_THRESHOLD: f32 = 0.45;

pub struct OnnxDetector {
    session: Session,
    input_name: String,
}

fn inference_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Inference(e.to_string())
}

impl OnnxDetector {
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.is_file() {
            return Err(PipelineError::NotFound(model_path.to_path_buf()));
        }
        info!("Loading detection model {}", model_path.display());

        let session = Session::builder()
            .map_err(inference_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(inference_error)?
            .commit_from_file(model_path)
            .map_err(inference_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| PipelineError::Inference("model declares no inputs".to_string()))?;

        info!("Detection model ready (input {:?})", input_name);
        Ok(Self {
            session,
            input_name,
        })
    }

    fn preprocess(image: &RgbImage) -> Vec<f32> {
        let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut data = vec![0f32; plane * 3];
        for (i, pixel) in resized.pixels().enumerate() {
            data[i] = pixel[0] as f32 / 255.0;
            data[plane + i] = pixel[1] as f32 / 255.0;
            data[2 * plane + i] = pixel[2] as f32 / 255.0;
        }
        data
    }
}

impl Detector for OnnxDetector {
    fn predict(&mut self, image: &RgbImage, confidence: f32) -> Result<Vec<RawDetection>> {
        let input = Self::preprocess(image);
        let shape = [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];
        let input_value = ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))
            .map_err(inference_error)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(inference_error)?;
        let (output_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;

        let mut detections = decode_output(
            &output_shape,
            data,
            INPUT_SIZE,
            image.width(),
            image.height(),
            confidence,
        )?;
        non_max_suppression(&mut detections, IOU_THRESHOLD);
        debug!("Model returned {} detections", detections.len());
        Ok(detections)
    }
}
