//! ONNX Runtime implementations of the collaborator models
//!
//! The detection models are exported end to end (decoding and NMS inside the
//! graph) and emit a `[1, N, 6]` tensor of `(x, y, w, h, confidence, class)`
//! rows in original-image coordinates of the resized input. The blur
//! classifier emits a single confidence scalar.

use anyhow::{Context, Result};
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{info, warn};

use super::{BlurClassifier, CharacterDetector, DetectionBox, DetectionResult, RegionDetector};

fn load_session(model_path: &Path, use_gpu: bool) -> Result<Session> {
    info!("Loading ONNX model from {:?}", model_path);

    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?;

    let builder = if use_gpu {
        use ort::execution_providers::CUDAExecutionProvider;
        match builder.with_execution_providers([CUDAExecutionProvider::default().build()]) {
            Ok(builder) => {
                info!("CUDA execution provider enabled");
                builder
            }
            Err(e) => {
                warn!("CUDA not available, using CPU: {}", e);
                Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .with_intra_threads(4)?
            }
        }
    } else {
        builder
    };

    let session = builder
        .commit_from_file(model_path)
        .context("Failed to load ONNX model")?;

    let input_names: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
    let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
    info!(
        "Model loaded. Inputs: {:?}, Outputs: {:?}",
        input_names, output_names
    );

    Ok(session)
}

/// NCHW float tensor in [0, 1] from an RGB resize to `size` x `size`.
fn to_input_tensor(image: &DynamicImage, size: u32) -> Array<f32, IxDyn> {
    let resized = image.resize_exact(size, size, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
        input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
    }
    input
}

/// YOLO-family detector with an end-to-end export.
///
/// One type serves both the region model and the character glyph model; they
/// differ only in weights and class count.
pub struct OnnxDetector {
    session: Session,
    input_size: u32,
    class_count: u32,
}

impl OnnxDetector {
    pub fn new(model_path: &Path, input_size: u32, class_count: u32, use_gpu: bool) -> Result<Self> {
        let session = load_session(model_path, use_gpu)?;
        Ok(Self {
            session,
            input_size,
            class_count,
        })
    }

    fn run(&mut self, image: &DynamicImage) -> Result<DetectionResult> {
        let (orig_w, orig_h) = (image.width(), image.height());
        let scale_x = orig_w as f32 / self.input_size as f32;
        let scale_y = orig_h as f32 / self.input_size as f32;

        let input = to_input_tensor(image, self.input_size);
        let input_tensor = ort::value::Value::from_array(input)?;
        let outputs = self.session.run(ort::inputs![input_tensor])?;

        let output = outputs
            .get("output")
            .or_else(|| outputs.get("output0"))
            .context("no detection output tensor found (tried: output, output0)")?;
        let (shape, data) = output.try_extract_tensor::<f32>()?;

        let dims: Vec<usize> = shape.as_ref().iter().map(|&d| d as usize).collect();
        anyhow::ensure!(
            dims.len() == 3 && dims[2] >= 6,
            "unexpected detection output shape {:?}",
            dims
        );

        let mut boxes = Vec::new();
        for row in data.chunks(dims[2]).take(dims[1]) {
            let class_id = row[5] as u32;
            if class_id >= self.class_count {
                warn!(
                    "dropping detection with class {} outside the model's {} classes",
                    class_id, self.class_count
                );
                continue;
            }
            boxes.push(DetectionBox {
                x: (row[0] * scale_x).max(0.0) as u32,
                y: (row[1] * scale_y).max(0.0) as u32,
                w: (row[2] * scale_x).min(orig_w as f32) as u32,
                h: (row[3] * scale_y).min(orig_h as f32) as u32,
                confidence: row[4],
                class_id,
            });
        }

        Ok(DetectionResult::from_raw(boxes))
    }
}

impl RegionDetector for OnnxDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<DetectionResult> {
        self.run(image)
    }
}

impl CharacterDetector for OnnxDetector {
    fn detect(&mut self, crop: &DynamicImage) -> Result<DetectionResult> {
        self.run(crop)
    }
}

/// ResNet-style blur classifier emitting one confidence scalar.
pub struct OnnxBlurClassifier {
    session: Session,
    input_size: u32,
}

impl OnnxBlurClassifier {
    pub fn new(model_path: &Path, input_size: u32, use_gpu: bool) -> Result<Self> {
        let session = load_session(model_path, use_gpu)?;
        Ok(Self {
            session,
            input_size,
        })
    }
}

impl BlurClassifier for OnnxBlurClassifier {
    fn classify(&mut self, crop: &DynamicImage) -> Result<f32> {
        let input = to_input_tensor(crop, self.input_size);
        let input_tensor = ort::value::Value::from_array(input)?;
        let outputs = self.session.run(ort::inputs![input_tensor])?;

        let output = outputs
            .get("output")
            .or_else(|| outputs.get("output0"))
            .context("no classifier output tensor found (tried: output, output0)")?;
        let (_, data) = output.try_extract_tensor::<f32>()?;

        data.first()
            .copied()
            .context("classifier returned an empty tensor")
    }
}
