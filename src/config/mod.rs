//! Pipeline configuration
//!
//! Thresholds, model locations and batch settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::InspectError;

/// Top-level inspection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    /// Model locations and inference settings
    pub models: ModelsConfig,
    /// Decision thresholds
    pub thresholds: ThresholdConfig,
    /// Batch behavior
    pub batch: BatchConfig,
    /// Annotation overlay settings
    pub annotation: AnnotationConfig,
}

/// Locations and inference settings for the three models
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Region detection model (plate body vs. ID plate)
    pub region_model: PathBuf,
    /// Character glyph detection model
    pub character_model: PathBuf,
    /// Blur classification model
    pub blur_model: PathBuf,
    /// Run inference on GPU when an execution provider is available
    pub use_gpu: bool,
    /// Square input size of the detection models
    pub detector_input_size: u32,
    /// Square input size of the blur classifier
    pub classifier_input_size: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            region_model: PathBuf::from("models/roi_yolov5s.onnx"),
            character_model: PathBuf::from("models/id_yolov5s.onnx"),
            blur_model: PathBuf::from("models/resnet18.onnx"),
            use_gpu: false,
            detector_input_size: 640,
            classifier_input_size: 224,
        }
    }
}

/// Decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Minimum confidence for accepting a region detection (0.0 - 1.0)
    pub region_confidence: f32,
    /// Blur confidences strictly above this mark a region blurry (0.0 - 1.0)
    pub blur: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            region_confidence: 0.25,
            blur: 0.5,
        }
    }
}

/// Batch behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Images whose file name contains this pattern are skipped entirely
    pub skip_pattern: Option<String>,
    /// Decoded IDs must have exactly this many characters to be accepted
    pub id_length: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            skip_pattern: None,
            id_length: 8,
        }
    }
}

/// Annotation overlay settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// TTF font for the verdict text overlay; rectangle-only when unset
    pub font_path: Option<PathBuf>,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<InspectionConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: InspectionConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &InspectionConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load configuration, falling back to defaults only when the file does not
/// exist. A present but malformed file is a fatal configuration error, never
/// a silent fallback to defaults.
pub fn load_or_create(path: &Path) -> Result<InspectionConfig, InspectError> {
    if path.exists() {
        let config = load_config(path).map_err(|e| {
            InspectError::Config(format!("invalid configuration {path:?}: {e}"))
        })?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    info!("Using default configuration");
    let config = InspectionConfig::default();
    if let Err(e) = save_config(&config, path) {
        info!("could not write default configuration to {:?}: {}", path, e);
    }
    Ok(config)
}
