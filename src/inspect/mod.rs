//! Per-image inspection pipeline
//!
//! Orchestrates region detection, blur triage of plate-body regions and
//! two-line ID decoding of ID-plate regions into one outcome per image:
//!
//! `Start -> RegionDetected -> {EmptyTerminal | PerRegionLoop} -> Done`

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use time::macros::format_description;
use time::PrimitiveDateTime;
use tracing::{debug, info, warn};

use crate::config::InspectionConfig;
use crate::decode::decode_two_line;
use crate::detection::{
    BlurClassifier, CharacterDetector, DetectionBox, RegionClass, RegionDetector, SingleFlight,
};
use crate::error::InspectError;
use crate::report::UnrecognizedIdWriter;

/// Final per-image verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// No region of interest was detected at all
    Empty,
    /// Every plate-body region read sharp
    NotBlurry,
    /// At least one plate-body region read blurry
    Blurry,
}

impl ImageStatus {
    /// Destination directory under the output root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ImageStatus::Empty => "empty",
            ImageStatus::NotBlurry => "notBlurry",
            ImageStatus::Blurry => "blurry",
        }
    }

    /// Fold one plate-body verdict into the running status. A blurry region
    /// is never reverted by a later sharp one.
    fn fold(self, is_blurry: bool) -> ImageStatus {
        if is_blurry {
            ImageStatus::Blurry
        } else {
            self
        }
    }
}

/// Any-of reduction over per-region blur confidences, in region order.
pub fn resolve_status(confidences: &[f32], threshold: f32) -> ImageStatus {
    if confidences.is_empty() {
        return ImageStatus::Empty;
    }
    confidences
        .iter()
        .fold(ImageStatus::NotBlurry, |status, &conf| {
            status.fold(conf > threshold)
        })
}

/// Everything the writers need for one processed image. Immutable once built.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub status: ImageStatus,
    /// Decoded ID when one region decoded to the expected length, otherwise
    /// the file-derived image name.
    pub plate_id: String,
    /// Name of the directory containing the image (the press line)
    pub press_line: String,
    /// Capture time parsed from the file name suffix
    pub timestamp: PrimitiveDateTime,
    /// Oriented full image; persisted when the plate is empty
    pub image: DynamicImage,
    /// Present when a blurry region forced annotation
    pub annotated: Option<DynamicImage>,
    /// Original file name, used for the empty destination
    pub file_name: String,
}

/// Per-image entry point; seam for batch-driver tests.
pub trait ImageInspector {
    fn inspect(&self, path: &Path) -> Result<PipelineOutcome, InspectError>;
}

/// Press line and capture time derived from `<line>/<name>-<yyyyMMddHHmmss>.<ext>`.
pub fn parse_image_name(path: &Path) -> Result<(String, PrimitiveDateTime), InspectError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let press_line = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (_, raw) = stem.rsplit_once('-').ok_or_else(|| InspectError::BadImageName {
        name: name.clone(),
        reason: "missing '-<timestamp>' suffix".into(),
    })?;

    let format = format_description!("[year][month][day][hour][minute][second]");
    let timestamp =
        PrimitiveDateTime::parse(raw, format).map_err(|e| InspectError::BadImageName {
            name,
            reason: e.to_string(),
        })?;

    Ok((press_line, timestamp))
}

/// Clamped crop of a detected region.
fn crop_region(image: &DynamicImage, region: &DetectionBox) -> DynamicImage {
    let x = region.x.min(image.width().saturating_sub(1));
    let y = region.y.min(image.height().saturating_sub(1));
    let w = region.w.clamp(1, image.width() - x);
    let h = region.h.clamp(1, image.height() - y);
    image.crop_imm(x, y, w, h)
}

/// The per-image state machine over the three shared model handles.
///
/// Handles are wrapped in [`SingleFlight`] so the inspector can be shared by
/// parallel drivers without ever overlapping calls into one model instance.
pub struct Inspector {
    region: Arc<SingleFlight<Box<dyn RegionDetector>>>,
    characters: Arc<SingleFlight<Box<dyn CharacterDetector>>>,
    blur: Arc<SingleFlight<Box<dyn BlurClassifier>>>,
    config: InspectionConfig,
    font: Option<FontVec>,
    unrecognized: UnrecognizedIdWriter,
}

impl Inspector {
    pub fn new(
        region: Box<dyn RegionDetector>,
        characters: Box<dyn CharacterDetector>,
        blur: Box<dyn BlurClassifier>,
        config: InspectionConfig,
        unrecognized: UnrecognizedIdWriter,
    ) -> Result<Self, InspectError> {
        let font = match &config.annotation.font_path {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    InspectError::Config(format!("cannot read annotation font {path:?}: {e}"))
                })?;
                let font = FontVec::try_from_vec(bytes).map_err(|e| {
                    InspectError::Config(format!("invalid annotation font {path:?}: {e}"))
                })?;
                Some(font)
            }
            None => None,
        };

        Ok(Self {
            region: Arc::new(SingleFlight::new(region)),
            characters: Arc::new(SingleFlight::new(characters)),
            blur: Arc::new(SingleFlight::new(blur)),
            config,
            font,
            unrecognized,
        })
    }

    /// Red rectangle around the region plus the verdict text when a font is
    /// configured.
    fn draw_verdict(
        &self,
        canvas: &mut RgbImage,
        region: &DetectionBox,
        is_blurry: bool,
        confidence: f32,
    ) {
        const RED: Rgb<u8> = Rgb([255, 0, 0]);

        let w = region.w.max(1);
        let h = region.h.max(1);
        for inset in 0..3u32 {
            if w <= 2 * inset || h <= 2 * inset {
                break;
            }
            let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32)
                .of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(canvas, rect, RED);
        }

        if let Some(font) = &self.font {
            let label = format!("{} {:.2}", is_blurry, confidence);
            draw_text_mut(
                canvas,
                RED,
                region.x as i32,
                region.y as i32 + 100,
                PxScale::from(96.0),
                font,
                &label,
            );
        }
    }
}

impl ImageInspector for Inspector {
    fn inspect(&self, path: &Path) -> Result<PipelineOutcome, InspectError> {
        info!("inspecting {:?}", path);

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Malformed names fail here, before any detector call.
        let (press_line, timestamp) = parse_image_name(path)?;

        let image = image::open(path).map_err(|source| InspectError::ImageIo {
            path: path.to_path_buf(),
            source,
        })?;
        // The line camera is mounted sideways; frames arrive a quarter turn off.
        let image = image.rotate90();

        let begin = Instant::now();
        let result = self
            .region
            .invoke(|model| model.detect(&image))
            .map_err(InspectError::Detector)?;
        debug!(
            "region detection took {:?}, {} raw detections",
            begin.elapsed(),
            result.len()
        );

        let regions = result.accepted(self.config.thresholds.region_confidence);
        debug!("{} regions above threshold", regions.len());

        if regions.is_empty() {
            info!("empty plate: {}", file_name);
            return Ok(PipelineOutcome {
                status: ImageStatus::Empty,
                plate_id: file_stem,
                press_line,
                timestamp,
                image,
                annotated: None,
                file_name,
            });
        }

        let mut status = ImageStatus::NotBlurry;
        let mut plate_id = file_stem;
        let mut annotated: Option<RgbImage> = None;

        for region in &regions {
            match RegionClass::of(region.class_id) {
                RegionClass::PlateBody => {
                    debug!(
                        "plate body at x:{} y:{} w:{} h:{}",
                        region.x, region.y, region.w, region.h
                    );
                    let crop = crop_region(&image, region);

                    let begin = Instant::now();
                    let confidence = self
                        .blur
                        .invoke(|model| model.classify(&crop))
                        .map_err(InspectError::Detector)?;
                    debug!("blur classification took {:?}", begin.elapsed());

                    let is_blurry = confidence > self.config.thresholds.blur;
                    info!("blurry -> {} with confidence {:.2}", is_blurry, confidence);
                    status = status.fold(is_blurry);

                    // Once any region read blurry, every remaining plate-body
                    // region is drawn onto the annotated copy as well.
                    if status == ImageStatus::Blurry {
                        let canvas = annotated.get_or_insert_with(|| image.to_rgb8());
                        self.draw_verdict(canvas, region, is_blurry, confidence);
                    }
                }
                RegionClass::IdPlate => {
                    debug!("id plate at x:{} y:{}", region.x, region.y);
                    // Characters are stamped sideways relative to the body.
                    let crop = crop_region(&image, region).rotate270();

                    let begin = Instant::now();
                    let glyphs = self
                        .characters
                        .invoke(|model| model.detect(&crop))
                        .map_err(InspectError::Detector)?;
                    debug!("character detection took {:?}", begin.elapsed());
                    if glyphs.is_empty() {
                        warn!("no glyphs detected on the id plate");
                    }

                    let candidate = decode_two_line(glyphs.boxes())?;
                    info!("decoded id: {}", candidate);

                    if candidate.len() == self.config.batch.id_length {
                        plate_id = candidate;
                    } else {
                        self.unrecognized.write(&crop, &candidate)?;
                    }
                }
            }
        }

        info!("{} is checked to be {:?}", plate_id, status);
        Ok(PipelineOutcome {
            status,
            plate_id,
            press_line,
            timestamp,
            image,
            annotated: annotated.map(DynamicImage::ImageRgb8),
            file_name,
        })
    }
}
