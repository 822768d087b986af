//! Batch traversal of a capture tree
//!
//! The input root holds one directory per press line with the line's captures
//! inside. Each image is inspected independently; a failure on one image is
//! logged and counted, and the batch moves on. Only configuration-level
//! errors abort the run.

use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::error::InspectError;
use crate::inspect::{ImageInspector, ImageStatus};
use crate::report::OutcomeWriter;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Tally of one batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub empty: usize,
    pub not_blurry: usize,
    pub blurry: usize,
    pub skipped: usize,
    pub failed: usize,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Every image file under the input root, recursively, in a stable order
/// (entries sorted within each directory).
pub fn collect_images(input_root: &Path) -> Result<Vec<PathBuf>, InspectError> {
    fn walk(dir: &Path, images: &mut Vec<PathBuf>) -> Result<(), InspectError> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        entries.sort();
        for path in entries {
            if path.is_dir() {
                walk(&path, images)?;
            } else if is_image(&path) {
                images.push(path);
            }
        }
        Ok(())
    }

    let mut images = Vec::new();
    walk(input_root, &mut images)?;
    Ok(images)
}

/// Runs the inspector over every collected image and routes outcomes to the
/// writer.
pub struct BatchDriver<I: ImageInspector> {
    inspector: I,
    writer: OutcomeWriter,
    skip_pattern: Option<String>,
}

impl<I: ImageInspector> BatchDriver<I> {
    pub fn new(inspector: I, writer: OutcomeWriter, skip_pattern: Option<String>) -> Self {
        Self {
            inspector,
            writer,
            skip_pattern,
        }
    }

    fn is_skipped(&self, path: &Path) -> bool {
        match (&self.skip_pattern, path.file_name().and_then(|n| n.to_str())) {
            (Some(pattern), Some(name)) => name.contains(pattern.as_str()),
            _ => false,
        }
    }

    pub fn run(&self, input_root: &Path) -> Result<BatchSummary, InspectError> {
        let images = collect_images(input_root)?;
        info!("{} images queued from {:?}", images.len(), input_root);

        let mut summary = BatchSummary::default();
        for path in &images {
            if self.is_skipped(path) {
                info!("skipping {:?}", path);
                summary.skipped += 1;
                continue;
            }

            match self
                .inspector
                .inspect(path)
                .and_then(|outcome| self.writer.write(&outcome).map(|_| outcome))
            {
                Ok(outcome) => {
                    summary.processed += 1;
                    match outcome.status {
                        ImageStatus::Empty => summary.empty += 1,
                        ImageStatus::NotBlurry => summary.not_blurry += 1,
                        ImageStatus::Blurry => summary.blurry += 1,
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!("aborting batch: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("failed to process {:?}: {}", path, e);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::PipelineOutcome;
    use image::{DynamicImage, RgbImage};
    use std::cell::RefCell;
    use tempfile::TempDir;
    use time::macros::datetime;

    struct ScriptedInspector {
        seen: RefCell<Vec<PathBuf>>,
        statuses: RefCell<Vec<Result<ImageStatus, InspectError>>>,
    }

    impl ScriptedInspector {
        fn new(statuses: Vec<Result<ImageStatus, InspectError>>) -> Self {
            Self {
                seen: RefCell::new(Vec::new()),
                statuses: RefCell::new(statuses),
            }
        }
    }

    impl ImageInspector for ScriptedInspector {
        fn inspect(&self, path: &Path) -> Result<PipelineOutcome, InspectError> {
            self.seen.borrow_mut().push(path.to_path_buf());
            let status = self.statuses.borrow_mut().remove(0)?;
            Ok(PipelineOutcome {
                status,
                plate_id: "5013PK77".to_string(),
                press_line: "line1".to_string(),
                timestamp: datetime!(2024-01-31 12:34:56),
                image: DynamicImage::ImageRgb8(RgbImage::new(8, 8)),
                annotated: None,
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            })
        }
    }

    fn capture_tree() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input");
        for line in ["line1", "line2"] {
            std::fs::create_dir_all(input.join(line)).unwrap();
        }
        for (line, name) in [
            ("line1", "PLT-20240131123456.png"),
            ("line1", "PLT-20240131123457.jpg"),
            ("line2", "PLT-20240131123458.png"),
            ("line2", "notes.txt"),
        ] {
            std::fs::write(input.join(line).join(name), b"x").unwrap();
        }
        (dir, input)
    }

    fn writer(dir: &TempDir) -> OutcomeWriter {
        let out = dir.path().join("out");
        OutcomeWriter::new(&out, &out.join("summary.csv")).unwrap()
    }

    #[test]
    fn test_collect_images_skips_non_images_and_orders_by_line() {
        let (_dir, input) = capture_tree();
        let images = collect_images(&input).unwrap();

        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                "PLT-20240131123456.png",
                "PLT-20240131123457.jpg",
                "PLT-20240131123458.png"
            ]
        );
    }

    #[test]
    fn test_run_tallies_statuses() {
        let (dir, input) = capture_tree();
        let inspector = ScriptedInspector::new(vec![
            Ok(ImageStatus::NotBlurry),
            Ok(ImageStatus::Blurry),
            Ok(ImageStatus::Empty),
        ]);
        let driver = BatchDriver::new(inspector, writer(&dir), None);

        let summary = driver.run(&input).unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.not_blurry, 1);
        assert_eq!(summary.blurry, 1);
        assert_eq!(summary.empty, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn test_skip_pattern_bypasses_inspection() {
        let (dir, input) = capture_tree();
        let inspector = ScriptedInspector::new(vec![
            Ok(ImageStatus::NotBlurry),
            Ok(ImageStatus::NotBlurry),
        ]);
        let driver = BatchDriver::new(inspector, writer(&dir), Some("123456".to_string()));

        let summary = driver.run(&input).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 2);
        assert!(driver
            .inspector
            .seen
            .borrow()
            .iter()
            .all(|p| !p.to_string_lossy().contains("123456.png")));
    }

    #[test]
    fn test_per_image_failure_does_not_stop_the_batch() {
        let (dir, input) = capture_tree();
        let inspector = ScriptedInspector::new(vec![
            Ok(ImageStatus::NotBlurry),
            Err(InspectError::BadImageName {
                name: "PLT-20240131123457.jpg".to_string(),
                reason: "missing '-<timestamp>' suffix".to_string(),
            }),
            Ok(ImageStatus::Blurry),
        ]);
        let driver = BatchDriver::new(inspector, writer(&dir), None);

        let summary = driver.run(&input).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_write_failure_is_counted_not_fatal() {
        struct UnsaveableEmpty;
        impl ImageInspector for UnsaveableEmpty {
            fn inspect(&self, _path: &Path) -> Result<PipelineOutcome, InspectError> {
                Ok(PipelineOutcome {
                    status: ImageStatus::Empty,
                    plate_id: "PLT-20240131123456".to_string(),
                    press_line: "line1".to_string(),
                    timestamp: datetime!(2024-01-31 12:34:56),
                    image: DynamicImage::ImageRgb8(RgbImage::new(8, 8)),
                    annotated: None,
                    // No encoder claims this extension, so the save fails.
                    file_name: "PLT-20240131123456.xyz".to_string(),
                })
            }
        }

        let (dir, input) = capture_tree();
        let driver = BatchDriver::new(UnsaveableEmpty, writer(&dir), None);

        let summary = driver.run(&input).unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.failed, 3);
    }

    #[test]
    fn test_fatal_error_aborts_the_batch() {
        let (dir, input) = capture_tree();
        let inspector = ScriptedInspector::new(vec![
            Ok(ImageStatus::NotBlurry),
            Err(InspectError::UnmappedGlyphClass(23)),
            Ok(ImageStatus::NotBlurry),
        ]);
        let driver = BatchDriver::new(inspector, writer(&dir), None);

        let err = driver.run(&input).unwrap_err();
        assert!(matches!(err, InspectError::UnmappedGlyphClass(23)));
        assert_eq!(driver.inspector.seen.borrow().len(), 2);
    }
}
