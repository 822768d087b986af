//! Persistence of inspection outcomes
//!
//! Images are routed into `empty/`, `notBlurry/` and `blurry/` directories
//! under the output root, and every non-empty plate gets one row in the
//! summary CSV. ID-plate crops that failed to decode land in a side
//! directory for later labeling.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use time::macros::format_description;
use tracing::{info, warn};

use crate::error::InspectError;
use crate::inspect::{ImageStatus, PipelineOutcome};

const CSV_HEADER: &str = "ID,Line,Date,Status";

/// Routes one [`PipelineOutcome`] to its image destination and the summary CSV.
pub struct OutcomeWriter {
    output_root: PathBuf,
    summary_csv: PathBuf,
}

impl OutcomeWriter {
    /// Create the status directories and the summary CSV header up front so a
    /// run that processes nothing still leaves a well-formed output tree.
    pub fn new(output_root: &Path, summary_csv: &Path) -> Result<Self, InspectError> {
        for status in [ImageStatus::Empty, ImageStatus::NotBlurry, ImageStatus::Blurry] {
            std::fs::create_dir_all(output_root.join(status.dir_name()))?;
        }

        if !summary_csv.exists() {
            if let Some(parent) = summary_csv.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(summary_csv, format!("{CSV_HEADER}\n"))?;
        }

        Ok(Self {
            output_root: output_root.to_path_buf(),
            summary_csv: summary_csv.to_path_buf(),
        })
    }

    pub fn write(&self, outcome: &PipelineOutcome) -> Result<(), InspectError> {
        match outcome.status {
            // Empty plates are archived for review but never hit the CSV.
            ImageStatus::Empty => {
                let dest = self
                    .output_root
                    .join(ImageStatus::Empty.dir_name())
                    .join(&outcome.file_name);
                self.save_image(&outcome.image, &dest)?;
            }
            ImageStatus::NotBlurry => {
                self.append_row(outcome)?;
            }
            ImageStatus::Blurry => {
                let dest = self
                    .output_root
                    .join(ImageStatus::Blurry.dir_name())
                    .join(format!("{}.jpg", outcome.plate_id));
                let image = outcome.annotated.as_ref().unwrap_or(&outcome.image);
                self.save_image(image, &dest)?;
                self.append_row(outcome)?;
            }
        }
        Ok(())
    }

    fn save_image(&self, image: &DynamicImage, dest: &Path) -> Result<(), InspectError> {
        info!("saving {:?}", dest);
        image.save(dest).map_err(|source| InspectError::ImageIo {
            path: dest.to_path_buf(),
            source,
        })
    }

    fn append_row(&self, outcome: &PipelineOutcome) -> Result<(), InspectError> {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let date = outcome
            .timestamp
            .format(format)
            .map_err(|e| InspectError::Config(format!("cannot format timestamp: {e}")))?;

        let status = match outcome.status {
            ImageStatus::Empty => "Empty",
            ImageStatus::NotBlurry => "NotBlurry",
            ImageStatus::Blurry => "Blurry",
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.summary_csv)?;
        writeln!(
            file,
            "{},{},{},{}",
            outcome.plate_id, outcome.press_line, date, status
        )?;
        Ok(())
    }
}

/// Side channel for ID-plate crops whose decode came out the wrong length.
pub struct UnrecognizedIdWriter {
    dir: PathBuf,
}

impl UnrecognizedIdWriter {
    pub fn new(dir: &Path) -> Result<Self, InspectError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Save the crop under its decoded candidate so mislabeled reads can be
    /// eyeballed later. An unreadable plate decodes to an empty candidate.
    pub fn write(&self, crop: &DynamicImage, candidate: &str) -> Result<(), InspectError> {
        let name = if candidate.is_empty() {
            "unreadable"
        } else {
            candidate
        };
        let dest = self.dir.join(format!("{name}.jpg"));
        warn!("unrecognized id {:?}, keeping crop at {:?}", candidate, dest);
        crop.save(&dest).map_err(|source| InspectError::ImageIo {
            path: dest,
            source,
        })
    }
}
