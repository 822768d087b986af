//! Error taxonomy for the inspection pipeline.
//!
//! Fatal errors (bad configuration, an unmapped glyph class) abort the whole
//! batch. Everything else is scoped to a single image: the batch driver logs
//! the failure and moves on to the next file.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InspectError {
    /// Malformed model or pipeline configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The character detector emitted a class id outside the character map.
    /// This means the deployed model and the map disagree, so no decoded ID
    /// can be trusted.
    #[error("glyph class {0} has no character mapping")]
    UnmappedGlyphClass(u32),

    /// The image file could not be decoded or written.
    #[error("image I/O failed for {path:?}")]
    ImageIo {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The file name does not carry a parseable timestamp suffix.
    #[error("malformed image name {name:?}: {reason}")]
    BadImageName { name: String, reason: String },

    /// A collaborator model call failed.
    #[error("detector invocation failed")]
    Detector(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl InspectError {
    /// Fatal errors abort the batch; everything else skips the current image.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InspectError::Config(_) | InspectError::UnmappedGlyphClass(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_fatal() {
        assert!(InspectError::Config("bad model".into()).is_fatal());
        assert!(InspectError::UnmappedGlyphClass(42).is_fatal());
    }

    #[test]
    fn test_per_image_errors_are_not_fatal() {
        let err = InspectError::BadImageName {
            name: "plate.jpg".into(),
            reason: "missing timestamp".into(),
        };
        assert!(!err.is_fatal());

        let err = InspectError::Detector(anyhow::anyhow!("native call failed"));
        assert!(!err.is_fatal());
    }
}
