//! Detection primitives and collaborator model contracts
//!
//! The three models (region detector, character detector, blur classifier)
//! are stateful external collaborators behind traits. Loaded model instances
//! are not reentrant, so every call goes through a [`SingleFlight`] wrapper
//! that admits at most one in-flight invocation per instance.

pub mod onnx;

use anyhow::Result;
use image::DynamicImage;
use parking_lot::Mutex;

/// Upper bound on boxes a single detector call can return. Detections beyond
/// this bound are silently unavailable.
pub const MAX_DETECTIONS: usize = 1000;

/// One detected object in image-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
    /// Top-left corner x
    pub x: u32,
    /// Top-left corner y
    pub y: u32,
    /// Width
    pub w: u32,
    /// Height
    pub h: u32,
    /// Confidence that the object was found correctly (0.0 - 1.0)
    pub confidence: f32,
    /// Class index into the model's class table
    pub class_id: u32,
}

impl DetectionBox {
    /// A zero-height box marks the end of the valid prefix in a raw
    /// fixed-capacity result buffer.
    pub fn is_sentinel(&self) -> bool {
        self.h == 0
    }
}

/// Ordered detections from one detector call.
///
/// Order is detector-defined and not assumed meaningful; callers re-sort when
/// order matters.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    boxes: Vec<DetectionBox>,
}

impl DetectionResult {
    /// Build from a raw result buffer: the valid prefix ends at the first
    /// `h == 0` sentinel, capped at [`MAX_DETECTIONS`].
    pub fn from_raw(raw: impl IntoIterator<Item = DetectionBox>) -> Self {
        let boxes = raw
            .into_iter()
            .take_while(|b| !b.is_sentinel())
            .take(MAX_DETECTIONS)
            .collect();
        Self { boxes }
    }

    /// Valid detections in detector order.
    pub fn boxes(&self) -> &[DetectionBox] {
        &self.boxes
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Detections at or above the confidence threshold, detector order kept.
    pub fn accepted(&self, threshold: f32) -> Vec<DetectionBox> {
        self.boxes
            .iter()
            .copied()
            .filter(|b| b.confidence >= threshold)
            .collect()
    }
}

/// Classes emitted by the region detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionClass {
    /// The stamped plate body, subject to blur triage (class 0)
    PlateBody,
    /// The riveted ID plate carrying the two-line code (any other class)
    IdPlate,
}

impl RegionClass {
    pub fn of(class_id: u32) -> Self {
        if class_id == 0 {
            RegionClass::PlateBody
        } else {
            RegionClass::IdPlate
        }
    }
}

/// Locates plate-body and ID-plate regions in a full line-scan image.
pub trait RegionDetector: Send {
    fn detect(&mut self, image: &DynamicImage) -> Result<DetectionResult>;
}

/// Detects character glyphs inside an ID-plate crop.
pub trait CharacterDetector: Send {
    fn detect(&mut self, crop: &DynamicImage) -> Result<DetectionResult>;
}

/// Scores how blurry a plate-body crop is (0.0 = sharp, 1.0 = blurry).
pub trait BlurClassifier: Send {
    fn classify(&mut self, crop: &DynamicImage) -> Result<f32>;
}

/// Mutual-exclusion wrapper around a loaded model instance.
///
/// At most one invocation may be in flight per instance; the lock is held
/// for the duration of the call only. Distinct instances never contend.
pub struct SingleFlight<T: ?Sized> {
    inner: Mutex<T>,
}

impl<T> SingleFlight<T> {
    pub fn new(model: T) -> Self {
        Self {
            inner: Mutex::new(model),
        }
    }

    /// Run one call against the model under the instance lock.
    pub fn invoke<R>(&self, call: impl FnOnce(&mut T) -> R) -> R {
        let mut model = self.inner.lock();
        call(&mut model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn boxed(x: u32, y: u32, w: u32, h: u32, confidence: f32, class_id: u32) -> DetectionBox {
        DetectionBox {
            x,
            y,
            w,
            h,
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_sentinel_truncates_valid_prefix() {
        let result = DetectionResult::from_raw([
            boxed(0, 0, 10, 10, 0.9, 0),
            boxed(5, 5, 10, 10, 0.8, 1),
            boxed(0, 0, 0, 0, 0.0, 0),
            boxed(9, 9, 10, 10, 0.99, 0),
        ]);

        assert_eq!(result.len(), 2);
        assert_eq!(result.boxes()[1].x, 5);
    }

    #[test]
    fn test_result_is_bounded() {
        let raw = (0..2000).map(|i| boxed(i, 0, 10, 10, 0.5, 0));
        let result = DetectionResult::from_raw(raw);
        assert_eq!(result.len(), MAX_DETECTIONS);
    }

    #[test]
    fn test_accepted_filters_below_threshold() {
        let result = DetectionResult::from_raw([
            boxed(0, 0, 10, 10, 0.9, 0),
            boxed(1, 0, 10, 10, 0.1, 0),
            boxed(2, 0, 10, 10, 0.25, 1),
        ]);

        let accepted = result.accepted(0.25);
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].x, 0);
        assert_eq!(accepted[1].x, 2);
    }

    #[test]
    fn test_region_class_split() {
        assert_eq!(RegionClass::of(0), RegionClass::PlateBody);
        assert_eq!(RegionClass::of(1), RegionClass::IdPlate);
        assert_eq!(RegionClass::of(4), RegionClass::IdPlate);
    }

    /// Instrumented model that trips a flag if two calls ever overlap.
    struct ReentrancyProbe {
        in_flight: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl ReentrancyProbe {
        fn call(&mut self) {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(5));
            self.in_flight.store(false, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_single_flight_calls_never_overlap() {
        let in_flight = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        let gate = Arc::new(SingleFlight::new(ReentrancyProbe {
            in_flight,
            overlapped: overlapped.clone(),
            calls: calls.clone(),
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.invoke(|probe| probe.call()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert!(!overlapped.load(Ordering::SeqCst));
    }
}
