use std::sync::Arc;

use crate::capability::FaceDetector;
use crate::codec::{in_order, RasterImage};
use crate::types::BoundingBox;

/// Face location stage.
///
/// Detector failures collapse into "no faces": downstream code has a single
/// zero-face path regardless of why nothing was found.
#[derive(Clone)]
pub struct FaceLocator {
    detector: Arc<dyn FaceDetector>,
}

impl FaceLocator {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self { detector }
    }

    /// Boxes in detector order. Callers must not rely on that order for identity.
    pub fn locate(&self, image: &RasterImage) -> Vec<BoundingBox> {
        let input = in_order(image, self.detector.channel_order());
        match self.detector.detect(&input) {
            Ok(boxes) => {
                let total = boxes.len();
                let kept: Vec<BoundingBox> = boxes
                    .into_iter()
                    .filter(|b| b.fits(image.width(), image.height()))
                    .collect();
                if kept.len() < total {
                    tracing::debug!(
                        dropped = total - kept.len(),
                        "discarded boxes outside the raster"
                    );
                }
                tracing::debug!(faces = kept.len(), "faces located");
                kept
            }
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; treating as no face");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gray_image, FakeDetector};

    #[test]
    fn test_locate_passes_boxes_through() {
        let boxes = vec![BoundingBox::new(10, 50, 60, 5), BoundingBox::new(0, 90, 40, 60)];
        let locator = FaceLocator::new(Arc::new(FakeDetector::with_boxes(boxes.clone())));
        assert_eq!(locator.locate(&gray_image(100, 100)), boxes);
    }

    #[test]
    fn test_detector_failure_is_zero_faces() {
        let locator = FaceLocator::new(Arc::new(FakeDetector::failing()));
        assert!(locator.locate(&gray_image(100, 100)).is_empty());
    }

    #[test]
    fn test_out_of_bounds_boxes_dropped() {
        let boxes = vec![BoundingBox::new(10, 50, 60, 5), BoundingBox::new(0, 150, 40, 60)];
        let locator = FaceLocator::new(Arc::new(FakeDetector::with_boxes(boxes)));
        let located = locator.locate(&gray_image(100, 100));
        assert_eq!(located, vec![BoundingBox::new(10, 50, 60, 5)]);
    }
}
