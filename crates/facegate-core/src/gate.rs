//! The "exactly one face" rule shared by verification and registration.

use serde::Serialize;

use crate::codec::RasterImage;
use crate::extractor::SignatureExtractor;
use crate::locator::FaceLocator;
use crate::types::{BoundingBox, FaceSignature};

/// Why an image could not yield the single face an operation needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaceGateFailure {
    NoFace,
    MultipleFaces { count: usize },
    EncodeFailed { reason: String },
}

impl FaceGateFailure {
    pub fn faces_detected(&self) -> usize {
        match self {
            FaceGateFailure::NoFace => 0,
            FaceGateFailure::MultipleFaces { count } => *count,
            FaceGateFailure::EncodeFailed { .. } => 1,
        }
    }

    /// User-facing explanation.
    pub fn message(&self) -> String {
        match self {
            FaceGateFailure::NoFace => "No face detected in image".to_string(),
            FaceGateFailure::MultipleFaces { count } => format!(
                "Multiple faces detected ({count}). Please ensure only one face is visible."
            ),
            FaceGateFailure::EncodeFailed { .. } => "Failed to encode detected face".to_string(),
        }
    }
}

/// The one face found in an image, with its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct GatedFace {
    pub location: BoundingBox,
    pub signature: FaceSignature,
}

/// Locates faces, insists on exactly one, and encodes it.
///
/// Never guesses which face is meant: zero or several faces are failures.
#[derive(Clone)]
pub struct FaceGate {
    locator: FaceLocator,
    extractor: SignatureExtractor,
}

impl FaceGate {
    pub fn new(locator: FaceLocator, extractor: SignatureExtractor) -> Self {
        Self { locator, extractor }
    }

    pub fn single_face(&self, image: &RasterImage) -> Result<GatedFace, FaceGateFailure> {
        let mut faces = self.locator.locate(image);
        let location = match faces.len() {
            0 => return Err(FaceGateFailure::NoFace),
            1 => faces.remove(0),
            count => return Err(FaceGateFailure::MultipleFaces { count }),
        };

        let signature = self
            .extractor
            .extract(image, Some(&location))
            .map_err(|e| FaceGateFailure::EncodeFailed {
                reason: e.to_string(),
            })?;

        Ok(GatedFace {
            location,
            signature,
        })
    }
}
