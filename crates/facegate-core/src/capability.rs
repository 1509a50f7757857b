//! Boundary contracts for the model-backed capabilities the pipeline calls into.
//!
//! Implementations are built once at process start and shared by `Arc` across
//! concurrent requests, so every method takes `&self`.

use thiserror::Error;

use crate::codec::{ChannelOrder, RasterImage};
use crate::types::{BoundingBox, FaceSignature, SpoofAssessment};

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("model file not found: {0} (set FACEGATE_MODEL_DIR or place the model there)")]
    ModelNotFound(String),
    #[error("capability unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("model session lock poisoned")]
    Poisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in a raster.
///
/// An image without faces is an empty result, not an error. Errors are reserved
/// for malformed input or a broken backend.
pub trait FaceDetector: Send + Sync {
    /// Channel order the backend expects its input in.
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    fn detect(&self, image: &RasterImage) -> Result<Vec<BoundingBox>, CapabilityError>;
}

/// Produces a fixed-length signature for one located face.
///
/// `Ok(None)` means the region could not be embedded (occluded, degenerate).
pub trait FaceEmbedder: Send + Sync {
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    fn embed(
        &self,
        image: &RasterImage,
        face: &BoundingBox,
    ) -> Result<Option<FaceSignature>, CapabilityError>;
}

/// Judges whether the faces in a raster are live captures.
///
/// Returns one assessment per face the classifier found; an empty vector is
/// the "no face" signal.
pub trait SpoofClassifier: Send + Sync {
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    fn classify(&self, image: &RasterImage) -> Result<Vec<SpoofAssessment>, CapabilityError>;
}
