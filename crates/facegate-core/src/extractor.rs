use std::sync::Arc;

use thiserror::Error;

use crate::capability::FaceEmbedder;
use crate::codec::{in_order, RasterImage};
use crate::locator::FaceLocator;
use crate::types::{BoundingBox, FaceSignature};

/// A face was located but no signature could be produced for it.
///
/// Distinct from "no face located": the remedy is a clearer shot of the face,
/// not repositioning it in frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeFailure {
    #[error("no face available to encode")]
    NoFace,
    #[error("face box lies outside the image")]
    OutOfBounds,
    #[error("embedder could not produce a signature for the face region")]
    Rejected,
    #[error("embedder failed: {0}")]
    Backend(String),
}

/// Signature extraction stage.
#[derive(Clone)]
pub struct SignatureExtractor {
    embedder: Arc<dyn FaceEmbedder>,
    locator: FaceLocator,
}

impl SignatureExtractor {
    pub fn new(embedder: Arc<dyn FaceEmbedder>, locator: FaceLocator) -> Self {
        Self { embedder, locator }
    }

    /// Signature for `face`, or for the first face found in `image` when no box
    /// is given. The box-less form is for callers that already validated the
    /// face count.
    pub fn extract(
        &self,
        image: &RasterImage,
        face: Option<&BoundingBox>,
    ) -> Result<FaceSignature, EncodeFailure> {
        let located;
        let face = match face {
            Some(face) => face,
            None => {
                located = self.locator.locate(image);
                located.first().ok_or(EncodeFailure::NoFace)?
            }
        };

        if !face.fits(image.width(), image.height()) {
            return Err(EncodeFailure::OutOfBounds);
        }

        let input = in_order(image, self.embedder.channel_order());
        match self.embedder.embed(&input, face) {
            Ok(Some(signature)) if !signature.is_empty() => {
                tracing::debug!(dim = signature.len(), "signature extracted");
                Ok(signature)
            }
            Ok(_) => Err(EncodeFailure::Rejected),
            Err(e) => {
                tracing::warn!(error = %e, "face embedding failed");
                Err(EncodeFailure::Backend(e.to_string()))
            }
        }
    }
}
