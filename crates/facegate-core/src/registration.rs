use serde::Serialize;

use crate::codec::RasterImage;
use crate::gate::{FaceGate, FaceGateFailure};
use crate::types::{BoundingBox, FaceSignature};

/// Result of enrolling the face in one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationOutcome {
    pub success: bool,
    #[serde(flatten, serialize_with = "crate::types::serialize_encoding")]
    pub signature: Option<FaceSignature>,
    /// Signature values as a JSON array, ready for storage.
    pub encoding_json: Option<String>,
    pub faces_detected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_location: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FaceGateFailure>,
    pub message: String,
}

/// Single-face enrollment: gate and encode. Persisting the signature is the
/// caller's job.
#[derive(Clone)]
pub struct RegistrationOrchestrator {
    gate: FaceGate,
}

impl RegistrationOrchestrator {
    pub fn new(gate: FaceGate) -> Self {
        Self { gate }
    }

    pub fn register(&self, image: &RasterImage) -> RegistrationOutcome {
        match self.gate.single_face(image) {
            Ok(face) => {
                tracing::info!(dim = face.signature.len(), "face registered");
                RegistrationOutcome {
                    success: true,
                    encoding_json: Some(face.signature.to_json()),
                    signature: Some(face.signature),
                    faces_detected: 1,
                    face_location: Some(face.location),
                    failure: None,
                    message: "Face registered successfully".to_string(),
                }
            }
            Err(failure) => {
                tracing::debug!(?failure, "registration rejected at face gate");
                RegistrationOutcome {
                    success: false,
                    signature: None,
                    encoding_json: None,
                    faces_detected: failure.faces_detected(),
                    face_location: None,
                    message: failure.message(),
                    failure: Some(failure),
                }
            }
        }
    }
}
