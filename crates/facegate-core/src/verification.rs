use serde::Serialize;

use crate::codec::RasterImage;
use crate::gate::{FaceGate, FaceGateFailure};
use crate::matcher::{MatchEngine, MatchError};
use crate::types::{BoundingBox, FaceSignature, MatchResult};

/// Result of checking one image against a stored signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    /// The pipeline produced a comparison. Says nothing about whether it matched.
    pub success: bool,
    #[serde(rename = "match")]
    pub is_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    pub faces_detected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_location: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FaceGateFailure>,
    pub message: String,
}

impl VerificationOutcome {
    fn failed(failure: FaceGateFailure) -> Self {
        Self {
            success: false,
            is_match: false,
            distance: None,
            confidence: 0.0,
            threshold: None,
            faces_detected: failure.faces_detected(),
            face_location: None,
            message: failure.message(),
            failure: Some(failure),
        }
    }

    fn compared(result: MatchResult, location: BoundingBox) -> Self {
        Self {
            success: true,
            is_match: result.is_match,
            distance: Some(result.distance),
            confidence: result.confidence,
            threshold: Some(result.threshold),
            faces_detected: 1,
            face_location: Some(location),
            failure: None,
            message: result.message,
        }
    }
}

/// Single-face verify: gate, encode, compare.
#[derive(Clone)]
pub struct VerificationOrchestrator {
    gate: FaceGate,
    matcher: MatchEngine,
    threshold: f32,
}

impl VerificationOrchestrator {
    pub fn new(gate: FaceGate, threshold: f32) -> Self {
        Self {
            gate,
            matcher: MatchEngine,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Compare the single face in `image` against `reference`.
    ///
    /// Face-count and encoding problems are reported in the outcome. A
    /// signature length or model mismatch is returned as an error: it means
    /// the stored reference came from a different embedding model.
    pub fn verify(
        &self,
        image: &RasterImage,
        reference: &FaceSignature,
    ) -> Result<VerificationOutcome, MatchError> {
        let face = match self.gate.single_face(image) {
            Ok(face) => face,
            Err(failure) => {
                tracing::debug!(?failure, "verification rejected at face gate");
                return Ok(VerificationOutcome::failed(failure));
            }
        };

        let result = self
            .matcher
            .compare(reference, &face.signature, self.threshold)?;
        tracing::info!(
            is_match = result.is_match,
            distance = result.distance,
            "verification complete"
        );
        Ok(VerificationOutcome::compared(result, face.location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::SignatureExtractor;
    use crate::locator::FaceLocator;
    use crate::matcher::DEFAULT_MATCH_THRESHOLD;
    use crate::testing::{gray_image, FakeDetector, FakeEmbedder};
    use std::sync::Arc;

    fn orchestrator(detector: FakeDetector, embedder: FakeEmbedder) -> VerificationOrchestrator {
        let locator = FaceLocator::new(Arc::new(detector));
        let extractor = SignatureExtractor::new(Arc::new(embedder), locator.clone());
        VerificationOrchestrator::new(FaceGate::new(locator, extractor), DEFAULT_MATCH_THRESHOLD)
    }

    fn reference(values: &[f32]) -> FaceSignature {
        FaceSignature::from(values.to_vec())
    }

    #[test]
    fn test_verify_match() {
        let v = orchestrator(FakeDetector::faces(1), FakeEmbedder::Fixed(vec![0.1, 0.2, 0.3]));
        let outcome = v.verify(&gray_image(100, 100), &reference(&[0.1, 0.2, 0.3])).unwrap();
        assert!(outcome.success);
        assert!(outcome.is_match);
        assert_eq!(outcome.distance, Some(0.0));
        assert_eq!(outcome.confidence, 1.0);
        assert_eq!(outcome.faces_detected, 1);
        assert!(outcome.face_location.is_some());
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn test_verify_non_match_is_still_success() {
        let v = orchestrator(FakeDetector::faces(1), FakeEmbedder::Fixed(vec![1.0, 1.0, 1.0]));
        let outcome = v.verify(&gray_image(100, 100), &reference(&[0.0, 0.0, 0.0])).unwrap();
        assert!(outcome.success);
        assert!(!outcome.is_match);
        assert!(outcome.message.starts_with("Face does not match"));
    }

    #[test]
    fn test_verify_no_face_regardless_of_reference() {
        let v = orchestrator(FakeDetector::empty(), FakeEmbedder::FromPixels);
        for r in [reference(&[]), reference(&[0.5; 3]), reference(&[9.0; 512])] {
            let outcome = v.verify(&gray_image(100, 100), &r).unwrap();
            assert!(!outcome.success);
            assert!(!outcome.is_match);
            assert_eq!(outcome.faces_detected, 0);
            assert_eq!(outcome.message, "No face detected in image");
        }
    }

    #[test]
    fn test_verify_two_faces() {
        let v = orchestrator(FakeDetector::faces(2), FakeEmbedder::FromPixels);
        let outcome = v.verify(&gray_image(100, 100), &reference(&[0.5; 3])).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.faces_detected, 2);
        assert!(outcome.message.contains('2'));
        assert_eq!(outcome.failure, Some(FaceGateFailure::MultipleFaces { count: 2 }));
    }

    #[test]
    fn test_verify_encode_failure() {
        let v = orchestrator(FakeDetector::faces(1), FakeEmbedder::Rejecting);
        let outcome = v.verify(&gray_image(100, 100), &reference(&[0.5; 3])).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.faces_detected, 1);
        assert_eq!(outcome.message, "Failed to encode detected face");
    }

    #[test]
    fn test_verify_dimension_mismatch_is_error() {
        let v = orchestrator(FakeDetector::faces(1), FakeEmbedder::FromPixels);
        let err = v.verify(&gray_image(100, 100), &reference(&[0.5; 128])).unwrap_err();
        assert!(matches!(err, MatchError::DimensionMismatch { reference: 128, candidate: 3 }));
    }

    #[test]
    fn test_outcome_json_shape() {
        let v = orchestrator(FakeDetector::faces(1), FakeEmbedder::Fixed(vec![0.0, 0.0]));
        let outcome = v.verify(&gray_image(100, 100), &reference(&[0.0, 0.0])).unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["match"], true);
        assert_eq!(json["faces_detected"], 1);
        assert!(json.get("failure").is_none());
    }
}
