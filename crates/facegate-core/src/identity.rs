//! Liveness-gated registration and authentication.
//!
//! Liveness runs first and a failed check short-circuits: no face is located
//! or encoded for an image that did not pass, so a rejected capture can never
//! be enrolled.

use serde::Serialize;

use crate::codec::RasterImage;
use crate::gate::FaceGateFailure;
use crate::liveness::LivenessEngine;
use crate::matcher::MatchError;
use crate::registration::RegistrationOrchestrator;
use crate::types::{BoundingBox, FaceSignature, LivenessResult};
use crate::verification::VerificationOrchestrator;

/// Stage at which a register/authenticate call stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", content = "detail", rename_all = "snake_case")]
pub enum IdentityFailure {
    Liveness,
    Face(FaceGateFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityRegistrationOutcome {
    pub success: bool,
    #[serde(flatten, serialize_with = "crate::types::serialize_encoding")]
    pub signature: Option<FaceSignature>,
    pub encoding_json: Option<String>,
    pub is_real: bool,
    pub anti_spoof_score: f32,
    pub faces_detected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_location: Option<BoundingBox>,
    pub liveness: LivenessResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<IdentityFailure>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticationOutcome {
    /// Both stages ran to a comparison. `is_match` carries the decision.
    pub success: bool,
    #[serde(rename = "match")]
    pub is_match: bool,
    pub is_real: bool,
    /// Match confidence, 0 when no comparison was made.
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub anti_spoof_score: f32,
    pub faces_detected: usize,
    pub liveness: LivenessResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<IdentityFailure>,
    pub message: String,
}

impl AuthenticationOutcome {
    /// Live, single face, and matching: the caller may grant access.
    pub fn is_authenticated(&self) -> bool {
        self.success && self.is_real && self.is_match
    }
}

#[derive(Clone)]
pub struct IdentityOrchestrator {
    liveness: LivenessEngine,
    registration: RegistrationOrchestrator,
    verification: VerificationOrchestrator,
}

impl IdentityOrchestrator {
    pub fn new(
        liveness: LivenessEngine,
        registration: RegistrationOrchestrator,
        verification: VerificationOrchestrator,
    ) -> Self {
        Self {
            liveness,
            registration,
            verification,
        }
    }

    pub fn liveness(&self) -> &LivenessEngine {
        &self.liveness
    }

    pub fn registration(&self) -> &RegistrationOrchestrator {
        &self.registration
    }

    pub fn verification(&self) -> &VerificationOrchestrator {
        &self.verification
    }

    pub fn register(&self, image: &RasterImage) -> IdentityRegistrationOutcome {
        let liveness = self.liveness.check_liveness(image);
        let anti_spoof_score = liveness.confidence;

        if !liveness.is_real {
            tracing::info!(score = anti_spoof_score, "registration refused: liveness");
            return IdentityRegistrationOutcome {
                success: false,
                signature: None,
                encoding_json: None,
                is_real: false,
                anti_spoof_score,
                faces_detected: 0,
                face_location: None,
                message: format!("Registration failed: {}", liveness.message),
                liveness,
                failure: Some(IdentityFailure::Liveness),
            };
        }

        let outcome = self.registration.register(image);
        if let Some(failure) = outcome.failure {
            return IdentityRegistrationOutcome {
                success: false,
                signature: None,
                encoding_json: None,
                is_real: true,
                anti_spoof_score,
                faces_detected: outcome.faces_detected,
                face_location: None,
                liveness,
                failure: Some(IdentityFailure::Face(failure)),
                message: outcome.message,
            };
        }

        IdentityRegistrationOutcome {
            success: true,
            signature: outcome.signature,
            encoding_json: outcome.encoding_json,
            is_real: true,
            anti_spoof_score,
            faces_detected: 1,
            face_location: outcome.face_location,
            liveness,
            failure: None,
            message: "Face registered successfully with liveness confirmation".to_string(),
        }
    }

    /// Liveness, then verification against `reference`.
    ///
    /// Errors only on a reference/candidate signature mismatch (a configuration
    /// fault, not a user error).
    pub fn authenticate(
        &self,
        image: &RasterImage,
        reference: &FaceSignature,
    ) -> Result<AuthenticationOutcome, MatchError> {
        let liveness = self.liveness.check_liveness(image);
        let anti_spoof_score = liveness.confidence;

        if !liveness.is_real {
            tracing::info!(score = anti_spoof_score, "authentication refused: liveness");
            return Ok(AuthenticationOutcome {
                success: false,
                is_match: false,
                is_real: false,
                confidence: 0.0,
                distance: None,
                anti_spoof_score,
                faces_detected: 0,
                message: format!("Authentication failed: {}", liveness.message),
                liveness,
                failure: Some(IdentityFailure::Liveness),
            });
        }

        let outcome = self.verification.verify(image, reference)?;
        if let Some(failure) = outcome.failure {
            return Ok(AuthenticationOutcome {
                success: false,
                is_match: false,
                is_real: true,
                confidence: 0.0,
                distance: None,
                anti_spoof_score,
                faces_detected: outcome.faces_detected,
                liveness,
                failure: Some(IdentityFailure::Face(failure)),
                message: outcome.message,
            });
        }

        let message = if outcome.is_match {
            "Authenticated successfully"
        } else {
            "Face does not match"
        };
        tracing::info!(is_match = outcome.is_match, "authentication complete");

        Ok(AuthenticationOutcome {
            success: true,
            is_match: outcome.is_match,
            is_real: true,
            confidence: outcome.confidence,
            distance: outcome.distance,
            anti_spoof_score,
            faces_detected: 1,
            liveness,
            failure: None,
            message: message.to_string(),
        })
    }
}
