//! Transport-facing operations over encoded image payloads.
//!
//! Every operation decodes the payload, refuses rasters below the minimum
//! dimension before any model runs, bounds oversized rasters, then hands the
//! raster to the pipeline.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::antispoof::{MiniFasNetClassifier, MINIFASNET_MODEL_FILE};
use crate::capability::{CapabilityError, FaceDetector, FaceEmbedder, SpoofClassifier};
use crate::detector::{ScrfdDetector, SCRFD_MODEL_FILE};
use crate::codec::{validate_minimum_size, CodecError, ImageCodec, RasterImage};
use crate::extractor::SignatureExtractor;
use crate::gate::FaceGate;
use crate::identity::{AuthenticationOutcome, IdentityOrchestrator, IdentityRegistrationOutcome};
use crate::liveness::{LivenessEngine, LivenessError, DEFAULT_LIVENESS_THRESHOLD};
use crate::locator::FaceLocator;
use crate::matcher::{MatchError, DEFAULT_MATCH_THRESHOLD};
use crate::recognizer::{ArcFaceEmbedder, ARCFACE_MODEL_FILE};
use crate::registration::{RegistrationOrchestrator, RegistrationOutcome};
use crate::types::{BoundingBox, FaceSignature, LivenessResult};
use crate::verification::{VerificationOrchestrator, VerificationOutcome};

/// Default minimum image side, in pixels.
pub const DEFAULT_MIN_DIMENSION: u32 = 80;
/// Default bound on the longer image side; larger rasters are downscaled.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid image: {0}")]
    Decode(#[from] CodecError),
    #[error("Image too small. Minimum size: {min}x{min} (got {width}x{height})")]
    TooSmall { width: u32, height: u32, min: u32 },
    #[error("no frames provided")]
    NoFrames,
    #[error("reference signature is incompatible: {0}")]
    Mismatch(#[from] MatchError),
    #[error("liveness check failed: {0}")]
    Liveness(#[source] LivenessError),
}

impl ServiceError {
    /// Whether resubmitting different input can fix this. Signature mismatches
    /// and classifier faults are deployment problems instead.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, ServiceError::Mismatch(_) | ServiceError::Liveness(_))
    }
}

impl From<LivenessError> for ServiceError {
    fn from(e: LivenessError) -> Self {
        match e {
            LivenessError::NoFrames => ServiceError::NoFrames,
            other => ServiceError::Liveness(other),
        }
    }
}

/// Decision parameters shared by every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub match_threshold: f32,
    pub liveness_threshold: f32,
    pub min_dimension: u32,
    /// 0 disables downscaling.
    pub max_dimension: u32,
    pub liveness_single_face: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            liveness_threshold: DEFAULT_LIVENESS_THRESHOLD,
            min_dimension: DEFAULT_MIN_DIMENSION,
            max_dimension: DEFAULT_MAX_DIMENSION,
            liveness_single_face: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionOutcome {
    pub success: bool,
    pub faces_detected: usize,
    pub face_locations: Vec<BoundingBox>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub config: PipelineConfig,
}

/// Full pipeline over shared capability handles.
pub struct FaceAuthService {
    config: PipelineConfig,
    locator: FaceLocator,
    identity: IdentityOrchestrator,
}

impl FaceAuthService {
    pub fn new(
        config: PipelineConfig,
        detector: Arc<dyn FaceDetector>,
        embedder: Arc<dyn FaceEmbedder>,
        classifier: Arc<dyn SpoofClassifier>,
    ) -> Self {
        let locator = FaceLocator::new(detector);
        let extractor = SignatureExtractor::new(embedder, locator.clone());
        let gate = FaceGate::new(locator.clone(), extractor);
        let liveness = LivenessEngine::new(classifier, config.liveness_threshold)
            .with_single_face(config.liveness_single_face);

        let identity = IdentityOrchestrator::new(
            liveness,
            RegistrationOrchestrator::new(gate.clone()),
            VerificationOrchestrator::new(gate, config.match_threshold),
        );

        Self {
            config,
            locator,
            identity,
        }
    }

    /// Load the ONNX backends from `model_dir`. Fails fast if any model file
    /// is missing or unloadable.
    pub fn from_model_dir(config: PipelineConfig, model_dir: &Path) -> Result<Self, CapabilityError> {
        let detector: Arc<dyn FaceDetector> =
            Arc::new(ScrfdDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?);
        let embedder = Arc::new(ArcFaceEmbedder::load(&model_dir.join(ARCFACE_MODEL_FILE))?);
        let classifier = Arc::new(MiniFasNetClassifier::load(
            &model_dir.join(MINIFASNET_MODEL_FILE),
            detector.clone(),
        )?);
        Ok(Self::new(config, detector, embedder, classifier))
    }

    /// Active limits, with thresholds read back from the engines that apply
    /// them.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            config: PipelineConfig {
                match_threshold: self.identity.verification().threshold(),
                liveness_threshold: self.identity.liveness().threshold(),
                ..self.config.clone()
            },
        }
    }

    pub fn detect(&self, payload: &str) -> Result<DetectionOutcome, ServiceError> {
        let image = self.load(payload)?;
        let faces = self.locator.locate(&image);
        Ok(DetectionOutcome {
            success: true,
            faces_detected: faces.len(),
            message: format!("Detected {} face(s)", faces.len()),
            face_locations: faces,
        })
    }

    /// Registration without the liveness step.
    pub fn encode(&self, payload: &str) -> Result<RegistrationOutcome, ServiceError> {
        let image = self.load(payload)?;
        Ok(self.identity.registration().register(&image))
    }

    pub fn verify(
        &self,
        payload: &str,
        reference: &FaceSignature,
    ) -> Result<VerificationOutcome, ServiceError> {
        let image = self.load(payload)?;
        Ok(self.identity.verification().verify(&image, reference)?)
    }

    pub fn anti_spoof(&self, payload: &str) -> Result<LivenessResult, ServiceError> {
        let image = self.load(payload)?;
        Ok(self.identity.liveness().check_liveness(&image))
    }

    pub fn register(&self, payload: &str) -> Result<IdentityRegistrationOutcome, ServiceError> {
        let image = self.load(payload)?;
        Ok(self.identity.register(&image))
    }

    pub fn authenticate(
        &self,
        payload: &str,
        reference: &FaceSignature,
    ) -> Result<AuthenticationOutcome, ServiceError> {
        let image = self.load(payload)?;
        Ok(self.identity.authenticate(&image, reference)?)
    }

    /// Majority-vote liveness over several frames. Any undecodable or
    /// undersized frame fails the whole request.
    pub fn analyze_frames(&self, payloads: &[String]) -> Result<LivenessResult, ServiceError> {
        let frames = payloads
            .iter()
            .map(|p| self.load(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.identity.liveness().analyze_frames(&frames)?)
    }

    fn load(&self, payload: &str) -> Result<RasterImage, ServiceError> {
        let image = ImageCodec::decode(payload)?;
        let min = self.config.min_dimension;
        if !validate_minimum_size(&image, min) {
            return Err(ServiceError::TooSmall {
                width: image.width(),
                height: image.height(),
                min,
            });
        }
        Ok(image.downscale_to(self.config.max_dimension, min))
    }
}
