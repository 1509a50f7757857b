//! facegate-core: face verification, registration and liveness pipeline.
//!
//! SCRFD locates faces, ArcFace turns them into signatures and MiniFASNet
//! judges liveness, all through ONNX Runtime on the CPU. The orchestrators only
//! see the capability traits, so any backend can be swapped in.

pub mod alignment;
pub mod antispoof;
pub mod capability;
pub mod codec;
pub mod detector;
pub mod extractor;
pub mod gate;
pub mod identity;
pub mod liveness;
pub mod locator;
pub mod matcher;
pub mod recognizer;
pub mod registration;
pub mod service;
pub mod types;
pub mod verification;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

pub use capability::{CapabilityError, FaceDetector, FaceEmbedder, SpoofClassifier};
pub use codec::{ChannelOrder, CodecError, ImageCodec, RasterImage};
pub use identity::{AuthenticationOutcome, IdentityOrchestrator, IdentityRegistrationOutcome};
pub use liveness::LivenessEngine;
pub use matcher::{MatchEngine, MatchError};
pub use registration::{RegistrationOrchestrator, RegistrationOutcome};
pub use service::{DetectionOutcome, FaceAuthService, HealthReport, PipelineConfig, ServiceError};
pub use types::{BoundingBox, FaceSignature, LivenessMethod, LivenessResult, MatchResult};
pub use verification::{VerificationOrchestrator, VerificationOutcome};

/// `$XDG_DATA_HOME/facegate/models`, or `~/.local/share/facegate/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate/models")
}
