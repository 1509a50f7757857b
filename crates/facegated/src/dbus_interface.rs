use std::future::Future;

use facegate_core::FaceSignature;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;
use zbus::{fdo, interface};

use crate::engine::{EngineError, EngineHandle};

pub const BUS_NAME: &str = "org.facegate.FaceGate1";
pub const OBJECT_PATH: &str = "/org/facegate/FaceGate1";

/// D-Bus interface for the Facegate identity daemon.
///
/// Images travel as base64 text, with or without a `data:` URI prefix.
/// Every method answers with a JSON document. Bad input is reported as
/// `InvalidArgs`; model, configuration and timeout faults as `Failed`.
pub struct FaceGateService {
    engine: EngineHandle,
}

impl FaceGateService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.facegate.FaceGate1")]
impl FaceGateService {
    /// Locate every face in the image.
    async fn detect(&self, image: String) -> fdo::Result<String> {
        dispatch("detect", self.engine.detect(image)).await
    }

    /// Produce a signature for the single face in the image, without a
    /// liveness check.
    async fn encode(&self, image: String) -> fdo::Result<String> {
        dispatch("encode", self.engine.encode(image)).await
    }

    /// Compare the single face in the image against a stored signature.
    async fn verify(&self, image: String, known_encoding: Vec<f64>) -> fdo::Result<String> {
        dispatch("verify", self.engine.verify(image, reference(known_encoding))).await
    }

    /// Judge whether the image shows a live face.
    async fn anti_spoof(&self, image: String) -> fdo::Result<String> {
        dispatch("anti_spoof", self.engine.anti_spoof(image)).await
    }

    /// Liveness check, then enrollment of the single face.
    async fn register(&self, image: String) -> fdo::Result<String> {
        dispatch("register", self.engine.register(image)).await
    }

    /// Liveness check, then verification against a stored signature.
    async fn authenticate(&self, image: String, known_encoding: Vec<f64>) -> fdo::Result<String> {
        dispatch(
            "authenticate",
            self.engine.authenticate(image, reference(known_encoding)),
        )
        .await
    }

    /// Majority-vote liveness over a sequence of frames.
    async fn analyze_frames(&self, images: Vec<String>) -> fdo::Result<String> {
        dispatch("analyze_frames", self.engine.analyze_frames(images)).await
    }

    /// Daemon version and active thresholds.
    async fn health(&self) -> fdo::Result<String> {
        let report = self.engine.health();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "status": report.status,
            "config": report.config,
        })
        .to_string())
    }
}

/// Transport signatures carry no model version; only the length is checked.
fn reference(values: Vec<f64>) -> FaceSignature {
    FaceSignature::from(values.into_iter().map(|v| v as f32).collect::<Vec<_>>())
}

/// Run one request inside a span carrying a fresh request id and render the
/// result as JSON.
async fn dispatch<T: Serialize>(
    method: &'static str,
    request: impl Future<Output = Result<T, EngineError>>,
) -> fdo::Result<String> {
    let span = tracing::info_span!("request", id = %Uuid::new_v4(), method);
    async move {
        tracing::debug!("request received");
        match request.await {
            Ok(outcome) => {
                tracing::info!("request completed");
                serde_json::to_string(&outcome).map_err(|e| fdo::Error::Failed(e.to_string()))
            }
            Err(e) => {
                let err = to_fdo(e);
                tracing::warn!(error = %err, "request failed");
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

fn to_fdo(err: EngineError) -> fdo::Error {
    match &err {
        EngineError::Service(e) if e.is_user_error() => fdo::Error::InvalidArgs(err.to_string()),
        _ => fdo::Error::Failed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::matcher::MatchError;
    use facegate_core::ServiceError;
    use std::time::Duration;

    #[test]
    fn test_user_errors_are_invalid_args() {
        let err = to_fdo(EngineError::Service(ServiceError::TooSmall {
            width: 10,
            height: 10,
            min: 80,
        }));
        assert!(matches!(err, fdo::Error::InvalidArgs(ref m) if m.contains("Minimum size: 80x80")));
        assert!(matches!(
            to_fdo(EngineError::Service(ServiceError::NoFrames)),
            fdo::Error::InvalidArgs(_)
        ));
    }

    #[test]
    fn test_faults_are_failed() {
        let mismatch = EngineError::Service(ServiceError::Mismatch(
            MatchError::DimensionMismatch {
                reference: 128,
                candidate: 512,
            },
        ));
        assert!(matches!(to_fdo(mismatch), fdo::Error::Failed(_)));
        assert!(matches!(
            to_fdo(EngineError::Timeout(Duration::from_secs(30))),
            fdo::Error::Failed(_)
        ));
        assert!(matches!(to_fdo(EngineError::ChannelClosed), fdo::Error::Failed(_)));
    }

    #[test]
    fn test_reference_from_doubles() {
        let sig = reference(vec![0.25, -1.5]);
        assert_eq!(sig.values, vec![0.25f32, -1.5]);
        assert!(sig.model_version.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_renders_json() {
        let json = dispatch("detect", async {
            Ok::<_, EngineError>(serde_json::json!({ "faces_detected": 0 }))
        })
        .await
        .unwrap();
        assert_eq!(json, r#"{"faces_detected":0}"#);
    }
}
