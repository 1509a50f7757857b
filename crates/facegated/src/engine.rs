use std::sync::Arc;
use std::time::Duration;

use facegate_core::{
    AuthenticationOutcome, DetectionOutcome, FaceAuthService, FaceSignature, HealthReport,
    IdentityRegistrationOutcome, LivenessResult, RegistrationOutcome, ServiceError,
    VerificationOutcome,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests waiting for the engine thread before senders are back-pressured.
const QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: String,
        reply: Reply<DetectionOutcome>,
    },
    Encode {
        image: String,
        reply: Reply<RegistrationOutcome>,
    },
    Verify {
        image: String,
        reference: FaceSignature,
        reply: Reply<VerificationOutcome>,
    },
    AntiSpoof {
        image: String,
        reply: Reply<LivenessResult>,
    },
    Register {
        image: String,
        reply: Reply<IdentityRegistrationOutcome>,
    },
    Authenticate {
        image: String,
        reference: FaceSignature,
        reply: Reply<AuthenticationOutcome>,
    },
    AnalyzeFrames {
        frames: Vec<String>,
        reply: Reply<LivenessResult>,
    },
}

impl EngineRequest {
    fn kind(&self) -> &'static str {
        match self {
            EngineRequest::Detect { .. } => "detect",
            EngineRequest::Encode { .. } => "encode",
            EngineRequest::Verify { .. } => "verify",
            EngineRequest::AntiSpoof { .. } => "anti_spoof",
            EngineRequest::Register { .. } => "register",
            EngineRequest::Authenticate { .. } => "authenticate",
            EngineRequest::AnalyzeFrames { .. } => "analyze_frames",
        }
    }

    /// Run the request and deliver its reply. A caller that gave up (timeout)
    /// has dropped its receiver; that send failure is expected.
    fn execute(self, service: &FaceAuthService) {
        match self {
            EngineRequest::Detect { image, reply } => {
                let _ = reply.send(service.detect(&image));
            }
            EngineRequest::Encode { image, reply } => {
                let _ = reply.send(service.encode(&image));
            }
            EngineRequest::Verify {
                image,
                reference,
                reply,
            } => {
                let _ = reply.send(service.verify(&image, &reference));
            }
            EngineRequest::AntiSpoof { image, reply } => {
                let _ = reply.send(service.anti_spoof(&image));
            }
            EngineRequest::Register { image, reply } => {
                let _ = reply.send(service.register(&image));
            }
            EngineRequest::Authenticate {
                image,
                reference,
                reply,
            } => {
                let _ = reply.send(service.authenticate(&image, &reference));
            }
            EngineRequest::AnalyzeFrames { frames, reply } => {
                let _ = reply.send(service.analyze_frames(&frames));
            }
        }
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    service: Arc<FaceAuthService>,
    timeout: Duration,
}

impl EngineHandle {
    pub async fn detect(&self, image: String) -> Result<DetectionOutcome, EngineError> {
        self.request(|reply| EngineRequest::Detect { image, reply })
            .await
    }

    pub async fn encode(&self, image: String) -> Result<RegistrationOutcome, EngineError> {
        self.request(|reply| EngineRequest::Encode { image, reply })
            .await
    }

    pub async fn verify(
        &self,
        image: String,
        reference: FaceSignature,
    ) -> Result<VerificationOutcome, EngineError> {
        self.request(|reply| EngineRequest::Verify {
            image,
            reference,
            reply,
        })
        .await
    }

    pub async fn anti_spoof(&self, image: String) -> Result<LivenessResult, EngineError> {
        self.request(|reply| EngineRequest::AntiSpoof { image, reply })
            .await
    }

    pub async fn register(
        &self,
        image: String,
    ) -> Result<IdentityRegistrationOutcome, EngineError> {
        self.request(|reply| EngineRequest::Register { image, reply })
            .await
    }

    pub async fn authenticate(
        &self,
        image: String,
        reference: FaceSignature,
    ) -> Result<AuthenticationOutcome, EngineError> {
        self.request(|reply| EngineRequest::Authenticate {
            image,
            reference,
            reply,
        })
        .await
    }

    pub async fn analyze_frames(&self, frames: Vec<String>) -> Result<LivenessResult, EngineError> {
        self.request(|reply| EngineRequest::AnalyzeFrames { frames, reply })
            .await
    }

    /// Thresholds and limits; answered without queueing behind inference.
    pub fn health(&self) -> HealthReport {
        self.service.health()
    }

    /// Queue a request and wait for its reply, bounded by the request timeout.
    /// The deadline covers time spent waiting for a queue slot.
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = build(reply_tx);

        let exchange = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(reply) => Ok(reply??),
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The service is built by the caller, so model loading has already failed
/// fast by the time this runs. Requests are processed one at a time in
/// arrival order.
pub fn spawn_engine(
    service: FaceAuthService,
    timeout: Duration,
) -> std::io::Result<EngineHandle> {
    let service = Arc::new(service);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(QUEUE_DEPTH);

    let worker = Arc::clone(&service);
    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let kind = req.kind();
                let started = std::time::Instant::now();
                req.execute(&worker);
                tracing::debug!(kind, elapsed_ms = started.elapsed().as_millis() as u64, "request done");
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        service,
        timeout,
    })
}
