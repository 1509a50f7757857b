//! Liveness (anti-spoofing) scoring.
//!
//! Each call makes one attempt with the external spoof classifier. If that
//! attempt fails outright, a Laplacian-variance sharpness heuristic scores the
//! image instead. The heuristic is a much weaker signal; results produced by it
//! say so in their message and carry the classifier error for diagnosis.

use std::sync::Arc;

use thiserror::Error;

use crate::capability::{CapabilityError, SpoofClassifier};
use crate::codec::{in_order, RasterImage};
use crate::types::{LivenessMethod, LivenessResult};

/// Default minimum live-capture score.
pub const DEFAULT_LIVENESS_THRESHOLD: f32 = 0.8;

/// Laplacian variance that maps to a fallback score of 1.0.
const FALLBACK_VARIANCE_SCALE: f64 = 1000.0;

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("spoof classifier failed: {0}")]
    Classifier(#[from] CapabilityError),
    #[error("spoof classifier returned a non-finite score")]
    InvalidScore,
    #[error("no frames provided")]
    NoFrames,
}

/// Liveness stage: primary classifier with a one-shot sharpness fallback.
#[derive(Clone)]
pub struct LivenessEngine {
    classifier: Arc<dyn SpoofClassifier>,
    threshold: f32,
    single_face: bool,
}

impl LivenessEngine {
    pub fn new(classifier: Arc<dyn SpoofClassifier>, threshold: f32) -> Self {
        Self {
            classifier,
            threshold,
            single_face: false,
        }
    }

    /// Reject frames in which the classifier sees more than one face, instead
    /// of judging only the first one.
    pub fn with_single_face(mut self, single_face: bool) -> Self {
        self.single_face = single_face;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score one image, falling back to the sharpness heuristic if the
    /// classifier fails.
    pub fn check_liveness(&self, image: &RasterImage) -> LivenessResult {
        match self.primary(image) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "primary liveness check failed; using fallback");
                self.fallback(image, &e.to_string())
            }
        }
    }

    /// Classifier path only. An error here is what triggers the fallback.
    pub fn primary(&self, image: &RasterImage) -> Result<LivenessResult, LivenessError> {
        let input = in_order(image, self.classifier.channel_order());
        let assessments = self.classifier.classify(&input)?;

        let Some(first) = assessments.first() else {
            return Ok(self.rejected("No face detected".to_string()));
        };

        if self.single_face && assessments.len() > 1 {
            return Ok(self.rejected(format!(
                "Multiple faces detected ({}). Please ensure only one face is visible.",
                assessments.len()
            )));
        }

        if !first.score.is_finite() {
            return Err(LivenessError::InvalidScore);
        }
        let score = first.score.clamp(0.0, 1.0);
        let passes_threshold = score >= self.threshold;

        tracing::debug!(
            faces = assessments.len(),
            classifier_real = first.is_real,
            score,
            threshold = self.threshold,
            "liveness classified"
        );

        Ok(LivenessResult {
            is_real: first.is_real && passes_threshold,
            confidence: score,
            score,
            message: self.classifier_message(first.is_real, passes_threshold, score),
            method: LivenessMethod::Primary,
            fallback_reason: None,
        })
    }

    /// Sharpness heuristic: normalised Laplacian variance of the luma plane.
    pub fn fallback(&self, image: &RasterImage, reason: &str) -> LivenessResult {
        let gray = image.to_grayscale();
        let Some(variance) =
            laplacian_variance(&gray, image.width() as usize, image.height() as usize)
        else {
            return LivenessResult {
                is_real: false,
                confidence: 0.0,
                score: 0.0,
                message: "Anti-spoofing failed: image has no pixels".to_string(),
                method: LivenessMethod::Fallback,
                fallback_reason: Some(reason.to_string()),
            };
        };

        let score = (variance / FALLBACK_VARIANCE_SCALE).min(1.0) as f32;
        let is_real = score >= self.threshold;
        tracing::debug!(variance, score, is_real, "fallback liveness scored");

        LivenessResult {
            is_real,
            confidence: score,
            score,
            message: format!("Fallback method used. Score: {score:.2}. Original error: {reason}"),
            method: LivenessMethod::Fallback,
            fallback_reason: Some(reason.to_string()),
        }
    }

    /// Score each frame independently and combine: mean confidence, strict
    /// majority vote for `is_real`.
    ///
    /// Frames share no state, so motion between them is not considered.
    pub fn analyze_frames(&self, frames: &[RasterImage]) -> Result<LivenessResult, LivenessError> {
        if frames.is_empty() {
            return Err(LivenessError::NoFrames);
        }

        let results: Vec<LivenessResult> = frames.iter().map(|f| self.check_liveness(f)).collect();
        let total = results.len();
        let real_count = results.iter().filter(|r| r.is_real).count();
        let confidence = results.iter().map(|r| r.confidence).sum::<f32>() / total as f32;
        let fallback_reason = results.iter().find_map(|r| r.fallback_reason.clone());
        let method = if fallback_reason.is_some() {
            LivenessMethod::Fallback
        } else {
            LivenessMethod::Primary
        };

        tracing::debug!(frames = total, real_count, confidence, "liveness frames aggregated");

        Ok(LivenessResult {
            is_real: real_count * 2 > total,
            confidence,
            score: confidence,
            message: format!("Analyzed {total} frames. Real: {real_count}/{total}"),
            method,
            fallback_reason,
        })
    }

    fn rejected(&self, message: String) -> LivenessResult {
        LivenessResult {
            is_real: false,
            confidence: 0.0,
            score: 0.0,
            message,
            method: LivenessMethod::Primary,
            fallback_reason: None,
        }
    }

    fn classifier_message(&self, is_real: bool, passes_threshold: bool, score: f32) -> String {
        match (is_real, passes_threshold) {
            (true, true) => format!("Live face detected (confidence: {score:.2})"),
            (true, false) => format!(
                "Face detected but confidence too low ({score:.2} < {})",
                self.threshold
            ),
            (false, _) => format!("Spoofed face detected (score: {score:.2})"),
        }
    }
}

/// Population variance of the 4-neighbour Laplacian over a grayscale plane,
/// with borders reflected about the edge pixel.
///
/// Returns `None` for an empty plane.
pub fn laplacian_variance(gray: &[u8], width: usize, height: usize) -> Option<f64> {
    if width == 0 || height == 0 || gray.len() < width * height {
        return None;
    }

    let at = |x: isize, y: isize| -> f64 {
        let x = reflect(x, width);
        let y = reflect(y, height);
        gray[y * width + x] as f64
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..height as isize {
        for x in 0..width as isize {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let n = (width * height) as f64;
    let mean = sum / n;
    Some((sum_sq / n - mean * mean).max(0.0))
}

/// Mirror an out-of-range index about the first/last element (edge not repeated).
fn reflect(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = i.abs();
    if i > last {
        i = 2 * last - i;
    }
    i.clamp(0, last) as usize
}
