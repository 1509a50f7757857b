//! Distance-based signature matching.

use thiserror::Error;

use crate::types::{FaceSignature, MatchResult};

/// Default maximum Euclidean distance for a match. Lower is stricter.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("signature length mismatch: reference has {reference} values, candidate has {candidate}")]
    DimensionMismatch { reference: usize, candidate: usize },
    #[error("signatures come from different models: {reference} vs {candidate}")]
    ModelMismatch { reference: String, candidate: String },
}

/// Euclidean distance between two equal-length vectors.
///
/// Unequal lengths are an error, never a silent truncation.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            reference: a.len(),
            candidate: b.len(),
        });
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum();
    Ok(sum.sqrt() as f32)
}

/// Compares a candidate signature against a stored reference.
///
/// Stateless: the result depends only on the two signatures and the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchEngine;

impl MatchEngine {
    /// `is_match` is `distance <= threshold`, inclusive.
    ///
    /// `confidence = max(0, 1 - distance)` is a monotone closeness proxy kept for
    /// compatibility with stored clients. It is not a calibrated probability.
    pub fn compare(
        &self,
        reference: &FaceSignature,
        candidate: &FaceSignature,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        if let (Some(r), Some(c)) = (&reference.model_version, &candidate.model_version) {
            if r != c {
                return Err(MatchError::ModelMismatch {
                    reference: r.clone(),
                    candidate: c.clone(),
                });
            }
        }

        let distance = euclidean_distance(&reference.values, &candidate.values)?;
        let is_match = distance <= threshold;
        let confidence = (1.0 - distance).max(0.0);

        tracing::debug!(distance, threshold, is_match, "signatures compared");

        Ok(MatchResult {
            is_match,
            distance,
            confidence,
            threshold,
            message: match_message(is_match, distance, threshold),
        })
    }
}

fn match_message(is_match: bool, distance: f32, threshold: f32) -> String {
    if is_match {
        format!("Face match confirmed (distance: {distance:.3})")
    } else {
        format!("Face does not match (distance: {distance:.3}, threshold: {threshold})")
    }
}
