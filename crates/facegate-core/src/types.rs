use serde::{Deserialize, Serialize};

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Pixel-space face box, edges in (top, right, bottom, left) order.
///
/// A box is only meaningful relative to the raster it was detected in:
/// `top < bottom <= height` and `left < right <= width`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
    /// Detector confidence, 1.0 when the box did not come from a scored detector.
    #[serde(default = "full_confidence")]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Landmarks>,
}

fn full_confidence() -> f32 {
    1.0
}

impl BoundingBox {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
            confidence: 1.0,
            landmarks: None,
        }
    }

    /// Build a box from a floating-point `x, y, width, height` rectangle, clamped
    /// to a `frame_width` × `frame_height` raster.
    ///
    /// Returns `None` when nothing of the rectangle survives clamping.
    pub fn from_rect(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return None;
        }
        let left = x.round().clamp(0.0, frame_width as f32) as u32;
        let top = y.round().clamp(0.0, frame_height as f32) as u32;
        let right = (x + width).round().clamp(0.0, frame_width as f32) as u32;
        let bottom = (y + height).round().clamp(0.0, frame_height as f32) as u32;

        let bbox = Self::new(top, right, bottom, left);
        bbox.fits(frame_width, frame_height).then_some(bbox)
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_landmarks(mut self, landmarks: Option<Landmarks>) -> Self {
        self.landmarks = landmarks;
        self
    }

    /// Whether the box is non-empty and lies inside a `width` × `height` raster.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.top < self.bottom
            && self.bottom <= height
            && self.left < self.right
            && self.right <= width
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Edges as `[top, right, bottom, left]`.
    pub fn edges(&self) -> [u32; 4] {
        [self.top, self.right, self.bottom, self.left]
    }
}

/// Fixed-length face signature produced by an embedding capability.
///
/// Signatures are only comparable when produced by the same model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSignature {
    pub values: Vec<f32>,
    /// Model version that produced this signature (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl FaceSignature {
    pub fn new(values: Vec<f32>, model_version: Option<String>) -> Self {
        Self {
            values,
            model_version,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON array form, suitable for storing next to a user record.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.values).unwrap_or_else(|_| "[]".to_string())
    }
}

impl From<Vec<f32>> for FaceSignature {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values, None)
    }
}

/// Serialize an optional signature as two sibling fields: `encoding`, the
/// bare value array a client can send back unchanged, and `model_version`.
/// Use with `#[serde(flatten, serialize_with = ...)]`.
pub(crate) fn serialize_encoding<S>(
    signature: &Option<FaceSignature>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;

    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry("encoding", &signature.as_ref().map(|s| &s.values))?;
    map.serialize_entry(
        "model_version",
        &signature.as_ref().and_then(|s| s.model_version.as_deref()),
    )?;
    map.end()
}

/// Decision for one reference/candidate signature comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    #[serde(rename = "match")]
    pub is_match: bool,
    /// Euclidean distance between the two signatures.
    pub distance: f32,
    /// `max(0, 1 - distance)`. A closeness proxy, not a calibrated probability.
    pub confidence: f32,
    pub threshold: f32,
    pub message: String,
}

/// Which strategy produced a liveness score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessMethod {
    /// External spoof classifier.
    Primary,
    /// Laplacian-variance sharpness heuristic, used when the classifier failed.
    Fallback,
}

/// Liveness decision for one image, or an aggregate over several frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessResult {
    pub is_real: bool,
    pub confidence: f32,
    pub score: f32,
    pub message: String,
    pub method: LivenessMethod,
    /// Primary-path error text when the fallback ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// One face as judged by a spoof classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpoofAssessment {
    pub is_real: bool,
    /// Live-capture score in [0, 1].
    pub score: f32,
    pub face: Option<BoundingBox>,
}
