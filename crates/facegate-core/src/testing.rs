//! Deterministic stand-ins for the model capabilities, used by unit tests.

use crate::capability::{CapabilityError, FaceDetector, FaceEmbedder, SpoofClassifier};
use crate::codec::{ChannelOrder, RasterImage};
use crate::types::{BoundingBox, FaceSignature, SpoofAssessment};

pub(crate) fn gray_image(width: u32, height: u32) -> RasterImage {
    RasterImage::filled(width, height, ChannelOrder::Rgb, [128, 128, 128])
}

/// Left half one colour, right half another.
pub(crate) fn split_image(width: u32, height: u32) -> RasterImage {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for _ in 0..height {
        for x in 0..width {
            let px: [u8; 3] = if x < width / 2 { [40, 80, 120] } else { [220, 200, 180] };
            pixels.extend_from_slice(&px);
        }
    }
    RasterImage::from_raw(width, height, ChannelOrder::Rgb, pixels).unwrap()
}

/// Black/white checkerboard with `cell`-pixel squares, very high Laplacian variance.
pub(crate) fn checkerboard(width: u32, height: u32, cell: u32) -> RasterImage {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let v = if ((x / cell) + (y / cell)) % 2 == 0 { 0 } else { 255 };
            pixels.extend_from_slice(&[v, v, v]);
        }
    }
    RasterImage::from_raw(width, height, ChannelOrder::Rgb, pixels).unwrap()
}

pub(crate) struct FakeDetector {
    boxes: Vec<BoundingBox>,
    fail: bool,
}

impl FakeDetector {
    pub(crate) fn empty() -> Self {
        Self::with_boxes(Vec::new())
    }

    pub(crate) fn with_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes, fail: false }
    }

    /// `count` side-by-side 20×20 faces starting at (10, 10).
    pub(crate) fn faces(count: u32) -> Self {
        Self::with_boxes(
            (0..count)
                .map(|i| BoundingBox::new(10, 30 + i * 25, 30, 10 + i * 25))
                .collect(),
        )
    }

    pub(crate) fn failing() -> Self {
        Self {
            boxes: Vec::new(),
            fail: true,
        }
    }
}

impl FaceDetector for FakeDetector {
    fn detect(&self, _image: &RasterImage) -> Result<Vec<BoundingBox>, CapabilityError> {
        if self.fail {
            return Err(CapabilityError::InferenceFailed("detector offline".into()));
        }
        Ok(self.boxes.clone())
    }
}

pub(crate) enum FakeEmbedder {
    /// Mean R, G, B of the face region, scaled to [0, 1].
    FromPixels,
    Fixed(Vec<f32>),
    Rejecting,
    Failing,
}

impl FaceEmbedder for FakeEmbedder {
    fn embed(
        &self,
        image: &RasterImage,
        face: &BoundingBox,
    ) -> Result<Option<FaceSignature>, CapabilityError> {
        match self {
            FakeEmbedder::FromPixels => {
                let mut sums = [0f64; 3];
                for y in face.top..face.bottom {
                    for x in face.left..face.right {
                        let px = image.rgb_at(x, y);
                        for c in 0..3 {
                            sums[c] += px[c] as f64;
                        }
                    }
                }
                let n = (face.width() * face.height()) as f64;
                let values = sums.iter().map(|s| (s / n / 255.0) as f32).collect();
                Ok(Some(FaceSignature::new(values, Some("fake-v1".into()))))
            }
            FakeEmbedder::Fixed(values) => {
                Ok(Some(FaceSignature::new(values.clone(), Some("fake-v1".into()))))
            }
            FakeEmbedder::Rejecting => Ok(None),
            FakeEmbedder::Failing => {
                Err(CapabilityError::InferenceFailed("embedder offline".into()))
            }
        }
    }
}

pub(crate) enum FakeClassifier {
    Assessments(Vec<SpoofAssessment>),
    /// One live face scored by mean luma / 255.
    Brightness,
    Failing(String),
}

impl FakeClassifier {
    pub(crate) fn live(score: f32) -> Self {
        Self::single(true, score)
    }

    pub(crate) fn spoof(score: f32) -> Self {
        Self::single(false, score)
    }

    pub(crate) fn single(is_real: bool, score: f32) -> Self {
        Self::Assessments(vec![SpoofAssessment {
            is_real,
            score,
            face: None,
        }])
    }

    pub(crate) fn no_face() -> Self {
        Self::Assessments(Vec::new())
    }
}

impl SpoofClassifier for FakeClassifier {
    fn classify(&self, image: &RasterImage) -> Result<Vec<SpoofAssessment>, CapabilityError> {
        match self {
            FakeClassifier::Assessments(a) => Ok(a.clone()),
            FakeClassifier::Brightness => {
                let gray = image.to_grayscale();
                let mean = gray.iter().map(|&p| p as f32).sum::<f32>() / gray.len().max(1) as f32;
                Ok(vec![SpoofAssessment {
                    is_real: true,
                    score: mean / 255.0,
                    face: None,
                }])
            }
            FakeClassifier::Failing(msg) => Err(CapabilityError::Unavailable(msg.clone())),
        }
    }
}
