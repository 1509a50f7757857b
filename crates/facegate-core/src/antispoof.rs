//! MiniFASNet presentation-attack classifier via ONNX Runtime.
//!
//! Each detected face is cropped with 2.7× context around its box, resized to
//! 80×80 and classified into three classes. Class 1 is a live face.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

use crate::capability::{CapabilityError, FaceDetector, SpoofClassifier};
use crate::codec::{in_order, ChannelOrder, RasterImage};
use crate::types::{BoundingBox, SpoofAssessment};

pub const MINIFASNET_MODEL_FILE: &str = "minifasnet_v2.onnx";

const MINIFASNET_INPUT_SIZE: u32 = 80;
const MINIFASNET_CROP_SCALE: f32 = 2.7;
const MINIFASNET_LIVE_CLASS: usize = 1;

pub struct MiniFasNetClassifier {
    session: Mutex<Session>,
    detector: Arc<dyn FaceDetector>,
}

impl MiniFasNetClassifier {
    /// Load the model. Faces are located with `detector`, usually the same
    /// handle the rest of the pipeline uses.
    pub fn load(model_path: &Path, detector: Arc<dyn FaceDetector>) -> Result<Self, CapabilityError> {
        if !model_path.exists() {
            return Err(CapabilityError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded MiniFASNet model");

        Ok(Self {
            session: Mutex::new(session),
            detector,
        })
    }

    fn class_probabilities(&self, input: Array4<f32>) -> Result<Vec<f32>, CapabilityError> {
        let mut session = self.session.lock().map_err(|_| CapabilityError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| CapabilityError::InferenceFailed(format!("spoof logits: {e}")))?;
        if logits.len() <= MINIFASNET_LIVE_CLASS {
            return Err(CapabilityError::InferenceFailed(format!(
                "expected at least {} classes, got {}",
                MINIFASNET_LIVE_CLASS + 1,
                logits.len()
            )));
        }
        Ok(softmax(logits))
    }
}

impl SpoofClassifier for MiniFasNetClassifier {
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Bgr
    }

    fn classify(&self, image: &RasterImage) -> Result<Vec<SpoofAssessment>, CapabilityError> {
        let for_detector = in_order(image, self.detector.channel_order());
        let faces = self.detector.detect(&for_detector)?;

        let mut assessments = Vec::with_capacity(faces.len());
        for face in faces {
            let region = context_box(image.width(), image.height(), &face, MINIFASNET_CROP_SCALE);
            let Some(crop) = image.crop(&region) else {
                tracing::debug!(?region, "spoof crop outside raster, skipping face");
                continue;
            };
            let crop = crop.resize(MINIFASNET_INPUT_SIZE, MINIFASNET_INPUT_SIZE);

            let probs = self.class_probabilities(to_tensor(&crop))?;
            let verdict = argmax(&probs);
            assessments.push(SpoofAssessment {
                is_real: verdict == MINIFASNET_LIVE_CLASS,
                score: probs[MINIFASNET_LIVE_CLASS],
                face: Some(face),
            });
        }
        Ok(assessments)
    }
}

/// Box `scale` times the size of `face` around its centre, capped so it fits
/// the raster and shifted back inside when it crosses an edge.
fn context_box(width: u32, height: u32, face: &BoundingBox, scale: f32) -> BoundingBox {
    let (w, h) = (width as f32, height as f32);
    let (fw, fh) = (face.width().max(1) as f32, face.height().max(1) as f32);
    let scale = scale.min(w / fw).min(h / fh);

    let (new_w, new_h) = (fw * scale, fh * scale);
    let cx = face.left as f32 + fw / 2.0;
    let cy = face.top as f32 + fh / 2.0;

    let shift_into = |start: f32, len: f32, limit: f32| -> (u32, u32) {
        let start = start.clamp(0.0, (limit - len).max(0.0));
        let end = (start + len).min(limit);
        (start.round() as u32, end.round() as u32)
    };
    let (left, right) = shift_into(cx - new_w / 2.0, new_w, w);
    let (top, bottom) = shift_into(cy - new_h / 2.0, new_h, h);
    BoundingBox::new(top, right, bottom, left)
}

/// NCHW tensor of raw 0..255 values in the crop's stored channel order.
fn to_tensor(crop: &RasterImage) -> Array4<f32> {
    let (w, h) = (crop.width() as usize, crop.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (i, px) in crop.pixels().chunks_exact(3).enumerate() {
        for (c, &v) in px.iter().enumerate() {
            tensor[[0, c, i / w, i % w]] = v as f32;
        }
    }
    tensor
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax() {
        let p = softmax(&[1.0, 3.0, 0.5]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert_eq!(argmax(&p), 1);
        // Large logits must not overflow.
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_context_box_centered() {
        let face = BoundingBox::new(100, 120, 120, 100);
        let region = context_box(400, 400, &face, 2.7);
        assert_eq!(region.edges(), [83, 137, 137, 83]);
    }

    #[test]
    fn test_context_box_shifted_inside_edge() {
        let face = BoundingBox::new(0, 20, 20, 0);
        let region = context_box(400, 300, &face, 2.7);
        assert_eq!((region.left, region.top), (0, 0));
        assert_eq!((region.width(), region.height()), (54, 54));
    }

    #[test]
    fn test_context_box_capped_by_raster() {
        let face = BoundingBox::new(10, 90, 90, 10);
        let region = context_box(100, 100, &face, 2.7);
        assert!(region.fits(100, 100));
        assert_eq!(region.edges(), [0, 100, 100, 0]);
    }

    #[test]
    fn test_to_tensor_keeps_stored_order() {
        let crop = RasterImage::filled(80, 80, ChannelOrder::Bgr, [10, 20, 30]);
        let t = to_tensor(&crop);
        assert_eq!(t.shape(), &[1, 3, 80, 80]);
        // Stored BGR: blue first.
        assert_eq!(t[[0, 0, 3, 3]], 30.0);
        assert_eq!(t[[0, 2, 3, 3]], 10.0);
    }

    #[test]
    fn test_load_missing_model() {
        let detector: Arc<dyn FaceDetector> =
            Arc::new(crate::testing::FakeDetector::faces(1));
        let err = MiniFasNetClassifier::load(Path::new("/nonexistent/m.onnx"), detector)
            .err()
            .unwrap();
        assert!(matches!(err, CapabilityError::ModelNotFound(_)));
    }
}
