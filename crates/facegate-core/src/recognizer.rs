//! ArcFace face embedder via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalised signatures from 112×112 RGB face
//! crops, using the w600k_r50 model.

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

use crate::alignment::{self, ALIGNED_SIZE};
use crate::capability::{CapabilityError, FaceEmbedder};
use crate::codec::RasterImage;
use crate::types::{BoundingBox, FaceSignature};

pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";
pub const ARCFACE_EMBEDDING_DIM: usize = 512;

const ARCFACE_MEAN: f32 = 127.5;
// Symmetric normalisation, unlike SCRFD's 128.
const ARCFACE_STD: f32 = 127.5;

pub struct ArcFaceEmbedder {
    session: Mutex<Session>,
}

impl ArcFaceEmbedder {
    pub fn load(model_path: &Path) -> Result<Self, CapabilityError> {
        if !model_path.exists() {
            return Err(CapabilityError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn run(&self, input: Array4<f32>) -> Result<Vec<f32>, CapabilityError> {
        let mut session = self.session.lock().map_err(|_| CapabilityError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| CapabilityError::InferenceFailed(format!("embedding extraction: {e}")))?;
        Ok(raw.to_vec())
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    /// Faces carrying landmarks are aligned to the reference pose first;
    /// others are cropped to their box and stretched to 112×112.
    fn embed(
        &self,
        image: &RasterImage,
        face: &BoundingBox,
    ) -> Result<Option<FaceSignature>, CapabilityError> {
        let aligned = match &face.landmarks {
            Some(landmarks) => alignment::align_face(image, landmarks),
            None => image
                .crop(face)
                .map(|crop| crop.resize(ALIGNED_SIZE, ALIGNED_SIZE)),
        };
        let Some(aligned) = aligned else {
            return Ok(None);
        };

        let raw = self.run(preprocess(&aligned))?;
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(CapabilityError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(l2_normalize(raw)
            .map(|values| FaceSignature::new(values, Some(ARCFACE_MODEL_VERSION.to_string()))))
    }
}

/// Unit-length copy of `raw`; `None` for a zero or non-finite vector.
fn l2_normalize(raw: Vec<f32>) -> Option<Vec<f32>> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return None;
    }
    Some(raw.into_iter().map(|x| x / norm).collect())
}

/// Aligned crop to a normalised NCHW tensor. Channels follow the crop's
/// stored order, which the trait default keeps at RGB.
fn preprocess(aligned: &RasterImage) -> Array4<f32> {
    let (w, h) = (aligned.width() as usize, aligned.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (i, px) in aligned.pixels().chunks_exact(3).enumerate() {
        let (y, x) = (i / w, i % w);
        for (c, &v) in px.iter().enumerate() {
            tensor[[0, c, y, x]] = (v as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}
