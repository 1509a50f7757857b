//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the RGB raster to 640×640, decodes the three anchor-free stride
//! heads, then suppresses overlaps. Boxes come back in raster pixel space,
//! clamped to the image and sorted by confidence.

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

use crate::capability::{CapabilityError, FaceDetector};
use crate::codec::RasterImage;
use crate::types::{BoundingBox, Landmarks};

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Standard export order: scores 8/16/32, then boxes, then keypoints.
const POSITIONAL_OUTPUTS: [StrideOutputs; 3] = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// How the raster was fitted into the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: usize,
    pad_y: usize,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let side = SCRFD_INPUT_SIZE as f32;
        let scale = (side / width as f32).min(side / height as f32);
        let (new_w, new_h) = Self::scaled(width, height, scale);
        Self {
            scale,
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        }
    }

    fn scaled(width: u32, height: u32, scale: f32) -> (usize, usize) {
        let w = ((width as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let h = ((height as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        (w, h)
    }

    /// Model-input point back to raster coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// A decoded detection in raster coordinates, before clamping.
#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    landmarks: Option<Landmarks>,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn into_box(self, width: u32, height: u32) -> Option<BoundingBox> {
        BoundingBox::from_rect(
            self.x1,
            self.y1,
            self.x2 - self.x1,
            self.y2 - self.y1,
            width,
            height,
        )
        .map(|b| b.with_confidence(self.score).with_landmarks(self.landmarks))
    }
}

pub struct ScrfdDetector {
    session: Mutex<Session>,
    outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, CapabilityError> {
        if !model_path.exists() {
            return Err(CapabilityError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        tracing::info!(path = %model_path.display(), outputs = ?names, "loaded SCRFD model");

        if names.len() < 9 {
            return Err(CapabilityError::Unavailable(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }

        let outputs = discover_output_indices(&names);
        tracing::debug!(?outputs, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            outputs,
        })
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&self, image: &RasterImage) -> Result<Vec<BoundingBox>, CapabilityError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(image);

        let mut session = self.session.lock().map_err(|_| CapabilityError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(&self.outputs) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| CapabilityError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces: Vec<BoundingBox> = nms(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .filter_map(|c| c.into_box(image.width(), image.height()))
            .collect();
        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Letterbox an RGB raster into a normalised NCHW tensor.
///
/// Padding is filled with the mean so it normalises to zero.
fn preprocess(image: &RasterImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let (new_w, new_h) = Letterbox::scaled(image.width(), image.height(), letterbox.scale);
    let resized = image.resize(new_w as u32, new_h as u32);
    let pixels = resized.pixels();

    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for y in 0..new_h {
        for x in 0..new_w {
            let px = &pixels[(y * new_w + x) * 3..][..3];
            for (c, &v) in px.iter().enumerate() {
                tensor[[0, c, y + letterbox.pad_y, x + letterbox.pad_x]] =
                    (v as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }
    (tensor, letterbox)
}

/// Map stride heads to output tensors by name ("score_8", "bbox_16", ...),
/// falling back to the standard positional order when names are generic.
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut mapping = POSITIONAL_OUTPUTS;
    for (slot, &stride) in mapping.iter_mut().zip(&SCRFD_STRIDES) {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => *slot = (s, b, k),
            _ => {
                tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
                return POSITIONAL_OUTPUTS;
            }
        }
    }
    mapping
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut found = Vec::new();
    for (idx, &score) in scores.iter().enumerate().take(anchors) {
        if score <= threshold {
            continue;
        }
        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * step;
        let ay = (cell / grid_w) as f32 * step;

        let (x1, y1) = letterbox.unmap(ax - offsets[0] * step, ay - offsets[1] * step);
        let (x2, y2) = letterbox.unmap(ax + offsets[2] * step, ay + offsets[3] * step);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            let mut points = [(0.0f32, 0.0f32); 5];
            for (i, point) in points.iter_mut().enumerate() {
                *point = letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step);
            }
            points
        });

        found.push(Candidate {
            x1,
            y1,
            x2,
            y2,
            score,
            landmarks,
        });
    }
    found
}

/// Greedy non-maximum suppression. Output is sorted by descending score.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates {
        if keep.iter().all(|k| iou(k, &c) <= iou_threshold) {
            keep.push(c);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ChannelOrder;

    fn candidate(x: f32, y: f32, w: f32, h: f32, score: f32) -> Candidate {
        Candidate {
            x1: x,
            y1: y,
            x2: x + w,
            y2: y + h,
            score,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!(iou(&a, &candidate(20.0, 20.0, 10.0, 10.0, 1.0)).abs() < 1e-6);
        // 50 shared of 150 total
        let half = candidate(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &half) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(
            vec![
                candidate(5.0, 5.0, 100.0, 100.0, 0.8),
                candidate(200.0, 200.0, 50.0, 50.0, 0.7),
                candidate(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            SCRFD_NMS_THRESHOLD,
        );
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
        assert!(nms(Vec::new(), SCRFD_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_letterbox_unmap_roundtrip() {
        let lb = Letterbox::fit(320, 240);
        assert_eq!(lb.scale, 2.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0, 80));
        let (x, y) = lb.unmap(100.0 * lb.scale, 50.0 * lb.scale + lb.pad_y as f32);
        assert!((x - 100.0).abs() < 1e-3 && (y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let image = RasterImage::filled(320, 240, ChannelOrder::Rgb, [255, 0, 128]);
        let (tensor, lb) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // Padding band above the content.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let y = lb.pad_y + 10;
        assert!((tensor[[0, 0, y, 10]] - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-5);
        assert!((tensor[[0, 1, y, 10]] - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-5);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let stride = 32;
        let cells = (SCRFD_INPUT_SIZE / stride).pow(2);
        let mut scores = vec![0.0f32; cells * SCRFD_ANCHORS_PER_CELL];
        let mut bboxes = vec![0.0f32; scores.len() * 4];
        let kps = vec![0.0f32; scores.len() * 10];

        // Cell (5, 5), first anchor; one stride in every direction.
        let idx = (5 * 20 + 5) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let identity = Letterbox {
            scale: 1.0,
            pad_x: 0,
            pad_y: 0,
        };
        let found = decode_stride(&scores, &bboxes, &kps, stride, &identity, 0.5);
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (128.0, 128.0, 192.0, 192.0));
        assert_eq!(c.landmarks, Some([(160.0, 160.0); 5]));
    }

    #[test]
    fn test_candidate_clamped_to_raster() {
        let b = candidate(-10.0, 20.0, 60.0, 200.0, 0.8)
            .into_box(100, 100)
            .unwrap();
        assert_eq!(b.edges(), [20, 50, 100, 0]);
        assert_eq!(b.confidence, 0.8);
        assert!(candidate(150.0, 150.0, 10.0, 10.0, 0.8).into_box(100, 100).is_none());
    }

    #[test]
    fn test_discover_output_indices() {
        let named: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            discover_output_indices(&named),
            [(2, 0, 1), (5, 3, 4), (8, 6, 7)]
        );

        let generic: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&generic), POSITIONAL_OUTPUTS);
    }

    #[test]
    fn test_load_missing_model() {
        let err = ScrfdDetector::load(Path::new("/nonexistent/det_10g.onnx")).err().unwrap();
        assert!(matches!(err, CapabilityError::ModelNotFound(_)));
    }
}
