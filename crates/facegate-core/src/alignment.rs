//! Landmark-based face alignment.
//!
//! Fits a similarity transform (scale, rotation, translation) that carries the
//! five detected landmarks onto the ArcFace reference pose, then warps the
//! face into a 112×112 crop.

use crate::codec::RasterImage;
use crate::types::Landmarks;

pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmarks in a 112×112 crop.
pub const REFERENCE_LANDMARKS: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth corner
    (70.7299, 92.2041), // right mouth corner
];

/// `dst = [[a, -b], [b, a]] * src + [tx, ty]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit from `src` onto `dst`.
    ///
    /// Closed form over the centred point sets. Degenerate input (all source
    /// points coincident) yields `None`.
    fn estimate(src: &Landmarks, dst: &Landmarks) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &Landmarks| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm < 1e-6 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    #[cfg(test)]
    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Source point that lands on `(x, y)`.
    fn invert(&self, (x, y): (f32, f32)) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (dx, dy) = (x - self.tx, y - self.ty);
        (
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        )
    }
}

/// Bilinear sample of one pixel in stored channel order; outside the raster
/// reads as black.
fn sample(image: &RasterImage, x: f32, y: f32) -> [u8; 3] {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);
    let (width, height) = (image.width() as i64, image.height() as i64);

    let at = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= width || py >= height {
            return [0.0; 3];
        }
        let i = ((py * width + px) * 3) as usize;
        let p = &image.pixels()[i..i + 3];
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    let (tl, tr, bl, br) = (at(x0, y0), at(x0 + 1, y0), at(x0, y0 + 1), at(x0 + 1, y0 + 1));
    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Warp the face described by `landmarks` into a canonical 112×112 crop in
/// the input's channel order.
///
/// Returns `None` when the landmarks are degenerate.
pub fn align_face(image: &RasterImage, landmarks: &Landmarks) -> Option<RasterImage> {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS)?;

    let side = ALIGNED_SIZE as usize;
    let mut pixels = Vec::with_capacity(side * side * 3);
    for oy in 0..side {
        for ox in 0..side {
            let (sx, sy) = transform.invert((ox as f32, oy as f32));
            pixels.extend_from_slice(&sample(image, sx, sy));
        }
    }
    RasterImage::from_raw(ALIGNED_SIZE, ALIGNED_SIZE, image.order(), pixels).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ChannelOrder;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_identity_fit() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS).unwrap();
        assert!(close(t.a, 1.0, 1e-4) && close(t.b, 0.0, 1e-4));
        assert!(close(t.tx, 0.0, 1e-3) && close(t.ty, 0.0, 1e-3));
    }

    #[test]
    fn test_half_scale_fit() {
        let doubled = REFERENCE_LANDMARKS.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&doubled, &REFERENCE_LANDMARKS).unwrap();
        assert!(close(t.a, 0.5, 1e-4), "a = {}", t.a);
        assert!(close(t.b, 0.0, 1e-4));
    }

    #[test]
    fn test_rotation_fit_maps_points() {
        // Reference pose rotated 90 degrees and shifted.
        let rotated = REFERENCE_LANDMARKS.map(|(x, y)| (-y + 200.0, x + 10.0));
        let t = Similarity::estimate(&rotated, &REFERENCE_LANDMARKS).unwrap();
        for (src, dst) in rotated.iter().zip(&REFERENCE_LANDMARKS) {
            let (x, y) = t.apply(*src);
            assert!(close(x, dst.0, 1e-2) && close(y, dst.1, 1e-2), "{x},{y} vs {dst:?}");
            let (bx, by) = t.invert(*dst);
            assert!(close(bx, src.0, 1e-2) && close(by, src.1, 1e-2));
        }
    }

    #[test]
    fn test_degenerate_landmarks() {
        let image = RasterImage::filled(50, 50, ChannelOrder::Rgb, [1, 2, 3]);
        assert!(align_face(&image, &[(10.0, 10.0); 5]).is_none());
    }

    #[test]
    fn test_aligned_crop_keeps_order_and_size() {
        let image = RasterImage::filled(200, 200, ChannelOrder::Bgr, [90, 90, 90]);
        let aligned = align_face(&image, &REFERENCE_LANDMARKS).unwrap();
        assert_eq!((aligned.width(), aligned.height()), (112, 112));
        assert_eq!(aligned.order(), ChannelOrder::Bgr);
        assert_eq!(aligned.rgb_at(56, 56), [90, 90, 90]);
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let (w, h) = (200u32, 200u32);
        let src: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        // Bright 5×5 patch on the left eye.
        let mut pixels = vec![0u8; (w * h * 3) as usize];
        for y in 58..63u32 {
            for x in 78..83u32 {
                let i = ((y * w + x) * 3) as usize;
                pixels[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let image = RasterImage::from_raw(w, h, ChannelOrder::Rgb, pixels).unwrap();
        let aligned = align_face(&image, &src).unwrap();

        let (rx, ry) = (
            REFERENCE_LANDMARKS[0].0.round() as u32,
            REFERENCE_LANDMARKS[0].1.round() as u32,
        );
        let brightest = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.rgb_at(x, y)[0])
            .max()
            .unwrap();
        assert!(brightest > 100, "max near reference eye = {brightest}");
    }
}
