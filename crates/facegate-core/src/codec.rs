//! Transport payload decoding and the in-memory raster used by every stage.
//!
//! Channel order is carried explicitly on [`RasterImage`]: the embedder wants
//! RGB, the spoof classifier wants BGR, and conversions happen only through
//! [`RasterImage::to_order`].

use std::borrow::Cow;

use base64::Engine;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use serde::Serialize;
use thiserror::Error;

use crate::types::BoundingBox;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("malformed or unsupported image: {0}")]
    Image(#[from] image::ImageError),
    #[error("pixel buffer holds {actual} bytes, expected {width}x{height}x3")]
    BufferSize { width: u32, height: u32, actual: usize },
}

/// Order of the three interleaved colour channels in a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Interleaved 8-bit, 3-channel pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    order: ChannelOrder,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// Wrap a raw interleaved buffer of `width * height * 3` bytes.
    pub fn from_raw(
        width: u32,
        height: u32,
        order: ChannelOrder,
        pixels: Vec<u8>,
    ) -> Result<Self, CodecError> {
        if pixels.len() != width as usize * height as usize * 3 {
            return Err(CodecError::BufferSize {
                width,
                height,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            order,
            pixels,
        })
    }

    /// Uniformly coloured raster; `rgb` is given in RGB and stored in `order`.
    pub fn filled(width: u32, height: u32, order: ChannelOrder, rgb: [u8; 3]) -> Self {
        let px = match order {
            ChannelOrder::Rgb => rgb,
            ChannelOrder::Bgr => [rgb[2], rgb[1], rgb[0]],
        };
        let pixels = px
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            order,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at (x, y) as `[r, g, b]`, whatever the stored order.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        let px = [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]];
        match self.order {
            ChannelOrder::Rgb => px,
            ChannelOrder::Bgr => [px[2], px[1], px[0]],
        }
    }

    /// Copy of this raster with channels stored in `order`.
    pub fn to_order(&self, order: ChannelOrder) -> RasterImage {
        if order == self.order {
            return self.clone();
        }
        let mut pixels = self.pixels.clone();
        for px in pixels.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        RasterImage {
            width: self.width,
            height: self.height,
            order,
            pixels,
        }
    }

    /// Luma plane using BT.601 weights (0.299 R + 0.587 G + 0.114 B).
    pub fn to_grayscale(&self) -> Vec<u8> {
        let (r, b) = match self.order {
            ChannelOrder::Rgb => (0, 2),
            ChannelOrder::Bgr => (2, 0),
        };
        self.pixels
            .chunks_exact(3)
            .map(|px| {
                let y = 0.299 * px[r] as f32 + 0.587 * px[1] as f32 + 0.114 * px[b] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Exact region covered by `bbox`, or `None` if the box does not fit this raster.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<RasterImage> {
        if !bbox.fits(self.width, self.height) {
            return None;
        }
        let view: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(self.width, self.height, self.pixels.clone())?;
        let region =
            imageops::crop_imm(&view, bbox.left, bbox.top, bbox.width(), bbox.height()).to_image();
        Some(self.with_buffer(region))
    }

    /// Resample to exactly `width` × `height`.
    pub fn resize(&self, width: u32, height: u32) -> RasterImage {
        match self.view() {
            Some(view) if width > 0 && height > 0 => {
                self.with_buffer(imageops::resize(&view, width, height, FilterType::Triangle))
            }
            _ => RasterImage::filled(width, height, self.order, [0, 0, 0]),
        }
    }

    /// Shrink so neither side exceeds `max_dimension`, keeping the aspect ratio.
    ///
    /// The shorter side never drops below `min_dimension`, so a raster that
    /// passed [`validate_minimum_size`] still passes it afterwards. For very
    /// elongated rasters this leaves the longer side above `max_dimension`.
    /// Rasters already within bounds are returned unchanged.
    pub fn downscale_to(self, max_dimension: u32, min_dimension: u32) -> RasterImage {
        if max_dimension == 0 || (self.width <= max_dimension && self.height <= max_dimension) {
            return self;
        }
        let fit = (max_dimension as f64 / self.height as f64)
            .min(max_dimension as f64 / self.width as f64);
        let shorter = self.width.min(self.height).max(1);
        let floor = (min_dimension as f64 / shorter as f64).min(1.0);
        let scale = fit.max(floor);
        if scale >= 1.0 {
            return self;
        }
        let new_width = ((self.width as f64 * scale).round() as u32).max(1);
        let new_height = ((self.height as f64 * scale).round() as u32).max(1);
        tracing::debug!(
            from_width = self.width,
            from_height = self.height,
            new_width,
            new_height,
            "downscaling raster"
        );
        self.resize(new_width, new_height)
    }

    fn view(&self) -> Option<ImageBuffer<Rgb<u8>, &[u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.pixels.as_slice())
    }

    fn with_buffer(&self, buffer: ImageBuffer<Rgb<u8>, Vec<u8>>) -> RasterImage {
        RasterImage {
            width: buffer.width(),
            height: buffer.height(),
            order: self.order,
            pixels: buffer.into_raw(),
        }
    }
}

/// `image` in `order`, borrowing when no conversion is needed.
pub fn in_order(image: &RasterImage, order: ChannelOrder) -> Cow<'_, RasterImage> {
    if image.order() == order {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(image.to_order(order))
    }
}

/// Whether both sides of `image` are at least `min_dimension` pixels.
///
/// Checked before detection: detector and embedder calls are the expensive part
/// of the pipeline and are wasted on rasters too small to hold a usable face.
pub fn validate_minimum_size(image: &RasterImage, min_dimension: u32) -> bool {
    image.width() >= min_dimension && image.height() >= min_dimension
}

/// Decoder for transport-encoded image payloads.
pub struct ImageCodec;

impl ImageCodec {
    /// Decode a base64 payload, optionally prefixed with a media-type marker
    /// (`data:image/png;base64,...`). Line-wrapped (MIME) base64 is accepted.
    /// The result is stored in RGB order.
    pub fn decode(payload: &str) -> Result<RasterImage, CodecError> {
        let encoded = match payload.split_once(',') {
            Some((_, data)) => data,
            None => payload,
        };
        let encoded: String = encoded
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        if encoded.is_empty() {
            return Err(CodecError::Empty);
        }
        let bytes = base64::engine::general_purpose::STANDARD.decode(&encoded)?;
        Self::decode_bytes(&bytes)
    }

    /// Decode an encoded image file (PNG, JPEG, ...) into an RGB raster.
    pub fn decode_bytes(bytes: &[u8]) -> Result<RasterImage, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        RasterImage::from_raw(width, height, ChannelOrder::Rgb, rgb.into_raw())
    }
}
