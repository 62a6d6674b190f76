//! Frame type and pixel conversion — YUYV to RGB, dark detection, decoding.

use image::{DynamicImage, GenericImageView, ImageDecoder, ImageReader, RgbImage};
use std::io::Cursor;
use std::time::Instant;

/// Longest side accepted for user-supplied stills before they are scaled down.
pub const MAX_IMAGE_SIZE: u32 = 1920;

/// A raw camera frame: a decoded image plus capture metadata.
///
/// Frames are never mutated in place; every transform returns a new frame.
#[derive(Clone)]
pub struct Frame {
    image: DynamicImage,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: DynamicImage, sequence: u32) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Decode an encoded still (JPEG/PNG) returned by a camera plugin.
    pub fn decode(bytes: &[u8], sequence: u32) -> Result<Self, FrameError> {
        let image = image::load_from_memory(bytes).map_err(|e| FrameError::Decode(e.to_string()))?;
        Ok(Self::new(image, sequence))
    }

    /// Derive a new frame from this one, keeping its capture metadata.
    pub fn with_image(&self, image: DynamicImage) -> Self {
        Self {
            image,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_landscape(&self) -> bool {
        self.width() > self.height()
    }

    /// Whether the frame is essentially black (camera still warming up).
    pub fn is_dark(&self) -> bool {
        is_dark_frame(self.image.to_luma8().as_raw(), 0.95)
    }
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

/// Decode a user-supplied still, applying its EXIF orientation.
///
/// Non-JPEG input and JPEGs without an orientation tag decode unchanged.
pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage, FrameError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FrameError::Decode(e.to_string()))?;
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| FrameError::Decode(e.to_string()))?;

    let orientation = decoder
        .orientation()
        .map_err(|e| FrameError::Decode(e.to_string()))?;

    let mut image =
        DynamicImage::from_decoder(decoder).map_err(|e| FrameError::Decode(e.to_string()))?;
    image.apply_orientation(orientation);
    tracing::debug!(?orientation, width = image.width(), height = image.height(), "decoded still");
    Ok(image)
}

/// Scale an image down so neither side exceeds `max_side`, keeping aspect ratio.
///
/// Images already within bounds are returned unchanged.
pub fn limit_size(image: DynamicImage, max_side: u32) -> DynamicImage {
    let (w, h) = image.dimensions();
    if w <= max_side && h <= max_side {
        return image;
    }
    let scale = (max_side as f32 / w as f32).min(max_side as f32 / h as f32);
    let new_w = ((w as f32 * scale).floor() as u32).max(1);
    let new_h = ((h as f32 * scale).floor() as u32).max(1);
    image.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("malformed data URI")]
    MalformedDataUri,
}
