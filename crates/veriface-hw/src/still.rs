//! Encoded still images handed out of the capture pipeline.

use crate::frame::{self, Frame, FrameError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Default JPEG quality for re-encoded stills.
pub const OUTPUT_JPEG_QUALITY: u8 = 92;

/// An immutable JPEG still, carried as a data URI.
///
/// Replacing a captured image always produces a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    data_uri: String,
    width: u32,
    height: u32,
}

impl CapturedImage {
    /// Encode an image as a JPEG data URI.
    pub fn encode(image: &DynamicImage, quality: u8) -> Result<Self, FrameError> {
        let rgb = image.to_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality)
            .encode_image(&rgb)
            .map_err(|e| FrameError::Encode(e.to_string()))?;

        Ok(Self {
            data_uri: format!("{JPEG_DATA_URI_PREFIX}{}", STANDARD.encode(&jpeg)),
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    pub fn from_frame(frame: &Frame, quality: u8) -> Result<Self, FrameError> {
        Self::encode(frame.image(), quality)
    }

    /// Prepare a user-supplied file: fix EXIF orientation, limit its size,
    /// re-encode as JPEG.
    pub fn from_upload(bytes: &[u8]) -> Result<Self, FrameError> {
        let image = frame::decode_oriented(bytes)?;
        let image = frame::limit_size(image, frame::MAX_IMAGE_SIZE);
        Self::encode(&image, OUTPUT_JPEG_QUALITY)
    }

    /// Parse a `data:<mime>;base64,<payload>` URI.
    pub fn from_data_uri(uri: &str) -> Result<Self, FrameError> {
        let bytes = decode_data_uri(uri)?;
        let image = image::load_from_memory(&bytes).map_err(|e| FrameError::Decode(e.to_string()))?;
        Ok(Self {
            data_uri: uri.to_string(),
            width: image.width(),
            height: image.height(),
        })
    }

    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw encoded bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        decode_data_uri(&self.data_uri)
    }

    /// Decode back to pixels, e.g. for comparison.
    pub fn decode(&self) -> Result<DynamicImage, FrameError> {
        let bytes = self.to_bytes()?;
        image::load_from_memory(&bytes).map_err(|e| FrameError::Decode(e.to_string()))
    }
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>, FrameError> {
    let rest = uri.strip_prefix("data:").ok_or(FrameError::MalformedDataUri)?;
    let (meta, payload) = rest.split_once(',').ok_or(FrameError::MalformedDataUri)?;
    if !meta.ends_with(";base64") {
        return Err(FrameError::MalformedDataUri);
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|_| FrameError::MalformedDataUri)
}
