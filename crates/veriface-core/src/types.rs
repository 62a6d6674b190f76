use serde::{Deserialize, Serialize};

/// Number of canonical facial keypoints produced by the landmark net.
pub const LANDMARK_COUNT: usize = 68;

/// Length of the face recognition descriptor.
pub const DESCRIPTOR_LEN: usize = 128;

/// Axis-aligned face bounding box in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Smaller of width and height, used as the face "size" in pixels.
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// A single landmark position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Largest face returned by a single-face detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: FaceBox,
    pub score: f32,
    pub landmarks: Vec<Point>,
}

/// Outcome of one triage detection tick. Ephemeral; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionResult {
    pub found: bool,
    pub bbox: FaceBox,
    /// Detector confidence in [0, 1]; 0.0 when nothing was found.
    pub confidence_score: f32,
}

impl DetectionResult {
    pub fn none() -> Self {
        Self {
            found: false,
            bbox: FaceBox::default(),
            confidence_score: 0.0,
        }
    }

    pub fn found(bbox: FaceBox, confidence_score: f32) -> Self {
        Self {
            found: true,
            bbox,
            confidence_score: confidence_score.clamp(0.0, 1.0),
        }
    }
}

/// Full analysis of one face: box, 68 landmarks and a recognition descriptor.
///
/// Only exists for the duration of a comparison call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDescriptorRecord {
    pub bbox: FaceBox,
    pub landmarks: Vec<Point>,
    pub descriptor: Vec<f32>,
    pub score: f32,
}

impl FaceDescriptorRecord {
    /// Euclidean distance between two descriptors.
    ///
    /// Descriptors of different length are never comparable and yield `f32::MAX`.
    pub fn distance(&self, other: &FaceDescriptorRecord) -> f32 {
        euclidean_distance(&self.descriptor, &other.descriptor)
    }
}

/// Compute Euclidean distance between two descriptor vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}
