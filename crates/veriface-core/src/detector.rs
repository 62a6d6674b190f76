//! Face detector capability and the live-preview triage adapter.
//!
//! The detector/landmark/recognition nets are consumed through
//! [`FaceAnalyzer`]. [`TriageDetector`] wraps it for the capture loop:
//! permissive thresholds, a primary and a fallback backend, and no errors.

use crate::models::FaceNet;
use crate::types::{DetectionResult, FaceDescriptorRecord, FaceDetection};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

// --- Triage constants (permissive "is there roughly a face") ---
const TRIAGE_MIN_CONFIDENCE: f32 = 0.2;
const TRIAGE_TINY_INPUT_SIZE: u32 = 416;
/// Faces covering no more than this share of the frame are ignored.
const TRIAGE_MIN_AREA_RATIO: f32 = 0.01;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model not loaded: {0:?}")]
    ModelNotLoaded(FaceNet),
    #[error("failed to load model from {url}: {reason}")]
    LoadFailed { url: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Detector backend and its tuning, selectable by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DetectorOptions {
    /// High-accuracy single-shot detector.
    SsdMobilenetV1 { min_confidence: f32 },
    /// Fast, lower-accuracy detector.
    TinyFace { input_size: u32, score_threshold: f32 },
    /// Multi-stage cascade used for browser-side comparison.
    Mtcnn {
        min_face_size: u32,
        scale_factor: f32,
        score_thresholds: [f32; 3],
        max_num_scales: u32,
    },
}

impl DetectorOptions {
    pub fn net(&self) -> FaceNet {
        match self {
            DetectorOptions::SsdMobilenetV1 { .. } => FaceNet::SsdMobilenetV1,
            DetectorOptions::TinyFace { .. } => FaceNet::TinyFaceDetector,
            DetectorOptions::Mtcnn { .. } => FaceNet::Mtcnn,
        }
    }

    pub fn triage_primary() -> Self {
        DetectorOptions::SsdMobilenetV1 {
            min_confidence: TRIAGE_MIN_CONFIDENCE,
        }
    }

    pub fn triage_fallback() -> Self {
        DetectorOptions::TinyFace {
            input_size: TRIAGE_TINY_INPUT_SIZE,
            score_threshold: TRIAGE_MIN_CONFIDENCE,
        }
    }
}

/// External face analysis capability.
///
/// Implementations wrap a concrete model runtime. Nets are loaded once via
/// [`load_net`](Self::load_net) before first use.
#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    /// Load one net from its weights manifest URL.
    async fn load_net(&self, net: FaceNet, manifest_url: &str) -> Result<(), DetectorError>;

    /// Detect the largest face with landmarks, or `None`.
    async fn detect_single(
        &self,
        image: &DynamicImage,
        options: &DetectorOptions,
    ) -> Result<Option<FaceDetection>, DetectorError>;

    /// Detect every face with landmarks and a recognition descriptor.
    async fn detect_all(
        &self,
        image: &DynamicImage,
        options: &DetectorOptions,
    ) -> Result<Vec<FaceDescriptorRecord>, DetectorError>;
}

/// Permissive two-stage detector used by the live capture loop.
///
/// Never fails: an analyzer error on one stage is logged and the next stage
/// is tried; if neither locates a face the result is `found = false`.
#[derive(Clone)]
pub struct TriageDetector {
    analyzer: Arc<dyn FaceAnalyzer>,
    primary: DetectorOptions,
    fallback: DetectorOptions,
    min_area_ratio: f32,
}

impl TriageDetector {
    pub fn new(analyzer: Arc<dyn FaceAnalyzer>) -> Self {
        Self {
            analyzer,
            primary: DetectorOptions::triage_primary(),
            fallback: DetectorOptions::triage_fallback(),
            min_area_ratio: TRIAGE_MIN_AREA_RATIO,
        }
    }

    pub fn with_stages(mut self, primary: DetectorOptions, fallback: DetectorOptions) -> Self {
        self.primary = primary;
        self.fallback = fallback;
        self
    }

    pub fn with_min_area_ratio(mut self, ratio: f32) -> Self {
        self.min_area_ratio = ratio;
        self
    }

    /// Detect the largest face in a video frame or decoded still.
    pub async fn detect(&self, image: &DynamicImage) -> DetectionResult {
        for (stage, options) in [("primary", &self.primary), ("fallback", &self.fallback)] {
            match self.analyzer.detect_single(image, options).await {
                Ok(Some(face)) => {
                    tracing::debug!(
                        stage,
                        net = options.net().asset_name(),
                        score = face.score,
                        x = face.bbox.x.round(),
                        y = face.bbox.y.round(),
                        w = face.bbox.width.round(),
                        h = face.bbox.height.round(),
                        "triage: face detected"
                    );
                    return self.gate(&face, image);
                }
                Ok(None) => {
                    tracing::debug!(stage, net = options.net().asset_name(), "triage: no face");
                }
                Err(e) => {
                    tracing::debug!(stage, error = %e, "triage: detector failed");
                }
            }
        }
        DetectionResult::none()
    }

    /// Reject faces too small relative to the frame.
    fn gate(&self, face: &FaceDetection, image: &DynamicImage) -> DetectionResult {
        let (w, h) = image.dimensions();
        let frame_area = (w as f32) * (h as f32);
        if frame_area <= 0.0 {
            return DetectionResult::none();
        }
        let ratio = face.bbox.area() / frame_area;
        if ratio > self.min_area_ratio {
            DetectionResult::found(face.bbox, face.score)
        } else {
            tracing::debug!(ratio, "triage: face too small, ignoring");
            DetectionResult::none()
        }
    }
}
