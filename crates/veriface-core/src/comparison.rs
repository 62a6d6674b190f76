//! Reference vs. verification face comparison.
//!
//! Both images go through full detection (landmarks + descriptor) with the
//! accuracy-oriented detector, are validated in a fixed order, and only then
//! compared by Euclidean descriptor distance.

use crate::detector::{DetectorOptions, FaceAnalyzer};
use crate::models::ExecutionContext;
use crate::types::FaceDescriptorRecord;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// --- Verification thresholds ---
pub const FACE_DISTANCE_THRESHOLD: f32 = 0.4;
pub const FACE_CONFIDENCE_THRESHOLD: f32 = 0.75;
pub const MIN_FACE_SIZE: f32 = 100.0;

/// Which of the two compared images a message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Reference,
    Verification,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Reference => f.write_str("reference"),
            Side::Verification => f.write_str("verification"),
        }
    }
}

/// Why a comparison could not produce a match decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComparisonFailure {
    NoFace { side: Side },
    MultipleFaces { side: Side, count: usize },
    LowConfidence { side: Side, score: f32 },
    FaceTooSmall { side: Side, size: f32 },
    /// Unexpected analyzer failure; reported generically.
    Error { reason: String },
}

impl ComparisonFailure {
    /// User-facing message, including the measured value where there is one.
    pub fn message(&self) -> String {
        match self {
            ComparisonFailure::NoFace { side } => {
                format!("No face detected in the {side} image")
            }
            ComparisonFailure::MultipleFaces { side, count } => format!(
                "The {side} image contains more than one face ({count} found). \
                 Please choose an image with a single clear face."
            ),
            ComparisonFailure::LowConfidence { side, score } => format!(
                "The {side} image is unclear (confidence: {:.1}%). Please choose a sharper image.",
                score * 100.0
            ),
            ComparisonFailure::FaceTooSmall { side, size } => format!(
                "The face in the {side} image is too small ({size:.0}px). Please move closer."
            ),
            ComparisonFailure::Error { .. } => {
                "Face comparison failed. Please try again with higher quality images.".to_string()
            }
        }
    }
}

/// Outcome of one comparison call. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonVerdict {
    pub success: bool,
    pub is_match: bool,
    pub distance: Option<f32>,
    pub message: String,
    pub ref_face_size: Option<f32>,
    pub cap_face_size: Option<f32>,
    pub landmarks_count: Option<usize>,
    pub failure: Option<ComparisonFailure>,
    /// Analysed faces, present on success, for drawing overlays.
    #[serde(skip)]
    pub reference: Option<FaceDescriptorRecord>,
    #[serde(skip)]
    pub verification: Option<FaceDescriptorRecord>,
}

impl ComparisonVerdict {
    fn failed(failure: ComparisonFailure) -> Self {
        Self {
            success: false,
            is_match: false,
            distance: None,
            message: failure.message(),
            ref_face_size: None,
            cap_face_size: None,
            landmarks_count: None,
            failure: Some(failure),
            reference: None,
            verification: None,
        }
    }

    /// Similarity shown to users, `(1 - distance) * 100`.
    pub fn similarity_pct(&self) -> Option<f32> {
        self.distance.map(|d| (1.0 - d) * 100.0)
    }
}

/// Thresholds and detector used for comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonOptions {
    pub distance_threshold: f32,
    pub min_confidence: f32,
    pub min_face_size: f32,
    pub detector: DetectorOptions,
}

impl ComparisonOptions {
    /// Defaults for the given execution context.
    pub fn for_context(context: ExecutionContext) -> Self {
        let detector = match context {
            ExecutionContext::Browser => DetectorOptions::Mtcnn {
                min_face_size: MIN_FACE_SIZE as u32,
                scale_factor: 0.709,
                score_thresholds: [0.6, 0.7, 0.7],
                max_num_scales: 10,
            },
            ExecutionContext::Native => DetectorOptions::SsdMobilenetV1 { min_confidence: 0.5 },
        };
        Self {
            distance_threshold: FACE_DISTANCE_THRESHOLD,
            min_confidence: FACE_CONFIDENCE_THRESHOLD,
            min_face_size: MIN_FACE_SIZE,
            detector,
        }
    }
}

impl Default for ComparisonOptions {
    fn default() -> Self {
        Self::for_context(ExecutionContext::default())
    }
}

/// Face comparison engine.
#[derive(Clone)]
pub struct FaceComparator {
    analyzer: Arc<dyn FaceAnalyzer>,
    options: ComparisonOptions,
}

impl FaceComparator {
    pub fn new(analyzer: Arc<dyn FaceAnalyzer>, options: ComparisonOptions) -> Self {
        Self { analyzer, options }
    }

    pub fn options(&self) -> &ComparisonOptions {
        &self.options
    }

    /// Compare a reference image against a verification image.
    ///
    /// Never fails: every problem is reported inside the verdict.
    pub async fn compare(
        &self,
        reference: &DynamicImage,
        verification: &DynamicImage,
    ) -> ComparisonVerdict {
        let detector = &self.options.detector;

        let ref_faces = match self.analyzer.detect_all(reference, detector).await {
            Ok(faces) => faces,
            Err(e) => return self.analyzer_failure(Side::Reference, e),
        };
        let cap_faces = match self.analyzer.detect_all(verification, detector).await {
            Ok(faces) => faces,
            Err(e) => return self.analyzer_failure(Side::Verification, e),
        };

        tracing::debug!(
            reference = ref_faces.len(),
            verification = cap_faces.len(),
            "comparison: faces detected"
        );

        match self.judge(ref_faces, cap_faces) {
            Ok(verdict) => verdict,
            Err(failure) => {
                tracing::info!(?failure, "comparison rejected");
                ComparisonVerdict::failed(failure)
            }
        }
    }

    fn analyzer_failure(&self, side: Side, err: crate::DetectorError) -> ComparisonVerdict {
        tracing::error!(%side, error = %err, "face comparison error");
        ComparisonVerdict::failed(ComparisonFailure::Error {
            reason: err.to_string(),
        })
    }

    /// Validate both detection sets and compute the verdict.
    ///
    /// Checks short-circuit in order: presence, uniqueness, confidence, size.
    fn judge(
        &self,
        ref_faces: Vec<FaceDescriptorRecord>,
        cap_faces: Vec<FaceDescriptorRecord>,
    ) -> Result<ComparisonVerdict, ComparisonFailure> {
        let opts = &self.options;

        for (side, faces) in [(Side::Reference, &ref_faces), (Side::Verification, &cap_faces)] {
            if faces.is_empty() {
                return Err(ComparisonFailure::NoFace { side });
            }
        }
        for (side, faces) in [(Side::Reference, &ref_faces), (Side::Verification, &cap_faces)] {
            if faces.len() > 1 {
                return Err(ComparisonFailure::MultipleFaces { side, count: faces.len() });
            }
        }

        let ref_face = ref_faces.into_iter().next().ok_or(ComparisonFailure::NoFace {
            side: Side::Reference,
        })?;
        let cap_face = cap_faces.into_iter().next().ok_or(ComparisonFailure::NoFace {
            side: Side::Verification,
        })?;

        for (side, face) in [(Side::Reference, &ref_face), (Side::Verification, &cap_face)] {
            if face.score < opts.min_confidence {
                return Err(ComparisonFailure::LowConfidence { side, score: face.score });
            }
        }

        let ref_face_size = ref_face.bbox.min_side();
        let cap_face_size = cap_face.bbox.min_side();
        for (side, size) in [(Side::Reference, ref_face_size), (Side::Verification, cap_face_size)] {
            if size < opts.min_face_size {
                return Err(ComparisonFailure::FaceTooSmall { side, size });
            }
        }

        let distance = ref_face.distance(&cap_face);
        let is_match = distance < opts.distance_threshold;
        let landmarks_count = ref_face.landmarks.len();
        let similarity = (1.0 - distance) * 100.0;

        let mut message = if is_match {
            format!("Same person (similarity: {similarity:.1}%)")
        } else {
            format!("Different people (similarity: {similarity:.1}%)")
        };
        message.push_str(&format!(
            "\nDistance: {distance:.3} (threshold: {})",
            opts.distance_threshold
        ));
        message.push_str(&format!(
            "\nFace size: {ref_face_size:.0}px / {cap_face_size:.0}px"
        ));
        message.push_str(&format!("\nLandmarks: {landmarks_count} points"));

        tracing::info!(distance, is_match, ref_face_size, cap_face_size, "comparison complete");

        Ok(ComparisonVerdict {
            success: true,
            is_match,
            distance: Some(distance),
            message,
            ref_face_size: Some(ref_face_size),
            cap_face_size: Some(cap_face_size),
            landmarks_count: Some(landmarks_count),
            failure: None,
            reference: Some(ref_face),
            verification: Some(cap_face),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::models::FaceNet;
    use crate::types::{FaceBox, FaceDetection, Point, DESCRIPTOR_LEN, LANDMARK_COUNT};
    use async_trait::async_trait;
    use image::GenericImageView;

    /// Analyzer that derives faces from the image width, so tests can
    /// select a scripted answer by picking the image size.
    struct WidthKeyedAnalyzer {
        faces: Vec<(u32, Result<Vec<FaceDescriptorRecord>, ()>)>,
    }

    #[async_trait]
    impl FaceAnalyzer for WidthKeyedAnalyzer {
        async fn load_net(&self, _net: FaceNet, _url: &str) -> Result<(), DetectorError> {
            Ok(())
        }

        async fn detect_single(
            &self,
            _image: &DynamicImage,
            _options: &DetectorOptions,
        ) -> Result<Option<FaceDetection>, DetectorError> {
            Ok(None)
        }

        async fn detect_all(
            &self,
            image: &DynamicImage,
            _options: &DetectorOptions,
        ) -> Result<Vec<FaceDescriptorRecord>, DetectorError> {
            let (w, _) = image.dimensions();
            match self.faces.iter().find(|(key, _)| *key == w) {
                Some((_, Ok(faces))) => Ok(faces.clone()),
                Some((_, Err(()))) => Err(DetectorError::InferenceFailed("boom".into())),
                None => Ok(vec![]),
            }
        }
    }

    fn face(size: f32, score: f32, fill: f32) -> FaceDescriptorRecord {
        FaceDescriptorRecord {
            bbox: FaceBox::new(50.0, 50.0, size, size * 1.2),
            landmarks: vec![Point::default(); LANDMARK_COUNT],
            descriptor: vec![fill; DESCRIPTOR_LEN],
            score,
        }
    }

    fn img(width: u32) -> DynamicImage {
        DynamicImage::new_rgb8(width, 8)
    }

    fn comparator(faces: Vec<(u32, Result<Vec<FaceDescriptorRecord>, ()>)>) -> FaceComparator {
        FaceComparator::new(
            Arc::new(WidthKeyedAnalyzer { faces }),
            ComparisonOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_identical_image_matches() {
        let cmp = comparator(vec![(10, Ok(vec![face(200.0, 0.98, 0.05)]))]);
        let v = cmp.compare(&img(10), &img(10)).await;
        assert!(v.success);
        assert!(v.is_match);
        assert!(v.distance.unwrap().abs() < 1e-6);
        assert_eq!(v.landmarks_count, Some(LANDMARK_COUNT));
        assert!(v.message.starts_with("Same person (similarity: 100.0%)"));
        assert!(v.reference.is_some() && v.verification.is_some());
    }

    #[tokio::test]
    async fn test_distant_descriptors_do_not_match() {
        // Per-component difference 0.1 over 128 dims → distance ≈ 1.131.
        let cmp = comparator(vec![
            (10, Ok(vec![face(200.0, 0.98, 0.0)])),
            (20, Ok(vec![face(200.0, 0.98, 0.1)])),
        ]);
        let v = cmp.compare(&img(10), &img(20)).await;
        assert!(v.success);
        assert!(!v.is_match);
        let expected = (DESCRIPTOR_LEN as f32 * 0.01).sqrt();
        assert!((v.distance.unwrap() - expected).abs() < 1e-4);
        assert!(v.message.starts_with("Different people"));
    }

    #[tokio::test]
    async fn test_no_face_names_side() {
        let cmp = comparator(vec![(10, Ok(vec![face(200.0, 0.98, 0.0)]))]);
        let v = cmp.compare(&img(10), &img(99)).await;
        assert!(!v.success);
        assert!(!v.is_match);
        assert_eq!(v.failure, Some(ComparisonFailure::NoFace { side: Side::Verification }));
        assert!(v.message.contains("verification"));

        let v = cmp.compare(&img(99), &img(10)).await;
        assert_eq!(v.failure, Some(ComparisonFailure::NoFace { side: Side::Reference }));
    }

    #[tokio::test]
    async fn test_multiple_faces_distinct_from_no_face() {
        let cmp = comparator(vec![
            (10, Ok(vec![face(200.0, 0.98, 0.0)])),
            (20, Ok(vec![face(200.0, 0.98, 0.0), face(150.0, 0.9, 0.2)])),
        ]);
        let v = cmp.compare(&img(20), &img(10)).await;
        assert!(!v.success);
        assert_eq!(
            v.failure,
            Some(ComparisonFailure::MultipleFaces { side: Side::Reference, count: 2 })
        );
    }

    #[tokio::test]
    async fn test_no_face_checked_before_multiple_faces() {
        let cmp = comparator(vec![(20, Ok(vec![face(200.0, 0.98, 0.0), face(150.0, 0.9, 0.2)]))]);
        let v = cmp.compare(&img(20), &img(99)).await;
        assert_eq!(v.failure, Some(ComparisonFailure::NoFace { side: Side::Verification }));
    }

    #[tokio::test]
    async fn test_low_confidence_reports_percentage() {
        let cmp = comparator(vec![
            (10, Ok(vec![face(200.0, 0.98, 0.0)])),
            (20, Ok(vec![face(200.0, 0.621, 0.0)])),
        ]);
        let v = cmp.compare(&img(10), &img(20)).await;
        assert!(matches!(
            v.failure,
            Some(ComparisonFailure::LowConfidence { side: Side::Verification, .. })
        ));
        assert!(v.message.contains("62.1%"), "{}", v.message);
    }

    #[tokio::test]
    async fn test_small_face_rejected_before_distance() {
        let cmp = comparator(vec![
            (10, Ok(vec![face(84.0, 0.98, 0.0)])),
            (20, Ok(vec![face(200.0, 0.98, 0.0)])),
        ]);
        let v = cmp.compare(&img(10), &img(20)).await;
        assert_eq!(
            v.failure,
            Some(ComparisonFailure::FaceTooSmall { side: Side::Reference, size: 84.0 })
        );
        assert!(v.distance.is_none());
        assert!(v.message.contains("84px"));
    }

    #[tokio::test]
    async fn test_analyzer_error_is_generic_failure() {
        let cmp = comparator(vec![(10, Err(()))]);
        let v = cmp.compare(&img(10), &img(10)).await;
        assert!(!v.success);
        assert!(matches!(v.failure, Some(ComparisonFailure::Error { .. })));
        assert!(v.message.starts_with("Face comparison failed"));
    }

    #[test]
    fn test_native_context_uses_ssd() {
        let opts = ComparisonOptions::for_context(ExecutionContext::Native);
        assert_eq!(opts.detector.net(), FaceNet::SsdMobilenetV1);
        assert_eq!(ComparisonOptions::default().detector.net(), FaceNet::Mtcnn);
    }
}
