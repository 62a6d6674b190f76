//! veriface-core — Face detection triage and face comparison.
//!
//! The face model itself is an external capability behind [`FaceAnalyzer`];
//! this crate decides what to ask it and how to judge the answers.

pub mod comparison;
pub mod detector;
pub mod models;
pub mod overlay;
pub mod types;

pub use comparison::{ComparisonFailure, ComparisonOptions, ComparisonVerdict, FaceComparator, Side};
pub use detector::{DetectorError, DetectorOptions, FaceAnalyzer, TriageDetector};
pub use models::{ExecutionContext, FaceNet, ModelSource};
pub use types::{DetectionResult, FaceBox, FaceDescriptorRecord, FaceDetection, Point};
