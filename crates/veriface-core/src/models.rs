//! Face model asset resolution.
//!
//! Every net is published as a weights manifest under a common base URL.
//! Which nets must be loaded depends on where the comparison runs.

use crate::detector::{DetectorError, FaceAnalyzer};
use serde::{Deserialize, Serialize};

/// Default base URL for model assets during development.
pub const DEFAULT_MODEL_BASE_URL: &str = "/models";

/// Where the application is executing.
///
/// Browser execution compares with MTCNN; the packaged native shell
/// compares with SSD MobileNet, which is cheaper to run on phones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    #[default]
    Browser,
    Native,
}

/// A loadable face net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceNet {
    SsdMobilenetV1,
    TinyFaceDetector,
    Mtcnn,
    FaceLandmark68,
    FaceRecognition,
}

impl FaceNet {
    /// Asset name prefix used in the weights manifest file name.
    pub fn asset_name(self) -> &'static str {
        match self {
            FaceNet::SsdMobilenetV1 => "ssd_mobilenetv1",
            FaceNet::TinyFaceDetector => "tiny_face_detector",
            FaceNet::Mtcnn => "mtcnn",
            FaceNet::FaceLandmark68 => "face_landmark_68",
            FaceNet::FaceRecognition => "face_recognition",
        }
    }

    /// Nets needed for triage plus comparison in the given context.
    pub fn required_for(context: ExecutionContext) -> Vec<FaceNet> {
        let comparison_detector = match context {
            ExecutionContext::Browser => FaceNet::Mtcnn,
            ExecutionContext::Native => FaceNet::SsdMobilenetV1,
        };
        let mut nets = vec![FaceNet::SsdMobilenetV1, FaceNet::TinyFaceDetector];
        if !nets.contains(&comparison_detector) {
            nets.push(comparison_detector);
        }
        nets.extend([FaceNet::FaceLandmark68, FaceNet::FaceRecognition]);
        nets
    }
}

/// Base location of model assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    pub base_url: String,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_BASE_URL)
    }
}

impl ModelSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// URL of the weights manifest for `net`.
    pub fn manifest_url(&self, net: FaceNet) -> String {
        format!(
            "{}/{}_model-weights_manifest.json",
            self.base_url.trim_end_matches('/'),
            net.asset_name()
        )
    }
}

/// Load every net the given context needs. Fails on the first net that
/// cannot be loaded.
pub async fn load_required(
    analyzer: &dyn FaceAnalyzer,
    source: &ModelSource,
    context: ExecutionContext,
) -> Result<(), DetectorError> {
    for net in FaceNet::required_for(context) {
        let url = source.manifest_url(net);
        analyzer.load_net(net, &url).await?;
        tracing::info!(net = net.asset_name(), url = %url, "loaded face net");
    }
    Ok(())
}
