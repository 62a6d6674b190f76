//! Camera frame source contract shared by the native and browser backends.

use crate::frame::{Frame, FrameError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label substrings that mark a camera as built into the device.
///
/// "webcam" alone is deliberately absent: external cameras are commonly
/// sold as "<brand> Webcam".
const BUILT_IN_KEYWORDS: [&str; 8] = [
    "integrated",
    "built-in",
    "builtin",
    "facetime",
    "internal",
    "front",
    "rear",
    "ir camera",
];

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("no frame available: camera not started")]
    NoFrameAvailable,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("hardware flip not supported")]
    FlipUnsupported,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Which camera capability backs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    Native,
    WebBrowser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    #[default]
    Front,
    Rear,
}

impl CameraPosition {
    pub fn opposite(self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Rear,
            CameraPosition::Rear => CameraPosition::Front,
        }
    }
}

/// What to open: a native facing, or a browser device id
/// (`None` = any user-facing camera).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraTarget {
    Position(CameraPosition),
    Device(Option<String>),
}

/// The one active camera acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraSession {
    pub mode: CameraMode,
    pub position: Option<CameraPosition>,
    pub device_id: Option<String>,
    pub is_active: bool,
}

impl CameraSession {
    pub fn native(position: CameraPosition) -> Self {
        Self {
            mode: CameraMode::Native,
            position: Some(position),
            device_id: None,
            is_active: true,
        }
    }

    pub fn web(device_id: Option<String>) -> Self {
        Self {
            mode: CameraMode::WebBrowser,
            position: None,
            device_id,
            is_active: true,
        }
    }

    pub fn is_web_camera(&self) -> bool {
        self.mode == CameraMode::WebBrowser
    }

    /// Whether this session already targets `target`.
    pub fn targets(&self, target: &CameraTarget) -> bool {
        match target {
            CameraTarget::Position(p) => self.position == Some(*p),
            CameraTarget::Device(Some(id)) => self.device_id.as_deref() == Some(id.as_str()),
            CameraTarget::Device(None) => false,
        }
    }
}

/// An enumerated video input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraDevice {
    pub device_id: String,
    pub label: String,
}

impl CameraDevice {
    pub fn is_built_in(&self) -> bool {
        is_built_in_label(&self.label)
    }
}

/// Heuristic: does this label name a camera built into the device?
pub fn is_built_in_label(label: &str) -> bool {
    let lower = label.to_lowercase();
    BUILT_IN_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Order devices so external (USB) cameras come first. Stable: relative
/// order within each group is preserved.
pub fn sort_external_first(devices: &mut [CameraDevice]) {
    devices.sort_by_key(CameraDevice::is_built_in);
}

/// Frame quality needed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabKind {
    /// Cheap, reduced-size sample for detection.
    Sample,
    /// Full-resolution still for the final capture.
    Still,
}

/// One camera, native or browser, behind a single capability.
///
/// Implementations hold at most one hardware acquisition at a time: `start`
/// releases any previous stream before opening a new one.
#[async_trait]
pub trait FrameSource: Send {
    fn mode(&self) -> CameraMode;

    /// The active session, if a camera is running.
    fn session(&self) -> Option<&CameraSession>;

    /// Probe permission, enumerate cameras and start the default one.
    async fn initialize(&mut self) -> Result<CameraSession, CameraError>;

    async fn start(&mut self, target: CameraTarget) -> Result<CameraSession, CameraError>;

    /// Release the hardware. Safe to call when already stopped.
    async fn stop(&mut self);

    /// Facings available on a native device. Best-effort.
    async fn list_positions(&mut self) -> Vec<CameraPosition>;

    /// Video inputs, external first. Best-effort.
    async fn list_devices(&mut self) -> Vec<CameraDevice>;

    async fn grab_frame(&mut self, kind: GrabKind) -> Result<Frame, CameraError>;

    /// Toggle facing in place. `FlipUnsupported` tells the caller to restart
    /// with the opposite position instead.
    async fn flip(&mut self) -> Result<CameraSession, CameraError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(id: &str, label: &str) -> CameraDevice {
        CameraDevice { device_id: id.into(), label: label.into() }
    }

    #[test]
    fn test_external_camera_sorted_first() {
        let mut devices = vec![dev("a", "Integrated Webcam"), dev("b", "Logi Webcam")];
        sort_external_first(&mut devices);
        assert_eq!(devices[0].label, "Logi Webcam");
        assert_eq!(devices[1].label, "Integrated Webcam");
    }

    #[test]
    fn test_sort_is_stable_within_groups() {
        let mut devices = vec![
            dev("1", "FaceTime HD Camera"),
            dev("2", "USB Camera A"),
            dev("3", "Built-in Camera"),
            dev("4", "USB Camera B"),
        ];
        sort_external_first(&mut devices);
        let ids: Vec<_> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, ["2", "4", "1", "3"]);
    }

    #[test]
    fn test_built_in_label_case_insensitive() {
        assert!(is_built_in_label("INTEGRATED CAMERA"));
        assert!(is_built_in_label("Front Camera"));
        assert!(!is_built_in_label("Logitech BRIO"));
    }

    #[test]
    fn test_session_targets() {
        let s = CameraSession::native(CameraPosition::Front);
        assert!(s.targets(&CameraTarget::Position(CameraPosition::Front)));
        assert!(!s.targets(&CameraTarget::Position(CameraPosition::Rear)));
        let w = CameraSession::web(Some("usb-1".into()));
        assert!(w.targets(&CameraTarget::Device(Some("usb-1".into()))));
        assert!(!w.targets(&CameraTarget::Device(None)));
        assert!(w.is_web_camera());
    }

    #[test]
    fn test_position_opposite() {
        assert_eq!(CameraPosition::Front.opposite(), CameraPosition::Rear);
        assert_eq!(CameraPosition::Rear.opposite(), CameraPosition::Front);
    }
}
