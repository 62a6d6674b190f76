//! Frame source backed by a getUserMedia-style media device capability.

use crate::camera::{
    sort_external_first, CameraDevice, CameraError, CameraMode, CameraPosition, CameraSession,
    CameraTarget, FrameSource, GrabKind,
};
use crate::frame::Frame;
use async_trait::async_trait;

/// Requested capture resolution for browser-style streams.
pub const IDEAL_WIDTH: u32 = 1280;
pub const IDEAL_HEIGHT: u32 = 720;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    pub device_id: String,
    /// Empty until the user has granted camera permission.
    pub label: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    /// Exact device to open; `None` lets the backend pick by facing.
    pub device_id: Option<String>,
    pub facing_user: bool,
    pub width: u32,
    pub height: u32,
}

impl VideoConstraints {
    pub fn device(device_id: Option<String>) -> Self {
        Self {
            device_id,
            facing_user: true,
            width: IDEAL_WIDTH,
            height: IDEAL_HEIGHT,
        }
    }
}

/// A live video stream.
#[async_trait]
pub trait MediaStream: Send + Sync {
    /// Draw the current video frame into a still.
    async fn snapshot(&mut self) -> Result<Frame, CameraError>;

    /// Stop every track. Idempotent.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, CameraError>;

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, CameraError>;
}

pub struct WebFrameSource<M> {
    media: M,
    stream: Option<Box<dyn MediaStream>>,
    session: Option<CameraSession>,
}

impl<M: MediaDevices> WebFrameSource<M> {
    pub fn new(media: M) -> Self {
        Self {
            media,
            stream: None,
            session: None,
        }
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    /// Open and immediately release a stream so the user is prompted and
    /// device labels become visible.
    async fn probe_permission(&self) -> Result<(), CameraError> {
        let mut stream = self
            .media
            .get_user_media(&VideoConstraints::device(None))
            .await?;
        stream.stop();
        Ok(())
    }
}

#[async_trait]
impl<M: MediaDevices> FrameSource for WebFrameSource<M> {
    fn mode(&self) -> CameraMode {
        CameraMode::WebBrowser
    }

    fn session(&self) -> Option<&CameraSession> {
        self.session.as_ref()
    }

    async fn initialize(&mut self) -> Result<CameraSession, CameraError> {
        self.stop().await;
        self.probe_permission().await?;

        let devices = self.list_devices().await;
        let Some(first) = devices.first() else {
            return Err(CameraError::DeviceUnavailable(
                "no video input devices found".into(),
            ));
        };
        tracing::info!(
            count = devices.len(),
            default = %first.label,
            "video inputs enumerated"
        );
        self.start(CameraTarget::Device(Some(first.device_id.clone())))
            .await
    }

    async fn start(&mut self, target: CameraTarget) -> Result<CameraSession, CameraError> {
        let constraints = match target {
            CameraTarget::Device(device_id) => VideoConstraints::device(device_id),
            CameraTarget::Position(position) => VideoConstraints {
                facing_user: position == CameraPosition::Front,
                ..VideoConstraints::device(None)
            },
        };

        self.stop().await;
        let stream = self.media.get_user_media(&constraints).await?;
        self.stream = Some(stream);

        let session = CameraSession::web(constraints.device_id);
        tracing::info!(device = ?session.device_id, "web camera stream started");
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::info!("web camera tracks stopped");
        }
        self.session = None;
    }

    async fn list_positions(&mut self) -> Vec<CameraPosition> {
        Vec::new()
    }

    async fn list_devices(&mut self) -> Vec<CameraDevice> {
        let infos = match self.media.enumerate_devices().await {
            Ok(infos) => infos,
            Err(e) => {
                tracing::warn!(error = %e, "device enumeration failed");
                return Vec::new();
            }
        };

        let mut devices: Vec<CameraDevice> = infos
            .into_iter()
            .filter(|d| d.kind == MediaKind::VideoInput)
            .enumerate()
            .map(|(i, d)| CameraDevice {
                label: if d.label.is_empty() {
                    format!("Camera {}", i + 1)
                } else {
                    d.label
                },
                device_id: d.device_id,
            })
            .collect();
        sort_external_first(&mut devices);
        devices
    }

    async fn grab_frame(&mut self, _kind: GrabKind) -> Result<Frame, CameraError> {
        match self.stream.as_mut() {
            Some(stream) if stream.is_live() => stream.snapshot().await,
            _ => Err(CameraError::NoFrameAvailable),
        }
    }

    async fn flip(&mut self) -> Result<CameraSession, CameraError> {
        Err(CameraError::FlipUnsupported)
    }
}
