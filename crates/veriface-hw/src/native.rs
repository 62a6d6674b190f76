//! Frame source backed by a native (mobile shell) camera plugin.

use crate::camera::{
    CameraDevice, CameraError, CameraMode, CameraPosition, CameraSession, CameraTarget,
    FrameSource, GrabKind,
};
use crate::frame::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Container the plugin binds its full-screen preview to.
pub const PREVIEW_CONTAINER: &str = "camera-preview";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("operation not supported")]
    Unsupported,
    #[error("{0}")]
    Failed(String),
}

impl From<PluginError> for CameraError {
    fn from(e: PluginError) -> Self {
        match e {
            PluginError::PermissionDenied => CameraError::PermissionDenied,
            PluginError::Unavailable(reason) => CameraError::DeviceUnavailable(reason),
            PluginError::Unsupported => CameraError::FlipUnsupported,
            PluginError::Failed(reason) => CameraError::CaptureFailed(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewOptions {
    pub position: CameraPosition,
    pub parent: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub quality: u8,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// The device camera plugin. Every call is asynchronous and may reject.
#[async_trait]
pub trait NativeCameraPlugin: Send + Sync {
    /// Ask the OS for camera access. `Ok(false)` means the user refused.
    async fn request_permission(&self) -> Result<bool, PluginError>;

    async fn start_preview(&self, options: &PreviewOptions) -> Result<(), PluginError>;

    async fn stop_preview(&self) -> Result<(), PluginError>;

    /// Capture a still; returns encoded JPEG bytes.
    async fn capture(&self, options: &CaptureOptions) -> Result<Vec<u8>, PluginError>;

    /// Toggle facing on the running preview. `Unsupported` if the platform
    /// can't do it in place.
    async fn flip(&self) -> Result<(), PluginError>;
}

/// JPEG settings for the two kinds of native grab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeCaptureSettings {
    pub sample_quality: u8,
    pub sample_width: u32,
    pub sample_height: u32,
    pub still_quality: u8,
}

impl Default for NativeCaptureSettings {
    fn default() -> Self {
        Self {
            sample_quality: 30,
            sample_width: 640,
            sample_height: 480,
            still_quality: 90,
        }
    }
}

impl NativeCaptureSettings {
    fn options_for(&self, kind: GrabKind) -> CaptureOptions {
        match kind {
            GrabKind::Sample => CaptureOptions {
                quality: self.sample_quality,
                width: Some(self.sample_width),
                height: Some(self.sample_height),
            },
            GrabKind::Still => CaptureOptions {
                quality: self.still_quality,
                width: None,
                height: None,
            },
        }
    }
}

pub struct NativeFrameSource<P> {
    plugin: P,
    settings: NativeCaptureSettings,
    session: Option<CameraSession>,
    positions: Option<Vec<CameraPosition>>,
    sequence: u32,
}

impl<P: NativeCameraPlugin> NativeFrameSource<P> {
    pub fn new(plugin: P) -> Self {
        Self::with_settings(plugin, NativeCaptureSettings::default())
    }

    pub fn with_settings(plugin: P, settings: NativeCaptureSettings) -> Self {
        Self {
            plugin,
            settings,
            session: None,
            positions: None,
            sequence: 0,
        }
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    fn preview_options(position: CameraPosition) -> PreviewOptions {
        PreviewOptions {
            position,
            parent: PREVIEW_CONTAINER.to_string(),
            width: None,
            height: None,
        }
    }

    /// Try to open the rear camera, then release it again.
    async fn probe_rear(&self) -> bool {
        match self
            .plugin
            .start_preview(&Self::preview_options(CameraPosition::Rear))
            .await
        {
            Ok(()) => {
                if let Err(e) = self.plugin.stop_preview().await {
                    tracing::warn!(error = %e, "failed to stop rear probe preview");
                }
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "rear camera probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl<P: NativeCameraPlugin> FrameSource for NativeFrameSource<P> {
    fn mode(&self) -> CameraMode {
        CameraMode::Native
    }

    fn session(&self) -> Option<&CameraSession> {
        self.session.as_ref()
    }

    async fn initialize(&mut self) -> Result<CameraSession, CameraError> {
        if !self.plugin.request_permission().await? {
            return Err(CameraError::PermissionDenied);
        }
        self.stop().await;
        let positions = self.list_positions().await;
        tracing::info!(?positions, "native camera positions");
        self.start(CameraTarget::Position(CameraPosition::Front)).await
    }

    async fn start(&mut self, target: CameraTarget) -> Result<CameraSession, CameraError> {
        let CameraTarget::Position(position) = target else {
            return Err(CameraError::DeviceUnavailable(
                "native cameras are selected by position".into(),
            ));
        };
        if self.positions.as_ref().is_some_and(|p| !p.contains(&position)) {
            return Err(CameraError::DeviceUnavailable(format!(
                "no {position:?} camera on this device"
            )));
        }

        self.stop().await;
        self.plugin
            .start_preview(&Self::preview_options(position))
            .await?;

        let session = CameraSession::native(position);
        tracing::info!(?position, "native preview started");
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn stop(&mut self) {
        if self.session.take().is_none() {
            return;
        }
        if let Err(e) = self.plugin.stop_preview().await {
            tracing::warn!(error = %e, "failed to stop native preview");
        } else {
            tracing::info!("native preview stopped");
        }
    }

    async fn list_positions(&mut self) -> Vec<CameraPosition> {
        if let Some(positions) = &self.positions {
            return positions.clone();
        }
        // Probing opens the hardware, which would clobber a running preview.
        if let Some(session) = &self.session {
            return session.position.into_iter().collect();
        }
        let mut positions = vec![CameraPosition::Front];
        if self.probe_rear().await {
            positions.push(CameraPosition::Rear);
        }
        self.positions = Some(positions.clone());
        positions
    }

    async fn list_devices(&mut self) -> Vec<CameraDevice> {
        Vec::new()
    }

    async fn grab_frame(&mut self, kind: GrabKind) -> Result<Frame, CameraError> {
        if self.session.is_none() {
            return Err(CameraError::NoFrameAvailable);
        }
        let options = self.settings.options_for(kind);
        let jpeg = self.plugin.capture(&options).await?;
        self.sequence = self.sequence.wrapping_add(1);
        let frame = Frame::decode(&jpeg, self.sequence)?;
        tracing::debug!(
            ?kind,
            seq = frame.sequence,
            width = frame.width(),
            height = frame.height(),
            "native frame"
        );
        Ok(frame)
    }

    async fn flip(&mut self) -> Result<CameraSession, CameraError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CameraError::NoFrameAvailable);
        };
        self.plugin.flip().await?;
        session.position = session.position.map(CameraPosition::opposite);
        tracing::info!(position = ?session.position, "native camera flipped");
        Ok(session.clone())
    }
}
