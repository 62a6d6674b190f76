//! V4L2 implementation of the media-device capability via the `v4l` crate.

use crate::camera::CameraError;
use crate::frame::{self, Frame};
use crate::web::{MediaDeviceInfo, MediaDevices, MediaKind, MediaStream, VideoConstraints};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage};
use std::io;
use std::path::Path;
use std::sync::Arc;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Highest `/dev/videoN` index scanned during enumeration.
const MAX_DEVICE_INDEX: u32 = 16;

/// Frames discarded after opening the stream; UVC cameras often hand out
/// stale or black buffers first.
const WARMUP_FRAMES: usize = 2;

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion JPEG, one JPEG per buffer.
    Mjpg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Video4Linux capture devices, presented as browser-style media devices.
#[derive(Debug, Clone, Default)]
pub struct V4l2Devices;

impl V4l2Devices {
    pub fn new() -> Self {
        Self
    }

    /// Scan `/dev/video*` for nodes that support video capture.
    pub fn scan() -> Vec<MediaDeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..MAX_DEVICE_INDEX {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(MediaDeviceInfo {
                device_id: path,
                label: caps.card.clone(),
                kind: MediaKind::VideoInput,
            });
        }

        devices
    }

    fn open(path: &str, constraints: &VideoConstraints) -> Result<V4l2Stream, CameraError> {
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceUnavailable(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|e| open_error(path, e))?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::DeviceUnavailable(format!("{path}: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceUnavailable(format!(
                "{path}: not a capture device"
            )));
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::DeviceUnavailable(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.width;
        fmt.height = constraints.height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::DeviceUnavailable(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::DeviceUnavailable(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            device = path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "opened camera"
        );

        Ok(V4l2Stream {
            device: Some(Arc::new(device)),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }
}

fn open_error(path: &str, e: io::Error) -> CameraError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied
    } else {
        CameraError::DeviceUnavailable(format!("{path}: {e}"))
    }
}

#[async_trait]
impl MediaDevices for V4l2Devices {
    async fn get_user_media(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, CameraError> {
        let path = match &constraints.device_id {
            Some(path) => path.clone(),
            None => Self::scan()
                .into_iter()
                .next()
                .map(|d| d.device_id)
                .ok_or_else(|| CameraError::DeviceUnavailable("no video devices".into()))?,
        };
        let stream = Self::open(&path, constraints)?;
        Ok(Box::new(stream))
    }

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, CameraError> {
        Ok(Self::scan())
    }
}

/// An open V4L2 device. Each snapshot maps a short-lived buffer stream.
pub struct V4l2Stream {
    device: Option<Arc<Device>>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl V4l2Stream {
    fn capture_blocking(
        device: &Device,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    ) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        for _ in 0..WARMUP_FRAMES {
            stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
        }

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        let image = convert_buffer(&buf[..used], width, height, pixel_format)?;
        Ok(Frame::new(image, meta.sequence))
    }
}

/// Convert a raw buffer to an image based on the negotiated format.
pub fn convert_buffer(
    buf: &[u8],
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
) -> Result<DynamicImage, CameraError> {
    match pixel_format {
        PixelFormat::Yuyv => {
            let rgb = frame::yuyv_to_rgb(buf, width, height)?;
            Ok(DynamicImage::ImageRgb8(rgb))
        }
        PixelFormat::Mjpg => image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
            .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}"))),
        PixelFormat::Grey => {
            let pixels = (width * height) as usize;
            if buf.len() < pixels {
                return Err(CameraError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            GrayImage::from_raw(width, height, buf[..pixels].to_vec())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| CameraError::CaptureFailed("GREY buffer rejected".into()))
        }
    }
}

#[async_trait]
impl MediaStream for V4l2Stream {
    async fn snapshot(&mut self) -> Result<Frame, CameraError> {
        let device = self.device.clone().ok_or(CameraError::NoFrameAvailable)?;
        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);

        let frame = tokio::task::spawn_blocking(move || {
            Self::capture_blocking(&device, width, height, pixel_format)
        })
        .await
        .map_err(|e| CameraError::CaptureFailed(format!("capture task failed: {e}")))??;

        tracing::debug!(seq = frame.sequence, width, height, "v4l2 frame");
        Ok(frame)
    }

    fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::debug!("v4l2 device closed");
        }
    }

    fn is_live(&self) -> bool {
        self.device.is_some()
    }
}
