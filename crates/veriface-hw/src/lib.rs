//! veriface-hw — Camera frame sources and frame geometry.
//!
//! Provides one [`FrameSource`] contract over the native camera plugin and
//! the browser media-device capability, a V4L2 media-device backend, and the
//! pure geometry transforms applied to captured frames.

pub mod camera;
pub mod frame;
pub mod geometry;
pub mod native;
pub mod still;
pub mod v4l2;
pub mod web;

pub use camera::{
    sort_external_first, CameraDevice, CameraError, CameraMode, CameraPosition, CameraSession, CameraTarget,
    FrameSource, GrabKind,
};
pub use frame::{Frame, FrameError};
pub use geometry::{GeometryError, Rect, Rotation, Size};
pub use native::{NativeCameraPlugin, NativeCaptureSettings, NativeFrameSource, PluginError};
pub use still::CapturedImage;
pub use v4l2::V4l2Devices;
pub use web::{MediaDevices, MediaStream, WebFrameSource};
