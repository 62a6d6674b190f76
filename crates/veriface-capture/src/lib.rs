//! veriface-capture — Guided live capture.
//!
//! A pure [`CaptureMachine`] holds every flag that gates detection ticks,
//! the auto-capture countdown and the shutter. The engine task owns the
//! camera, feeds the machine and reports progress as [`CaptureEvent`]s.

pub mod config;
pub mod engine;
pub mod machine;

pub use config::{CaptureConfig, ConfigError};
pub use engine::{
    spawn_capture, spawn_native_capture, CaptureError, CaptureEvent, CaptureHandle, CaptureSnapshot,
};
pub use machine::{CaptureIntent, CaptureMachine, Phase, PermissionState};
