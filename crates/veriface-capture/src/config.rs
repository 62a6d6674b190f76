use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use veriface_core::{DetectorOptions, ExecutionContext};
use veriface_hw::geometry::GUIDE_ASPECT;
use veriface_hw::still::OUTPUT_JPEG_QUALITY;
use veriface_hw::{CameraMode, NativeCaptureSettings, Size};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Capture configuration: TOML file (optional), then `VERIFACE_*` overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Detection tick for live browser video.
    pub web_tick_ms: u64,
    /// Detection tick for native sampled capture.
    pub native_tick_ms: u64,
    /// Delay before the first tick of a new web preview.
    pub web_warmup_ms: u64,
    /// Delay before the first tick of a new native preview.
    pub native_warmup_ms: u64,
    /// How far a face may overhang the guide frame, as a fraction of its size.
    pub in_frame_tolerance: f32,
    /// Minimum score for both triage detector stages.
    pub triage_min_confidence: f32,
    pub countdown_secs: u32,
    /// Pause between the countdown reaching 0 and the grab.
    pub settle_delay_ms: u64,
    /// Width / height of the crop applied to captured stills.
    pub guide_aspect: f32,
    pub output_quality: u8,
    /// Rotate landscape native stills -90 degrees before cropping.
    pub rotate_native_landscape: bool,
    pub skip_dark_frames: bool,
    /// Initial viewport the guide frame is laid out in.
    pub viewport: Size,
    /// Preferred device for web mode (e.g. `/dev/video0`).
    pub camera_device: Option<String>,
    pub execution_context: ExecutionContext,
    pub model_base_url: String,
    pub native: NativeCaptureSettings,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            web_tick_ms: 300,
            native_tick_ms: 1500,
            web_warmup_ms: 1000,
            native_warmup_ms: 2000,
            in_frame_tolerance: 0.2,
            triage_min_confidence: 0.2,
            countdown_secs: 3,
            settle_delay_ms: 300,
            guide_aspect: GUIDE_ASPECT,
            output_quality: OUTPUT_JPEG_QUALITY,
            rotate_native_landscape: true,
            skip_dark_frames: true,
            viewport: Size::new(1280.0, 720.0),
            camera_device: None,
            execution_context: ExecutionContext::default(),
            model_base_url: veriface_core::models::DEFAULT_MODEL_BASE_URL.to_string(),
            native: NativeCaptureSettings::default(),
        }
    }
}

impl CaptureConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_env())
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded capture config");
        Ok(config)
    }

    /// Defaults overlaid with `VERIFACE_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Unparseable values keep the current setting.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        self.web_tick_ms = env_parse(&lookup, "VERIFACE_WEB_TICK_MS", self.web_tick_ms);
        self.native_tick_ms = env_parse(&lookup, "VERIFACE_NATIVE_TICK_MS", self.native_tick_ms);
        self.web_warmup_ms = env_parse(&lookup, "VERIFACE_WEB_WARMUP_MS", self.web_warmup_ms);
        self.native_warmup_ms =
            env_parse(&lookup, "VERIFACE_NATIVE_WARMUP_MS", self.native_warmup_ms);
        self.in_frame_tolerance =
            env_parse(&lookup, "VERIFACE_IN_FRAME_TOLERANCE", self.in_frame_tolerance);
        self.triage_min_confidence =
            env_parse(&lookup, "VERIFACE_TRIAGE_MIN_CONFIDENCE", self.triage_min_confidence);
        self.countdown_secs = env_parse(&lookup, "VERIFACE_COUNTDOWN_SECS", self.countdown_secs);
        self.settle_delay_ms = env_parse(&lookup, "VERIFACE_SETTLE_DELAY_MS", self.settle_delay_ms);
        self.output_quality = env_parse(&lookup, "VERIFACE_OUTPUT_QUALITY", self.output_quality);
        self.rotate_native_landscape =
            env_bool(&lookup, "VERIFACE_ROTATE_NATIVE", self.rotate_native_landscape);
        self.skip_dark_frames = env_bool(&lookup, "VERIFACE_SKIP_DARK_FRAMES", self.skip_dark_frames);

        if let Some(viewport) = lookup("VERIFACE_VIEWPORT").and_then(|v| parse_viewport(&v)) {
            self.viewport = viewport;
        }
        if let Some(device) = lookup("VERIFACE_CAMERA_DEVICE").filter(|v| !v.is_empty()) {
            self.camera_device = Some(device);
        }
        match lookup("VERIFACE_EXECUTION_CONTEXT").as_deref() {
            Some("browser") => self.execution_context = ExecutionContext::Browser,
            Some("native") => self.execution_context = ExecutionContext::Native,
            Some(other) => tracing::warn!(value = other, "ignoring unknown execution context"),
            None => {}
        }
        if let Some(url) = lookup("VERIFACE_MODEL_BASE_URL") {
            self.model_base_url = url;
        }
        self
    }

    /// Never zero: a zero-period interval would panic.
    pub fn tick_interval(&self, mode: CameraMode) -> Duration {
        let ms = match mode {
            CameraMode::Native => self.native_tick_ms,
            CameraMode::WebBrowser => self.web_tick_ms,
        };
        Duration::from_millis(ms.max(1))
    }

    pub fn warmup(&self, mode: CameraMode) -> Duration {
        Duration::from_millis(match mode {
            CameraMode::Native => self.native_warmup_ms,
            CameraMode::WebBrowser => self.web_warmup_ms,
        })
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Primary and fallback triage detector stages at the configured confidence.
    pub fn triage_stages(&self) -> (DetectorOptions, DetectorOptions) {
        let primary = DetectorOptions::SsdMobilenetV1 {
            min_confidence: self.triage_min_confidence,
        };
        let fallback = match DetectorOptions::triage_fallback() {
            DetectorOptions::TinyFace { input_size, .. } => DetectorOptions::TinyFace {
                input_size,
                score_threshold: self.triage_min_confidence,
            },
            other => other,
        };
        (primary, fallback)
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable override");
            current
        }),
        None => current,
    }
}

fn env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: bool) -> bool {
    lookup(key).map(|v| v != "0" && v != "false").unwrap_or(current)
}

/// Parse `WIDTHxHEIGHT`.
fn parse_viewport(value: &str) -> Option<Size> {
    let (w, h) = value.split_once('x')?;
    let (w, h): (f32, f32) = (w.trim().parse().ok()?, h.trim().parse().ok()?);
    (w > 0.0 && h > 0.0).then(|| Size::new(w, h))
}
