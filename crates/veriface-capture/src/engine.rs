//! Capture engine: owns the frame source for the lifetime of a session and
//! drives the [`CaptureMachine`] from detection ticks, countdown timers and
//! caller commands.

use crate::config::CaptureConfig;
use crate::machine::{
    CaptureIntent, CaptureMachine, CountdownStep, PermissionState, Phase, TickOutcome,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use veriface_core::{DetectionResult, TriageDetector};
use veriface_hw::geometry::{self, Rect, Rotation, Size};
use veriface_hw::{
    CameraError, CameraMode, CameraPosition, CameraSession, CameraTarget, CapturedImage, Frame,
    FrameError, FrameSource, GeometryError, GrabKind, NativeCameraPlugin, NativeFrameSource,
};

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),
    #[error("image error: {0}")]
    Frame(#[from] FrameError),
    #[error("capture engine exited")]
    ChannelClosed,
}

/// Messages sent from handles to the engine task.
#[derive(Debug)]
enum CaptureCommand {
    Capture,
    FlipCamera,
    SwitchCamera(CameraPosition),
    SwitchWebCamera(String),
    RetryPermission,
    Reopen,
    SetViewport(Size),
    Close,
}

/// Notifications for the caller, in the order they happen.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Previewing(CameraSession),
    PermissionDenied,
    DeviceUnavailable(String),
    Countdown(u32),
    CountdownCancelled,
    Captured(CapturedImage),
    CaptureFailed(String),
    Closed,
}

/// Observable state, republished after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSnapshot {
    pub phase: Phase,
    pub permission: Option<PermissionState>,
    pub intent: CaptureIntent,
    pub face_in_frame: bool,
    pub session: Option<CameraSession>,
    pub viewport: Size,
    pub guide: Rect,
}

impl CaptureSnapshot {
    fn initial(viewport: Size) -> Self {
        Self {
            phase: Phase::Idle,
            permission: None,
            intent: CaptureIntent::None,
            face_in_frame: false,
            session: None,
            viewport,
            guide: geometry::guide_frame(viewport),
        }
    }
}

/// Clone-safe handle to the capture engine.
#[derive(Clone)]
pub struct CaptureHandle {
    tx: mpsc::Sender<CaptureCommand>,
    state: watch::Receiver<CaptureSnapshot>,
}

impl CaptureHandle {
    async fn send(&self, command: CaptureCommand) -> Result<(), CaptureError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CaptureError::ChannelClosed)
    }

    /// Manual shutter. Ignored while a countdown or capture is active.
    pub async fn capture(&self) -> Result<(), CaptureError> {
        self.send(CaptureCommand::Capture).await
    }

    pub async fn flip_camera(&self) -> Result<(), CaptureError> {
        self.send(CaptureCommand::FlipCamera).await
    }

    pub async fn switch_camera(&self, position: CameraPosition) -> Result<(), CaptureError> {
        self.send(CaptureCommand::SwitchCamera(position)).await
    }

    pub async fn switch_web_camera(&self, device_id: impl Into<String>) -> Result<(), CaptureError> {
        self.send(CaptureCommand::SwitchWebCamera(device_id.into()))
            .await
    }

    pub async fn retry_permission(&self) -> Result<(), CaptureError> {
        self.send(CaptureCommand::RetryPermission).await
    }

    /// Start a new session after a successful capture left the engine idle.
    pub async fn reopen(&self) -> Result<(), CaptureError> {
        self.send(CaptureCommand::Reopen).await
    }

    pub async fn set_viewport(&self, viewport: Size) -> Result<(), CaptureError> {
        self.send(CaptureCommand::SetViewport(viewport)).await
    }

    /// Tear down whatever is active and stop the engine.
    pub async fn close(&self) -> Result<(), CaptureError> {
        self.send(CaptureCommand::Close).await
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureSnapshot> {
        self.state.clone()
    }
}

/// Spawn the engine on the current tokio runtime.
///
/// The engine immediately runs the permission/initialization sequence and,
/// once previewing, starts detection ticks after the platform warm-up.
/// It runs until [`CaptureHandle::close`] or until every handle is dropped.
/// The detector's triage stages are replaced by the ones `config` describes.
pub fn spawn_capture(
    source: Box<dyn FrameSource>,
    detector: TriageDetector,
    config: CaptureConfig,
) -> (CaptureHandle, mpsc::UnboundedReceiver<CaptureEvent>) {
    let (tx, rx) = mpsc::channel::<CaptureCommand>(8);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(CaptureSnapshot::initial(config.viewport));

    let (primary, fallback) = config.triage_stages();
    let engine = Engine {
        source,
        detector: detector.with_stages(primary, fallback),
        machine: CaptureMachine::new(config.countdown_secs),
        viewport: config.viewport,
        config,
        ticker: None,
        countdown_at: None,
        events: events_tx,
        state: state_tx,
    };
    tokio::spawn(engine.run(rx));

    (CaptureHandle { tx, state: state_rx }, events_rx)
}

/// [`spawn_capture`] over a native camera plugin, with the configured
/// sample and still JPEG settings.
pub fn spawn_native_capture<P: NativeCameraPlugin + 'static>(
    plugin: P,
    detector: TriageDetector,
    config: CaptureConfig,
) -> (CaptureHandle, mpsc::UnboundedReceiver<CaptureEvent>) {
    let source = NativeFrameSource::with_settings(plugin, config.native);
    spawn_capture(Box::new(source), detector, config)
}

struct Engine {
    source: Box<dyn FrameSource>,
    detector: TriageDetector,
    config: CaptureConfig,
    machine: CaptureMachine,
    viewport: Size,
    ticker: Option<Interval>,
    countdown_at: Option<Instant>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    state: watch::Sender<CaptureSnapshot>,
}

impl Engine {
    async fn run(mut self, mut commands: mpsc::Receiver<CaptureCommand>) {
        tracing::info!(mode = ?self.source.mode(), "capture engine started");
        self.open().await;

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => {
                        self.close().await;
                        break;
                    }
                },
                _ = next_tick(&mut self.ticker) => self.on_tick().await,
                _ = until(self.countdown_at) => self.on_countdown().await,
            }
        }
        tracing::info!("capture engine exiting");
    }

    /// Returns false once the engine should stop.
    async fn handle(&mut self, command: CaptureCommand) -> bool {
        tracing::debug!(?command, phase = ?self.machine.phase(), "capture command");
        match command {
            CaptureCommand::Capture => {
                if self.machine.begin_manual_capture() {
                    self.run_capture().await;
                } else {
                    tracing::debug!(intent = ?self.machine.intent(), "manual capture ignored");
                }
            }
            CaptureCommand::FlipCamera => self.flip().await,
            CaptureCommand::SwitchCamera(position) => {
                self.switch(CameraTarget::Position(position)).await
            }
            CaptureCommand::SwitchWebCamera(device_id) => {
                self.switch(CameraTarget::Device(Some(device_id))).await
            }
            CaptureCommand::RetryPermission => {
                if self.machine.phase() == Phase::PermissionDenied {
                    tracing::info!("retrying camera permission");
                    self.open().await;
                }
            }
            CaptureCommand::Reopen => {
                if self.machine.phase() == Phase::Idle {
                    self.open().await;
                }
            }
            CaptureCommand::SetViewport(viewport) => {
                self.viewport = viewport;
                self.publish();
            }
            CaptureCommand::Close => {
                self.close().await;
                return false;
            }
        }
        true
    }

    /// Permission probe, enumeration and default camera start.
    async fn open(&mut self) {
        if !self.machine.begin_permission_check() {
            return;
        }
        self.publish();

        match self.source.initialize().await {
            Ok(session) => {
                self.machine.permission_granted();
                self.start_schedules();
                tracing::info!(
                    mode = ?session.mode,
                    position = ?session.position,
                    device = ?session.device_id,
                    "camera preview started"
                );
                self.emit(CaptureEvent::Previewing(session));
            }
            Err(e) => self.fail_start(e).await,
        }
        self.publish();
    }

    async fn fail_start(&mut self, error: CameraError) {
        self.cancel_schedules();
        self.source.stop().await;
        match error {
            CameraError::PermissionDenied => {
                tracing::warn!("camera permission denied");
                self.machine.permission_denied();
                self.emit(CaptureEvent::PermissionDenied);
            }
            other => {
                tracing::warn!(error = %other, "camera unavailable");
                self.machine.device_unavailable();
                self.emit(CaptureEvent::DeviceUnavailable(other.to_string()));
            }
        }
    }

    fn start_schedules(&mut self) {
        let mode = self.source.mode();
        let mut ticker = time::interval_at(
            Instant::now() + self.config.warmup(mode),
            self.config.tick_interval(mode),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        self.countdown_at = None;
    }

    fn cancel_schedules(&mut self) {
        self.ticker = None;
        self.countdown_at = None;
    }

    async fn on_tick(&mut self) {
        if !self.machine.begin_tick() {
            tracing::debug!(intent = ?self.machine.intent(), "tick skipped");
            return;
        }

        let frame = match self.source.grab_frame(GrabKind::Sample).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "no frame for detection");
                let outcome = self.machine.finish_tick_without_frame();
                self.apply_tick(outcome);
                return;
            }
        };
        if self.config.skip_dark_frames && frame.is_dark() {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            let outcome = self.machine.finish_tick_without_frame();
            self.apply_tick(outcome);
            return;
        }

        let detection = self.detector.detect(frame.image()).await;
        let in_frame = detection.found && self.face_in_guide(&frame, &detection);

        let outcome = self.machine.finish_tick(in_frame);
        self.apply_tick(outcome);
    }

    fn apply_tick(&mut self, outcome: TickOutcome) {
        match outcome {
            TickOutcome::CountdownStarted(remaining) => {
                tracing::info!(remaining, "face in position, countdown started");
                self.countdown_at = Some(Instant::now() + COUNTDOWN_STEP);
                self.emit(CaptureEvent::Countdown(remaining));
            }
            TickOutcome::CountdownCancelled => {
                tracing::info!("face lost, countdown cancelled");
                self.countdown_at = None;
                self.emit(CaptureEvent::CountdownCancelled);
            }
            TickOutcome::Unchanged | TickOutcome::Stale => {}
        }
        self.publish();
    }

    /// Map the guide frame into the frame's pixel space and test the face box.
    fn face_in_guide(&self, frame: &Frame, detection: &DetectionResult) -> bool {
        let frame_size = Size::new(frame.width() as f32, frame.height() as f32);
        // Web video is always shown upright; only native stills are turned.
        let is_rotated = self.source.mode() == CameraMode::Native
            && frame_size.is_landscape() != self.viewport.is_landscape();
        let guide = geometry::map_screen_rect_to_frame(
            geometry::guide_frame(self.viewport),
            frame_size,
            self.viewport,
            is_rotated,
        );
        let b = detection.bbox;
        let face = Rect::new(b.x, b.y, b.width, b.height);
        let inside = geometry::is_within_guide(face, guide, self.config.in_frame_tolerance);
        tracing::debug!(
            score = detection.confidence_score,
            is_rotated,
            inside,
            "face position"
        );
        inside
    }

    async fn on_countdown(&mut self) {
        let due = self.countdown_at.take().unwrap_or_else(Instant::now);
        match self.machine.countdown_elapsed() {
            CountdownStep::Remaining(remaining) => {
                let wait = if remaining == 0 {
                    self.config.settle_delay()
                } else {
                    COUNTDOWN_STEP
                };
                self.countdown_at = Some(due + wait);
                tracing::debug!(remaining, "countdown");
                self.emit(CaptureEvent::Countdown(remaining));
                self.publish();
            }
            CountdownStep::Fire => self.run_capture().await,
            CountdownStep::Stale => {}
        }
    }

    /// Runs with the machine already in `CaptureInFlight`; not cancellable.
    async fn run_capture(&mut self) {
        self.countdown_at = None;
        self.publish();

        match self.capture_still().await {
            Ok(image) => {
                tracing::info!(width = image.width(), height = image.height(), "image captured");
                self.emit(CaptureEvent::Captured(image));
                self.machine.capture_succeeded();
                self.release().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture failed, returning to preview");
                self.machine.capture_failed();
                self.emit(CaptureEvent::CaptureFailed(e.to_string()));
            }
        }
        self.publish();
    }

    /// Grab, rotate if needed, crop to the guide aspect, encode.
    async fn capture_still(&mut self) -> Result<CapturedImage, CaptureError> {
        let frame = self.source.grab_frame(GrabKind::Still).await?;
        let frame = if self.source.mode() == CameraMode::Native
            && self.config.rotate_native_landscape
            && frame.is_landscape()
        {
            geometry::rotate(&frame, Rotation::Ccw90)
        } else {
            frame
        };
        let frame = geometry::crop_to_aspect(&frame, self.config.guide_aspect)?;
        Ok(CapturedImage::from_frame(&frame, self.config.output_quality)?)
    }

    async fn switch(&mut self, target: CameraTarget) {
        if self.machine.phase() != Phase::Previewing {
            tracing::debug!(?target, "switch ignored, not previewing");
            return;
        }
        if self.source.session().is_some_and(|s| s.targets(&target)) {
            tracing::debug!(?target, "already on requested camera");
            return;
        }
        self.restart(target).await;
    }

    async fn restart(&mut self, target: CameraTarget) {
        if !self.machine.session_restarted() {
            return;
        }
        self.cancel_schedules();
        match self.source.start(target).await {
            Ok(session) => {
                tracing::info!(position = ?session.position, device = ?session.device_id, "camera switched");
                self.start_schedules();
                self.emit(CaptureEvent::Previewing(session));
            }
            Err(e) => self.fail_start(e).await,
        }
        self.publish();
    }

    async fn flip(&mut self) {
        if self.machine.phase() != Phase::Previewing {
            return;
        }
        match self.source.mode() {
            CameraMode::Native => {
                if !self.machine.session_restarted() {
                    return;
                }
                match self.source.flip().await {
                    Ok(session) => {
                        tracing::info!(position = ?session.position, "camera flipped");
                        self.start_schedules();
                        self.emit(CaptureEvent::Previewing(session));
                        self.publish();
                    }
                    Err(e) => {
                        let position = self
                            .source
                            .session()
                            .and_then(|s| s.position)
                            .unwrap_or_default()
                            .opposite();
                        tracing::warn!(error = %e, ?position, "hardware flip failed, restarting camera");
                        self.restart(CameraTarget::Position(position)).await;
                    }
                }
            }
            CameraMode::WebBrowser => {
                let current = self.source.session().and_then(|s| s.device_id.clone());
                let devices = self.source.list_devices().await;
                let next = devices
                    .iter()
                    .position(|d| Some(&d.device_id) == current.as_ref())
                    .map_or(0, |i| (i + 1) % devices.len());
                match devices.get(next) {
                    Some(device) if Some(&device.device_id) != current.as_ref() => {
                        let target = CameraTarget::Device(Some(device.device_id.clone()));
                        self.restart(target).await;
                    }
                    _ => tracing::debug!("no other camera to flip to"),
                }
            }
        }
    }

    /// Stop timers and the camera. The machine goes back to Idle.
    async fn release(&mut self) {
        self.cancel_schedules();
        self.source.stop().await;
        self.machine.teardown();
    }

    async fn close(&mut self) {
        self.release().await;
        self.machine.close();
        self.emit(CaptureEvent::Closed);
        self.publish();
        tracing::info!("capture closed");
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.state.send_replace(CaptureSnapshot {
            phase: self.machine.phase(),
            permission: self.machine.permission(),
            intent: self.machine.intent(),
            face_in_frame: self.machine.face_in_frame(),
            session: self.source.session().cloned(),
            viewport: self.viewport,
            guide: geometry::guide_frame(self.viewport),
        });
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use veriface_core::{
        DetectorError, DetectorOptions, FaceAnalyzer, FaceBox, FaceDescriptorRecord, FaceDetection,
        FaceNet,
    };
    use veriface_hw::native::{CaptureOptions, PreviewOptions};
    use veriface_hw::{CameraDevice, PluginError};

    struct Script {
        deny: bool,
        fail_still: bool,
        pixel: u8,
        frame_size: (u32, u32),
        grabs: usize,
        stops: usize,
        starts: Vec<CameraTarget>,
    }

    impl Default for Script {
        fn default() -> Self {
            Self {
                deny: false,
                fail_still: false,
                pixel: 128,
                frame_size: (640, 480),
                grabs: 0,
                stops: 0,
                starts: Vec::new(),
            }
        }
    }

    struct FakeSource {
        mode: CameraMode,
        script: Arc<Mutex<Script>>,
        session: Option<CameraSession>,
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        fn mode(&self) -> CameraMode {
            self.mode
        }

        fn session(&self) -> Option<&CameraSession> {
            self.session.as_ref()
        }

        async fn initialize(&mut self) -> Result<CameraSession, CameraError> {
            let deny = self.script.lock().unwrap().deny;
            if deny {
                return Err(CameraError::PermissionDenied);
            }
            let target = match self.mode {
                CameraMode::Native => CameraTarget::Position(CameraPosition::Front),
                CameraMode::WebBrowser => CameraTarget::Device(Some("usb-0".into())),
            };
            self.start(target).await
        }

        async fn start(&mut self, target: CameraTarget) -> Result<CameraSession, CameraError> {
            self.stop().await;
            let session = match &target {
                CameraTarget::Position(p) => CameraSession::native(*p),
                CameraTarget::Device(id) => CameraSession::web(id.clone()),
            };
            self.script.lock().unwrap().starts.push(target);
            self.session = Some(session.clone());
            Ok(session)
        }

        async fn stop(&mut self) {
            if self.session.take().is_some() {
                self.script.lock().unwrap().stops += 1;
            }
        }

        async fn list_positions(&mut self) -> Vec<CameraPosition> {
            vec![CameraPosition::Front, CameraPosition::Rear]
        }

        async fn list_devices(&mut self) -> Vec<CameraDevice> {
            ["usb-0", "usb-1"]
                .into_iter()
                .map(|id| CameraDevice {
                    device_id: id.into(),
                    label: id.into(),
                })
                .collect()
        }

        async fn grab_frame(&mut self, kind: GrabKind) -> Result<Frame, CameraError> {
            if self.session.is_none() {
                return Err(CameraError::NoFrameAvailable);
            }
            let mut s = self.script.lock().unwrap();
            s.grabs += 1;
            if kind == GrabKind::Still && s.fail_still {
                return Err(CameraError::CaptureFailed("shutter jammed".into()));
            }
            let (w, h) = s.frame_size;
            let image = RgbImage::from_pixel(w, h, Rgb([s.pixel; 3]));
            Ok(Frame::new(DynamicImage::ImageRgb8(image), s.grabs as u32))
        }

        async fn flip(&mut self) -> Result<CameraSession, CameraError> {
            Err(CameraError::FlipUnsupported)
        }
    }

    /// Reports a face while `present` is set: `placed` if given, else centred.
    #[derive(Default)]
    struct FakeAnalyzer {
        present: AtomicBool,
        calls: AtomicUsize,
        placed: Mutex<Option<FaceBox>>,
        stages: Mutex<Vec<DetectorOptions>>,
    }

    #[async_trait]
    impl FaceAnalyzer for FakeAnalyzer {
        async fn load_net(&self, _net: FaceNet, _manifest_url: &str) -> Result<(), DetectorError> {
            Ok(())
        }

        async fn detect_single(
            &self,
            image: &DynamicImage,
            options: &DetectorOptions,
        ) -> Result<Option<FaceDetection>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.stages.lock().unwrap().push(options.clone());
            if !self.present.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let (w, h) = (image.width() as f32, image.height() as f32);
            let (fw, fh) = (w * 0.25, h * 0.35);
            let centred = FaceBox::new((w - fw) / 2.0, (h - fh) / 2.0, fw, fh);
            Ok(Some(FaceDetection {
                bbox: self.placed.lock().unwrap().unwrap_or(centred),
                score: 0.9,
                landmarks: Vec::new(),
            }))
        }

        async fn detect_all(
            &self,
            _image: &DynamicImage,
            _options: &DetectorOptions,
        ) -> Result<Vec<FaceDescriptorRecord>, DetectorError> {
            Ok(Vec::new())
        }
    }

    struct Rig {
        handle: CaptureHandle,
        events: mpsc::UnboundedReceiver<CaptureEvent>,
        script: Arc<Mutex<Script>>,
        analyzer: Arc<FakeAnalyzer>,
    }

    impl Rig {
        fn start(mode: CameraMode, script: Script, face: bool) -> Self {
            Self::with_config(mode, script, face, CaptureConfig::default())
        }

        fn with_config(mode: CameraMode, script: Script, face: bool, config: CaptureConfig) -> Self {
            let script = Arc::new(Mutex::new(script));
            let analyzer = Arc::new(FakeAnalyzer::default());
            analyzer.present.store(face, Ordering::SeqCst);
            let source = FakeSource {
                mode,
                script: script.clone(),
                session: None,
            };
            let (handle, events) = spawn_capture(
                Box::new(source),
                TriageDetector::new(analyzer.clone()),
                config,
            );
            Self {
                handle,
                events,
                script,
                analyzer,
            }
        }

        async fn next(&mut self) -> CaptureEvent {
            next_event(&mut self.events).await
        }

        fn set_face(&self, present: bool) {
            self.analyzer.present.store(present, Ordering::SeqCst);
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<CaptureEvent>) -> CaptureEvent {
        time::timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("timed out waiting for capture event")
            .expect("engine stopped")
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([128; 3])))
            .write_to(&mut out, image::ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    /// Native plugin that records every capture request.
    #[derive(Clone, Default)]
    struct FakePlugin {
        captures: Arc<Mutex<Vec<CaptureOptions>>>,
    }

    #[async_trait]
    impl NativeCameraPlugin for FakePlugin {
        async fn request_permission(&self) -> Result<bool, PluginError> {
            Ok(true)
        }

        async fn start_preview(&self, _options: &PreviewOptions) -> Result<(), PluginError> {
            Ok(())
        }

        async fn stop_preview(&self) -> Result<(), PluginError> {
            Ok(())
        }

        async fn capture(&self, options: &CaptureOptions) -> Result<Vec<u8>, PluginError> {
            self.captures.lock().unwrap().push(*options);
            Ok(jpeg(640, 480))
        }

        async fn flip(&self) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_then_single_auto_capture() {
        let start = Instant::now();
        let mut rig = Rig::start(CameraMode::WebBrowser, Script::default(), true);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));

        // First tick after the 1 s web warm-up.
        assert!(matches!(rig.next().await, CaptureEvent::Countdown(3)));
        assert_eq!(start.elapsed(), Duration::from_millis(1000));

        // Manual shutter during a countdown is ignored.
        rig.handle.capture().await.unwrap();

        for (expected, at_ms) in [(2, 2000), (1, 3000), (0, 4000)] {
            match rig.next().await {
                CaptureEvent::Countdown(n) => assert_eq!(n, expected),
                other => panic!("expected countdown {expected}, got {other:?}"),
            }
            assert_eq!(start.elapsed(), Duration::from_millis(at_ms));
        }

        match rig.next().await {
            CaptureEvent::Captured(image) => {
                assert_eq!((image.width(), image.height()), (360, 480));
            }
            other => panic!("expected capture, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_millis(4300));

        let snapshot = rig.handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.intent, CaptureIntent::None);
        assert!(snapshot.session.is_none());
        assert_eq!(rig.script.lock().unwrap().stops, 1);

        time::sleep(Duration::from_secs(10)).await;
        assert!(rig.events.try_recv().is_err(), "no second capture");
    }

    #[tokio::test(start_paused = true)]
    async fn test_face_loss_cancels_countdown() {
        let mut rig = Rig::start(CameraMode::WebBrowser, Script::default(), true);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));
        assert!(matches!(rig.next().await, CaptureEvent::Countdown(3)));
        assert!(matches!(rig.next().await, CaptureEvent::Countdown(2)));

        rig.set_face(false);
        assert!(matches!(rig.next().await, CaptureEvent::CountdownCancelled));

        time::sleep(Duration::from_secs(10)).await;
        assert!(rig.events.try_recv().is_err());
        let snapshot = rig.handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Previewing);
        assert_eq!(snapshot.intent, CaptureIntent::None);
        assert!(!snapshot.face_in_frame);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_then_retry() {
        let script = Script {
            deny: true,
            ..Default::default()
        };
        let mut rig = Rig::start(CameraMode::Native, script, false);
        assert!(matches!(rig.next().await, CaptureEvent::PermissionDenied));
        let snapshot = rig.handle.snapshot();
        assert_eq!(snapshot.phase, Phase::PermissionDenied);
        assert_eq!(snapshot.permission, Some(PermissionState::Denied));

        rig.script.lock().unwrap().deny = false;
        rig.handle.retry_permission().await.unwrap();
        match rig.next().await {
            CaptureEvent::Previewing(session) => {
                assert_eq!(session.position, Some(CameraPosition::Front));
            }
            other => panic!("expected preview, got {other:?}"),
        }
        let snapshot = rig.handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Previewing);
        assert_eq!(snapshot.permission, Some(PermissionState::Granted));
        assert!(snapshot.session.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_timers_and_releases_camera() {
        let mut rig = Rig::start(CameraMode::WebBrowser, Script::default(), false);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));
        time::sleep(Duration::from_secs(2)).await;
        assert!(rig.script.lock().unwrap().grabs > 0);

        rig.handle.close().await.unwrap();
        assert!(matches!(rig.next().await, CaptureEvent::Closed));
        let grabs = rig.script.lock().unwrap().grabs;

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rig.script.lock().unwrap().grabs, grabs);
        assert_eq!(rig.script.lock().unwrap().stops, 1);
        assert_eq!(rig.handle.snapshot().phase, Phase::Closed);
        assert!(rig.events.recv().await.is_none());
        assert!(matches!(
            rig.handle.capture().await,
            Err(CaptureError::ChannelClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_capture_rotates_landscape_still() {
        let mut rig = Rig::start(CameraMode::Native, Script::default(), false);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));
        rig.handle.capture().await.unwrap();
        match rig.next().await {
            CaptureEvent::Captured(image) => {
                assert_eq!((image.width(), image.height()), (480, 640));
            }
            other => panic!("expected capture, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_capture_returns_to_preview() {
        let script = Script {
            fail_still: true,
            ..Default::default()
        };
        let mut rig = Rig::start(CameraMode::WebBrowser, script, false);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));

        rig.handle.capture().await.unwrap();
        assert!(matches!(rig.next().await, CaptureEvent::CaptureFailed(_)));
        let snapshot = rig.handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Previewing);
        assert_eq!(snapshot.intent, CaptureIntent::None);

        rig.script.lock().unwrap().fail_still = false;
        rig.handle.capture().await.unwrap();
        assert!(matches!(rig.next().await, CaptureEvent::Captured(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_to_current_camera_is_noop() {
        let mut rig = Rig::start(CameraMode::WebBrowser, Script::default(), false);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));

        rig.handle.switch_web_camera("usb-0").await.unwrap();
        rig.handle.switch_web_camera("usb-1").await.unwrap();
        match rig.next().await {
            CaptureEvent::Previewing(session) => {
                assert_eq!(session.device_id.as_deref(), Some("usb-1"));
            }
            other => panic!("expected preview, got {other:?}"),
        }
        let script = rig.script.lock().unwrap();
        assert_eq!(script.starts.len(), 2);
        assert_eq!(script.stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_flip_falls_back_to_restart() {
        let mut rig = Rig::start(CameraMode::Native, Script::default(), false);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));
        rig.handle.flip_camera().await.unwrap();
        match rig.next().await {
            CaptureEvent::Previewing(session) => {
                assert_eq!(session.position, Some(CameraPosition::Rear));
            }
            other => panic!("expected preview, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dark_frames_skip_detection() {
        let script = Script {
            pixel: 0,
            ..Default::default()
        };
        let mut rig = Rig::start(CameraMode::WebBrowser, script, true);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));
        time::sleep(Duration::from_secs(5)).await;
        assert!(rig.script.lock().unwrap().grabs > 0);
        assert_eq!(rig.analyzer.calls.load(Ordering::SeqCst), 0);
        assert!(rig.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_face_outside_guide_does_not_start_countdown() {
        let mut rig = Rig::start(CameraMode::WebBrowser, Script::default(), true);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));
        // A narrow portrait viewport shrinks the guide far below the face box.
        rig.handle
            .set_viewport(Size::new(200.0, 2000.0))
            .await
            .unwrap();
        time::sleep(Duration::from_secs(5)).await;
        assert!(rig.analyzer.calls.load(Ordering::SeqCst) > 0);
        assert!(rig.events.try_recv().is_err());
        assert_eq!(rig.handle.snapshot().viewport, Size::new(200.0, 2000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_covered_camera_cancels_countdown() {
        let mut rig = Rig::start(CameraMode::WebBrowser, Script::default(), true);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));
        assert!(matches!(rig.next().await, CaptureEvent::Countdown(3)));

        // Lens covered: frames go black and nothing reaches the detector.
        rig.script.lock().unwrap().pixel = 0;
        let calls = rig.analyzer.calls.load(Ordering::SeqCst);
        assert!(matches!(rig.next().await, CaptureEvent::CountdownCancelled));

        time::sleep(Duration::from_secs(10)).await;
        assert!(rig.events.try_recv().is_err(), "no capture from a covered camera");
        assert_eq!(rig.analyzer.calls.load(Ordering::SeqCst), calls);
        assert_eq!(rig.handle.snapshot().intent, CaptureIntent::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_triage_confidence_reaches_detector() {
        let config = CaptureConfig {
            triage_min_confidence: 0.9,
            ..Default::default()
        };
        let mut rig = Rig::with_config(CameraMode::WebBrowser, Script::default(), false, config);
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));
        time::sleep(Duration::from_millis(1100)).await;

        let stages = rig.analyzer.stages.lock().unwrap().clone();
        assert!(stages.len() >= 2);
        assert_eq!(stages[0], DetectorOptions::SsdMobilenetV1 { min_confidence: 0.9 });
        assert!(matches!(
            stages[1],
            DetectorOptions::TinyFace { score_threshold, .. } if score_threshold == 0.9
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_web_guide_is_scaled_not_rotated() {
        // Landscape webcam under a portrait viewport: the video is stretched
        // per axis, never turned.
        let config = CaptureConfig {
            viewport: Size::new(400.0, 800.0),
            ..Default::default()
        };
        let mut rig = Rig::with_config(CameraMode::WebBrowser, Script::default(), true, config);
        *rig.analyzer.placed.lock().unwrap() = Some(FaceBox::new(70.0, 150.0, 160.0, 168.0));
        assert!(matches!(rig.next().await, CaptureEvent::Previewing(_)));
        assert!(matches!(rig.next().await, CaptureEvent::Countdown(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_capture_uses_configured_still_settings() {
        let mut config = CaptureConfig::default();
        config.native.still_quality = 70;
        let plugin = FakePlugin::default();
        let analyzer = Arc::new(FakeAnalyzer::default());
        let (handle, mut events) =
            spawn_native_capture(plugin.clone(), TriageDetector::new(analyzer), config);
        assert!(matches!(next_event(&mut events).await, CaptureEvent::Previewing(_)));

        handle.capture().await.unwrap();
        match next_event(&mut events).await {
            CaptureEvent::Captured(image) => {
                assert_eq!((image.width(), image.height()), (480, 640));
            }
            other => panic!("expected capture, got {other:?}"),
        }
        let captures = plugin.captures.lock().unwrap();
        assert_eq!(
            captures.last(),
            Some(&CaptureOptions {
                quality: 70,
                width: None,
                height: None,
            })
        );
    }
}
