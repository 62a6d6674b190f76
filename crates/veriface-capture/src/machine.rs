//! Capture state machine: one object, atomic transitions, no I/O.
//!
//! The engine asks the machine before every side effect and reports every
//! outcome back, so the flags that gate ticks, countdowns and captures have a
//! single source of truth.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    CheckingPermission,
    PermissionDenied,
    DeviceUnavailable,
    Previewing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Checking,
    Granted,
    Denied,
}

/// What the machine is about to do with the camera. Countdown and capture
/// are variants of one enum, so both can never be active together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureIntent {
    None,
    /// `remaining == 0` means the countdown finished and the capture is
    /// committed; only the settle delay is left.
    CountdownRunning { remaining: u32 },
    CaptureInFlight,
}

/// Result of feeding a detection verdict to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The machine was no longer previewing when the tick finished.
    Stale,
    Unchanged,
    CountdownStarted(u32),
    /// The face left the guide frame; clears the "face detected" indicator.
    CountdownCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    Remaining(u32),
    /// Settle delay elapsed; the capture is now in flight.
    Fire,
    Stale,
}

#[derive(Debug, Clone)]
pub struct CaptureMachine {
    phase: Phase,
    permission: Option<PermissionState>,
    intent: CaptureIntent,
    face_in_frame: bool,
    detecting: bool,
    countdown_secs: u32,
}

impl CaptureMachine {
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            phase: Phase::Idle,
            permission: None,
            intent: CaptureIntent::None,
            face_in_frame: false,
            detecting: false,
            countdown_secs: countdown_secs.max(1),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn permission(&self) -> Option<PermissionState> {
        self.permission
    }

    pub fn intent(&self) -> CaptureIntent {
        self.intent
    }

    pub fn face_in_frame(&self) -> bool {
        self.face_in_frame
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting
    }

    fn reset_preview_flags(&mut self) {
        self.intent = CaptureIntent::None;
        self.face_in_frame = false;
        self.detecting = false;
    }

    /// Idle (first open) or PermissionDenied (retry) -> CheckingPermission.
    pub fn begin_permission_check(&mut self) -> bool {
        if !matches!(self.phase, Phase::Idle | Phase::PermissionDenied) {
            return false;
        }
        self.phase = Phase::CheckingPermission;
        self.permission = Some(PermissionState::Checking);
        self.reset_preview_flags();
        true
    }

    /// Permission probe succeeded and a session is running.
    pub fn permission_granted(&mut self) -> bool {
        if self.phase != Phase::CheckingPermission {
            return false;
        }
        self.phase = Phase::Previewing;
        self.permission = Some(PermissionState::Granted);
        true
    }

    /// Access refused, during the first probe or on a later restart.
    pub fn permission_denied(&mut self) -> bool {
        if !matches!(self.phase, Phase::CheckingPermission | Phase::Previewing) {
            return false;
        }
        self.phase = Phase::PermissionDenied;
        self.permission = Some(PermissionState::Denied);
        self.reset_preview_flags();
        true
    }

    pub fn device_unavailable(&mut self) -> bool {
        if !matches!(self.phase, Phase::CheckingPermission | Phase::Previewing) {
            return false;
        }
        self.phase = Phase::DeviceUnavailable;
        self.reset_preview_flags();
        true
    }

    /// A new session replaced the old one (flip or switch).
    pub fn session_restarted(&mut self) -> bool {
        if self.phase != Phase::Previewing || self.intent == CaptureIntent::CaptureInFlight {
            return false;
        }
        self.reset_preview_flags();
        true
    }

    /// Reentrancy guard for the detection loop.
    pub fn begin_tick(&mut self) -> bool {
        if self.phase != Phase::Previewing
            || self.detecting
            || self.intent == CaptureIntent::CaptureInFlight
        {
            return false;
        }
        self.detecting = true;
        true
    }

    /// The tick ended without a verdict (no frame, dark frame).
    pub fn abort_tick(&mut self) {
        self.detecting = false;
    }

    /// The tick produced no usable frame. The face can't be confirmed, so a
    /// countdown that hasn't reached 0 is cancelled as if the face was lost.
    pub fn finish_tick_without_frame(&mut self) -> TickOutcome {
        match self.intent {
            CaptureIntent::CountdownRunning { remaining } if remaining > 0 => {
                self.finish_tick(false)
            }
            _ => {
                self.abort_tick();
                TickOutcome::Unchanged
            }
        }
    }

    pub fn finish_tick(&mut self, in_frame: bool) -> TickOutcome {
        self.detecting = false;
        if self.phase != Phase::Previewing {
            return TickOutcome::Stale;
        }

        match (in_frame, self.intent) {
            (_, CaptureIntent::CaptureInFlight) => TickOutcome::Stale,
            (true, CaptureIntent::None) => {
                self.face_in_frame = true;
                self.intent = CaptureIntent::CountdownRunning {
                    remaining: self.countdown_secs,
                };
                TickOutcome::CountdownStarted(self.countdown_secs)
            }
            (true, _) => TickOutcome::Unchanged,
            (false, CaptureIntent::CountdownRunning { remaining: 0 }) => TickOutcome::Unchanged,
            (false, CaptureIntent::CountdownRunning { .. }) => {
                self.intent = CaptureIntent::None;
                self.face_in_frame = false;
                TickOutcome::CountdownCancelled
            }
            (false, CaptureIntent::None) => TickOutcome::Unchanged,
        }
    }

    /// One second of countdown (or the settle delay) elapsed.
    pub fn countdown_elapsed(&mut self) -> CountdownStep {
        if self.phase != Phase::Previewing {
            return CountdownStep::Stale;
        }
        match self.intent {
            CaptureIntent::CountdownRunning { remaining: 0 } => {
                self.intent = CaptureIntent::CaptureInFlight;
                CountdownStep::Fire
            }
            CaptureIntent::CountdownRunning { remaining } => {
                self.intent = CaptureIntent::CountdownRunning {
                    remaining: remaining - 1,
                };
                CountdownStep::Remaining(remaining - 1)
            }
            _ => CountdownStep::Stale,
        }
    }

    /// Manual shutter. A no-op while counting down or already capturing.
    pub fn begin_manual_capture(&mut self) -> bool {
        if self.phase != Phase::Previewing || self.intent != CaptureIntent::None {
            return false;
        }
        self.intent = CaptureIntent::CaptureInFlight;
        true
    }

    /// Back to previewing so the user can retry.
    pub fn capture_failed(&mut self) {
        if self.intent == CaptureIntent::CaptureInFlight {
            self.intent = CaptureIntent::None;
            self.face_in_frame = false;
        }
    }

    /// The image was handed off and the session torn down.
    pub fn capture_succeeded(&mut self) {
        if self.intent == CaptureIntent::CaptureInFlight {
            self.teardown();
        }
    }

    /// Session released: back to Idle unless already closed.
    pub fn teardown(&mut self) {
        self.reset_preview_flags();
        if self.phase != Phase::Closed {
            self.phase = Phase::Idle;
        }
    }

    pub fn close(&mut self) {
        self.reset_preview_flags();
        self.phase = Phase::Closed;
    }
}
