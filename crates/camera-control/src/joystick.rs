//! Continuous pan/tilt and zoom control driven by pointer position.
//!
//! Each [`VelocityController`] converges the velocity last sent to the camera
//! toward the velocity the pointer currently asks for, with at most one
//! request in flight at a time.

use crate::backend::CameraBackend;
use crate::status::StatusReporter;
use crate::types::{AxisGroup, AxisVelocity, Direction, VelocityIntent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use telemetry::metrics::JOYSTICK_SENDS;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseCurve {
    Linear,
    /// Finer resolution at low speeds.
    Squared,
}

impl ResponseCurve {
    fn apply(self, normalized: f64) -> f64 {
        match self {
            Self::Linear => normalized,
            Self::Squared => normalized * normalized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisProfile {
    pub max_speed: u8,
    /// Half-width of the dead zone around the centre, in pointer units.
    pub deadband: f64,
    pub curve: ResponseCurve,
}

impl AxisProfile {
    pub const PAN: AxisProfile = AxisProfile {
        max_speed: 0x18,
        deadband: 5.0,
        curve: ResponseCurve::Squared,
    };
    pub const TILT: AxisProfile = AxisProfile {
        max_speed: 0x14,
        deadband: 5.0,
        curve: ResponseCurve::Squared,
    };
    pub const ZOOM: AxisProfile = AxisProfile {
        max_speed: 7,
        deadband: 10.0,
        curve: ResponseCurve::Linear,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoystickProfile {
    pub pan: AxisProfile,
    pub tilt: AxisProfile,
    pub zoom: AxisProfile,
}

impl Default for JoystickProfile {
    fn default() -> Self {
        Self {
            pan: AxisProfile::PAN,
            tilt: AxisProfile::TILT,
            zoom: AxisProfile::ZOOM,
        }
    }
}

/// Pointer position within the control surface, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PointerSample {
    /// Signed offsets from the centre; `y` grows upwards.
    pub fn offsets(&self) -> (f64, f64) {
        let x = self.x.min(self.width) - self.width / 2.0;
        let y = self.height / 2.0 - self.y.min(self.height);
        (x, y)
    }
}

/// Map a signed offset onto a direction and speed for one axis.
pub fn axis_velocity(
    offset: f64,
    half_range: f64,
    profile: &AxisProfile,
    positive: Direction,
    negative: Direction,
) -> AxisVelocity {
    let magnitude = offset.abs();
    if magnitude <= profile.deadband {
        return AxisVelocity::STOP;
    }

    let direction = if offset > 0.0 { positive } else { negative };
    let span = half_range - profile.deadband;
    let normalized = if span > 0.0 {
        (magnitude - profile.deadband) / span
    } else {
        1.0
    };

    let speed = if normalized < 1.0 {
        (profile.curve.apply(normalized) * f64::from(profile.max_speed)).round() as u8
    } else {
        profile.max_speed
    };
    if speed == 0 {
        return AxisVelocity::STOP;
    }

    AxisVelocity { direction, speed }
}

/// Velocity the pointer asks for on one axis group.
pub fn intent_for(group: AxisGroup, sample: &PointerSample, profile: &JoystickProfile) -> VelocityIntent {
    let (x, y) = sample.offsets();
    match group {
        AxisGroup::PanTilt => VelocityIntent::PanTilt {
            pan: axis_velocity(x, sample.width / 2.0, &profile.pan, Direction::Right, Direction::Left),
            tilt: axis_velocity(y, sample.height / 2.0, &profile.tilt, Direction::Up, Direction::Down),
        },
        AxisGroup::Zoom => VelocityIntent::Zoom {
            zoom: axis_velocity(y, sample.height / 2.0, &profile.zoom, Direction::In, Direction::Out),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JoystickSnapshot {
    pub group: AxisGroup,
    pub active: bool,
    pub in_flight: bool,
    pub desired: VelocityIntent,
    pub last_sent: VelocityIntent,
}

struct JoystickState {
    active: bool,
    in_flight: bool,
    desired: VelocityIntent,
    last_sent: VelocityIntent,
}

struct Inner {
    group: AxisGroup,
    profile: JoystickProfile,
    backend: Arc<dyn CameraBackend>,
    status: StatusReporter,
    state: Mutex<JoystickState>,
    busy: watch::Sender<bool>,
}

/// Joystick for one axis group of one camera.
#[derive(Clone)]
pub struct VelocityController {
    inner: Arc<Inner>,
}

impl VelocityController {
    pub fn new(
        group: AxisGroup,
        profile: JoystickProfile,
        backend: Arc<dyn CameraBackend>,
        status: StatusReporter,
    ) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                group,
                profile,
                backend,
                status,
                state: Mutex::new(JoystickState {
                    active: false,
                    in_flight: false,
                    desired: VelocityIntent::stop(group),
                    last_sent: VelocityIntent::stop(group),
                }),
                busy,
            }),
        }
    }

    pub fn group(&self) -> AxisGroup {
        self.inner.group
    }

    pub async fn pointer_down(&self, sample: PointerSample) {
        let mut state = self.inner.state.lock().await;
        // The camera is stopped between gestures unless a send is still out.
        if !state.in_flight {
            state.last_sent = VelocityIntent::stop(self.inner.group);
        }
        state.active = true;
        state.desired = intent_for(self.inner.group, &sample, &self.inner.profile);
        self.pump(&mut state);
    }

    pub async fn pointer_move(&self, sample: PointerSample) {
        let mut state = self.inner.state.lock().await;
        if !state.active {
            return;
        }
        state.desired = intent_for(self.inner.group, &sample, &self.inner.profile);
        self.pump(&mut state);
    }

    pub async fn pointer_up(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.active {
            return;
        }
        state.active = false;
        state.desired = VelocityIntent::stop(self.inner.group);
        debug!(group = self.inner.group.as_str(), "pointer up, stopping");
        self.pump(&mut state);
    }

    /// Wait until no send is in flight.
    pub async fn settled(&self) {
        let mut rx = self.inner.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    pub async fn snapshot(&self) -> JoystickSnapshot {
        let state = self.inner.state.lock().await;
        JoystickSnapshot {
            group: self.inner.group,
            active: state.active,
            in_flight: state.in_flight,
            desired: state.desired,
            last_sent: state.last_sent,
        }
    }

    fn pump(&self, state: &mut JoystickState) {
        if state.in_flight || state.desired == state.last_sent {
            return;
        }
        state.in_flight = true;
        state.last_sent = state.desired;
        self.inner.busy.send_replace(true);

        let inner = self.inner.clone();
        let intent = state.desired;
        tokio::spawn(async move { drive(inner, intent).await });
    }
}

async fn drive(inner: Arc<Inner>, mut intent: VelocityIntent) {
    loop {
        debug!(group = inner.group.as_str(), intent = ?intent, "sending joystick velocity");
        let result = inner.backend.velocity(&intent).await;
        JOYSTICK_SENDS.with_label_values(&[inner.group.as_str()]).inc();

        let mut state = inner.state.lock().await;
        match result {
            Ok(()) if state.desired != state.last_sent => {
                state.last_sent = state.desired;
                intent = state.desired;
            }
            Ok(()) => {
                state.in_flight = false;
                inner.busy.send_replace(false);
                return;
            }
            Err(e) => {
                warn!(
                    camera = %inner.backend.descriptor().name,
                    group = inner.group.as_str(),
                    error = %e,
                    "joystick slew failed"
                );
                state.in_flight = false;
                state.active = false;
                inner.busy.send_replace(false);
                drop(state);
                inner.status.flash(format!("Failed joystick slew: {e}"));
                return;
            }
        }
    }
}
