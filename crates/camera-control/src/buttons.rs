use crate::backend::CameraBackend;
use crate::error::CameraResult;
use crate::status::StatusReporter;
use crate::types::{Axis, Direction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Hold-to-move buttons on the camera panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    SlewUp,
    SlewDown,
    SlewLeft,
    SlewRight,
    SlewIn,
    SlewOut,
    JogUp,
    JogDown,
    JogLeft,
    JogRight,
    JogIn,
    JogOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Slew(Direction),
    Jog(Axis, i32),
}

impl Button {
    pub fn action(self) -> ButtonAction {
        match self {
            Self::SlewUp => ButtonAction::Slew(Direction::Up),
            Self::SlewDown => ButtonAction::Slew(Direction::Down),
            Self::SlewLeft => ButtonAction::Slew(Direction::Left),
            Self::SlewRight => ButtonAction::Slew(Direction::Right),
            Self::SlewIn => ButtonAction::Slew(Direction::In),
            Self::SlewOut => ButtonAction::Slew(Direction::Out),
            Self::JogUp => ButtonAction::Jog(Axis::Tilt, 1),
            Self::JogDown => ButtonAction::Jog(Axis::Tilt, -1),
            // Pan position counts up to the left.
            Self::JogLeft => ButtonAction::Jog(Axis::Pan, 1),
            Self::JogRight => ButtonAction::Jog(Axis::Pan, -1),
            Self::JogIn => ButtonAction::Jog(Axis::Zoom, 1),
            Self::JogOut => ButtonAction::Jog(Axis::Zoom, -1),
        }
    }

    pub fn is_jog(self) -> bool {
        matches!(self.action(), ButtonAction::Jog(..))
    }
}

enum Held {
    Slew(Direction),
    Jog(CancellationToken),
}

/// Press/release handling for the slew and jog buttons of one camera.
pub struct ButtonPad {
    backend: Arc<dyn CameraBackend>,
    status: StatusReporter,
    jog_repeat: Duration,
    held: Mutex<Option<Held>>,
}

impl ButtonPad {
    pub fn new(backend: Arc<dyn CameraBackend>, status: StatusReporter, jog_repeat: Duration) -> Self {
        Self {
            backend,
            status,
            jog_repeat,
            held: Mutex::new(None),
        }
    }

    pub async fn press(&self, button: Button) -> CameraResult<()> {
        self.cancel_held().await;

        match button.action() {
            ButtonAction::Slew(direction) => {
                *self.held.lock().await = Some(Held::Slew(direction));
                let speed = self.backend.descriptor().slew_velocity;
                if let Err(e) = self.backend.start_slew(direction, speed).await {
                    self.status.flash(format!("Failed mousedown: {e}"));
                    return Err(e);
                }
                debug!(camera = %self.backend.descriptor().name, ?button, "slew started");
                Ok(())
            }
            ButtonAction::Jog(axis, step) => {
                let token = CancellationToken::new();
                *self.held.lock().await = Some(Held::Jog(token.clone()));

                if let Err(e) = self.backend.jog(axis, step).await {
                    token.cancel();
                    self.status.flash(format!("Failed mousedown: {e}"));
                    return Err(e);
                }

                // Released while the first step was on the wire.
                if token.is_cancelled() {
                    return Ok(());
                }

                let backend = self.backend.clone();
                let status = self.status.clone();
                let period = self.jog_repeat;
                tokio::spawn(async move {
                    repeat_jog(backend, status, axis, step, period, token).await;
                });
                Ok(())
            }
        }
    }

    pub async fn release(&self, button: Button) -> CameraResult<()> {
        let held = self.held.lock().await.take();
        let direction = match (held, button.action()) {
            (Some(Held::Jog(token)), _) => {
                token.cancel();
                debug!(camera = %self.backend.descriptor().name, "jog released");
                return Ok(());
            }
            (Some(Held::Slew(direction)), _) => direction,
            (None, ButtonAction::Slew(direction)) => direction,
            (None, ButtonAction::Jog(..)) => return Ok(()),
        };

        if let Err(e) = self.backend.stop_slew(direction).await {
            self.status.flash(format!("Failed mouseup: {e}"));
            return Err(e);
        }
        Ok(())
    }

    async fn cancel_held(&self) {
        if let Some(Held::Jog(token)) = self.held.lock().await.take() {
            token.cancel();
        }
    }
}

async fn repeat_jog(
    backend: Arc<dyn CameraBackend>,
    status: StatusReporter,
    axis: Axis,
    step: i32,
    period: Duration,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }

        if let Err(e) = backend.jog(axis, step).await {
            warn!(camera = %backend.descriptor().name, error = %e, "jog repeat failed");
            status.flash(format!("Failed mouse timer: {e}"));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{BackendCall, RecordingBackend};
    use crate::types::CameraType;
    use std::sync::atomic::Ordering;
    use tokio::sync::broadcast;

    fn pad(backend: Arc<RecordingBackend>) -> (ButtonPad, broadcast::Receiver<crate::types::StatusUpdate>) {
        let (tx, rx) = broadcast::channel(16);
        let pad = ButtonPad::new(backend, StatusReporter::new(0, tx), Duration::from_millis(250));
        (pad, rx)
    }

    fn jogs(calls: &[BackendCall]) -> usize {
        calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Jog(..)))
            .count()
    }

    #[tokio::test]
    async fn slew_press_and_release_use_slew_velocity() {
        let backend = RecordingBackend::new(CameraType::ViscaJog, 9);
        let (pad, _rx) = pad(backend.clone());

        pad.press(Button::SlewLeft).await.unwrap();
        pad.release(Button::SlewLeft).await.unwrap();

        assert_eq!(
            backend.calls().await,
            vec![
                BackendCall::StartSlew(Direction::Left, 10),
                BackendCall::StopSlew(Direction::Left),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn jog_repeats_while_held() {
        let backend = RecordingBackend::new(CameraType::ViscaJog, 9);
        let (pad, _rx) = pad(backend.clone());

        pad.press(Button::JogRight).await.unwrap();
        assert_eq!(backend.calls().await, vec![BackendCall::Jog(Axis::Pan, -1)]);

        tokio::time::sleep(Duration::from_millis(260)).await;
        assert_eq!(jogs(&backend.calls().await), 2);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(jogs(&backend.calls().await), 3);

        pad.release(Button::JogRight).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(jogs(&backend.calls().await), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_jog_does_not_repeat() {
        let backend = RecordingBackend::new(CameraType::ViscaJog, 9);
        backend.fail_jog.store(true, Ordering::SeqCst);
        let (pad, mut rx) = pad(backend.clone());

        assert!(pad.press(Button::JogIn).await.is_err());
        assert_eq!(rx.recv().await.unwrap().text, "Failed mousedown: Network error");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(jogs(&backend.calls().await), 1);
    }

    #[test]
    fn buttons_parse_from_panel_ids() {
        let button: Button = serde_json::from_str("\"jog_out\"").unwrap();
        assert_eq!(button.action(), ButtonAction::Jog(Axis::Zoom, -1));
        assert!(button.is_jog());
        assert!(!Button::SlewUp.is_jog());
    }
}
