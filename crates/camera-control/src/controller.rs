use crate::backend::{create_backend, CameraBackend, VISCA_HOME_BYTES, VISCA_RESET_BYTES};
use crate::buttons::{Button, ButtonPad};
use crate::error::{CameraError, CameraResult};
use crate::joystick::{JoystickProfile, VelocityController};
use crate::roster::CameraRoster;
use crate::status::StatusReporter;
use crate::transport::{OpaqueFailurePolicy, Transport};
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Per-camera knobs shared by every controller in the dock.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub jog_repeat: Duration,
    pub joystick: JoystickProfile,
    pub opaque_failure: OpaqueFailurePolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            jog_repeat: Duration::from_millis(250),
            joystick: JoystickProfile::default(),
            opaque_failure: OpaqueFailurePolicy::AssumeDelivered,
        }
    }
}

/// Everything the panel can do with one camera. Failures are returned to
/// the caller and also shown on the camera's status line.
pub struct CameraController {
    backend: Arc<dyn CameraBackend>,
    presets: Vec<PresetDescriptor>,
    status: StatusReporter,
    buttons: ButtonPad,
    pan_tilt: Option<VelocityController>,
    zoom: Option<VelocityController>,
}

impl CameraController {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        presets: Vec<PresetDescriptor>,
        settings: &ControllerSettings,
        status_tx: broadcast::Sender<StatusUpdate>,
    ) -> Self {
        let descriptor = backend.descriptor().clone();
        let status = StatusReporter::new(descriptor.index, status_tx);
        let buttons = ButtonPad::new(backend.clone(), status.clone(), settings.jog_repeat);

        let (pan_tilt, zoom) = if descriptor.camera_type.has_joysticks() {
            (
                Some(VelocityController::new(
                    AxisGroup::PanTilt,
                    settings.joystick,
                    backend.clone(),
                    status.clone(),
                )),
                Some(VelocityController::new(
                    AxisGroup::Zoom,
                    settings.joystick,
                    backend.clone(),
                    status.clone(),
                )),
            )
        } else {
            (None, None)
        };

        Self {
            backend,
            presets,
            status,
            buttons,
            pan_tilt,
            zoom,
        }
    }

    pub fn descriptor(&self) -> &Arc<CameraDescriptor> {
        self.backend.descriptor()
    }

    pub fn backend(&self) -> &Arc<dyn CameraBackend> {
        &self.backend
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    /// Roster presets belonging to this camera, in display order.
    pub fn presets(&self) -> &[PresetDescriptor] {
        &self.presets
    }

    fn report<T>(&self, what: &str, result: CameraResult<T>) -> CameraResult<T> {
        if let Err(e) = &result {
            self.status.flash(format!("Failed {what}: {e}"));
        }
        result
    }

    pub async fn show_preset(&self, preset: u32) -> CameraResult<()> {
        let result = self.backend.show_preset(preset).await;
        self.report("show preset", result)
    }

    pub async fn set_preset(&self, preset: u32) -> CameraResult<()> {
        let result = self.backend.set_preset(preset).await;
        self.report("set preset", result)
    }

    pub async fn press(&self, button: Button) -> CameraResult<()> {
        self.buttons.press(button).await
    }

    pub async fn release(&self, button: Button) -> CameraResult<()> {
        self.buttons.release(button).await
    }

    pub fn joystick(&self, group: AxisGroup) -> CameraResult<&VelocityController> {
        let stick = match group {
            AxisGroup::PanTilt => self.pan_tilt.as_ref(),
            AxisGroup::Zoom => self.zoom.as_ref(),
        };
        stick.ok_or_else(|| {
            CameraError::sequence(format!("{} has no {} joystick", self.descriptor().name, group.as_str()))
        })
    }

    pub async fn read_position(&self) -> CameraResult<PtzPosition> {
        let result = self.backend.read_position().await;
        if let Ok(p) = &result {
            self.status
                .flash(format!("pan={}  tilt={}  zoom={}", p.pan, p.tilt, p.zoom));
        }
        self.report("read position", result)
    }

    pub async fn version_info(&self) -> CameraResult<VersionInfo> {
        let result = self.backend.version_info().await;
        if let Ok(v) = &result {
            self.status.flash(format!(
                "vendor={}  model={}  version={}  maxsocket={}",
                show(v.vendor),
                show(v.model),
                show(v.version),
                show(v.max_socket)
            ));
        }
        self.report("read version", result)
    }

    pub async fn move_to(&self, position: PtzPosition, speed: Option<u8>) -> CameraResult<()> {
        let result = self.backend.move_to(position, speed).await;
        self.report("move", result)
    }

    pub async fn send_raw(&self, bytes: &str, reply_length: usize) -> CameraResult<RawReply> {
        let result = self.backend.send_raw(bytes, reply_length).await;
        if let Ok(RawReply {
            response_bytes: Some(reply),
        }) = &result
        {
            self.status.flash(reply.clone());
        }
        self.report("send raw", result)
    }

    pub async fn home(&self) -> CameraResult<()> {
        let result = self.backend.send_raw(VISCA_HOME_BYTES, 0).await.map(|_| ());
        self.report("Home", result)
    }

    pub async fn reset(&self) -> CameraResult<()> {
        let result = self.backend.send_raw(VISCA_RESET_BYTES, 0).await.map(|_| ());
        self.report("Reset", result)
    }
}

fn show(value: Option<u32>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}

/// All cameras of the dock plus the status channel they report on.
pub struct CameraFleet {
    cameras: Vec<Arc<CameraController>>,
    status_tx: broadcast::Sender<StatusUpdate>,
}

impl CameraFleet {
    pub fn new(cameras: Vec<Arc<CameraController>>, status_tx: broadcast::Sender<StatusUpdate>) -> Self {
        Self { cameras, status_tx }
    }

    /// Build one controller per roster camera, all sharing `transport`.
    pub fn from_roster(
        roster: &CameraRoster,
        transport: Arc<dyn Transport>,
        settings: &ControllerSettings,
    ) -> CameraResult<Self> {
        let (status_tx, _) = broadcast::channel(256);
        let mut cameras = Vec::new();

        for descriptor in roster.descriptors()? {
            let descriptor = Arc::new(descriptor);
            let presets = roster.presets_for(&descriptor.name);
            info!(
                camera = %descriptor.name,
                backend = %descriptor.backend_kind(),
                address = %descriptor.backend_address,
                presets = presets.len(),
                "configured camera"
            );
            let backend = create_backend(descriptor, transport.clone(), settings.opaque_failure);
            cameras.push(Arc::new(CameraController::new(
                backend,
                presets,
                settings,
                status_tx.clone(),
            )));
        }

        Ok(Self::new(cameras, status_tx))
    }

    pub fn get(&self, index: usize) -> Option<&Arc<CameraController>> {
        self.cameras.get(index)
    }

    pub fn cameras(&self) -> &[Arc<CameraController>] {
        &self.cameras
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{BackendCall, RecordingBackend};

    fn controller(camera_type: CameraType) -> (CameraController, Arc<RecordingBackend>, broadcast::Receiver<StatusUpdate>) {
        let backend = RecordingBackend::new(camera_type, 9);
        let (tx, rx) = broadcast::channel(16);
        let ctl = CameraController::new(backend.clone(), Vec::new(), &ControllerSettings::default(), tx);
        (ctl, backend, rx)
    }

    #[tokio::test]
    async fn failures_become_status_lines() {
        let (ctl, backend, mut rx) = controller(CameraType::ViscaJog);
        backend.failing_presets.lock().await.insert(4);

        assert!(ctl.show_preset(4).await.is_err());
        let update = rx.recv().await.unwrap();
        assert_eq!(update.text, "Failed show preset: Network error");
        assert_eq!(update.hold, Some(crate::status::DEFAULT_STATUS_HOLD));
    }

    #[tokio::test]
    async fn readbacks_are_shown() {
        let (ctl, _backend, mut rx) = controller(CameraType::ViscaJog);

        ctl.version_info().await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap().text,
            "vendor=1  model=2  version=3  maxsocket=4"
        );

        ctl.read_position().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "pan=0  tilt=0  zoom=0");
    }

    #[tokio::test]
    async fn home_and_reset_send_raw_visca() {
        let (ctl, backend, _rx) = controller(CameraType::ViscaJoystick);

        ctl.home().await.unwrap();
        ctl.reset().await.unwrap();

        assert_eq!(
            backend.calls().await,
            vec![
                BackendCall::SendRaw("81 01 06 04 FF".into(), 0),
                BackendCall::SendRaw("81 01 06 05 FF".into(), 0),
            ]
        );
    }

    #[test]
    fn joysticks_only_on_joystick_cameras() {
        let (jog, _, _) = controller(CameraType::ViscaJog);
        assert!(matches!(jog.joystick(AxisGroup::Zoom), Err(CameraError::Sequence(_))));

        let (stick, _, _) = controller(CameraType::ViscaJoystick);
        assert_eq!(stick.joystick(AxisGroup::Zoom).unwrap().group(), AxisGroup::Zoom);
    }
}
