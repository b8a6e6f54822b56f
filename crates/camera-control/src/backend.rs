use crate::error::{CameraError, CameraResult};
use crate::transport::{
    HttpActionClient, OpaqueFailurePolicy, Transport, ViscaClient, ViscaCommand, ViscaRequest,
};
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;
use telemetry::metrics::CAMERA_COMMANDS;
use tracing::{debug, info};

/// VISCA "pan-tilt reset" sent raw through the bridge.
pub const VISCA_RESET_BYTES: &str = "81 01 06 05 FF";
/// VISCA "pan-tilt home" sent raw through the bridge.
pub const VISCA_HOME_BYTES: &str = "81 01 06 04 FF";

/// PTZ operations every camera backend exposes. Backends that cannot perform
/// an operation return [`CameraError::Unsupported`].
#[async_trait]
pub trait CameraBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn descriptor(&self) -> &Arc<CameraDescriptor>;

    /// Move to a stored preset
    async fn show_preset(&self, preset: u32) -> CameraResult<()>;

    /// Store the current position as a preset
    async fn set_preset(&self, preset: u32) -> CameraResult<()>;

    /// Start continuous motion in one direction
    async fn start_slew(&self, direction: Direction, speed: u8) -> CameraResult<()>;

    /// Stop motion started by `start_slew`
    async fn stop_slew(&self, direction: Direction) -> CameraResult<()>;

    /// Step one axis by `step` raw position units
    async fn jog(&self, axis: Axis, step: i32) -> CameraResult<()>;

    /// Apply a joystick velocity for one axis group
    async fn velocity(&self, intent: &VelocityIntent) -> CameraResult<()>;

    async fn read_position(&self) -> CameraResult<PtzPosition>;

    async fn move_to(&self, position: PtzPosition, speed: Option<u8>) -> CameraResult<()>;

    async fn version_info(&self) -> CameraResult<VersionInfo>;

    async fn send_raw(&self, bytes: &str, reply_length: usize) -> CameraResult<RawReply>;
}

fn record<T>(kind: BackendKind, command: &str, result: &CameraResult<T>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    CAMERA_COMMANDS
        .with_label_values(&[kind.as_str(), command, status])
        .inc();
}

/// Aver cameras behind the PTZApp2 HTTP server. One server multiplexes
/// several cameras, so every action is preceded by a camera-select call.
pub struct HttpActionBackend {
    descriptor: Arc<CameraDescriptor>,
    client: HttpActionClient,
}

impl HttpActionBackend {
    pub fn new(
        descriptor: Arc<CameraDescriptor>,
        transport: Arc<dyn Transport>,
        opaque_failure: OpaqueFailurePolicy,
    ) -> Self {
        let client = HttpActionClient::new(&descriptor.backend_address, transport, opaque_failure);
        Self { descriptor, client }
    }

    fn verb(direction: Direction) -> Option<&'static str> {
        match direction {
            Direction::Up => Some("up"),
            Direction::Down => Some("down"),
            Direction::Left => Some("left"),
            Direction::Right => Some("right"),
            Direction::In => Some("zoomin"),
            Direction::Out => Some("zoomout"),
            Direction::Stop => None,
        }
    }

    /// Select this camera, then send `ptz?action=<action>`. The act is only
    /// issued once the select has succeeded.
    async fn select_then_act(&self, action: &str) -> CameraResult<()> {
        let select = format!("list?action=set&uvcid={}", self.descriptor.serial);
        if let Err(e) = self.client.get(&select).await {
            return Err(CameraError::transport(format!(
                "Failed to select camera: {e}"
            )));
        }

        self.client.get(&format!("ptz?action={action}")).await?;
        debug!(camera = %self.descriptor.name, action, "completed PTZApp command");
        Ok(())
    }

    fn unsupported(operation: &'static str) -> CameraError {
        CameraError::Unsupported {
            backend: BackendKind::HttpAction.as_str(),
            operation,
        }
    }
}

#[async_trait]
impl CameraBackend for HttpActionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HttpAction
    }

    fn descriptor(&self) -> &Arc<CameraDescriptor> {
        &self.descriptor
    }

    async fn show_preset(&self, preset: u32) -> CameraResult<()> {
        let result = self
            .select_then_act(&format!("gopreset&index={preset}"))
            .await;
        record(self.kind(), "go-preset", &result);
        result
    }

    async fn set_preset(&self, preset: u32) -> CameraResult<()> {
        let result = self
            .select_then_act(&format!("setpreset&index={preset}"))
            .await;
        record(self.kind(), "set-preset", &result);
        result
    }

    async fn start_slew(&self, direction: Direction, _speed: u8) -> CameraResult<()> {
        let verb = Self::verb(direction).ok_or_else(|| Self::unsupported("slew without direction"))?;
        let result = self.select_then_act(&format!("{verb}1")).await;
        record(self.kind(), "slew", &result);
        result
    }

    async fn stop_slew(&self, direction: Direction) -> CameraResult<()> {
        let verb = Self::verb(direction).ok_or_else(|| Self::unsupported("slew without direction"))?;
        let result = self.select_then_act(&format!("{verb}0")).await;
        record(self.kind(), "slew", &result);
        result
    }

    async fn jog(&self, _axis: Axis, _step: i32) -> CameraResult<()> {
        Err(Self::unsupported("jog"))
    }

    async fn velocity(&self, _intent: &VelocityIntent) -> CameraResult<()> {
        Err(Self::unsupported("velocity control"))
    }

    async fn read_position(&self) -> CameraResult<PtzPosition> {
        Err(Self::unsupported("position readback"))
    }

    async fn move_to(&self, _position: PtzPosition, _speed: Option<u8>) -> CameraResult<()> {
        Err(Self::unsupported("absolute move"))
    }

    async fn version_info(&self) -> CameraResult<VersionInfo> {
        Err(Self::unsupported("version info"))
    }

    async fn send_raw(&self, _bytes: &str, _reply_length: usize) -> CameraResult<RawReply> {
        Err(Self::unsupported("raw send"))
    }
}

/// Cameras reached through the HTTP-to-VISCA bridge.
pub struct ViscaBackend {
    descriptor: Arc<CameraDescriptor>,
    client: ViscaClient,
}

impl ViscaBackend {
    pub fn new(descriptor: Arc<CameraDescriptor>, transport: Arc<dyn Transport>) -> Self {
        let client = ViscaClient::new(
            &descriptor.backend_address,
            descriptor.visca_address,
            transport,
        );
        Self { descriptor, client }
    }

    async fn send(&self, request: ViscaRequest) -> CameraResult<crate::transport::ViscaResponse> {
        let result = self.client.send(&request).await;
        record(self.kind(), request.command.as_str(), &result);
        result
    }

    fn slew_request(direction: Direction, speed: u8) -> ViscaRequest {
        match direction.axis() {
            Some(Axis::Pan) => ViscaRequest::slew(direction, speed, Direction::Stop, 0),
            Some(Axis::Tilt) => ViscaRequest::slew(Direction::Stop, 0, direction, speed),
            Some(Axis::Zoom) => ViscaRequest::zoom(direction, speed),
            None => ViscaRequest::slew(Direction::Stop, 0, Direction::Stop, 0),
        }
    }
}

#[async_trait]
impl CameraBackend for ViscaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Visca
    }

    fn descriptor(&self) -> &Arc<CameraDescriptor> {
        &self.descriptor
    }

    async fn show_preset(&self, preset: u32) -> CameraResult<()> {
        self.send(ViscaRequest::go_preset(preset)).await?;
        debug!(camera = %self.descriptor.name, preset, "showed preset");
        Ok(())
    }

    async fn set_preset(&self, preset: u32) -> CameraResult<()> {
        self.send(ViscaRequest::set_preset(preset)).await?;
        info!(camera = %self.descriptor.name, preset, "set preset");
        Ok(())
    }

    async fn start_slew(&self, direction: Direction, speed: u8) -> CameraResult<()> {
        self.send(Self::slew_request(direction, speed)).await?;
        Ok(())
    }

    async fn stop_slew(&self, direction: Direction) -> CameraResult<()> {
        let request = match direction.axis() {
            Some(Axis::Zoom) => ViscaRequest::zoom(Direction::Stop, 0),
            _ => ViscaRequest::slew(Direction::Stop, 0, Direction::Stop, 0),
        };
        self.send(request).await?;
        Ok(())
    }

    async fn jog(&self, axis: Axis, step: i32) -> CameraResult<()> {
        let mut target = self.read_position().await?;
        match axis {
            Axis::Pan => target.pan += step,
            Axis::Tilt => target.tilt += step,
            Axis::Zoom => target.zoom = (target.zoom + step).max(0),
        }
        self.move_to(target, Some(self.descriptor.slew_velocity))
            .await
    }

    async fn velocity(&self, intent: &VelocityIntent) -> CameraResult<()> {
        let request = match *intent {
            VelocityIntent::PanTilt { pan, tilt } => {
                ViscaRequest::slew(pan.direction, pan.speed, tilt.direction, tilt.speed)
            }
            VelocityIntent::Zoom { zoom } => ViscaRequest::zoom(zoom.direction, zoom.speed),
        };
        self.send(request).await?;
        Ok(())
    }

    async fn read_position(&self) -> CameraResult<PtzPosition> {
        let response = self.send(ViscaRequest::new(ViscaCommand::Report)).await?;
        match (response.pan, response.tilt, response.zoom) {
            (Some(pan), Some(tilt), Some(zoom)) => Ok(PtzPosition { pan, tilt, zoom }),
            _ => Err(CameraError::InvalidResponse),
        }
    }

    async fn move_to(&self, position: PtzPosition, speed: Option<u8>) -> CameraResult<()> {
        self.send(ViscaRequest::move_to(position, speed)).await?;
        Ok(())
    }

    async fn version_info(&self) -> CameraResult<VersionInfo> {
        let response = self
            .send(ViscaRequest::new(ViscaCommand::VersionInfo))
            .await?;
        Ok(VersionInfo {
            vendor: response.vendor,
            model: response.model,
            version: response.version,
            max_socket: response.max_socket,
        })
    }

    async fn send_raw(&self, bytes: &str, reply_length: usize) -> CameraResult<RawReply> {
        let response = self
            .send(ViscaRequest::send_raw(bytes, reply_length))
            .await?;
        Ok(RawReply {
            response_bytes: response.response_bytes,
        })
    }
}

/// Build the backend for a camera. The backend kind is fixed by the camera
/// type chosen in the roster.
pub fn create_backend(
    descriptor: Arc<CameraDescriptor>,
    transport: Arc<dyn Transport>,
    opaque_failure: OpaqueFailurePolicy,
) -> Arc<dyn CameraBackend> {
    match descriptor.backend_kind() {
        BackendKind::HttpAction => Arc::new(HttpActionBackend::new(
            descriptor,
            transport,
            opaque_failure,
        )),
        BackendKind::Visca => Arc::new(ViscaBackend::new(descriptor, transport)),
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::{Mutex, Semaphore};

    #[derive(Debug, Clone, PartialEq)]
    pub enum BackendCall {
        ShowPreset(u32),
        SetPreset(u32),
        StartSlew(Direction, u8),
        StopSlew(Direction),
        Jog(Axis, i32),
        Velocity(VelocityIntent),
        ReadPosition,
        MoveTo(PtzPosition),
        VersionInfo,
        SendRaw(String, usize),
    }

    /// Backend stub recording every call. `read_position` reports a position
    /// derived from the last preset shown so tests can tell captures apart.
    pub struct RecordingBackend {
        descriptor: Arc<CameraDescriptor>,
        pub calls: Mutex<Vec<BackendCall>>,
        pub failing_presets: Mutex<HashSet<u32>>,
        pub failing_set_presets: Mutex<HashSet<u32>>,
        pub fail_velocity: AtomicBool,
        pub fail_read: AtomicBool,
        pub fail_jog: AtomicBool,
        pub fail_move: AtomicBool,
        pub velocity_gate: Option<Arc<Semaphore>>,
        /// Cancel the token once this many readbacks have completed.
        pub cancel_after_reads: Mutex<Option<(usize, tokio_util::sync::CancellationToken)>>,
        current_preset: Mutex<u32>,
        reads: Mutex<usize>,
    }

    pub fn descriptor(camera_type: CameraType, max_preset: u32) -> Arc<CameraDescriptor> {
        Arc::new(CameraDescriptor {
            index: 0,
            name: "Cam1".into(),
            camera_type,
            backend_address: "127.0.0.1:8080".into(),
            serial: "S1".into(),
            visca_address: 1,
            max_preset,
            slew_velocity: 10,
        })
    }

    impl RecordingBackend {
        pub fn new(camera_type: CameraType, max_preset: u32) -> Arc<Self> {
            Arc::new(Self::build(camera_type, max_preset, None))
        }

        /// Velocity calls block until the returned semaphore hands out a permit.
        pub fn gated(camera_type: CameraType) -> (Arc<Self>, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            let backend = Arc::new(Self::build(camera_type, 9, Some(gate.clone())));
            (backend, gate)
        }

        fn build(camera_type: CameraType, max_preset: u32, gate: Option<Arc<Semaphore>>) -> Self {
            Self {
                descriptor: descriptor(camera_type, max_preset),
                calls: Mutex::new(Vec::new()),
                failing_presets: Mutex::new(HashSet::new()),
                failing_set_presets: Mutex::new(HashSet::new()),
                fail_velocity: AtomicBool::new(false),
                fail_read: AtomicBool::new(false),
                fail_jog: AtomicBool::new(false),
                fail_move: AtomicBool::new(false),
                velocity_gate: gate,
                cancel_after_reads: Mutex::new(None),
                current_preset: Mutex::new(0),
                reads: Mutex::new(0),
            }
        }

        pub async fn calls(&self) -> Vec<BackendCall> {
            self.calls.lock().await.clone()
        }

        async fn push(&self, call: BackendCall) {
            self.calls.lock().await.push(call);
        }

        fn failure(text: &str) -> CameraError {
            CameraError::transport(text)
        }
    }

    #[async_trait]
    impl CameraBackend for RecordingBackend {
        fn kind(&self) -> BackendKind {
            self.descriptor.backend_kind()
        }

        fn descriptor(&self) -> &Arc<CameraDescriptor> {
            &self.descriptor
        }

        async fn show_preset(&self, preset: u32) -> CameraResult<()> {
            self.push(BackendCall::ShowPreset(preset)).await;
            if self.failing_presets.lock().await.contains(&preset) {
                return Err(Self::failure("Network error"));
            }
            *self.current_preset.lock().await = preset;
            Ok(())
        }

        async fn set_preset(&self, preset: u32) -> CameraResult<()> {
            self.push(BackendCall::SetPreset(preset)).await;
            if self.failing_set_presets.lock().await.contains(&preset) {
                return Err(Self::failure("Network error"));
            }
            Ok(())
        }

        async fn start_slew(&self, direction: Direction, speed: u8) -> CameraResult<()> {
            self.push(BackendCall::StartSlew(direction, speed)).await;
            Ok(())
        }

        async fn stop_slew(&self, direction: Direction) -> CameraResult<()> {
            self.push(BackendCall::StopSlew(direction)).await;
            Ok(())
        }

        async fn jog(&self, axis: Axis, step: i32) -> CameraResult<()> {
            self.push(BackendCall::Jog(axis, step)).await;
            if self.fail_jog.load(Ordering::SeqCst) {
                return Err(Self::failure("Network error"));
            }
            Ok(())
        }

        async fn velocity(&self, intent: &VelocityIntent) -> CameraResult<()> {
            self.push(BackendCall::Velocity(*intent)).await;
            if let Some(gate) = &self.velocity_gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            if self.fail_velocity.load(Ordering::SeqCst) {
                return Err(Self::failure("Network error"));
            }
            Ok(())
        }

        async fn read_position(&self) -> CameraResult<PtzPosition> {
            self.push(BackendCall::ReadPosition).await;
            if self.fail_read.load(Ordering::SeqCst) {
                return Err(Self::failure("Network error"));
            }
            let preset = *self.current_preset.lock().await as i32;
            let mut reads = self.reads.lock().await;
            *reads += 1;
            if let Some((after, token)) = self.cancel_after_reads.lock().await.as_ref() {
                if *reads == *after {
                    token.cancel();
                }
            }
            Ok(PtzPosition {
                pan: preset * 100,
                tilt: -preset * 10,
                zoom: preset * 1000,
            })
        }

        async fn move_to(&self, position: PtzPosition, _speed: Option<u8>) -> CameraResult<()> {
            self.push(BackendCall::MoveTo(position)).await;
            if self.fail_move.load(Ordering::SeqCst) {
                return Err(Self::failure("Network error"));
            }
            Ok(())
        }

        async fn version_info(&self) -> CameraResult<VersionInfo> {
            self.push(BackendCall::VersionInfo).await;
            Ok(VersionInfo {
                vendor: Some(1),
                model: Some(2),
                version: Some(3),
                max_socket: Some(4),
            })
        }

        async fn send_raw(&self, bytes: &str, reply_length: usize) -> CameraResult<RawReply> {
            self.push(BackendCall::SendRaw(bytes.to_string(), reply_length))
                .await;
            Ok(RawReply {
                response_bytes: Some("90 50 FF".into()),
            })
        }
    }
}
