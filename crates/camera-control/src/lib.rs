pub mod backend;
pub mod buttons;
pub mod controller;
pub mod error;
pub mod joystick;
pub mod presets;
pub mod roster;
pub mod status;
pub mod transport;
pub mod types;

pub use backend::{create_backend, CameraBackend, HttpActionBackend, ViscaBackend};
pub use buttons::{Button, ButtonPad};
pub use controller::{CameraController, CameraFleet, ControllerSettings};
pub use error::{CameraError, CameraResult};
pub use joystick::{JoystickProfile, PointerSample, VelocityController};
pub use presets::{PresetJobHandle, PresetJobReport, PresetJobView, PresetWorkflow};
pub use roster::CameraRoster;
pub use status::StatusReporter;
pub use transport::{OpaqueFailurePolicy, ReqwestTransport, Transport};
pub use types::*;
