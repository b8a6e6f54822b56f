use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// Camera flavour as written in the roster file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraType {
    /// Aver camera behind the PTZApp2 HTTP server; slew buttons only.
    AverPtzapp,
    /// VISCA camera without usable velocity control; slew and jog buttons.
    ViscaJog,
    /// VISCA camera with velocity control; pan/tilt and zoom joysticks.
    ViscaJoystick,
}

impl CameraType {
    pub fn backend_kind(self) -> BackendKind {
        match self {
            Self::AverPtzapp => BackendKind::HttpAction,
            Self::ViscaJog | Self::ViscaJoystick => BackendKind::Visca,
        }
    }

    pub fn has_joysticks(self) -> bool {
        matches!(self, Self::ViscaJoystick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    HttpAction,
    Visca,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HttpAction => "http-action",
            Self::Visca => "visca",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical camera, immutable after the roster is loaded.
#[derive(Debug, Clone, Serialize)]
pub struct CameraDescriptor {
    pub index: usize,
    pub name: String,
    pub camera_type: CameraType,
    /// `host:port` of the PTZApp server or the VISCA bridge.
    pub backend_address: String,
    /// UVC serial number used by the PTZApp camera-select call.
    pub serial: String,
    /// VISCA bus address.
    pub visca_address: u8,
    pub max_preset: u32,
    pub slew_velocity: u8,
}

impl CameraDescriptor {
    pub fn backend_kind(&self) -> BackendKind {
        self.camera_type.backend_kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetDescriptor {
    pub name: String,
    pub camera: String,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub preset: u32,
}

/// Accept `3` as well as `"3"`; roster files written for the browser pages
/// store preset numbers as strings.
pub(crate) fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid preset number {s:?}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Pan,
    Tilt,
    Zoom,
}

/// Direction tokens understood by the VISCA bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    In,
    Out,
    Stop,
}

impl Direction {
    pub fn token(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::In => "in",
            Self::Out => "out",
            Self::Stop => "stop",
        }
    }

    /// Axis moved by this direction, `None` for `Stop`.
    pub fn axis(self) -> Option<Axis> {
        match self {
            Self::Up | Self::Down => Some(Axis::Tilt),
            Self::Left | Self::Right => Some(Axis::Pan),
            Self::In | Self::Out => Some(Axis::Zoom),
            Self::Stop => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisVelocity {
    pub direction: Direction,
    pub speed: u8,
}

impl AxisVelocity {
    pub const STOP: AxisVelocity = AxisVelocity {
        direction: Direction::Stop,
        speed: 0,
    };

    pub fn is_stop(&self) -> bool {
        self.direction == Direction::Stop
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisGroup {
    PanTilt,
    Zoom,
}

impl AxisGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PanTilt => "pan_tilt",
            Self::Zoom => "zoom",
        }
    }
}

/// Continuous velocity for one axis group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "group", rename_all = "snake_case")]
pub enum VelocityIntent {
    PanTilt { pan: AxisVelocity, tilt: AxisVelocity },
    Zoom { zoom: AxisVelocity },
}

impl VelocityIntent {
    pub fn stop(group: AxisGroup) -> Self {
        match group {
            AxisGroup::PanTilt => Self::PanTilt {
                pan: AxisVelocity::STOP,
                tilt: AxisVelocity::STOP,
            },
            AxisGroup::Zoom => Self::Zoom {
                zoom: AxisVelocity::STOP,
            },
        }
    }

    pub fn group(&self) -> AxisGroup {
        match self {
            Self::PanTilt { .. } => AxisGroup::PanTilt,
            Self::Zoom { .. } => AxisGroup::Zoom,
        }
    }
}

/// Raw camera coordinates as reported by the VISCA `report` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtzPosition {
    pub pan: i32,
    pub tilt: i32,
    pub zoom: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub vendor: Option<u32>,
    pub model: Option<u32>,
    pub version: Option<u32>,
    pub max_socket: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReply {
    pub response_bytes: Option<String>,
}

/// One entry of an exported preset file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPreset {
    pub preset: u32,
    pub pan: i32,
    pub tilt: i32,
    pub zoom: i32,
}

impl CapturedPreset {
    pub fn position(&self) -> PtzPosition {
        PtzPosition {
            pan: self.pan,
            tilt: self.tilt,
            zoom: self.zoom,
        }
    }
}

/// Status line text for one camera, shown for `hold` then reverting to the
/// idle text; `hold == None` keeps it until replaced.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub camera: usize,
    pub text: String,
    #[serde(with = "hold_millis")]
    pub hold: Option<Duration>,
    pub at: DateTime<Utc>,
}

mod hold_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(hold: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match hold {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }
}
