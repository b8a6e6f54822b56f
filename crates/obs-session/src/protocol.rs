//! obs-websocket v5 frames: `{"op": <opcode>, "d": {...}}` text messages.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Event subscription bits requested in Identify.
pub const SUBSCRIBE_SCENES: u32 = 1 << 2;
pub const SUBSCRIBE_OUTPUTS: u32 = 1 << 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Hello = 0,
    Identify = 1,
    Identified = 2,
    Event = 5,
    Request = 6,
    RequestResponse = 7,
}

impl OpCode {
    pub fn from_u64(op: u64) -> Option<Self> {
        match op {
            0 => Some(Self::Hello),
            1 => Some(Self::Identify),
            2 => Some(Self::Identified),
            5 => Some(Self::Event),
            6 => Some(Self::Request),
            7 => Some(Self::RequestResponse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub event_data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    #[serde(default)]
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: JsonValue,
}

/// Frames the dock consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Hello(Hello),
    Identified(Identified),
    Event(Event),
    RequestResponse(RequestResponse),
}

#[derive(Deserialize)]
struct RawFrame {
    op: Option<u64>,
    #[serde(default)]
    d: JsonValue,
}

fn payload<T: for<'de> Deserialize<'de>>(op: OpCode, d: JsonValue) -> Result<T, ProtocolError> {
    serde_json::from_value(d).map_err(|e| ProtocolError::InvalidPayload {
        op: op as u8,
        reason: e.to_string(),
    })
}

pub fn parse_frame(text: &str) -> Result<Incoming, ProtocolError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let op = raw.op.ok_or(ProtocolError::MissingOpcode)?;
    let code = OpCode::from_u64(op).ok_or(ProtocolError::UnknownOpcode(op))?;

    if raw.d.is_null() {
        return Err(ProtocolError::MissingPayload(code as u8));
    }

    match code {
        OpCode::Hello => Ok(Incoming::Hello(payload(code, raw.d)?)),
        OpCode::Identified => Ok(Incoming::Identified(payload(code, raw.d)?)),
        OpCode::Event => Ok(Incoming::Event(payload(code, raw.d)?)),
        OpCode::RequestResponse => Ok(Incoming::RequestResponse(payload(code, raw.d)?)),
        // Client-to-server opcodes never arrive from the server.
        OpCode::Identify | OpCode::Request => Err(ProtocolError::UnknownOpcode(op)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<JsonValue>,
}

impl Request {
    pub fn new(request_type: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            request_type: request_type.into(),
            request_id: request_id.into(),
            request_data: None,
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.request_data = Some(data);
        self
    }
}

/// Frames the dock produces.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Identify { rpc_version: u32, event_subscriptions: u32 },
    Request(Request),
}

impl Outgoing {
    pub fn identify(rpc_version: u32) -> Self {
        Self::Identify {
            rpc_version,
            event_subscriptions: SUBSCRIBE_SCENES | SUBSCRIBE_OUTPUTS,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Identify {
                rpc_version,
                event_subscriptions,
            } => json!({
                "op": OpCode::Identify as u8,
                "d": {
                    "rpcVersion": rpc_version,
                    "eventSubscriptions": event_subscriptions,
                }
            }),
            Self::Request(request) => json!({
                "op": OpCode::Request as u8,
                "d": request,
            }),
        }
    }

    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }
}

// ==== Typed event and response payloads ====

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneNameData {
    pub scene_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputStateData {
    pub output_active: bool,
    pub output_state: String,
}

impl OutputStateData {
    pub const STARTING: &'static str = "OBS_WEBSOCKET_OUTPUT_STARTING";
    pub const STOPPED: &'static str = "OBS_WEBSOCKET_OUTPUT_STOPPED";

    pub fn is_starting(&self) -> bool {
        self.output_state == Self::STARTING
    }

    pub fn is_stopped(&self) -> bool {
        self.output_state == Self::STOPPED
    }
}

/// Events the dock subscribes to; anything else is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum ObsEvent {
    CurrentProgramSceneChanged(SceneNameData),
    CurrentPreviewSceneChanged(SceneNameData),
    RecordStateChanged(OutputStateData),
    StreamStateChanged(OutputStateData),
}

impl ObsEvent {
    /// `Ok(None)` for event types outside the handled vocabulary.
    /// Event names the dock subscribes to.
    pub const EVENT_TYPES: [&'static str; 4] = [
        "CurrentProgramSceneChanged",
        "CurrentPreviewSceneChanged",
        "RecordStateChanged",
        "StreamStateChanged",
    ];

    /// Bounded label for the events metric; anything unknown is `other`.
    pub fn metric_label(event_type: &str) -> &'static str {
        Self::EVENT_TYPES
            .iter()
            .copied()
            .find(|known| *known == event_type)
            .unwrap_or("other")
    }

    pub fn from_event(event: &Event) -> Result<Option<Self>, ProtocolError> {
        let data = event.event_data.clone();
        let parsed = match event.event_type.as_str() {
            "CurrentProgramSceneChanged" => {
                Self::CurrentProgramSceneChanged(payload(OpCode::Event, data)?)
            }
            "CurrentPreviewSceneChanged" => {
                Self::CurrentPreviewSceneChanged(payload(OpCode::Event, data)?)
            }
            "RecordStateChanged" => Self::RecordStateChanged(payload(OpCode::Event, data)?),
            "StreamStateChanged" => Self::StreamStateChanged(payload(OpCode::Event, data)?),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentProgramScene {
    pub current_program_scene_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPreviewScene {
    pub current_preview_scene_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItem {
    pub source_name: String,
    #[serde(default)]
    pub input_kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItemList {
    #[serde(default)]
    pub scene_items: Vec<SceneItem>,
}

/// Settings the slide-show script publishes on its info source.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SlideSettings {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub next_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSettings {
    #[serde(default)]
    pub input_settings: SlideSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsStats {
    pub cpu_usage: f64,
    pub average_frame_render_time: f64,
    pub render_skipped_frames: u64,
    pub render_total_frames: u64,
    pub output_skipped_frames: u64,
    pub output_total_frames: u64,
}

pub fn response_payload<T: for<'de> Deserialize<'de>>(data: &JsonValue) -> Result<T, ProtocolError> {
    payload(OpCode::RequestResponse, data.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello_and_identified() {
        let hello = parse_frame(r#"{"op":0,"d":{"obsWebSocketVersion":"5.1.0","rpcVersion":1}}"#).unwrap();
        assert_eq!(
            hello,
            Incoming::Hello(Hello {
                obs_web_socket_version: Some("5.1.0".into()),
                rpc_version: 1
            })
        );

        let identified = parse_frame(r#"{"op":2,"d":{"negotiatedRpcVersion":1}}"#).unwrap();
        assert_eq!(
            identified,
            Incoming::Identified(Identified {
                negotiated_rpc_version: 1
            })
        );
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(parse_frame("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(parse_frame(r#"{"d":{}}"#), Err(ProtocolError::MissingOpcode)));
        assert!(matches!(parse_frame(r#"{"op":9,"d":{}}"#), Err(ProtocolError::UnknownOpcode(9))));
        assert!(matches!(parse_frame(r#"{"op":0}"#), Err(ProtocolError::MissingPayload(0))));
        assert!(matches!(
            parse_frame(r#"{"op":0,"d":{"rpcVersion":"one"}}"#),
            Err(ProtocolError::InvalidPayload { op: 0, .. })
        ));
    }

    #[test]
    fn identify_subscribes_to_scenes_and_outputs() {
        let frame = Outgoing::identify(1).to_json();
        assert_eq!(
            frame,
            json!({"op": 1, "d": {"rpcVersion": 1, "eventSubscriptions": 68}})
        );
    }

    #[test]
    fn request_omits_missing_data() {
        let frame = Outgoing::Request(Request::new("GetStats", "get-stats")).to_json();
        assert_eq!(
            frame,
            json!({"op": 6, "d": {"requestType": "GetStats", "requestId": "get-stats"}})
        );
    }

    #[test]
    fn typed_events() {
        let event = Event {
            event_type: "RecordStateChanged".into(),
            event_data: json!({"outputActive": false, "outputState": "OBS_WEBSOCKET_OUTPUT_STOPPED"}),
        };
        match ObsEvent::from_event(&event).unwrap() {
            Some(ObsEvent::RecordStateChanged(data)) => assert!(data.is_stopped()),
            other => panic!("unexpected {other:?}"),
        }

        let unknown = Event {
            event_type: "InputMuteStateChanged".into(),
            event_data: json!({}),
        };
        assert_eq!(ObsEvent::from_event(&unknown).unwrap(), None);
    }

    #[test]
    fn event_metric_labels_are_bounded() {
        assert_eq!(
            ObsEvent::metric_label("RecordStateChanged"),
            "RecordStateChanged"
        );
        assert_eq!(ObsEvent::metric_label("InputVolumeMeters"), "other");
        assert_eq!(ObsEvent::metric_label(&"x".repeat(500)), "other");
    }
}
