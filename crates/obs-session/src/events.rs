use crate::stats::{OutputKind, StatsSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingHello,
    AwaitingIdentifyAck,
    Ready,
}

impl SessionState {
    /// Numeric form exported as the session state gauge.
    pub fn as_gauge(&self) -> i64 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::AwaitingHello => 2,
            Self::AwaitingIdentifyAck => 3,
            Self::Ready => 4,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::AwaitingIdentifyAck => "awaiting_identify_ack",
            Self::Ready => "ready",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TallyTarget {
    Program,
    Preview,
}

impl TallyTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Program => "Program",
            Self::Preview => "Preview",
        }
    }
}

/// Slide-show and camera-overlay actions, each bound to a hotkey in the
/// production tool's slide script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideAction {
    Hide,
    Toggle,
    Next,
    Previous,
    Reload,
}

impl SlideAction {
    pub fn hotkey(&self) -> &'static str {
        match self {
            Self::Hide => "camtoggle_clean_button",
            Self::Toggle => "camtoggle_button",
            Self::Next => "simpleslides_next_button",
            Self::Previous => "simpleslides_previous_button",
            Self::Reload => "simpleslides_reset_button",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hide" => Some(Self::Hide),
            "toggle" => Some(Self::Toggle),
            "next" => Some(Self::Next),
            "previous" | "prev" => Some(Self::Previous),
            "reload" | "reset" => Some(Self::Reload),
            _ => None,
        }
    }
}

/// Notifications published to every dock subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DockEvent {
    SessionState {
        state: SessionState,
    },
    Tally {
        target: TallyTarget,
        scene: String,
        cameras: Vec<String>,
        /// One flag per configured camera source, in configured order.
        live: Vec<bool>,
    },
    SlideChanged {
        current: String,
        next: String,
    },
    Stats(StatsSnapshot),
    OutputStateChanged {
        output: OutputKind,
        active: bool,
        state: String,
    },
}

/// Point-in-time view of the session for the dock API.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub program_scene: Option<String>,
    pub preview_scene: Option<String>,
    pub current_slide: Option<String>,
    pub stats: Option<StatsSnapshot>,
    pub pending_requests: usize,
    pub scene_cameras: BTreeMap<String, Vec<String>>,
    /// Most recent session log lines; the full log is saved to the tool.
    pub log: Vec<String>,
    pub log_lines: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slide_actions_map_to_hotkeys() {
        assert_eq!(SlideAction::parse("Next"), Some(SlideAction::Next));
        assert_eq!(SlideAction::parse("prev").map(|a| a.hotkey()), Some("simpleslides_previous_button"));
        assert_eq!(SlideAction::Hide.hotkey(), "camtoggle_clean_button");
        assert_eq!(SlideAction::parse("dance"), None);
    }

    #[test]
    fn events_serialize_tagged() {
        let event = DockEvent::SessionState {
            state: SessionState::AwaitingIdentifyAck,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "session_state", "state": "awaiting_identify_ack"})
        );

        let tally = DockEvent::Tally {
            target: TallyTarget::Program,
            scene: "Wide".into(),
            cameras: vec!["Camera 2".into()],
            live: vec![false, true],
        };
        assert_eq!(serde_json::to_value(&tally).unwrap()["target"], json!("Program"));
    }
}
