//! Synchronous session core. Every transition is a call to
//! [`SessionMachine::handle`], which returns the side effects for the driver
//! to perform.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{DockEvent, SessionSnapshot, SessionState, TallyTarget};
use crate::protocol::{
    parse_frame, response_payload, CurrentPreviewScene, CurrentProgramScene, Event, Incoming,
    InputSettings, ObsEvent, ObsStats, Outgoing, OutputStateData, Request, RequestResponse,
    SceneItemList,
};
use crate::scene_cache::SceneCameraCache;
use crate::stats::{OutputKind, StatsSnapshot, StatsTracker};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::time::Instant;
use telemetry::metrics::SESSION_EVENTS;
use tracing::{debug, info, warn};

pub const PROGRAM_SCENE_ID: &str = "get-program-scene";
pub const PREVIEW_SCENE_ID: &str = "get-preview-scene";
pub const SLIDE_SETTINGS_ID: &str = "get-slideshow-settings";
pub const STATS_ID: &str = "get-stats";
pub const SAVE_LOG_ID: &str = "save-log-data";
/// Session log lines carried in each snapshot.
pub const SNAPSHOT_LOG_LINES: usize = 20;

/// Driver-side handle for a caller awaiting a response.
pub type Ticket = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Open,
    Close,
    SocketOpened { generation: u64 },
    SocketText { generation: u64, text: String },
    SocketClosed { generation: u64, reason: Option<String> },
    SocketError { generation: u64, error: String },
    ReconnectTimer,
    SlidePollTick,
    StatsPollTick,
    ResetStats,
    Request { ticket: Ticket, request: Request },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Connect { generation: u64, reconnect: bool },
    Send(String),
    CloseSocket,
    ArmReconnect,
    DisarmReconnect,
    StartPollers,
    StopPollers,
    Resolve {
        ticket: Ticket,
        result: Result<JsonValue, SessionError>,
    },
    Emit(DockEvent),
}

#[derive(Debug, Clone, PartialEq)]
enum Internal {
    ProgramScene,
    PreviewScene,
    SceneItems { target: TallyTarget, scene: String },
    SlideSettings,
    Stats,
    SaveLog,
}

impl Internal {
    fn request_id(&self) -> String {
        match self {
            Self::ProgramScene => PROGRAM_SCENE_ID.to_string(),
            Self::PreviewScene => PREVIEW_SCENE_ID.to_string(),
            Self::SceneItems { target, scene } => scene_items_id(*target, scene),
            Self::SlideSettings => SLIDE_SETTINGS_ID.to_string(),
            Self::Stats => STATS_ID.to_string(),
            Self::SaveLog => SAVE_LOG_ID.to_string(),
        }
    }
}

pub fn scene_items_id(target: TallyTarget, scene: &str) -> String {
    format!("scene-items:{}:{}", target.as_str(), scene)
}

#[derive(Debug)]
enum Origin {
    Internal(Internal),
    External(Ticket),
}

#[derive(Debug)]
struct Pending {
    request_type: String,
    origin: Origin,
    issued_at: Instant,
}

pub struct SessionMachine {
    config: SessionConfig,
    state: SessionState,
    generation: u64,
    reconnect_armed: bool,
    pollers_running: bool,
    user_closed: bool,
    pending: HashMap<String, Pending>,
    cache: SceneCameraCache,
    stats: StatsTracker,
    last_stats: Option<StatsSnapshot>,
    program_scene: Option<String>,
    preview_scene: Option<String>,
    current_slide: Option<String>,
}

impl SessionMachine {
    pub fn new(config: SessionConfig, cache: SceneCameraCache) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            generation: 0,
            reconnect_armed: false,
            pollers_running: false,
            user_closed: false,
            pending: HashMap::new(),
            cache,
            stats: StatsTracker::new(),
            last_stats: None,
            program_scene: None,
            preview_scene: None,
            current_slide: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identifies the current connection attempt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_reconnect_armed(&self) -> bool {
        self.reconnect_armed
    }

    pub fn pollers_running(&self) -> bool {
        self.pollers_running
    }

    pub fn cache(&self) -> &SceneCameraCache {
        &self.cache
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            program_scene: self.program_scene.clone(),
            preview_scene: self.preview_scene.clone(),
            current_slide: self.current_slide.clone(),
            stats: self.last_stats.clone(),
            pending_requests: self.pending.len(),
            scene_cameras: self.cache.snapshot(),
            log: self.stats.recent_log(SNAPSHOT_LOG_LINES).to_vec(),
            log_lines: self.stats.log_lines().len(),
        }
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::Open => self.open(&mut effects),
            Input::Close => self.close(&mut effects),
            Input::SocketOpened { generation } if generation == self.generation => {
                self.socket_opened(&mut effects)
            }
            Input::SocketText { generation, text } if generation == self.generation => {
                self.frame(&text, &mut effects)
            }
            Input::SocketClosed { generation, reason } if generation == self.generation => {
                info!(reason = ?reason, state = %self.state, "production tool connection closed");
                self.lose_connection(&mut effects);
            }
            Input::SocketError { generation, error } if generation == self.generation => {
                warn!(error = %error, state = %self.state, "production tool connection failed");
                self.lose_connection(&mut effects);
            }
            Input::SocketOpened { generation }
            | Input::SocketText { generation, .. }
            | Input::SocketClosed { generation, .. }
            | Input::SocketError { generation, .. } => {
                debug!(generation, current = self.generation, "ignoring stale socket signal");
            }
            Input::ReconnectTimer => self.reconnect_fired(&mut effects),
            Input::SlidePollTick => self.issue(Internal::SlideSettings, &mut effects),
            Input::StatsPollTick => self.issue(Internal::Stats, &mut effects),
            Input::ResetStats => {
                self.stats.reset();
                self.issue(Internal::Stats, &mut effects);
            }
            Input::Request { ticket, request } => self.external(ticket, request, &mut effects),
        }
        effects
    }

    fn set_state(&mut self, state: SessionState, effects: &mut Vec<Effect>) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "session transition");
        self.state = state;
        effects.push(Effect::Emit(DockEvent::SessionState { state }));
    }

    fn disarm(&mut self, effects: &mut Vec<Effect>) {
        if self.reconnect_armed {
            self.reconnect_armed = false;
            effects.push(Effect::DisarmReconnect);
        }
    }

    fn connect(&mut self, reconnect: bool, effects: &mut Vec<Effect>) {
        self.generation += 1;
        self.set_state(SessionState::Connecting, effects);
        effects.push(Effect::Connect {
            generation: self.generation,
            reconnect,
        });
    }

    fn open(&mut self, effects: &mut Vec<Effect>) {
        self.user_closed = false;
        if self.state != SessionState::Disconnected {
            debug!(state = %self.state, "open ignored, session already active");
            return;
        }
        self.disarm(effects);
        self.connect(false, effects);
    }

    fn close(&mut self, effects: &mut Vec<Effect>) {
        self.user_closed = true;
        self.disarm(effects);
        if self.state != SessionState::Disconnected {
            self.teardown(effects);
        }
    }

    /// Leave the current connection. Bumping the generation makes every
    /// signal still in flight for it stale.
    fn teardown(&mut self, effects: &mut Vec<Effect>) {
        self.generation += 1;
        self.set_state(SessionState::Disconnected, effects);
        if self.pollers_running {
            self.pollers_running = false;
            effects.push(Effect::StopPollers);
        }
        for (request_id, pending) in self.pending.drain() {
            if let Origin::External(ticket) = pending.origin {
                debug!(request_id = %request_id, "rejecting pending request");
                effects.push(Effect::Resolve {
                    ticket,
                    result: Err(SessionError::Closed),
                });
            }
        }
        effects.push(Effect::CloseSocket);
    }

    fn lose_connection(&mut self, effects: &mut Vec<Effect>) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.teardown(effects);
        if !self.user_closed && !self.reconnect_armed {
            self.reconnect_armed = true;
            effects.push(Effect::ArmReconnect);
        }
    }

    fn reconnect_fired(&mut self, effects: &mut Vec<Effect>) {
        if !self.reconnect_armed {
            debug!("reconnect timer fired while disarmed");
            return;
        }
        self.reconnect_armed = false;
        if self.state == SessionState::Disconnected && !self.user_closed {
            info!(url = %self.config.url, "reconnecting to production tool");
            self.connect(true, effects);
        }
    }

    fn socket_opened(&mut self, effects: &mut Vec<Effect>) {
        if self.state != SessionState::Connecting {
            warn!(state = %self.state, "socket opened outside of connecting");
            return;
        }
        self.stats.reinitialize();
        self.last_stats = None;
        self.set_state(SessionState::AwaitingHello, effects);
    }

    fn frame(&mut self, text: &str, effects: &mut Vec<Effect>) {
        let incoming = match parse_frame(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable frame");
                return;
            }
        };

        match incoming {
            Incoming::Hello(hello) if self.state == SessionState::AwaitingHello => {
                info!(
                    version = hello.obs_web_socket_version.as_deref().unwrap_or("unknown"),
                    rpc_version = hello.rpc_version,
                    "hello from production tool"
                );
                effects.push(Effect::Send(Outgoing::identify(hello.rpc_version).to_text()));
                self.set_state(SessionState::AwaitingIdentifyAck, effects);
            }
            Incoming::Identified(identified) if self.state == SessionState::AwaitingIdentifyAck => {
                info!(
                    rpc_version = identified.negotiated_rpc_version,
                    "identified with production tool"
                );
                self.become_ready(effects);
            }
            Incoming::Hello(_) | Incoming::Identified(_) => {
                warn!(state = %self.state, "handshake frame out of sequence ignored");
            }
            Incoming::Event(event) if self.state == SessionState::Ready => self.event(event, effects),
            Incoming::RequestResponse(response) => self.response(response, effects),
            Incoming::Event(event) => {
                debug!(event_type = %event.event_type, "event before ready ignored");
            }
        }
    }

    fn become_ready(&mut self, effects: &mut Vec<Effect>) {
        self.set_state(SessionState::Ready, effects);
        self.disarm(effects);
        self.issue(Internal::ProgramScene, effects);
        self.issue(Internal::PreviewScene, effects);
        if !self.pollers_running {
            self.pollers_running = true;
            effects.push(Effect::StartPollers);
        }
        self.issue(Internal::SlideSettings, effects);
        self.issue(Internal::Stats, effects);
    }

    fn build(&self, kind: &Internal) -> Request {
        let id = kind.request_id();
        match kind {
            Internal::ProgramScene => Request::new("GetCurrentProgramScene", id),
            Internal::PreviewScene => Request::new("GetCurrentPreviewScene", id),
            Internal::SceneItems { scene, .. } => {
                Request::new("GetSceneItemList", id).with_data(json!({ "sceneName": scene }))
            }
            Internal::SlideSettings => Request::new("GetInputSettings", id)
                .with_data(json!({ "inputName": self.config.slide_info_source })),
            Internal::Stats => Request::new("GetStats", id),
            Internal::SaveLog => Request::new("SetInputSettings", id).with_data(json!({
                "inputName": self.config.slide_info_source,
                "inputSettings": { "saved_log": self.stats.log_text() },
            })),
        }
    }

    /// Internal requests are skipped while one with the same id is pending.
    fn issue(&mut self, kind: Internal, effects: &mut Vec<Effect>) {
        if self.state != SessionState::Ready {
            return;
        }
        let request = self.build(&kind);
        if self.pending.contains_key(&request.request_id) {
            debug!(request_id = %request.request_id, "request still pending, skipping");
            return;
        }
        self.send(request, Origin::Internal(kind), effects);
    }

    fn send(&mut self, request: Request, origin: Origin, effects: &mut Vec<Effect>) {
        self.pending.insert(
            request.request_id.clone(),
            Pending {
                request_type: request.request_type.clone(),
                origin,
                issued_at: Instant::now(),
            },
        );
        effects.push(Effect::Send(Outgoing::Request(request).to_text()));
    }

    fn external(&mut self, ticket: Ticket, request: Request, effects: &mut Vec<Effect>) {
        let result = if self.state != SessionState::Ready {
            Err(SessionError::NotReady)
        } else if self.pending.contains_key(&request.request_id) {
            Err(SessionError::DuplicateRequestId(request.request_id.clone()))
        } else {
            self.send(request, Origin::External(ticket), effects);
            return;
        };
        effects.push(Effect::Resolve { ticket, result });
    }

    fn response(&mut self, response: RequestResponse, effects: &mut Vec<Effect>) {
        let Some(pending) = self.pending.remove(&response.request_id) else {
            warn!(
                request_id = %response.request_id,
                request_type = %response.request_type,
                "response for unknown request ignored"
            );
            return;
        };
        debug!(
            request_id = %response.request_id,
            request_type = %pending.request_type,
            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
            "response received"
        );

        let status = &response.request_status;
        match pending.origin {
            Origin::External(ticket) => {
                let result = if status.result {
                    Ok(response.response_data)
                } else {
                    Err(SessionError::RequestFailed {
                        code: status.code,
                        comment: status.comment.clone(),
                    })
                };
                effects.push(Effect::Resolve { ticket, result });
            }
            Origin::Internal(kind) if !status.result => {
                warn!(
                    request_id = %response.request_id,
                    code = status.code,
                    comment = status.comment.as_deref().unwrap_or(""),
                    kind = ?kind,
                    "request failed"
                );
            }
            Origin::Internal(kind) => self.internal_response(kind, &response.response_data, effects),
        }
    }

    fn internal_response(&mut self, kind: Internal, data: &JsonValue, effects: &mut Vec<Effect>) {
        match kind {
            Internal::ProgramScene => match response_payload::<CurrentProgramScene>(data) {
                Ok(scene) => {
                    self.show_scene(TallyTarget::Program, scene.current_program_scene_name, effects)
                }
                Err(e) => warn!(error = %e, "invalid program scene response"),
            },
            Internal::PreviewScene => match response_payload::<CurrentPreviewScene>(data) {
                Ok(scene) => {
                    self.show_scene(TallyTarget::Preview, scene.current_preview_scene_name, effects)
                }
                Err(e) => warn!(error = %e, "invalid preview scene response"),
            },
            Internal::SceneItems { target, scene } => match response_payload::<SceneItemList>(data) {
                Ok(list) => {
                    let cameras = list
                        .scene_items
                        .into_iter()
                        .filter(|item| self.config.is_camera_kind(item.input_kind.as_deref()))
                        .map(|item| item.source_name);
                    let stored = self.cache.insert(&scene, cameras);
                    debug!(scene = %scene, cameras = ?stored, "cached scene cameras");
                    if self.current_scene(target) == Some(scene.as_str()) {
                        effects.push(Effect::Emit(self.tally(target, scene, stored)));
                    }
                }
                Err(e) => warn!(scene = %scene, error = %e, "invalid scene item list"),
            },
            Internal::SlideSettings => match response_payload::<InputSettings>(data) {
                Ok(settings) => self.slide_settings(settings, effects),
                Err(e) => warn!(error = %e, "invalid slide settings"),
            },
            Internal::Stats => match response_payload::<ObsStats>(data) {
                Ok(stats) => {
                    let snapshot = self.stats.update(&stats, Utc::now());
                    self.last_stats = Some(snapshot.clone());
                    effects.push(Effect::Emit(DockEvent::Stats(snapshot)));
                }
                Err(e) => warn!(error = %e, "invalid stats response"),
            },
            Internal::SaveLog => debug!("saved session log"),
        }
    }

    fn slide_settings(&mut self, settings: InputSettings, effects: &mut Vec<Effect>) {
        let slides = settings.input_settings;
        let Some(file) = slides.file else {
            return;
        };
        if self.current_slide.as_deref() == Some(file.as_str()) {
            return;
        }
        self.current_slide = Some(file.clone());
        effects.push(Effect::Emit(DockEvent::SlideChanged {
            current: file,
            next: slides.next_file.unwrap_or_else(|| "(none)".to_string()),
        }));
    }

    fn current_scene(&self, target: TallyTarget) -> Option<&str> {
        match target {
            TallyTarget::Program => self.program_scene.as_deref(),
            TallyTarget::Preview => self.preview_scene.as_deref(),
        }
    }

    fn show_scene(&mut self, target: TallyTarget, scene: String, effects: &mut Vec<Effect>) {
        match target {
            TallyTarget::Program => self.program_scene = Some(scene.clone()),
            TallyTarget::Preview => self.preview_scene = Some(scene.clone()),
        }
        match self.cache.get(&scene) {
            Some(cameras) => effects.push(Effect::Emit(self.tally(target, scene, cameras))),
            None => self.issue(Internal::SceneItems { target, scene }, effects),
        }
    }

    fn tally(&self, target: TallyTarget, scene: String, cameras: Vec<String>) -> DockEvent {
        let live = self
            .config
            .camera_sources
            .iter()
            .map(|source| cameras.contains(source))
            .collect();
        DockEvent::Tally {
            target,
            scene,
            cameras,
            live,
        }
    }

    fn event(&mut self, event: Event, effects: &mut Vec<Effect>) {
        SESSION_EVENTS
            .with_label_values(&[ObsEvent::metric_label(&event.event_type)])
            .inc();
        let typed = match ObsEvent::from_event(&event) {
            Ok(Some(typed)) => typed,
            Ok(None) => {
                debug!(event_type = %event.event_type, "unhandled event ignored");
                return;
            }
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "invalid event payload");
                return;
            }
        };

        match typed {
            ObsEvent::CurrentProgramSceneChanged(data) => {
                self.show_scene(TallyTarget::Program, data.scene_name, effects)
            }
            ObsEvent::CurrentPreviewSceneChanged(data) => {
                self.show_scene(TallyTarget::Preview, data.scene_name, effects)
            }
            ObsEvent::RecordStateChanged(data) => self.output_changed(OutputKind::Record, data, effects),
            ObsEvent::StreamStateChanged(data) => self.output_changed(OutputKind::Stream, data, effects),
        }
    }

    fn output_changed(&mut self, output: OutputKind, data: OutputStateData, effects: &mut Vec<Effect>) {
        info!(output = ?output, active = data.output_active, state = %data.output_state, "output state changed");
        if data.is_starting() {
            self.stats.log_output(output, true, Utc::now());
        } else if data.is_stopped() {
            self.stats.log_output(output, false, Utc::now());
            self.issue(Internal::SaveLog, effects);
        }
        effects.push(Effect::Emit(DockEvent::OutputStateChanged {
            output,
            active: data.output_active,
            state: data.output_state,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> SessionMachine {
        SessionMachine::new(SessionConfig::default(), SceneCameraCache::new())
    }

    fn sent(effects: &[Effect]) -> Vec<JsonValue> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(text) => serde_json::from_str(text).ok(),
                _ => None,
            })
            .collect()
    }

    fn sent_ids(effects: &[Effect]) -> Vec<String> {
        sent(effects)
            .iter()
            .filter_map(|frame| frame["d"]["requestId"].as_str().map(str::to_string))
            .collect()
    }

    fn emitted(effects: &[Effect]) -> Vec<DockEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Emit(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn text(m: &SessionMachine, value: JsonValue) -> Input {
        Input::SocketText {
            generation: m.generation(),
            text: value.to_string(),
        }
    }

    fn response(m: &SessionMachine, id: &str, ok: bool, data: JsonValue) -> Input {
        text(
            m,
            json!({"op": 7, "d": {
                "requestType": "X",
                "requestId": id,
                "requestStatus": {"result": ok, "code": if ok { 100 } else { 600 }, "comment": "nope"},
                "responseData": data,
            }}),
        )
    }

    fn event(m: &SessionMachine, event_type: &str, data: JsonValue) -> Input {
        text(m, json!({"op": 5, "d": {"eventType": event_type, "eventData": data}}))
    }

    /// Drives a fresh machine to Ready and returns the effects of Identified.
    fn ready(m: &mut SessionMachine) -> Vec<Effect> {
        m.handle(Input::Open);
        m.handle(Input::SocketOpened {
            generation: m.generation(),
        });
        m.handle(text(m, json!({"op": 0, "d": {"rpcVersion": 1}})));
        m.handle(text(m, json!({"op": 2, "d": {"negotiatedRpcVersion": 1}})))
    }

    #[test]
    fn handshake_reaches_ready_with_initial_queries() {
        let mut m = machine();
        let effects = m.handle(Input::Open);
        assert_eq!(
            effects,
            vec![
                Effect::Emit(DockEvent::SessionState {
                    state: SessionState::Connecting
                }),
                Effect::Connect {
                    generation: 1,
                    reconnect: false
                },
            ]
        );

        m.handle(Input::SocketOpened { generation: 1 });
        assert_eq!(m.state(), SessionState::AwaitingHello);

        let effects = m.handle(text(&m, json!({"op": 0, "d": {"rpcVersion": 1}})));
        assert_eq!(
            sent(&effects),
            vec![json!({"op": 1, "d": {"rpcVersion": 1, "eventSubscriptions": 68}})]
        );
        assert_eq!(m.state(), SessionState::AwaitingIdentifyAck);

        let effects = m.handle(text(&m, json!({"op": 2, "d": {"negotiatedRpcVersion": 1}})));
        assert_eq!(m.state(), SessionState::Ready);
        assert_eq!(
            sent_ids(&effects),
            vec![PROGRAM_SCENE_ID, PREVIEW_SCENE_ID, SLIDE_SETTINGS_ID, STATS_ID]
        );
        let frames = sent(&effects);
        assert_eq!(frames[2]["d"]["requestData"]["inputName"], json!("SimpleSlides: music"));
        assert_eq!(
            effects.iter().filter(|e| **e == Effect::StartPollers).count(),
            1
        );
        assert_eq!(m.pending_len(), 4);
    }

    #[test]
    fn close_while_connecting_arms_one_timer() {
        let mut m = machine();
        m.handle(Input::Open);
        let generation = m.generation();

        let first = m.handle(Input::SocketError {
            generation,
            error: "refused".into(),
        });
        let second = m.handle(Input::SocketClosed {
            generation,
            reason: None,
        });

        let arms = first
            .iter()
            .chain(second.iter())
            .filter(|e| **e == Effect::ArmReconnect)
            .count();
        assert_eq!(arms, 1);
        assert!(second.is_empty());
        assert_eq!(m.state(), SessionState::Disconnected);
        assert!(m.is_reconnect_armed());
    }

    #[test]
    fn reconnect_timer_opens_new_generation() {
        let mut m = machine();
        m.handle(Input::Open);
        m.handle(Input::SocketError {
            generation: 1,
            error: "refused".into(),
        });

        let effects = m.handle(Input::ReconnectTimer);
        let generation = m.generation();
        assert!(effects.contains(&Effect::Connect {
            generation,
            reconnect: true
        }));
        assert!(!m.is_reconnect_armed());

        // The first attempt's late signals are stale.
        assert!(m.handle(Input::SocketOpened { generation: 1 }).is_empty());
        assert_eq!(m.state(), SessionState::Connecting);

        // A second timer firing without being armed does nothing.
        assert!(m.handle(Input::ReconnectTimer).is_empty());
    }

    #[test]
    fn unknown_response_id_is_ignored() {
        let mut m = machine();
        ready(&mut m);
        let before = m.snapshot();

        let effects = m.handle(response(&m, "never-sent", true, json!({})));
        assert!(effects.is_empty());
        assert_eq!(m.snapshot(), before);
        assert_eq!(m.state(), SessionState::Ready);
    }

    #[test]
    fn garbage_and_unknown_events_are_absorbed() {
        let mut m = machine();
        ready(&mut m);
        assert!(m.handle(text(&m, json!({"op": 42, "d": {}}))).is_empty());
        assert!(m
            .handle(Input::SocketText {
                generation: m.generation(),
                text: "{{{".into()
            })
            .is_empty());
        let other = SESSION_EVENTS.with_label_values(&["other"]).get();
        assert!(m.handle(event(&m, "InputMuteStateChanged", json!({}))).is_empty());
        assert!(SESSION_EVENTS.with_label_values(&["other"]).get() > other);
        assert_eq!(m.state(), SessionState::Ready);
    }

    #[test]
    fn requests_require_ready() {
        let mut m = machine();
        let effects = m.handle(Input::Request {
            ticket: 7,
            request: Request::new("GetVersion", "v"),
        });
        assert_eq!(
            effects,
            vec![Effect::Resolve {
                ticket: 7,
                result: Err(SessionError::NotReady)
            }]
        );
    }

    #[test]
    fn external_requests_resolve_by_id() {
        let mut m = machine();
        ready(&mut m);

        let effects = m.handle(Input::Request {
            ticket: 1,
            request: Request::new("GetVersion", "v-1"),
        });
        assert_eq!(sent_ids(&effects), vec!["v-1"]);

        let duplicate = m.handle(Input::Request {
            ticket: 2,
            request: Request::new("GetVersion", "v-1"),
        });
        assert_eq!(
            duplicate,
            vec![Effect::Resolve {
                ticket: 2,
                result: Err(SessionError::DuplicateRequestId("v-1".into()))
            }]
        );

        let effects = m.handle(response(&m, "v-1", true, json!({"obsVersion": "30"})));
        assert_eq!(
            effects,
            vec![Effect::Resolve {
                ticket: 1,
                result: Ok(json!({"obsVersion": "30"}))
            }]
        );

        m.handle(Input::Request {
            ticket: 3,
            request: Request::new("TriggerHotkeyByName", "hk"),
        });
        let effects = m.handle(response(&m, "hk", false, JsonValue::Null));
        assert_eq!(
            effects,
            vec![Effect::Resolve {
                ticket: 3,
                result: Err(SessionError::RequestFailed {
                    code: 600,
                    comment: Some("nope".into())
                })
            }]
        );
    }

    #[test]
    fn scene_cameras_are_fetched_once_then_cached() {
        let mut m = machine();
        ready(&mut m);

        let effects = m.handle(response(
            &m,
            PROGRAM_SCENE_ID,
            true,
            json!({"currentProgramSceneName": "Wide"}),
        ));
        let frames = sent(&effects);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["d"]["requestId"], json!("scene-items:Program:Wide"));
        assert_eq!(frames[0]["d"]["requestData"]["sceneName"], json!("Wide"));

        let effects = m.handle(response(
            &m,
            "scene-items:Program:Wide",
            true,
            json!({"sceneItems": [
                {"sourceName": "Camera 2", "inputKind": "dshow_input"},
                {"sourceName": "Logo", "inputKind": "image_source"},
                {"sourceName": "Group"},
            ]}),
        ));
        assert_eq!(
            emitted(&effects),
            vec![DockEvent::Tally {
                target: TallyTarget::Program,
                scene: "Wide".into(),
                cameras: vec!["Camera 2".into()],
                live: vec![false, true],
            }]
        );

        let effects = m.handle(event(&m, "CurrentPreviewSceneChanged", json!({"sceneName": "Wide"})));
        assert!(sent(&effects).is_empty());
        assert_eq!(
            emitted(&effects),
            vec![DockEvent::Tally {
                target: TallyTarget::Preview,
                scene: "Wide".into(),
                cameras: vec!["Camera 2".into()],
                live: vec![false, true],
            }]
        );
        assert_eq!(m.cache().len(), 1);
    }

    #[test]
    fn stale_scene_reply_is_cached_without_tally() {
        let mut m = machine();
        ready(&mut m);
        m.handle(event(&m, "CurrentProgramSceneChanged", json!({"sceneName": "A"})));
        m.handle(event(&m, "CurrentProgramSceneChanged", json!({"sceneName": "B"})));

        let effects = m.handle(response(&m, "scene-items:Program:A", true, json!({"sceneItems": []})));
        assert!(emitted(&effects).is_empty());
        assert!(m.cache().contains("A"));
    }

    #[test]
    fn slide_changes_are_reported_once() {
        let mut m = machine();
        ready(&mut m);
        let settings = json!({"inputSettings": {"file": "song1.png", "next_file": "song2.png"}});

        let effects = m.handle(response(&m, SLIDE_SETTINGS_ID, true, settings.clone()));
        assert_eq!(
            emitted(&effects),
            vec![DockEvent::SlideChanged {
                current: "song1.png".into(),
                next: "song2.png".into()
            }]
        );

        m.handle(Input::SlidePollTick);
        let effects = m.handle(response(&m, SLIDE_SETTINGS_ID, true, settings));
        assert!(emitted(&effects).is_empty());

        m.handle(Input::SlidePollTick);
        let effects = m.handle(response(
            &m,
            SLIDE_SETTINGS_ID,
            true,
            json!({"inputSettings": {"file": "song2.png"}}),
        ));
        assert_eq!(
            emitted(&effects),
            vec![DockEvent::SlideChanged {
                current: "song2.png".into(),
                next: "(none)".into()
            }]
        );
    }

    #[test]
    fn pollers_skip_while_previous_tick_pending() {
        let mut m = machine();
        ready(&mut m);
        assert!(sent(&m.handle(Input::StatsPollTick)).is_empty());

        m.handle(response(
            &m,
            STATS_ID,
            true,
            json!({"cpuUsage": 3.5, "averageFrameRenderTime": 1.2,
                   "renderSkippedFrames": 0, "renderTotalFrames": 10,
                   "outputSkippedFrames": 0, "outputTotalFrames": 10}),
        ));
        assert_eq!(sent_ids(&m.handle(Input::StatsPollTick)), vec![STATS_ID]);
        assert!(m.snapshot().stats.is_some());
    }

    #[test]
    fn snapshot_carries_only_recent_log() {
        let mut m = machine();
        ready(&mut m);
        for step in 0..30 {
            m.handle(Input::StatsPollTick);
            m.handle(response(
                &m,
                STATS_ID,
                true,
                json!({"cpuUsage": 1.0 + step as f64, "averageFrameRenderTime": 1.0,
                       "renderSkippedFrames": 0, "renderTotalFrames": 10,
                       "outputSkippedFrames": 0, "outputTotalFrames": 10}),
            ));
        }

        let snapshot = m.snapshot();
        assert!(snapshot.log_lines >= 30);
        assert_eq!(snapshot.log.len(), SNAPSHOT_LOG_LINES);
        assert!(snapshot.log.last().unwrap().contains("Maximum 30.0%"));
    }

    #[test]
    fn recording_stop_saves_log() {
        let mut m = machine();
        ready(&mut m);
        m.handle(event(
            &m,
            "RecordStateChanged",
            json!({"outputActive": true, "outputState": "OBS_WEBSOCKET_OUTPUT_STARTING"}),
        ));
        let effects = m.handle(event(
            &m,
            "RecordStateChanged",
            json!({"outputActive": false, "outputState": "OBS_WEBSOCKET_OUTPUT_STOPPED"}),
        ));

        let frames = sent(&effects);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["d"]["requestType"], json!("SetInputSettings"));
        assert_eq!(frames[0]["d"]["requestId"], json!(SAVE_LOG_ID));
        let log = frames[0]["d"]["requestData"]["inputSettings"]["saved_log"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        assert!(log.contains("Recording starting"));
        assert!(log.contains("Recording stopped"));
        assert!(emitted(&effects).contains(&DockEvent::OutputStateChanged {
            output: OutputKind::Record,
            active: false,
            state: "OBS_WEBSOCKET_OUTPUT_STOPPED".into(),
        }));
    }

    #[test]
    fn connection_loss_rejects_pending_and_stops_pollers() {
        let mut m = machine();
        ready(&mut m);
        m.handle(Input::Request {
            ticket: 9,
            request: Request::new("GetVersion", "v"),
        });

        let effects = m.handle(Input::SocketClosed {
            generation: m.generation(),
            reason: Some("going away".into()),
        });
        assert!(effects.contains(&Effect::StopPollers));
        assert!(effects.contains(&Effect::CloseSocket));
        assert!(effects.contains(&Effect::ArmReconnect));
        assert!(effects.contains(&Effect::Resolve {
            ticket: 9,
            result: Err(SessionError::Closed)
        }));
        assert_eq!(m.pending_len(), 0);
        assert!(!m.pollers_running());
    }

    #[test]
    fn user_close_never_reconnects() {
        let mut m = machine();
        ready(&mut m);
        let generation = m.generation();

        let effects = m.handle(Input::Close);
        assert!(!effects.contains(&Effect::ArmReconnect));
        assert_eq!(m.state(), SessionState::Disconnected);

        assert!(m
            .handle(Input::SocketClosed {
                generation,
                reason: None
            })
            .is_empty());
        assert!(!m.is_reconnect_armed());
    }

    #[test]
    fn cache_survives_reconnect() {
        let mut m = machine();
        ready(&mut m);
        m.handle(event(&m, "CurrentProgramSceneChanged", json!({"sceneName": "Pulpit"})));
        m.handle(response(
            &m,
            "scene-items:Program:Pulpit",
            true,
            json!({"sceneItems": [{"sourceName": "Camera 1", "inputKind": "dshow_input"}]}),
        ));

        m.handle(Input::SocketError {
            generation: m.generation(),
            error: "reset".into(),
        });
        m.handle(Input::ReconnectTimer);
        m.handle(Input::SocketOpened {
            generation: m.generation(),
        });
        m.handle(text(&m, json!({"op": 0, "d": {"rpcVersion": 1}})));
        m.handle(text(&m, json!({"op": 2, "d": {"negotiatedRpcVersion": 1}})));

        let effects = m.handle(response(
            &m,
            PROGRAM_SCENE_ID,
            true,
            json!({"currentProgramSceneName": "Pulpit"}),
        ));
        assert!(sent(&effects).is_empty());
        assert_eq!(emitted(&effects).len(), 1);
    }
}
