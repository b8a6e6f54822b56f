//! Async driver around [`SessionMachine`]: owns the socket, the reconnect
//! timer and the pollers, and performs the effects the machine asks for.

use crate::config::SessionConfig;
use crate::connector::{Connection, Connector, Outbound, SocketSignal};
use crate::error::{SessionError, SessionResult};
use crate::events::{DockEvent, SessionSnapshot, SessionState, SlideAction};
use crate::machine::{Effect, Input, SessionMachine, Ticket};
use crate::protocol::Request;
use crate::scene_cache::SceneCameraCache;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use telemetry::metrics::{SESSION_PENDING_REQUESTS, SESSION_RECONNECTS, SESSION_STATE};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

enum Command {
    Input(Input),
    Request {
        request: Request,
        reply: oneshot::Sender<SessionResult<JsonValue>>,
    },
    Connected {
        generation: u64,
        result: SessionResult<Connection>,
    },
    Dispose,
}

/// Handle to the production-tool session. Cloning shares the same driver.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<DockEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    cache: SceneCameraCache,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl Session {
    /// Start the driver task. The session stays disconnected until
    /// [`open`](Self::open).
    pub fn spawn(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cache = SceneCameraCache::new();
        let machine = SessionMachine::new(config.clone(), cache.clone());
        let (snapshot_tx, snapshot) = watch::channel(machine.snapshot());

        let driver = Driver {
            config,
            connector,
            machine,
            commands: commands.clone(),
            rx,
            events: events.clone(),
            snapshot: snapshot_tx,
            connection: None,
            reconnect: None,
            slide_poll: None,
            stats_poll: None,
            replies: HashMap::new(),
            next_ticket: 0,
        };
        let task = tokio::spawn(driver.run());

        Self {
            commands,
            events,
            snapshot,
            cache,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        }
    }

    fn input(&self, input: Input) -> SessionResult<()> {
        self.commands
            .send(Command::Input(input))
            .map_err(|_| SessionError::DriverStopped)
    }

    pub fn open(&self) -> SessionResult<()> {
        self.input(Input::Open)
    }

    /// Disconnect without reconnecting.
    pub fn close(&self) -> SessionResult<()> {
        self.input(Input::Close)
    }

    /// Close and stop the driver task.
    pub async fn dispose(&self) {
        let _ = self.commands.send(Command::Input(Input::Close));
        let _ = self.commands.send(Command::Dispose);
        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "session driver panicked");
            }
        }
    }

    pub fn reset_stats(&self) -> SessionResult<()> {
        self.input(Input::ResetStats)
    }

    /// Send a request with a generated id and wait for its response.
    pub async fn request(&self, request_type: &str, data: Option<JsonValue>) -> SessionResult<JsonValue> {
        let id = format!("{}:{}", request_type, Uuid::new_v4());
        self.request_with_id(request_type, &id, data).await
    }

    pub async fn request_with_id(
        &self,
        request_type: &str,
        request_id: &str,
        data: Option<JsonValue>,
    ) -> SessionResult<JsonValue> {
        let mut request = Request::new(request_type, request_id);
        request.request_data = data;

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Request { request, reply })
            .map_err(|_| SessionError::DriverStopped)?;
        rx.await.map_err(|_| SessionError::DriverStopped)?
    }

    pub async fn trigger_hotkey(&self, name: &str) -> SessionResult<JsonValue> {
        self.request("TriggerHotkeyByName", Some(json!({ "hotkeyName": name })))
            .await
    }

    pub async fn slide_action(&self, action: SlideAction) -> SessionResult<JsonValue> {
        info!(action = ?action, "slide show action");
        self.trigger_hotkey(action.hotkey()).await
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DockEvent> {
        self.events.subscribe()
    }

    pub fn scene_cache(&self) -> &SceneCameraCache {
        &self.cache
    }
}

struct ActiveConnection {
    generation: u64,
    connection: Connection,
}

struct Driver {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    machine: SessionMachine,
    commands: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<DockEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    connection: Option<ActiveConnection>,
    reconnect: Option<Pin<Box<Sleep>>>,
    slide_poll: Option<Interval>,
    stats_poll: Option<Interval>,
    replies: HashMap<Ticket, oneshot::Sender<SessionResult<JsonValue>>>,
    next_ticket: Ticket,
}

async fn next_signal(connection: &mut Option<ActiveConnection>) -> (u64, SocketSignal) {
    match connection {
        Some(active) => {
            let signal = active
                .connection
                .incoming
                .recv()
                .await
                .unwrap_or(SocketSignal::Closed(None));
            (active.generation, signal)
        }
        None => std::future::pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn poller(period: std::time::Duration) -> Interval {
    // The first tick is issued by the machine on Ready.
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Driver {
    async fn run(mut self) {
        info!(url = %self.config.url, "session driver started");
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    None | Some(Command::Dispose) => break,
                    Some(Command::Input(input)) => self.feed(input),
                    Some(Command::Request { request, reply }) => {
                        let ticket = self.next_ticket;
                        self.next_ticket += 1;
                        self.replies.insert(ticket, reply);
                        self.feed(Input::Request { ticket, request });
                    }
                    Some(Command::Connected { generation, result }) => self.connected(generation, result),
                },
                (generation, signal) = next_signal(&mut self.connection) => {
                    let input = match signal {
                        SocketSignal::Text(text) => Input::SocketText { generation, text },
                        SocketSignal::Closed(reason) => Input::SocketClosed { generation, reason },
                        SocketSignal::Error(error) => Input::SocketError { generation, error },
                    };
                    self.feed(input);
                }
                _ = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.feed(Input::ReconnectTimer);
                }
                _ = tick(&mut self.slide_poll) => self.feed(Input::SlidePollTick),
                _ = tick(&mut self.stats_poll) => self.feed(Input::StatsPollTick),
            }
        }

        if let Some(active) = self.connection.take() {
            let _ = active.connection.outgoing.send(Outbound::Close);
        }
        for (_, reply) in self.replies.drain() {
            let _ = reply.send(Err(SessionError::DriverStopped));
        }
        info!("session driver stopped");
    }

    fn connected(&mut self, generation: u64, result: SessionResult<Connection>) {
        if generation != self.machine.generation() {
            debug!(generation, "dropping connection for a stale attempt");
            if let Ok(connection) = result {
                let _ = connection.outgoing.send(Outbound::Close);
            }
            return;
        }
        match result {
            Ok(connection) => {
                self.connection = Some(ActiveConnection {
                    generation,
                    connection,
                });
                self.feed(Input::SocketOpened { generation });
            }
            Err(e) => self.feed(Input::SocketError {
                generation,
                error: e.to_string(),
            }),
        }
    }

    fn feed(&mut self, input: Input) {
        let effects = self.machine.handle(input);
        for effect in effects {
            self.apply(effect);
        }
        SESSION_PENDING_REQUESTS.set(self.machine.pending_len() as i64);
        self.snapshot.send_replace(self.machine.snapshot());
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Connect {
                generation,
                reconnect,
            } => {
                if reconnect {
                    SESSION_RECONNECTS.inc();
                }
                let connector = self.connector.clone();
                let url = self.config.url.clone();
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    let result = connector.connect(&url).await;
                    let _ = commands.send(Command::Connected { generation, result });
                });
            }
            Effect::Send(text) => match &self.connection {
                Some(active) => {
                    if active.connection.outgoing.send(Outbound::Text(text)).is_err() {
                        warn!("connection writer gone, frame dropped");
                    }
                }
                None => warn!("no open connection, frame dropped"),
            },
            Effect::CloseSocket => {
                if let Some(active) = self.connection.take() {
                    let _ = active.connection.outgoing.send(Outbound::Close);
                }
            }
            Effect::ArmReconnect => {
                self.reconnect = Some(Box::pin(time::sleep(self.config.reconnect_interval)));
            }
            Effect::DisarmReconnect => self.reconnect = None,
            Effect::StartPollers => {
                self.slide_poll = Some(poller(self.config.slide_poll_interval));
                self.stats_poll = Some(poller(self.config.stats_poll_interval));
            }
            Effect::StopPollers => {
                self.slide_poll = None;
                self.stats_poll = None;
            }
            Effect::Resolve { ticket, result } => {
                if let Some(reply) = self.replies.remove(&ticket) {
                    let _ = reply.send(result);
                }
            }
            Effect::Emit(event) => {
                if let DockEvent::SessionState { state } = &event {
                    SESSION_STATE.set(state.as_gauge());
                    info!(state = %state, "session state changed");
                }
                // No subscribers is fine.
                let _ = self.events.send(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::MemoryConnector;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_before_ready_fails_fast() {
        let (connector, _servers) = MemoryConnector::new();
        let session = Session::spawn(SessionConfig::default(), Arc::new(connector));
        assert_eq!(
            session.request("GetVersion", None).await,
            Err(SessionError::NotReady)
        );
        session.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_retries_after_interval() {
        let (connector, mut servers) = MemoryConnector::new();
        connector.refuse_next("refused").await;
        let config = SessionConfig::default();
        let interval = config.reconnect_interval;
        let session = Session::spawn(config, Arc::new(connector.clone()));

        session.open().unwrap();
        settle().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(connector.attempts().await.len(), 1);

        time::sleep(interval - Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(connector.attempts().await.len(), 1);

        time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(connector.attempts().await.len(), 2);
        assert!(servers.recv().await.is_some());
        settle().await;
        assert_eq!(session.state(), SessionState::AwaitingHello);
        session.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_driver() {
        let (connector, _servers) = MemoryConnector::new();
        let session = Session::spawn(SessionConfig::default(), Arc::new(connector));
        session.dispose().await;
        assert_eq!(session.open(), Err(SessionError::DriverStopped));
    }
}
