use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use camera_control::StatusUpdate;
use futures::{sink::SinkExt, stream::StreamExt};
use obs_session::{DockEvent, SessionSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Ping,
    Pong,
    /// Sent once on connect.
    Snapshot { session: serde_json::Value },
    Session { event: serde_json::Value },
    CameraStatus { update: serde_json::Value },
}

impl WsMessage {
    fn snapshot(snapshot: &SessionSnapshot) -> Self {
        Self::Snapshot {
            session: serde_json::to_value(snapshot).unwrap_or_default(),
        }
    }

    fn session(event: &DockEvent) -> Self {
        Self::Session {
            event: serde_json::to_value(event).unwrap_or_default(),
        }
    }

    fn camera_status(update: &StatusUpdate) -> Self {
        Self::CameraStatus {
            update: serde_json::to_value(update).unwrap_or_default(),
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.session().subscribe();
    let mut statuses = state.fleet().subscribe_status();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WsMessage>();

    let first = WsMessage::snapshot(&state.session().snapshot());

    let send_task = tokio::spawn(async move {
        let mut next = Some(first);
        loop {
            if let Some(msg) = next.take() {
                let Ok(json) = serde_json::to_string(&msg) else {
                    continue;
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }

            next = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => Some(WsMessage::session(&event)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket client lagging behind session events");
                        None
                    }
                    Err(RecvError::Closed) => break,
                },
                update = statuses.recv() => match update {
                    Ok(update) => Some(WsMessage::camera_status(&update)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket client lagging behind camera status");
                        None
                    }
                    Err(RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => Some(reply),
                    None => break,
                },
            };
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Ping) => {
                        if reply_tx.send(WsMessage::Pong).is_err() {
                            break;
                        }
                    }
                    Ok(other) => debug!(message = ?other, "ignoring client message"),
                    Err(e) => debug!(error = %e, "unreadable client message"),
                },
                Message::Close(_) => {
                    info!("websocket client closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
    debug!("websocket connection finished");
}
