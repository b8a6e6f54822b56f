use crate::error::SessionError;
use async_trait::async_trait;
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// What the connection reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketSignal {
    Text(String),
    Closed(Option<String>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// An open text connection, as a pair of channels.
pub struct Connection {
    pub outgoing: mpsc::UnboundedSender<Outbound>,
    pub incoming: mpsc::UnboundedReceiver<SocketSignal>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection, SessionError>;
}

/// Connects over a real websocket.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Connection, SessionError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketSignal>();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match frame {
                    Outbound::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(error = %e, "websocket send failed");
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = sink.close().await;
            debug!("websocket writer finished");
        });

        tokio::spawn(async move {
            let signal = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(SocketSignal::Text(text)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break SocketSignal::Closed(frame.map(|f| f.reason.to_string()));
                    }
                    // Pings are answered by tungstenite; binary frames are not part of the protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SocketSignal::Error(e.to_string()),
                    None => break SocketSignal::Closed(None),
                }
            };
            let _ = in_tx.send(signal);
        });

        Ok(Connection {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

/// In-memory connector for tests: each accepted connection is handed to the
/// test as a [`ServerEnd`].
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// The production-tool side of an in-memory connection.
    pub struct ServerEnd {
        pub url: String,
        pub from_client: mpsc::UnboundedReceiver<Outbound>,
        pub to_client: mpsc::UnboundedSender<SocketSignal>,
    }

    impl ServerEnd {
        pub fn send_json(&self, value: serde_json::Value) {
            let _ = self.to_client.send(SocketSignal::Text(value.to_string()));
        }

        pub fn close(&self) {
            let _ = self.to_client.send(SocketSignal::Closed(Some("server closed".into())));
        }

        /// Next text frame from the client, parsed.
        pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
            loop {
                match self.from_client.recv().await? {
                    Outbound::Text(text) => return serde_json::from_str(&text).ok(),
                    Outbound::Close => return None,
                }
            }
        }
    }

    #[derive(Clone, Default)]
    pub struct MemoryConnector {
        refusals: Arc<Mutex<VecDeque<String>>>,
        attempts: Arc<Mutex<Vec<String>>>,
        accepted: Option<mpsc::UnboundedSender<ServerEnd>>,
    }

    impl MemoryConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Self {
                accepted: Some(tx),
                ..Default::default()
            };
            (connector, rx)
        }

        /// Fail the next connection attempt with the given reason.
        pub async fn refuse_next(&self, reason: impl Into<String>) {
            self.refusals.lock().await.push_back(reason.into());
        }

        pub async fn attempts(&self) -> Vec<String> {
            self.attempts.lock().await.clone()
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, url: &str) -> Result<Connection, SessionError> {
            self.attempts.lock().await.push(url.to_string());
            if let Some(reason) = self.refusals.lock().await.pop_front() {
                return Err(SessionError::Connect(reason));
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let server = ServerEnd {
                url: url.to_string(),
                from_client: out_rx,
                to_client: in_tx,
            };
            match &self.accepted {
                Some(accepted) => accepted
                    .send(server)
                    .map_err(|_| SessionError::Connect("no listener".into()))?,
                None => return Err(SessionError::Connect("no listener".into())),
            }

            Ok(Connection {
                outgoing: out_tx,
                incoming: in_rx,
            })
        }
    }
}
