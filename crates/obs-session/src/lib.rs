//! Session with the production tool's websocket: handshake, request
//! correlation, event routing, reconnects, tally, slides and statistics.

pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod machine;
pub mod protocol;
pub mod scene_cache;
pub mod session;
pub mod stats;

pub use config::SessionConfig;
pub use connector::{Connection, Connector, WebSocketConnector};
pub use error::{ProtocolError, SessionError, SessionResult};
pub use events::{DockEvent, SessionSnapshot, SessionState, SlideAction, TallyTarget};
pub use machine::{Effect, Input, SessionMachine};
pub use scene_cache::SceneCameraCache;
pub use session::Session;
pub use stats::{OutputKind, StatsSnapshot};
