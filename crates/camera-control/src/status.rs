use crate::types::StatusUpdate;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// How long a transient status line stays up before reverting.
pub const DEFAULT_STATUS_HOLD: Duration = Duration::from_millis(5000);

/// Publishes status lines for one camera onto the dock-wide channel.
#[derive(Clone)]
pub struct StatusReporter {
    camera: usize,
    tx: broadcast::Sender<StatusUpdate>,
}

impl StatusReporter {
    pub fn new(camera: usize, tx: broadcast::Sender<StatusUpdate>) -> Self {
        Self { camera, tx }
    }

    pub fn show(&self, text: impl Into<String>, hold: Option<Duration>) {
        let update = StatusUpdate {
            camera: self.camera,
            text: text.into(),
            hold,
            at: Utc::now(),
        };
        debug!(camera = self.camera, text = %update.text, "status update");
        // No subscribers is fine; nobody is looking at the panel.
        let _ = self.tx.send(update);
    }

    /// Transient message, reverts after [`DEFAULT_STATUS_HOLD`].
    pub fn flash(&self, text: impl Into<String>) {
        self.show(text, Some(DEFAULT_STATUS_HOLD));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }
}
