use crate::error::ApiError;
use camera_control::{CameraController, CameraFleet, PresetWorkflow};
use obs_session::Session;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    fleet: CameraFleet,
    presets: PresetWorkflow,
    session: Session,
}

impl AppState {
    pub fn new(fleet: CameraFleet, presets: PresetWorkflow, session: Session) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                fleet,
                presets,
                session,
            }),
        }
    }

    pub fn fleet(&self) -> &CameraFleet {
        &self.inner.fleet
    }

    pub fn camera(&self, index: usize) -> Result<&Arc<CameraController>, ApiError> {
        self.inner
            .fleet
            .get(index)
            .ok_or_else(|| ApiError::not_found(format!("no camera {index}")))
    }

    pub fn presets(&self) -> &PresetWorkflow {
        &self.inner.presets
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }
}
