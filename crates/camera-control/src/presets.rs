//! Bulk capture and restore of camera presets.
//!
//! A capture walks the camera through presets `0..=max_preset`, reading back
//! the position of each. A restore drives the camera to each saved position
//! and stores it under its preset number again. Both wait for the head to
//! settle between the move and the follow-up command.

use crate::controller::CameraController;
use crate::error::{CameraError, CameraResult};
use crate::status::StatusReporter;
use crate::types::{BackendKind, CapturedPreset};
use crate::backend::CameraBackend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::PRESET_JOBS;
use tokio::sync::{oneshot, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Capture,
    Restore,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Restore => "restore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Canceled,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of one finished job. For a capture `presets` holds what was read
/// back; for a restore it holds the entries that were stored.
#[derive(Debug, Clone, Serialize)]
pub struct PresetJobReport {
    pub camera: usize,
    pub kind: JobKind,
    pub status: JobStatus,
    pub presets: Vec<CapturedPreset>,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What the panel shows for a camera's preset job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PresetJobView {
    Running {
        kind: JobKind,
        started_at: DateTime<Utc>,
    },
    Finished(PresetJobReport),
}

#[derive(Debug)]
pub struct PresetJobHandle {
    pub camera: usize,
    pub kind: JobKind,
    cancellation_token: CancellationToken,
    done: oneshot::Receiver<PresetJobReport>,
}

impl PresetJobHandle {
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Wait for the job's single report.
    pub async fn wait(self) -> CameraResult<PresetJobReport> {
        self.done
            .await
            .map_err(|_| CameraError::sequence("preset job ended without a report"))
    }
}

struct ActiveJob {
    kind: JobKind,
    started_at: DateTime<Utc>,
    cancellation_token: CancellationToken,
}

/// Runs at most one preset job per camera.
#[derive(Clone)]
pub struct PresetWorkflow {
    settle: Duration,
    active_jobs: Arc<RwLock<HashMap<usize, ActiveJob>>>,
    last_reports: Arc<RwLock<HashMap<usize, PresetJobReport>>>,
}

impl PresetWorkflow {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            active_jobs: Arc::new(RwLock::new(HashMap::new())),
            last_reports: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn start_capture(&self, controller: &CameraController) -> CameraResult<PresetJobHandle> {
        if controller.backend().kind() != BackendKind::Visca {
            return Err(CameraError::sequence(format!(
                "{} cannot read back positions",
                controller.descriptor().name
            )));
        }
        self.launch(controller, JobKind::Capture, Vec::new()).await
    }

    pub async fn start_restore(
        &self,
        controller: &CameraController,
        presets: Vec<CapturedPreset>,
    ) -> CameraResult<PresetJobHandle> {
        if controller.backend().kind() != BackendKind::Visca {
            return Err(CameraError::sequence(format!(
                "{} cannot move to saved positions",
                controller.descriptor().name
            )));
        }
        if presets.is_empty() {
            return Err(CameraError::sequence("No presets to load"));
        }
        self.launch(controller, JobKind::Restore, presets).await
    }

    /// Cancel the running job for `camera`. Returns false when none is active.
    pub async fn cancel(&self, camera: usize) -> bool {
        let active = self.active_jobs.read().await;
        match active.get(&camera) {
            Some(job) => {
                job.cancellation_token.cancel();
                info!(camera, kind = job.kind.as_str(), "preset job cancel requested");
                true
            }
            None => false,
        }
    }

    pub async fn is_active(&self, camera: usize) -> bool {
        self.active_jobs.read().await.contains_key(&camera)
    }

    pub async fn view(&self, camera: usize) -> Option<PresetJobView> {
        if let Some(job) = self.active_jobs.read().await.get(&camera) {
            return Some(PresetJobView::Running {
                kind: job.kind,
                started_at: job.started_at,
            });
        }
        self.last_reports
            .read()
            .await
            .get(&camera)
            .cloned()
            .map(PresetJobView::Finished)
    }

    async fn launch(
        &self,
        controller: &CameraController,
        kind: JobKind,
        presets: Vec<CapturedPreset>,
    ) -> CameraResult<PresetJobHandle> {
        let camera = controller.descriptor().index;
        let cancellation_token = CancellationToken::new();
        let started_at = Utc::now();

        {
            let mut active = self.active_jobs.write().await;
            if active.contains_key(&camera) {
                return Err(CameraError::sequence(format!(
                    "A preset job is already running for {}",
                    controller.descriptor().name
                )));
            }
            active.insert(
                camera,
                ActiveJob {
                    kind,
                    started_at,
                    cancellation_token: cancellation_token.clone(),
                },
            );
        }

        let (tx, rx) = oneshot::channel();
        let workflow = self.clone();
        let backend = controller.backend().clone();
        let status = controller.status().clone();
        let token = cancellation_token.clone();

        tokio::spawn(async move {
            info!(camera, kind = kind.as_str(), "preset job started");
            let (job_status, presets, summary) = match kind {
                JobKind::Capture => capture(&backend, &status, workflow.settle, &token).await,
                JobKind::Restore => restore(&backend, &status, workflow.settle, &token, presets).await,
            };

            let report = PresetJobReport {
                camera,
                kind,
                status: job_status,
                presets,
                summary,
                started_at,
                finished_at: Utc::now(),
            };

            workflow.active_jobs.write().await.remove(&camera);
            workflow
                .last_reports
                .write()
                .await
                .insert(camera, report.clone());

            PRESET_JOBS
                .with_label_values(&[kind.as_str(), job_status.as_str()])
                .inc();
            info!(
                camera,
                kind = kind.as_str(),
                status = job_status.as_str(),
                presets = report.presets.len(),
                "preset job finished"
            );

            status.show(report.summary.clone(), None);
            if tx.send(report).is_err() {
                debug!(camera, "preset job report had no listener");
            }
        });

        Ok(PresetJobHandle {
            camera,
            kind,
            cancellation_token,
            done: rx,
        })
    }
}

/// Sleep for the settle time; false if canceled first.
async fn settle(period: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(period) => true,
    }
}

async fn capture(
    backend: &Arc<dyn CameraBackend>,
    status: &StatusReporter,
    period: Duration,
    token: &CancellationToken,
) -> (JobStatus, Vec<CapturedPreset>, String) {
    const CANCELED: &str = "Canceled saving presets";
    const FINISHED: &str = "Finished saving presets";

    let max_preset = backend.descriptor().max_preset;
    let mut captured = Vec::new();
    let mut preset = 0;

    loop {
        if token.is_cancelled() {
            return (JobStatus::Canceled, captured, CANCELED.into());
        }

        status.show(format!("Saving preset {preset}"), None);
        if let Err(e) = backend.show_preset(preset).await {
            if preset == 0 && max_preset > 0 {
                // Not every camera has a preset 0.
                debug!(error = %e, "preset 0 rejected, starting at 1");
                preset = 1;
                continue;
            }
            // The end of the camera's preset range looks like any other error.
            info!(preset, error = %e, "stopping capture");
            return (JobStatus::Completed, captured, FINISHED.into());
        }

        if !settle(period, token).await {
            return (JobStatus::Canceled, captured, CANCELED.into());
        }

        match backend.read_position().await {
            Ok(position) => captured.push(CapturedPreset {
                preset,
                pan: position.pan,
                tilt: position.tilt,
                zoom: position.zoom,
            }),
            Err(e) => {
                warn!(preset, error = %e, "capture readback failed");
                return (JobStatus::Failed, captured, format!("Failed read position: {e}"));
            }
        }

        if preset >= max_preset {
            return (JobStatus::Completed, captured, FINISHED.into());
        }
        preset += 1;
    }
}

async fn restore(
    backend: &Arc<dyn CameraBackend>,
    status: &StatusReporter,
    period: Duration,
    token: &CancellationToken,
    presets: Vec<CapturedPreset>,
) -> (JobStatus, Vec<CapturedPreset>, String) {
    const CANCELED: &str = "Canceled loading presets";

    let mut stored = Vec::with_capacity(presets.len());
    for entry in presets {
        if token.is_cancelled() {
            return (JobStatus::Canceled, stored, CANCELED.into());
        }

        status.show(format!("Loading preset {}", entry.preset), None);
        if let Err(e) = backend.move_to(entry.position(), None).await {
            return (JobStatus::Failed, stored, format!("Failed move: {e}"));
        }

        if !settle(period, token).await || token.is_cancelled() {
            return (JobStatus::Canceled, stored, CANCELED.into());
        }

        if let Err(e) = backend.set_preset(entry.preset).await {
            return (JobStatus::Failed, stored, format!("Failed set preset: {e}"));
        }
        stored.push(entry);
    }

    (JobStatus::Completed, stored, "Finished loading presets".into())
}

/// Render presets the way the panel downloads them: a JSON list indented by
/// four spaces.
pub fn export_presets(presets: &[CapturedPreset]) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    presets.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn parse_presets(text: &str) -> CameraResult<Vec<CapturedPreset>> {
    serde_json::from_str(text).map_err(|e| CameraError::sequence(format!("Invalid preset file: {e}")))
}

pub fn preset_file_name(camera_name: &str) -> String {
    format!("{camera_name}_camera_presets.json")
}
