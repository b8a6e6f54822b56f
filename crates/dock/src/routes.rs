use crate::{error::ApiError, state::AppState, websocket};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use camera_control::joystick::JoystickSnapshot;
use camera_control::presets::{export_presets, parse_presets, preset_file_name, JobKind};
use camera_control::{
    AxisGroup, Button, CameraDescriptor, PointerSample, PresetDescriptor, PresetJobView, PtzPosition,
    RawReply, VersionInfo,
};
use obs_session::{SessionSnapshot, SlideAction};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        // Cameras
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras/:index/presets", get(list_presets))
        .route("/api/cameras/:index/presets/:preset/show", post(show_preset))
        .route("/api/cameras/:index/presets/:preset/set", post(set_preset))
        .route("/api/cameras/:index/presets/capture", post(capture_presets))
        .route("/api/cameras/:index/presets/restore", post(restore_presets))
        .route("/api/cameras/:index/presets/cancel", post(cancel_preset_job))
        .route("/api/cameras/:index/presets/job", get(preset_job))
        .route("/api/cameras/:index/presets/export", get(export_captured))
        .route("/api/cameras/:index/buttons/:button/press", post(press_button))
        .route("/api/cameras/:index/buttons/:button/release", post(release_button))
        .route("/api/cameras/:index/joystick/:group", post(joystick))
        .route("/api/cameras/:index/position", get(read_position))
        .route("/api/cameras/:index/version", get(version_info))
        .route("/api/cameras/:index/home", post(home))
        .route("/api/cameras/:index/reset", post(reset))
        .route("/api/cameras/:index/raw", post(send_raw))
        // Production tool session
        .route("/api/session", get(session_snapshot))
        .route("/api/session/stats/reset", post(reset_stats))
        .route("/api/session/scenes", delete(clear_scenes))
        .route("/api/session/scenes/:scene", delete(invalidate_scene))
        .route("/api/slides/:action", post(slide_action))
        // Live updates
        .route("/ws", get(websocket::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics() -> Result<String, ApiError> {
    telemetry::encode_metrics().map_err(|e| ApiError::internal(e.to_string()))
}

#[derive(Debug, Serialize)]
pub struct CameraView {
    #[serde(flatten)]
    pub descriptor: CameraDescriptor,
    pub backend: &'static str,
    pub has_joysticks: bool,
    pub preset_job: Option<PresetJobView>,
}

async fn list_cameras(State(state): State<AppState>) -> Json<Vec<CameraView>> {
    let mut cameras = Vec::with_capacity(state.fleet().len());
    for camera in state.fleet().cameras() {
        let descriptor = camera.descriptor().as_ref().clone();
        cameras.push(CameraView {
            backend: descriptor.backend_kind().as_str(),
            has_joysticks: descriptor.camera_type.has_joysticks(),
            preset_job: state.presets().view(descriptor.index).await,
            descriptor,
        });
    }
    Json(cameras)
}

async fn list_presets(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<Vec<PresetDescriptor>>, ApiError> {
    Ok(Json(state.camera(index)?.presets().to_vec()))
}

async fn show_preset(
    State(state): State<AppState>,
    Path((index, preset)): Path<(usize, u32)>,
) -> Result<StatusCode, ApiError> {
    state.camera(index)?.show_preset(preset).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_preset(
    State(state): State<AppState>,
    Path((index, preset)): Path<(usize, u32)>,
) -> Result<StatusCode, ApiError> {
    state.camera(index)?.set_preset(preset).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStarted {
    pub camera: usize,
    pub kind: JobKind,
}

async fn capture_presets(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<(StatusCode, Json<JobStarted>), ApiError> {
    let camera = state.camera(index)?;
    let handle = state.presets().start_capture(camera).await?;
    info!(camera = index, "preset capture started");
    Ok((
        StatusCode::ACCEPTED,
        Json(JobStarted {
            camera: handle.camera,
            kind: handle.kind,
        }),
    ))
}

/// Body is a preset file as produced by the export endpoint.
async fn restore_presets(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    body: String,
) -> Result<(StatusCode, Json<JobStarted>), ApiError> {
    let camera = state.camera(index)?;
    let presets = parse_presets(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let handle = state.presets().start_restore(camera, presets).await?;
    info!(camera = index, "preset restore started");
    Ok((
        StatusCode::ACCEPTED,
        Json(JobStarted {
            camera: handle.camera,
            kind: handle.kind,
        }),
    ))
}

async fn cancel_preset_job(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<JsonValue>, ApiError> {
    state.camera(index)?;
    let canceled = state.presets().cancel(index).await;
    Ok(Json(json!({ "canceled": canceled })))
}

async fn preset_job(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<PresetJobView>, ApiError> {
    state.camera(index)?;
    state
        .presets()
        .view(index)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no preset job for this camera"))
}

async fn export_captured(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Response, ApiError> {
    let camera = state.camera(index)?;
    let report = match state.presets().view(index).await {
        Some(PresetJobView::Finished(report)) if report.kind == JobKind::Capture => report,
        _ => return Err(ApiError::not_found("no captured presets for this camera")),
    };
    let body = export_presets(&report.presets).map_err(|e| ApiError::internal(e.to_string()))?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        preset_file_name(&camera.descriptor().name)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn press_button(
    State(state): State<AppState>,
    Path((index, button)): Path<(usize, Button)>,
) -> Result<StatusCode, ApiError> {
    state.camera(index)?.press(button).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn release_button(
    State(state): State<AppState>,
    Path((index, button)): Path<(usize, Button)>,
) -> Result<StatusCode, ApiError> {
    state.camera(index)?.release(button).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pointer activity on a joystick surface.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PointerEvent {
    Down(PointerSample),
    Move(PointerSample),
    Up,
}

async fn joystick(
    State(state): State<AppState>,
    Path((index, group)): Path<(usize, AxisGroup)>,
    Json(event): Json<PointerEvent>,
) -> Result<Json<JoystickSnapshot>, ApiError> {
    let stick = state.camera(index)?.joystick(group)?;
    match event {
        PointerEvent::Down(sample) => stick.pointer_down(sample).await,
        PointerEvent::Move(sample) => stick.pointer_move(sample).await,
        PointerEvent::Up => stick.pointer_up().await,
    }
    Ok(Json(stick.snapshot().await))
}

async fn read_position(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<PtzPosition>, ApiError> {
    Ok(Json(state.camera(index)?.read_position().await?))
}

async fn version_info(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<VersionInfo>, ApiError> {
    Ok(Json(state.camera(index)?.version_info().await?))
}

async fn home(State(state): State<AppState>, Path(index): Path<usize>) -> Result<StatusCode, ApiError> {
    state.camera(index)?.home().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset(State(state): State<AppState>, Path(index): Path<usize>) -> Result<StatusCode, ApiError> {
    state.camera(index)?.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RawCommand {
    /// Hex bytes separated by spaces, e.g. `81 09 00 02 FF`.
    pub bytes: String,
    #[serde(default)]
    pub reply_length: usize,
}

async fn send_raw(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(command): Json<RawCommand>,
) -> Result<Json<RawReply>, ApiError> {
    if command.bytes.trim().is_empty() {
        return Err(ApiError::bad_request("bytes required"));
    }
    Ok(Json(
        state
            .camera(index)?
            .send_raw(&command.bytes, command.reply_length)
            .await?,
    ))
}

async fn session_snapshot(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session().snapshot())
}

async fn reset_stats(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.session().reset_stats()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_scenes(State(state): State<AppState>) -> StatusCode {
    state.session().scene_cache().clear();
    StatusCode::NO_CONTENT
}

async fn invalidate_scene(State(state): State<AppState>, Path(scene): Path<String>) -> Json<JsonValue> {
    let invalidated = state.session().scene_cache().invalidate(&scene);
    Json(json!({ "invalidated": invalidated }))
}

async fn slide_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let action = SlideAction::parse(&action)
        .ok_or_else(|| ApiError::bad_request(format!("unknown slide action {action}")))?;
    Ok(Json(state.session().slide_action(action).await?))
}
