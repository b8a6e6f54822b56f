use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use camera_control::CameraError;
use obs_session::SessionError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{message} ({status})")]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CameraError> for ApiError {
    fn from(err: CameraError) -> Self {
        let status = match &err {
            CameraError::Sequence(_) => StatusCode::CONFLICT,
            CameraError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
            CameraError::Transport { .. } | CameraError::Backend { .. } | CameraError::InvalidResponse => {
                StatusCode::BAD_GATEWAY
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::NotReady
            | SessionError::Closed
            | SessionError::Connect(_)
            | SessionError::DriverStopped => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::DuplicateRequestId(_) => StatusCode::CONFLICT,
            SessionError::RequestFailed { .. } | SessionError::Protocol(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(value.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_errors_map_to_status() {
        assert_eq!(
            ApiError::from(CameraError::sequence("busy")).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(CameraError::Unsupported {
                backend: "http_action",
                operation: "jog"
            })
            .status(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            ApiError::from(CameraError::transport("Network error")).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn session_errors_map_to_status() {
        assert_eq!(
            ApiError::from(SessionError::NotReady).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(SessionError::RequestFailed {
                code: 600,
                comment: None
            })
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
