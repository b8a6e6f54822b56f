use serde_json::Value as JsonValue;
use thiserror::Error;

/// Failure of a single camera command.
#[derive(Debug, Clone, Error)]
pub enum CameraError {
    /// Network or HTTP-level failure.
    #[error("{status_text}")]
    Transport { status_text: String },

    /// The VISCA bridge answered without a `status` field, or not with JSON.
    #[error("Invalid response from server")]
    InvalidResponse,

    /// Structured failure reported by the camera backend.
    #[error("{}", render_backend_errors(.errors))]
    Backend { errors: JsonValue },

    /// A workflow precondition was violated.
    #[error("{0}")]
    Sequence(String),

    /// The backend kind has no way to perform the operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

impl CameraError {
    pub fn transport(status_text: impl Into<String>) -> Self {
        Self::Transport {
            status_text: status_text.into(),
        }
    }

    pub fn sequence(message: impl Into<String>) -> Self {
        Self::Sequence(message.into())
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::InvalidResponse => "invalid_response",
            Self::Backend { .. } => "backend",
            Self::Sequence(_) => "sequence",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

fn render_backend_errors(errors: &JsonValue) -> String {
    match errors {
        JsonValue::String(text) => text.clone(),
        JsonValue::Null => "backend reported an error".to_string(),
        other => other.to_string(),
    }
}

pub type CameraResult<T> = std::result::Result<T, CameraError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backend_errors_render_readably() {
        let err = CameraError::Backend {
            errors: json!("preset out of range"),
        };
        assert_eq!(err.to_string(), "preset out of range");

        let err = CameraError::Backend {
            errors: json!(["timeout", "nak"]),
        };
        assert_eq!(err.to_string(), r#"["timeout","nak"]"#);
    }

    #[test]
    fn unsupported_names_the_backend() {
        let err = CameraError::Unsupported {
            backend: "http-action",
            operation: "jog",
        };
        assert_eq!(err.to_string(), "jog is not supported by the http-action backend");
        assert_eq!(err.kind(), "unsupported");
    }
}
