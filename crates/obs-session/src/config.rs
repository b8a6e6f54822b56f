use std::time::Duration;

pub const DEFAULT_OBS_URL: &str = "ws://127.0.0.1:4455";
pub const DEFAULT_SLIDE_INFO_SOURCE: &str = "SimpleSlides: music";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub url: String,
    pub reconnect_interval: Duration,
    pub slide_poll_interval: Duration,
    pub stats_poll_interval: Duration,
    /// Source whose settings carry the slide-show state and the saved log.
    pub slide_info_source: String,
    /// Camera sources shown as tally lights, in display order.
    pub camera_sources: Vec<String>,
    /// Input kinds that count as cameras when scanning a scene.
    pub camera_input_kinds: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OBS_URL.to_string(),
            reconnect_interval: Duration::from_millis(5000),
            slide_poll_interval: Duration::from_millis(500),
            stats_poll_interval: Duration::from_millis(4003),
            slide_info_source: DEFAULT_SLIDE_INFO_SOURCE.to_string(),
            camera_sources: vec!["Camera 1".to_string(), "Camera 2".to_string()],
            camera_input_kinds: vec!["dshow_input".to_string()],
        }
    }
}

impl SessionConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn is_camera_kind(&self, kind: Option<&str>) -> bool {
        kind.map(|k| self.camera_input_kinds.iter().any(|c| c == k))
            .unwrap_or(false)
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lists() {
        assert_eq!(parse_list("Camera 1, Camera 2,,"), vec!["Camera 1", "Camera 2"]);
        assert!(parse_list(" ").is_empty());
    }

    #[test]
    fn camera_kind_matching() {
        let config = SessionConfig::default();
        assert!(config.is_camera_kind(Some("dshow_input")));
        assert!(!config.is_camera_kind(Some("image_source")));
        assert!(!config.is_camera_kind(None));
    }
}
