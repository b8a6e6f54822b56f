use anyhow::{Context, Result};
use camera_control::{ControllerSettings, OpaqueFailurePolicy};
use obs_session::config::parse_list;
use obs_session::SessionConfig;
use std::str::FromStr;
use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Debug, Clone)]
pub struct DockConfig {
    pub bind_addr: SocketAddr,
    pub roster_path: PathBuf,
    pub http_timeout: Duration,
    pub preset_settle: Duration,
    pub controller: ControllerSettings,
    pub session: SessionConfig,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Duration {
    Duration::from_millis(parse_or(lookup, name, default))
}

impl DockConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind = lookup("DOCK_ADDR").unwrap_or_else(|| "127.0.0.1:8095".to_string());
        let bind_addr: SocketAddr = bind.parse().context("invalid DOCK_ADDR")?;

        let roster_path = lookup("CAMERA_ROSTER")
            .map(PathBuf::from)
            .context("CAMERA_ROSTER must name the camera roster file")?;

        let http_timeout = Duration::from_secs(parse_or(&lookup, "CAMERA_HTTP_TIMEOUT_SECS", 10));
        let opaque_failure = if parse_or(&lookup, "CAMERA_ASSUME_DELIVERED", true) {
            OpaqueFailurePolicy::AssumeDelivered
        } else {
            OpaqueFailurePolicy::Fail
        };
        let controller = ControllerSettings {
            jog_repeat: millis(&lookup, "JOG_REPEAT_MS", 250),
            opaque_failure,
            ..ControllerSettings::default()
        };

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            url: lookup("OBS_WEBSOCKET_URL").unwrap_or(defaults.url),
            reconnect_interval: millis(&lookup, "OBS_RECONNECT_INTERVAL_MS", 5000),
            slide_poll_interval: millis(&lookup, "OBS_SLIDE_POLL_MS", 500),
            stats_poll_interval: millis(&lookup, "OBS_STATS_POLL_MS", 4003),
            slide_info_source: lookup("OBS_SLIDE_INFO_SOURCE").unwrap_or(defaults.slide_info_source),
            camera_sources: lookup("OBS_CAMERA_SOURCES")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.camera_sources),
            camera_input_kinds: lookup("OBS_CAMERA_INPUT_KINDS")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.camera_input_kinds),
        };

        Ok(Self {
            bind_addr,
            roster_path,
            http_timeout,
            preset_settle: millis(&lookup, "PRESET_SETTLE_MS", 3000),
            controller,
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = DockConfig::from_lookup(lookup(&[("CAMERA_ROSTER", "/etc/dock/cameras.js")])).unwrap();
        assert_eq!(config.bind_addr.port(), 8095);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.preset_settle, Duration::from_millis(3000));
        assert_eq!(config.controller.jog_repeat, Duration::from_millis(250));
        assert_eq!(config.controller.opaque_failure, OpaqueFailurePolicy::AssumeDelivered);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn overrides_apply() {
        let config = DockConfig::from_lookup(lookup(&[
            ("CAMERA_ROSTER", "cams.js"),
            ("DOCK_ADDR", "0.0.0.0:9000"),
            ("CAMERA_ASSUME_DELIVERED", "false"),
            ("OBS_STATS_POLL_MS", "1000"),
            ("OBS_CAMERA_SOURCES", "Pulpit, Wide"),
            ("PRESET_SETTLE_MS", "not-a-number"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.controller.opaque_failure, OpaqueFailurePolicy::Fail);
        assert_eq!(config.session.stats_poll_interval, Duration::from_millis(1000));
        assert_eq!(config.session.camera_sources, vec!["Pulpit", "Wide"]);
        assert_eq!(config.preset_settle, Duration::from_millis(3000));
    }

    #[test]
    fn roster_is_required() {
        assert!(DockConfig::from_lookup(lookup(&[])).is_err());
        assert!(DockConfig::from_lookup(lookup(&[("CAMERA_ROSTER", "x"), ("DOCK_ADDR", "nope")])).is_err());
    }
}
