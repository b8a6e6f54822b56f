#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Camera Metrics ====
    pub static ref CAMERA_COMMANDS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "dock_camera_commands_total",
                "Total number of commands sent to camera backends",
            ),
            &["backend", "command", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref JOYSTICK_SENDS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "dock_joystick_sends_total",
                "Total number of joystick velocity commands sent",
            ),
            &["group"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PRESET_JOBS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "dock_preset_jobs_total",
                "Total number of finished preset capture/restore jobs",
            ),
            &["kind", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Session Metrics ====
    pub static ref SESSION_STATE: IntGauge = {
        let metric = IntGauge::new(
            "dock_session_state",
            "Current session state (0=disconnected, 1=connecting, 2=awaiting hello, 3=awaiting identify ack, 4=ready)",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref SESSION_RECONNECTS: IntCounter = {
        let metric = IntCounter::new(
            "dock_session_reconnects_total",
            "Total number of reconnect attempts to the production tool",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref SESSION_PENDING_REQUESTS: IntGauge = {
        let metric = IntGauge::new(
            "dock_session_pending_requests",
            "Number of requests awaiting a response",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref SESSION_EVENTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "dock_session_events_total",
                "Total number of events received from the production tool",
            ),
            &["event"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_metrics_accessible() {
        CAMERA_COMMANDS
            .with_label_values(&["visca", "go-preset", "ok"])
            .inc();
        assert!(
            CAMERA_COMMANDS
                .with_label_values(&["visca", "go-preset", "ok"])
                .get()
                >= 1
        );

        JOYSTICK_SENDS.with_label_values(&["zoom"]).inc();
        assert!(JOYSTICK_SENDS.with_label_values(&["zoom"]).get() >= 1);
    }

    #[test]
    fn test_session_metrics_accessible() {
        SESSION_PENDING_REQUESTS.set(3);
        assert_eq!(SESSION_PENDING_REQUESTS.get(), 3);

        SESSION_EVENTS
            .with_label_values(&["CurrentProgramSceneChanged"])
            .inc();
        assert!(
            SESSION_EVENTS
                .with_label_values(&["CurrentProgramSceneChanged"])
                .get()
                >= 1
        );
    }

    #[test]
    fn test_encode_metrics_succeeds() {
        PRESET_JOBS.with_label_values(&["capture", "completed"]).inc();
        let encoded = encode_metrics().expect("metrics should encode");
        assert!(encoded.contains("dock_preset_jobs_total"));
    }
}
