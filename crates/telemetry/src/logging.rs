use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// Compact text format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl LogFormat {
    /// Parse log format from the `LOG_FORMAT` environment variable
    pub fn from_env() -> Self {
        Self::parse(&env::var("LOG_FORMAT").unwrap_or_default())
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => Self::default(),
        }
    }
}

/// Configuration for structured logging
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log output format (pretty/compact/json)
    pub format: LogFormat,
    pub service_name: String,
    pub service_version: String,
    /// Enable span events (enter/exit/close)
    pub enable_span_events: bool,
    /// Log to a daily rolling file in addition to stdout
    pub log_to_file: bool,
    pub log_dir: Option<String>,
}

impl LogConfig {
    /// Create a log configuration from the environment
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            format: LogFormat::from_env(),
            service_name: service_name.into(),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            enable_span_events: env::var("LOG_SPAN_EVENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_to_file: env::var("LOG_TO_FILE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_dir: env::var("LOG_DIR").ok(),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_span_events(mut self, enable: bool) -> Self {
        self.enable_span_events = enable;
        self
    }

    pub fn with_file_logging(mut self, log_dir: impl Into<String>) -> Self {
        self.log_to_file = true;
        self.log_dir = Some(log_dir.into());
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.enable_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// Rolling file name, one per service.
    fn file_name(&self) -> String {
        format!("{}.log", self.service_name)
    }
}

fn env_filter() -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    for directive in ["hyper=warn", "tokio=warn", "tungstenite=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize structured logging with the given configuration.
///
/// When file logging is enabled the returned guard must be held for the
/// lifetime of the process; dropping it flushes and stops the file writer.
pub fn init_structured_logging(config: LogConfig) -> Option<WorkerGuard> {
    let registry = tracing_subscriber::registry().with(env_filter());

    let (file_layer, guard) = match (config.log_to_file, config.log_dir.as_deref()) {
        (true, Some(log_dir)) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, config.file_name());
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .json()
                .with_span_events(config.span_events())
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };
    let registry = registry.with(file_layer);

    match config.format {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(config.span_events())
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_writer(io::stdout);
            registry.with(json_layer).init();
        }
        LogFormat::Compact => {
            let compact_layer = fmt::layer()
                .compact()
                .with_span_events(config.span_events())
                .with_target(true)
                .with_thread_ids(false);
            registry.with(compact_layer).init();
        }
        LogFormat::Pretty => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_span_events(config.span_events())
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true);
            registry.with(pretty_layer).init();
        }
    }

    tracing::info!(
        service.name = %config.service_name,
        service.version = %config.service_version,
        format = ?config.format,
        log_to_file = guard.is_some(),
        "structured logging initialized"
    );

    guard
}

/// Initialize logging for a named service from the environment
pub fn init_with_service(service_name: impl Into<String>) -> Option<WorkerGuard> {
    init_structured_logging(LogConfig::new(service_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("bogus"), LogFormat::Pretty);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("booth-dock")
            .with_version("1.0.0")
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_file_logging("/tmp/dock-logs");

        assert_eq!(config.service_name, "booth-dock");
        assert_eq!(config.service_version, "1.0.0");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.enable_span_events);
        assert!(config.log_to_file);
        assert_eq!(config.log_dir.as_deref(), Some("/tmp/dock-logs"));
        assert_eq!(config.file_name(), "booth-dock.log");
    }
}
