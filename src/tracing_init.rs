//! Structured, async-aware logging infrastructure.
//!
//! Uses `tracing` + `tracing-subscriber` to provide spans (one per scan,
//! carrying `scan_id`), multiple output formats, and `RUST_LOG`-based
//! filtering with a fallback to the configured `log_level`.
//!
//! # Example
//! ```no_run
//! use xps_pipeline::settings::Settings;
//! use xps_pipeline::tracing_init;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(None)?;
//! tracing_init::init_from_settings(&settings)?;
//! # Ok(())
//! # }
//! ```

use crate::settings::Settings;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for tracing.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Pretty-printed, colored; for interactive development.
    Pretty,
    /// Compact, uncolored; for production logs.
    Compact,
    /// JSON, for log aggregation.
    Json,
}

/// Tracing configuration options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    pub with_span_events: bool,
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }
}

/// Initialize tracing from process `Settings`. Recommended entry point for
/// the `xps-pipeline` binary.
pub fn init_from_settings(settings: &Settings) -> Result<(), String> {
    let level = parse_log_level(&settings.log_level)?;
    init(TracingConfig::new(level))
}

/// Initialize tracing with a fully custom configuration. Idempotent: a
/// second call after a subscriber is already installed returns `Ok(())`
/// rather than erroring, so tests can call it freely.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let install = |result: Result<(), tracing_subscriber::util::TryInitError>| {
        result.or_else(|e| {
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(format!("failed to initialize tracing: {e}"))
            }
        })
    };

    match config.format {
        OutputFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            install(tracing_subscriber::registry().with(layer).try_init())?;
        }
        OutputFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_ansi(false)
                .with_filter(env_filter);
            install(tracing_subscriber::registry().with(layer).try_init())?;
        }
        OutputFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_filter(env_filter);
            install(tracing_subscriber::registry().with(layer).try_init())?;
        }
    }

    Ok(())
}

fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}

fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_span_events(false);
        assert!(matches!(config.level, Level::WARN));
        assert!(matches!(config.format, OutputFormat::Json));
        assert!(!config.with_span_events);
    }
}
