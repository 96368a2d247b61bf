//! Process configuration.
//!
//! Loaded from an optional TOML file layered under compiled-in defaults via
//! `figment`, with `XPS_` prefixed environment variable overrides. Validated
//! once at startup; nothing downstream re-checks these values.

use crate::error::{AppResult, XpsError};
use crate::validation::{is_in_range, is_not_empty, is_valid_ip, is_valid_path, is_valid_port};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};

impl Provider for Settings {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("xps-pipeline defaults")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        Serialized::defaults(Settings::default()).data()
    }
}

/// Top-level process configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Logging verbosity passed to `tracing_init` when `RUST_LOG` is unset.
    pub log_level: String,
    /// Detector wire-protocol source.
    pub source: SourceSettings,
    /// WebSocket visualization sink.
    pub websocket: WebSocketSettings,
    /// Archive sink.
    pub archive: ArchiveSettings,
    /// Publisher fan-out queue capacities.
    pub publisher: PublisherSettings,
    /// Processor numerical defaults.
    pub processing: ProcessingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            source: SourceSettings::default(),
            websocket: WebSocketSettings::default(),
            archive: ArchiveSettings::default(),
            publisher: PublisherSettings::default(),
            processing: ProcessingSettings::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SourceSettings {
    /// Detector PUB/SUB address to connect to.
    pub address: String,
    /// Detector PUB/SUB port.
    pub port: u16,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 5555,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebSocketSettings {
    /// Bind address for the visualization endpoint.
    pub bind_address: String,
    /// Bind port.
    pub port: u16,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8765,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Local filesystem root under which per-scan HDF5 archives are written.
    pub root_path: String,
    /// Size of the archive sink's inbound queue (burst absorption).
    pub queue_capacity: usize,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            root_path: "./runs".to_string(),
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PublisherSettings {
    /// Bounded queue capacity per publisher; drop-oldest applies to Results
    /// once exceeded. Start/Stop are never dropped.
    pub capacity: usize,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessingSettings {
    /// IFFT band-pass retention stride divisor.
    pub fft_repeat_factor: usize,
    /// IFFT band-pass retention half-width.
    pub fft_width: usize,
    /// Maximum peaks reported per PeakTable.
    pub peak_count: usize,
    /// Peak model shape.
    pub peak_shape: PeakShape,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            fft_repeat_factor: 25,
            fft_width: 0,
            peak_count: 2,
            peak_shape: PeakShape::Gaussian,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeakShape {
    Gaussian,
    Voigt,
}

impl Settings {
    /// Load settings from an optional TOML file, layered under defaults and
    /// `XPS_`-prefixed environment overrides, then validate.
    pub fn load(config_path: Option<&str>) -> AppResult<Self> {
        let mut figment = Figment::from(Settings::default());
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("XPS_").split("__"));

        let settings: Settings = figment
            .extract()
            .map_err(|e| XpsError::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> AppResult<()> {
        is_not_empty(&self.log_level).map_err(|e| XpsError::Configuration(e.to_string()))?;
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(XpsError::Configuration(format!(
                "log_level must be one of {:?}, got '{}'",
                valid_log_levels, self.log_level
            )));
        }

        is_valid_ip(&self.source.address).map_err(|e| XpsError::Configuration(e.to_string()))?;
        is_valid_port(self.source.port).map_err(|e| XpsError::Configuration(e.to_string()))?;
        is_valid_port(self.websocket.port).map_err(|e| XpsError::Configuration(e.to_string()))?;

        is_in_range(self.processing.fft_repeat_factor, 1..=10_000)
            .map_err(|e| XpsError::Configuration(format!("fft_repeat_factor: {e}")))?;
        is_in_range(self.processing.peak_count, 1..=32)
            .map_err(|e| XpsError::Configuration(format!("peak_count: {e}")))?;
        if self.publisher.capacity == 0 {
            return Err(XpsError::Configuration(
                "publisher.capacity must be > 0".to_string(),
            ));
        }
        if self.archive.queue_capacity == 0 {
            return Err(XpsError::Configuration(
                "archive.queue_capacity must be > 0".to_string(),
            ));
        }
        is_valid_path(&self.archive.root_path)
            .map_err(|e| XpsError::Configuration(format!("archive.root_path: {e}")))?;

        Ok(())
    }
}
