//! Configuration file management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bodyscale_core::{EngineConfig, GateConfig, ReconnectOptions, StabilityConfig};
use serde::{Deserialize, Serialize};

/// Configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Discovery settings.
    pub scan: ScanConfig,
    /// Link settings.
    pub connection: ConnectionConfig,
    /// Automatic reconnection.
    pub reconnect: ReconnectConfig,
    /// Measurement acceptance.
    pub measurement: MeasurementConfig,
    /// Where the remembered scale is stored.
    pub registry: RegistryConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if there is no file.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_or_default(default_config_path())
    }

    /// Load configuration from `path` if it exists, otherwise defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save configuration to a file, creating its directory if needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self.to_toml()?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// ```
    /// use bodyscale_cli::config::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.scan.validate());
        errors.extend(self.connection.validate());
        errors.extend(self.reconnect.validate());
        errors.extend(self.measurement.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from `path`, or from the default path.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::load_default()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build the engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::new()
            .scan_timeout(Duration::from_secs(self.scan.timeout_secs))
            .connect_timeout(Duration::from_secs(self.connection.connect_timeout_secs))
            .subscribe_timeout(Duration::from_secs(self.connection.subscribe_timeout_secs))
            .reconnect(
                ReconnectOptions::new()
                    .max_attempts(self.reconnect.max_attempts)
                    .delay(Duration::from_millis(self.reconnect.delay_ms)),
            )
            .gate(
                GateConfig::default()
                    .weight_range(self.measurement.min_weight_kg, self.measurement.max_weight_kg)
                    .debounce(Duration::from_millis(self.measurement.debounce_ms)),
            )
            .stability(
                StabilityConfig::default()
                    .tolerance_kg(self.measurement.stability_tolerance_kg)
                    .required_count(self.measurement.stability_count),
            );
        if !self.scan.scales_only {
            engine = engine.all_devices();
        }
        engine
    }

    /// The registry file path for a configuration loaded from `config_path`.
    ///
    /// Without an explicit `[registry] path` this is `registry.toml` next to
    /// the configuration file.
    pub fn registry_path(&self, config_path: &Path) -> PathBuf {
        self.registry
            .path
            .clone()
            .unwrap_or_else(|| config_path.with_file_name(REGISTRY_FILE_NAME))
    }
}

/// Discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long a scan runs before giving up.
    pub timeout_secs: u64,
    /// Only report devices whose name looks like a scale.
    pub scales_only: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            timeout_secs: engine.scan_timeout.as_secs(),
            scales_only: engine.scales_only,
        }
    }
}

impl ScanConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.timeout_secs == 0 {
            errors.push(ValidationError::new("scan.timeout_secs", "must be > 0"));
        }
        errors
    }
}

/// Link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connect timeout.
    pub connect_timeout_secs: u64,
    /// Timeout for enabling notifications.
    pub subscribe_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            connect_timeout_secs: engine.connect_timeout.as_secs(),
            subscribe_timeout_secs: engine.subscribe_timeout.as_secs(),
        }
    }
}

impl ConnectionConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.connect_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "connection.connect_timeout_secs",
                "must be > 0",
            ));
        }
        if self.subscribe_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "connection.subscribe_timeout_secs",
                "must be > 0",
            ));
        }
        errors
    }
}

/// Automatic reconnection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts per disconnect before giving up.
    pub max_attempts: u32,
    /// Delay before each attempt, in milliseconds.
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let options = ReconnectOptions::default();
        Self {
            max_attempts: options.max_attempts,
            delay_ms: options.delay.as_millis() as u64,
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.max_attempts == 0 {
            errors.push(ValidationError::new("reconnect.max_attempts", "must be > 0"));
        }
        if self.delay_ms == 0 {
            errors.push(ValidationError::new("reconnect.delay_ms", "must be > 0"));
        }
        errors
    }
}

/// Measurement acceptance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Lowest plausible weight.
    pub min_weight_kg: f64,
    /// Highest plausible weight.
    pub max_weight_kg: f64,
    /// Minimum spacing between accepted measurements, in milliseconds.
    pub debounce_ms: u64,
    /// Largest change between samples that still counts as settled.
    pub stability_tolerance_kg: f64,
    /// Settled samples required before a reading is stable.
    pub stability_count: u32,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        let gate = GateConfig::default();
        let stability = StabilityConfig::default();
        Self {
            min_weight_kg: gate.min_weight_kg,
            max_weight_kg: gate.max_weight_kg,
            debounce_ms: gate.debounce.as_millis() as u64,
            stability_tolerance_kg: stability.tolerance_kg,
            stability_count: stability.required_count,
        }
    }
}

impl MeasurementConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.min_weight_kg.is_finite() || self.min_weight_kg < 0.0 {
            errors.push(ValidationError::new(
                "measurement.min_weight_kg",
                format!("{} is not a valid weight", self.min_weight_kg),
            ));
        }
        if !self.max_weight_kg.is_finite() || self.max_weight_kg <= self.min_weight_kg {
            errors.push(ValidationError::new(
                "measurement.max_weight_kg",
                format!(
                    "{} must be greater than min_weight_kg ({})",
                    self.max_weight_kg, self.min_weight_kg
                ),
            ));
        }
        if self.stability_tolerance_kg.is_nan() || self.stability_tolerance_kg <= 0.0 {
            errors.push(ValidationError::new(
                "measurement.stability_tolerance_kg",
                "must be > 0",
            ));
        }
        if self.stability_count == 0 {
            errors.push(ValidationError::new(
                "measurement.stability_count",
                "must be > 0",
            ));
        }
        errors
    }
}

/// Registry location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry file. Defaults to `registry.toml` in the directory of the
    /// configuration file in use, which follows `--config`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `reconnect.max_attempts`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bodyscale")
}

/// File name of the registry when the configuration does not set one.
pub const REGISTRY_FILE_NAME: &str = "registry.toml";

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
