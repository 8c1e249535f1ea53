//! Engine configuration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::gate::GateConfig;
use crate::reconnect::ReconnectOptions;
use crate::stability::StabilityConfig;

/// Everything the engine can be tuned with.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use bodyscale_core::{EngineConfig, ReconnectOptions};
///
/// let config = EngineConfig::default()
///     .scan_timeout(Duration::from_secs(20))
///     .reconnect(ReconnectOptions::new().max_attempts(3));
/// config.validate().expect("valid config");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long a scan may run without finding the target.
    pub scan_timeout: Duration,
    /// Timeout for establishing the link.
    pub connect_timeout: Duration,
    /// Timeout for enabling notifications on one characteristic.
    pub subscribe_timeout: Duration,
    /// Reconnection after an unexpected disconnect.
    pub reconnect: ReconnectOptions,
    /// Plausibility and debounce.
    pub gate: GateConfig,
    /// Stability detection.
    pub stability: StabilityConfig,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Only report discovered devices whose name looks like a scale.
    pub scales_only: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            subscribe_timeout: Duration::from_secs(10),
            reconnect: ReconnectOptions::default(),
            gate: GateConfig::default(),
            stability: StabilityConfig::default(),
            event_capacity: 100,
            scales_only: true,
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan timeout.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the subscribe timeout.
    #[must_use]
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Set the reconnect options.
    #[must_use]
    pub fn reconnect(mut self, options: ReconnectOptions) -> Self {
        self.reconnect = options;
        self
    }

    /// Set the gate tuning.
    #[must_use]
    pub fn gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    /// Set the stability tuning.
    #[must_use]
    pub fn stability(mut self, stability: StabilityConfig) -> Self {
        self.stability = stability;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Report every discovered device, not only scales.
    #[must_use]
    pub fn all_devices(mut self) -> Self {
        self.scales_only = false;
        self
    }

    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("scan_timeout", self.scan_timeout),
            ("connect_timeout", self.connect_timeout),
            ("subscribe_timeout", self.subscribe_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be > 0")));
            }
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        if self.stability.required_count == 0 {
            return Err(Error::invalid_config("stability.required_count must be > 0"));
        }
        if self.stability.tolerance_kg.is_nan() || self.stability.tolerance_kg <= 0.0 {
            return Err(Error::invalid_config("stability.tolerance_kg must be > 0"));
        }
        self.reconnect.validate()?;
        self.gate.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
        assert!(config.scales_only);
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let config = EngineConfig::default().connect_timeout(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connect_timeout"));
    }

    #[test]
    fn test_nested_validation() {
        let config = EngineConfig::default().reconnect(ReconnectOptions::new().max_attempts(0));
        assert!(config.validate().is_err());

        let config = EngineConfig::default().gate(GateConfig::default().weight_range(5.0, 1.0));
        assert!(config.validate().is_err());

        let config = EngineConfig::default().stability(StabilityConfig::default().tolerance_kg(0.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_event_capacity() {
        assert!(EngineConfig::default().event_capacity(0).validate().is_err());
        assert!(EngineConfig::default().event_capacity(8).validate().is_ok());
    }
}
