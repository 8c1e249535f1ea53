//! Detection of a settled weight.
//!
//! A scale streams weights while the user steps on and shifts around. A
//! reading is considered stable when any of the following holds:
//!
//! - the scale set its own stable flag;
//! - the frame carries impedance (body composition scales only measure it
//!   once the weight has settled);
//! - the last `required_count` consecutive samples each differed from their
//!   predecessor by less than `tolerance_kg`.

use bodyscale_types::DecodedReading;

/// Tuning for [`StabilityTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityConfig {
    /// Maximum difference between consecutive samples that still counts as
    /// unchanged (exclusive).
    pub tolerance_kg: f64,
    /// Consecutive unchanged samples required.
    pub required_count: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            tolerance_kg: 0.1,
            required_count: 3,
        }
    }
}

impl StabilityConfig {
    /// Set the tolerance.
    #[must_use]
    pub fn tolerance_kg(mut self, tolerance: f64) -> Self {
        self.tolerance_kg = tolerance;
        self
    }

    /// Set the required count.
    #[must_use]
    pub fn required_count(mut self, count: u32) -> Self {
        self.required_count = count;
        self
    }
}

/// Rolling stability state for one connection session.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    config: StabilityConfig,
    last_weight: Option<f64>,
    stable_count: u32,
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new(StabilityConfig::default())
    }
}

impl StabilityTracker {
    /// Create a tracker with the given tuning.
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            last_weight: None,
            stable_count: 0,
        }
    }

    /// Feed one reading and report whether it is stable.
    pub fn observe(&mut self, reading: &DecodedReading) -> bool {
        let weight = reading.weight_kg;
        self.stable_count = match self.last_weight {
            Some(last) if (weight - last).abs() < self.config.tolerance_kg => {
                self.stable_count.saturating_add(1)
            }
            _ => 0,
        };
        self.last_weight = Some(weight);

        reading.is_stable_flag
            || reading.impedance_ohm.is_some()
            || self.stable_count >= self.config.required_count
    }

    /// Consecutive unchanged samples so far.
    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    /// Last weight seen.
    pub fn last_weight(&self) -> Option<f64> {
        self.last_weight
    }

    /// Forget all samples. Called at the start of each session.
    pub fn reset(&mut self) {
        self.last_weight = None;
        self.stable_count = 0;
    }
}
